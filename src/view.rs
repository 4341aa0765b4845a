//! Document handle: open, query page geometry, render, release.
//!
//! [`PdfView`] owns one [`PDFDocument`] and everything cached for it. Once
//! [`PdfView::release`] has run, every call fails with
//! [`PDFError::InvalidHandle`].

use crate::core::document::PDFDocument;
use crate::core::error::{PDFError, PDFResult};
use crate::core::options::EngineOptions;
use crate::core::page::{normalize_rotation, Page, Rect};
use crate::rendering::context::RenderingContext;
use crate::rendering::device::Device;
use crate::rendering::graphics_state::{FillRule, Matrix};
use crate::rendering::path::Path;
use crate::rendering::raster_device::RasterDevice;
use std::path::Path as FsPath;
use tracing::{info, instrument, warn};

#[cfg(unix)]
use std::os::fd::BorrowedFd;

/// Largest bitmap a single render may produce.
pub const MAX_RENDER_PIXELS: u64 = 1 << 26;

/// What to render: a `width × height` window at `(left, top)` into the
/// page laid out at `zoom` device pixels per point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub zoom: f64,
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
    /// Extra clockwise rotation in degrees, added to the page's `/Rotate`
    pub rotation: i32,
}

impl RenderRequest {
    /// The top-left `width × height` window at zoom 1.
    pub fn new(width: u32, height: u32) -> Self {
        RenderRequest {
            zoom: 1.0,
            left: 0,
            top: 0,
            width,
            height,
            rotation: 0,
        }
    }

    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_origin(mut self, left: i32, top: i32) -> Self {
        self.left = left;
        self.top = top;
        self
    }

    pub fn with_rotation(mut self, rotation: i32) -> Self {
        self.rotation = rotation;
        self
    }

    fn validate(&self) -> PDFResult<()> {
        if !self.zoom.is_finite() || self.zoom <= 0.0 {
            return Err(PDFError::InvalidArgument(format!("zoom must be positive, got {}", self.zoom)));
        }
        if self.width == 0 || self.height == 0 {
            return Err(PDFError::InvalidArgument(format!(
                "render size {}x{} is empty",
                self.width, self.height
            )));
        }
        if u64::from(self.width) * u64::from(self.height) > MAX_RENDER_PIXELS {
            return Err(PDFError::InvalidArgument(format!(
                "render size {}x{} is too large",
                self.width, self.height
            )));
        }
        if self.rotation % 90 != 0 {
            return Err(PDFError::InvalidArgument(format!(
                "rotation must be a multiple of 90, got {}",
                self.rotation
            )));
        }
        Ok(())
    }
}

/// A rendered page: one `0xAARRGGBB` pixel per `u32`, not premultiplied,
/// rows top to bottom with no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl RasterBuffer {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u32> {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y as usize * self.width as usize + x as usize).copied()
    }

    /// The pixels as `R, G, B, A` bytes, the layout image encoders take.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|argb| {
                let [a, r, g, b] = argb.to_be_bytes();
                [r, g, b, a]
            })
            .collect()
    }
}

/// Maps default user space of a page to device pixels: flip to top-down,
/// rotate clockwise by `rotation`, scale by `scale` and move the crop
/// origin to (0, 0).
pub fn page_transform(view_box: &Rect, rotation: u16, scale: f64, left: f64, top: f64) -> Matrix {
    let Rect { x0, y0, x1, y1 } = *view_box;
    let oriented = match rotation {
        90 => Matrix::new(0.0, 1.0, 1.0, 0.0, -y0, -x0),
        180 => Matrix::new(-1.0, 0.0, 0.0, 1.0, x1, -y0),
        270 => Matrix::new(0.0, -1.0, -1.0, 0.0, y1, x1),
        _ => Matrix::new(1.0, 0.0, 0.0, -1.0, -x0, y1),
    };
    oriented
        .then(&Matrix::scale(scale, scale))
        .then(&Matrix::translate(-left, -top))
}

/// An open document.
pub struct PdfView {
    document: Option<PDFDocument>,
}

impl PdfView {
    pub fn open_bytes(data: Vec<u8>, options: &EngineOptions) -> PDFResult<Self> {
        Ok(Self::from_document(PDFDocument::open_bytes(data, options)?))
    }

    /// Opens a file. Only the chunks parsing and rendering touch are read.
    pub fn open_path<P: AsRef<FsPath>>(path: P, options: &EngineOptions) -> PDFResult<Self> {
        Ok(Self::from_document(PDFDocument::open_path(path, options)?))
    }

    /// Opens an already open file. The caller keeps ownership of `fd`.
    #[cfg(unix)]
    pub fn open_fd(fd: BorrowedFd<'_>, options: &EngineOptions) -> PDFResult<Self> {
        Ok(Self::from_document(PDFDocument::open_fd(fd, options)?))
    }

    pub fn from_document(document: PDFDocument) -> Self {
        PdfView {
            document: Some(document),
        }
    }

    pub fn document(&self) -> PDFResult<&PDFDocument> {
        self.document.as_ref().ok_or(PDFError::InvalidHandle)
    }

    fn document_mut(&mut self) -> PDFResult<&mut PDFDocument> {
        self.document.as_mut().ok_or(PDFError::InvalidHandle)
    }

    pub fn is_released(&self) -> bool {
        self.document.is_none()
    }

    pub fn page_count(&self) -> PDFResult<usize> {
        Ok(self.document()?.page_count())
    }

    /// Width and height of page `index` in points, after `/Rotate` and
    /// `/UserUnit`.
    pub fn page_size(&self, index: usize) -> PDFResult<(f64, f64)> {
        Ok(self.document()?.page(index)?.size())
    }

    /// Renders page `index`.
    ///
    /// Content that fails to parse or draw leaves the page partly drawn;
    /// only a bad request or a released handle is an error.
    #[instrument(skip(self, request), fields(zoom = request.zoom, width = request.width, height = request.height))]
    pub fn render_page(&mut self, index: usize, request: &RenderRequest) -> PDFResult<RasterBuffer> {
        let document = self.document_mut()?;
        let page: Page = document.page(index)?.clone();
        request.validate()?;

        let options = document.options();
        let (anti_alias, background, max_form_depth) =
            (options.anti_alias, options.background, options.max_form_depth);

        let view_box = page.view_box();
        let rotation = normalize_rotation(i64::from(page.rotation()) + i64::from(request.rotation));
        let base = page_transform(
            &view_box,
            rotation,
            request.zoom * page.user_unit(),
            f64::from(request.left),
            f64::from(request.top),
        );

        let device = RasterDevice::new(request.width, request.height, background, anti_alias)?;
        let mut ctx = RenderingContext::new(device, document.xref_mut(), base)
            .with_max_form_depth(max_form_depth)
            .with_device_size(request.width, request.height);

        // Nothing outside the visible page box is drawn.
        let mut page_area = Path::new();
        page_area.rect(view_box.x0, view_box.y0, view_box.width(), view_box.height());
        ctx.device().clip_path(&page_area, &base, FillRule::NonZero)?;

        if let Err(e) = ctx.execute_page(&page) {
            warn!(page = index, "page content failed, output is partial: {e}");
        }
        let (operations, failed) = ctx.stats();
        info!(page = index, operations, failed, "rendered page");

        let device = ctx.into_device();
        Ok(RasterBuffer {
            width: device.width(),
            height: device.height(),
            pixels: device.into_argb(),
        })
    }

    /// Drops the document and its caches. Releasing twice is a no-op.
    pub fn release(&mut self) {
        if self.document.take().is_some() {
            tracing::debug!("released document");
        }
    }
}

impl Drop for PdfView {
    fn drop(&mut self) {
        self.release();
    }
}
