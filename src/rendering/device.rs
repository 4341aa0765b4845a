//! Device trait for rendering backend abstraction.
//!
//! The interpreter resolves all state (colours, line style, text placement)
//! and hands the device finished paths with their full transform to device
//! pixels. A device only has to scan-convert, clip and composite.

use super::graphics_state::{Color, FillRule, Matrix, StrokeProps};
use super::path::Path;
use crate::core::error::PDFResult;

/// Solid paint with constant opacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paint {
    pub color: Color,
    /// 0.0 (transparent) to 1.0 (opaque)
    pub alpha: f64,
}

impl Paint {
    pub fn new(color: Color, alpha: f64) -> Self {
        Paint {
            color,
            alpha: alpha.clamp(0.0, 1.0),
        }
    }

    pub fn black() -> Self {
        Paint::new(Color::black(), 1.0)
    }
}

impl Default for Paint {
    fn default() -> Self {
        Paint::black()
    }
}

/// Decoded image ready for compositing: non-premultiplied RGBA, rows top
/// to bottom. It is drawn into the unit square of its transform, with the
/// first row at y = 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl ImageData {
    /// Returns `None` when the buffer does not hold `width × height` pixels.
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Option<Self> {
        let expected = (width as usize).checked_mul(height as usize)?.checked_mul(4)?;
        (width > 0 && height > 0 && rgba.len() == expected).then_some(ImageData { width, height, rgba })
    }
}

/// A target for the content stream interpreter.
pub trait Device {
    /// Pushes the clip state.
    fn save_state(&mut self);

    /// Pops the clip state. Unbalanced pops are ignored.
    fn restore_state(&mut self);

    fn fill_path(&mut self, path: &Path, transform: &Matrix, rule: FillRule, paint: &Paint) -> PDFResult<()>;

    /// Strokes `path`. Line widths and dashes are in the units of `path`
    /// and scale with `transform`.
    fn stroke_path(&mut self, path: &Path, transform: &Matrix, stroke: &StrokeProps, paint: &Paint)
    -> PDFResult<()>;

    /// Intersects the current clip with `path`.
    fn clip_path(&mut self, path: &Path, transform: &Matrix, rule: FillRule) -> PDFResult<()>;

    /// Composites `image` mapped from the unit square through `transform`.
    fn draw_image(&mut self, image: &ImageData, transform: &Matrix, alpha: f64) -> PDFResult<()>;
}

/// A device that records operations as strings for tests.
#[derive(Debug, Default)]
pub struct TestDevice {
    depth: usize,
    operations: Vec<String>,
}

impl TestDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operations(&self) -> &[String] {
        &self.operations
    }

    /// Current save nesting.
    pub fn depth(&self) -> usize {
        self.depth
    }

    fn matrix(m: &Matrix) -> String {
        format!("[{} {} {} {} {} {}]", m.a, m.b, m.c, m.d, m.e, m.f)
    }
}

impl Device for TestDevice {
    fn save_state(&mut self) {
        self.depth += 1;
        self.operations.push("save".to_string());
    }

    fn restore_state(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.operations.push("restore".to_string());
    }

    fn fill_path(&mut self, path: &Path, transform: &Matrix, rule: FillRule, paint: &Paint) -> PDFResult<()> {
        self.operations.push(format!(
            "fill({:?}, {:?}, {}, {})",
            rule,
            paint.color.to_rgb8(),
            Self::matrix(transform),
            path
        ));
        Ok(())
    }

    fn stroke_path(
        &mut self,
        path: &Path,
        transform: &Matrix,
        stroke: &StrokeProps,
        paint: &Paint,
    ) -> PDFResult<()> {
        self.operations.push(format!(
            "stroke({}, {:?}, {}, {})",
            stroke.line_width,
            paint.color.to_rgb8(),
            Self::matrix(transform),
            path
        ));
        Ok(())
    }

    fn clip_path(&mut self, path: &Path, transform: &Matrix, rule: FillRule) -> PDFResult<()> {
        self.operations
            .push(format!("clip({:?}, {}, {})", rule, Self::matrix(transform), path));
        Ok(())
    }

    fn draw_image(&mut self, image: &ImageData, transform: &Matrix, alpha: f64) -> PDFResult<()> {
        self.operations.push(format!(
            "image({}x{}, {}, {})",
            image.width,
            image.height,
            Self::matrix(transform),
            alpha
        ));
        Ok(())
    }
}
