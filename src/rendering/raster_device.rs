//! A tiny-skia based rendering device.

use super::device::{Device, ImageData, Paint};
use super::graphics_state::{FillRule, LineCap, LineJoin, Matrix, StrokeProps};
use super::path::{Path, PathElement};
use crate::core::error::{PDFError, PDFResult};
use tiny_skia::{
    FillRule as SkiaFillRule, FilterQuality, LineCap as SkiaLineCap, LineJoin as SkiaLineJoin, Mask,
    Paint as SkiaPaint, PathBuilder, Pixmap, PixmapPaint, PremultipliedColorU8, Stroke, StrokeDash,
    Transform,
};

// --- Conversion helpers ---

fn to_transform(m: &Matrix) -> Option<Transform> {
    let values = [m.a, m.b, m.c, m.d, m.e, m.f];
    if values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(Transform::from_row(
        m.a as f32, m.b as f32, m.c as f32, m.d as f32, m.e as f32, m.f as f32,
    ))
}

fn to_skia_path(path: &Path) -> Option<tiny_skia::Path> {
    let mut builder = PathBuilder::new();
    for element in path.elements() {
        match *element {
            PathElement::MoveTo(x, y) => builder.move_to(x as f32, y as f32),
            PathElement::LineTo(x, y) => builder.line_to(x as f32, y as f32),
            PathElement::CurveTo(x1, y1, x2, y2, x, y) => {
                builder.cubic_to(x1 as f32, y1 as f32, x2 as f32, y2 as f32, x as f32, y as f32)
            }
            PathElement::ClosePath => builder.close(),
        }
    }
    builder.finish()
}

fn to_skia_fill_rule(rule: FillRule) -> SkiaFillRule {
    match rule {
        FillRule::NonZero => SkiaFillRule::Winding,
        FillRule::EvenOdd => SkiaFillRule::EvenOdd,
    }
}

fn to_skia_line_cap(cap: LineCap) -> SkiaLineCap {
    match cap {
        LineCap::Butt => SkiaLineCap::Butt,
        LineCap::Round => SkiaLineCap::Round,
        LineCap::ProjectingSquare => SkiaLineCap::Square,
    }
}

fn to_skia_line_join(join: LineJoin) -> SkiaLineJoin {
    match join {
        LineJoin::Miter => SkiaLineJoin::Miter,
        LineJoin::Round => SkiaLineJoin::Round,
        LineJoin::Bevel => SkiaLineJoin::Bevel,
    }
}

/// Builds the stroke. Lines thinner than one device pixel become
/// hairlines so they stay visible at any zoom.
fn to_skia_stroke(props: &StrokeProps, transform: &Matrix) -> Stroke {
    let expansion = transform.expansion();
    let width = if props.line_width * expansion < 1.0 {
        0.0
    } else {
        props.line_width as f32
    };
    // An odd-length dash array repeats to make on/off pairs.
    let dash = if props.dash_array.is_empty() {
        None
    } else {
        let mut array: Vec<f32> = props.dash_array.iter().map(|v| *v as f32).collect();
        if array.len() % 2 == 1 {
            array.extend_from_within(..);
        }
        StrokeDash::new(array, props.dash_phase as f32)
    };
    Stroke {
        width,
        miter_limit: props.miter_limit.max(1.0) as f32,
        line_cap: to_skia_line_cap(props.line_cap),
        line_join: to_skia_line_join(props.line_join),
        dash,
    }
}

/// Renders into an RGBA pixmap. The clip is a coverage mask per saved
/// state; `None` means unclipped.
pub struct RasterDevice {
    pixmap: Pixmap,
    clip_stack: Vec<Option<Mask>>,
    anti_alias: bool,
}

impl RasterDevice {
    /// Creates a device filled with `background` (`0xAARRGGBB`).
    pub fn new(width: u32, height: u32, background: u32, anti_alias: bool) -> PDFResult<Self> {
        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| PDFError::InvalidArgument(format!("invalid raster size {}x{}", width, height)))?;
        let [a, r, g, b] = background.to_be_bytes();
        pixmap.fill(tiny_skia::Color::from_rgba8(r, g, b, a));
        Ok(RasterDevice {
            pixmap,
            clip_stack: vec![None],
            anti_alias,
        })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Pixel at (x, y) as `0xAARRGGBB`, non-premultiplied.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        self.pixmap.pixel(x, y).map(pack_argb)
    }

    /// All pixels as `0xAARRGGBB`, rows top to bottom.
    pub fn into_argb(self) -> Vec<u32> {
        self.pixmap.pixels().iter().copied().map(pack_argb).collect()
    }

    fn skia_paint(&self, paint: &Paint) -> SkiaPaint<'static> {
        let [r, g, b] = paint.color.to_rgb8();
        let a = (paint.alpha * 255.0).round() as u8;
        let mut skia_paint = SkiaPaint::default();
        skia_paint.set_color_rgba8(r, g, b, a);
        skia_paint.anti_alias = self.anti_alias;
        skia_paint
    }
}

fn pack_argb(pixel: PremultipliedColorU8) -> u32 {
    let color = pixel.demultiply();
    u32::from_be_bytes([color.alpha(), color.red(), color.green(), color.blue()])
}

impl Device for RasterDevice {
    fn save_state(&mut self) {
        let current = self.clip_stack.last().cloned().flatten();
        self.clip_stack.push(current);
    }

    fn restore_state(&mut self) {
        if self.clip_stack.len() > 1 {
            self.clip_stack.pop();
        }
    }

    fn fill_path(&mut self, path: &Path, transform: &Matrix, rule: FillRule, paint: &Paint) -> PDFResult<()> {
        let (Some(path), Some(transform)) = (to_skia_path(path), to_transform(transform)) else {
            return Ok(());
        };
        let paint = self.skia_paint(paint);
        let clip = self.clip_stack.last().and_then(Option::as_ref);
        self.pixmap
            .fill_path(&path, &paint, to_skia_fill_rule(rule), transform, clip);
        Ok(())
    }

    fn stroke_path(
        &mut self,
        path: &Path,
        transform: &Matrix,
        stroke: &StrokeProps,
        paint: &Paint,
    ) -> PDFResult<()> {
        let (Some(skia_path), Some(skia_transform)) = (to_skia_path(path), to_transform(transform)) else {
            return Ok(());
        };
        let stroke = to_skia_stroke(stroke, transform);
        let paint = self.skia_paint(paint);
        let clip = self.clip_stack.last().and_then(Option::as_ref);
        self.pixmap
            .stroke_path(&skia_path, &paint, &stroke, skia_transform, clip);
        Ok(())
    }

    fn clip_path(&mut self, path: &Path, transform: &Matrix, rule: FillRule) -> PDFResult<()> {
        let (width, height) = (self.pixmap.width(), self.pixmap.height());
        let anti_alias = self.anti_alias;
        let skia_path = to_skia_path(path);
        let skia_transform = to_transform(transform);

        let current = self.clip_stack.last_mut().ok_or_else(|| PDFError::Rendering("empty clip stack".into()))?;
        let mask = match (skia_path, skia_transform, current.take()) {
            (Some(path), Some(transform), Some(mut mask)) => {
                mask.intersect_path(&path, to_skia_fill_rule(rule), anti_alias, transform);
                mask
            }
            (Some(path), Some(transform), None) => {
                let mut mask = Mask::new(width, height)
                    .ok_or_else(|| PDFError::Rendering("cannot allocate clip mask".into()))?;
                mask.fill_path(&path, to_skia_fill_rule(rule), anti_alias, transform);
                mask
            }
            // An empty clip path hides everything that follows.
            _ => Mask::new(width, height).ok_or_else(|| PDFError::Rendering("cannot allocate clip mask".into()))?,
        };
        *current = Some(mask);
        Ok(())
    }

    fn draw_image(&mut self, image: &ImageData, transform: &Matrix, alpha: f64) -> PDFResult<()> {
        let mut source = Pixmap::new(image.width, image.height)
            .ok_or_else(|| PDFError::Rendering(format!("invalid image size {}x{}", image.width, image.height)))?;
        for (dst, px) in source.pixels_mut().iter_mut().zip(image.rgba.chunks_exact(4)) {
            *dst = tiny_skia::ColorU8::from_rgba(px[0], px[1], px[2], px[3]).premultiply();
        }

        // Image space: one unit per sample, first row at the top of the
        // unit square.
        let unit = Matrix::new(
            1.0 / f64::from(image.width),
            0.0,
            0.0,
            -1.0 / f64::from(image.height),
            0.0,
            1.0,
        );
        let Some(skia_transform) = to_transform(&unit.then(transform)) else {
            return Ok(());
        };
        let paint = PixmapPaint {
            opacity: alpha.clamp(0.0, 1.0) as f32,
            quality: if self.anti_alias {
                FilterQuality::Bilinear
            } else {
                FilterQuality::Nearest
            },
            ..PixmapPaint::default()
        };
        let clip = self.clip_stack.last().and_then(Option::as_ref);
        self.pixmap
            .draw_pixmap(0, 0, source.as_ref(), &paint, skia_transform, clip);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::graphics_state::Color;

    const WHITE: u32 = 0xFFFF_FFFF;
    const RED: u32 = 0xFFFF_0000;

    fn square(x: f64, y: f64, size: f64) -> Path {
        let mut path = Path::new();
        path.rect(x, y, size, size);
        path
    }

    fn red() -> Paint {
        Paint::new(Color::Rgb(1.0, 0.0, 0.0), 1.0)
    }

    #[test]
    fn test_background_fill() {
        let device = RasterDevice::new(4, 3, 0xFF00_00FF, true).unwrap();
        let pixels = device.into_argb();
        assert_eq!(pixels.len(), 12);
        assert!(pixels.iter().all(|p| *p == 0xFF00_00FF));
    }

    #[test]
    fn test_zero_size_rejected() {
        let err = RasterDevice::new(0, 10, WHITE, true).err().unwrap();
        assert_eq!(err.code(), crate::core::error::ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_fill_rect() {
        let mut device = RasterDevice::new(10, 10, WHITE, false).unwrap();
        device
            .fill_path(&square(2.0, 2.0, 4.0), &Matrix::IDENTITY, FillRule::NonZero, &red())
            .unwrap();
        assert_eq!(device.pixel(3, 3), Some(RED));
        assert_eq!(device.pixel(8, 8), Some(WHITE));
    }

    #[test]
    fn test_clip_limits_fill_and_restores() {
        let mut device = RasterDevice::new(10, 10, WHITE, false).unwrap();
        device.save_state();
        device
            .clip_path(&square(0.0, 0.0, 5.0), &Matrix::IDENTITY, FillRule::NonZero)
            .unwrap();
        device
            .fill_path(&square(0.0, 0.0, 10.0), &Matrix::IDENTITY, FillRule::NonZero, &red())
            .unwrap();
        device.restore_state();
        assert_eq!(device.pixel(2, 2), Some(RED));
        assert_eq!(device.pixel(7, 7), Some(WHITE));

        device
            .fill_path(&square(6.0, 6.0, 3.0), &Matrix::IDENTITY, FillRule::NonZero, &red())
            .unwrap();
        assert_eq!(device.pixel(7, 7), Some(RED));
    }

    #[test]
    fn test_empty_clip_hides_everything() {
        let mut device = RasterDevice::new(4, 4, WHITE, false).unwrap();
        device.clip_path(&Path::new(), &Matrix::IDENTITY, FillRule::NonZero).unwrap();
        device
            .fill_path(&square(0.0, 0.0, 4.0), &Matrix::IDENTITY, FillRule::NonZero, &red())
            .unwrap();
        assert_eq!(device.pixel(1, 1), Some(WHITE));
    }

    #[test]
    fn test_draw_image_fills_unit_square() {
        let mut device = RasterDevice::new(4, 4, WHITE, false).unwrap();
        let image = ImageData::new(1, 1, vec![0, 0, 255, 255]).unwrap();
        device
            .draw_image(&image, &Matrix::new(2.0, 0.0, 0.0, 2.0, 1.0, 1.0), 1.0)
            .unwrap();
        assert_eq!(device.pixel(1, 1), Some(0xFF00_00FF));
        assert_eq!(device.pixel(2, 2), Some(0xFF00_00FF));
        assert_eq!(device.pixel(0, 0), Some(WHITE));
        assert_eq!(device.pixel(3, 3), Some(WHITE));
    }

    #[test]
    fn test_dashed_hairline_stroke_draws() {
        let mut device = RasterDevice::new(20, 5, WHITE, false).unwrap();
        let mut line = Path::new();
        line.move_to(0.0, 2.5);
        line.line_to(20.0, 2.5);
        let mut props = StrokeProps::default();
        props.line_width = 0.0;
        props.set_dash(vec![4.0], 0.0);
        device.stroke_path(&line, &Matrix::IDENTITY, &props, &red()).unwrap();
        let row: Vec<u32> = (0..20).map(|x| device.pixel(x, 2).unwrap()).collect();
        assert!(row.contains(&RED));
        assert!(row.contains(&WHITE));
    }
}
