//! Graphics state carried through a page render.
//!
//! The state holds everything `q`/`Q` save and restore except the clip,
//! which lives in the device.

use super::color_space::ColorSpace;
use super::font::PdfFont;
use crate::core::parser::PDFObject;
use std::sync::Arc;

/// Affine transform `[a b c d e f]` mapping `(x, y)` to
/// `(a·x + c·y + e, b·x + d·y + f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);

    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Matrix { a, b, c, d, e, f }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Matrix::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Matrix::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// Reads six numbers from operands or a `/Matrix` array.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        match values {
            [a, b, c, d, e, f, ..] if values[..6].iter().all(|v| v.is_finite()) => {
                Some(Matrix::new(*a, *b, *c, *d, *e, *f))
            }
            _ => None,
        }
    }

    pub fn from_object(obj: &PDFObject) -> Option<Self> {
        Matrix::from_values(&obj.as_number_array()?)
    }

    /// The transform applying `self` first and `next` second.
    ///
    /// The `cm` operator is `ctm = m.then(&ctm)`.
    pub fn then(&self, next: &Matrix) -> Matrix {
        Matrix {
            a: self.a * next.a + self.b * next.c,
            b: self.a * next.b + self.b * next.d,
            c: self.c * next.a + self.d * next.c,
            d: self.c * next.b + self.d * next.d,
            e: self.e * next.a + self.f * next.c + next.e,
            f: self.e * next.b + self.f * next.d + next.f,
        }
    }

    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    pub fn invert(&self) -> Option<Matrix> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Matrix {
            a,
            b,
            c,
            d,
            e: -(self.e * a + self.f * c),
            f: -(self.e * b + self.f * d),
        })
    }

    /// Average linear scale, used to keep hairlines visible.
    pub fn expansion(&self) -> f64 {
        self.determinant().abs().sqrt()
    }
}

/// Line cap style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    ProjectingSquare,
}

impl LineCap {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(LineCap::Butt),
            1 => Some(LineCap::Round),
            2 => Some(LineCap::ProjectingSquare),
            _ => None,
        }
    }
}

/// Line join style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineJoin {
    #[default]
    Miter,
    Round,
    Bevel,
}

impl LineJoin {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(LineJoin::Miter),
            1 => Some(LineJoin::Round),
            2 => Some(LineJoin::Bevel),
            _ => None,
        }
    }
}

/// Stroke parameters, all in user space units.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeProps {
    pub line_width: f64,
    pub line_cap: LineCap,
    pub line_join: LineJoin,
    pub miter_limit: f64,
    /// On/off lengths. Empty means a solid line.
    pub dash_array: Vec<f64>,
    pub dash_phase: f64,
}

impl Default for StrokeProps {
    fn default() -> Self {
        StrokeProps {
            line_width: 1.0,
            line_cap: LineCap::default(),
            line_join: LineJoin::default(),
            miter_limit: 10.0,
            dash_array: Vec::new(),
            dash_phase: 0.0,
        }
    }
}

impl StrokeProps {
    /// Installs a dash pattern. Patterns that are all zeros or contain a
    /// negative length mean a solid line.
    pub fn set_dash(&mut self, array: Vec<f64>, phase: f64) {
        let valid = array.iter().all(|v| v.is_finite() && *v >= 0.0) && array.iter().any(|v| *v > 0.0);
        if valid {
            self.dash_array = array;
            self.dash_phase = if phase.is_finite() { phase } else { 0.0 };
        } else {
            self.dash_array.clear();
            self.dash_phase = 0.0;
        }
    }
}

/// A device colour, each component in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Color {
    Gray(f64),
    Rgb(f64, f64, f64),
    Cmyk(f64, f64, f64, f64),
}

impl Default for Color {
    fn default() -> Self {
        Color::Gray(0.0)
    }
}

impl Color {
    pub fn black() -> Self {
        Color::Gray(0.0)
    }

    pub fn white() -> Self {
        Color::Gray(1.0)
    }

    /// Converts to RGB. CMYK uses the naive complement conversion.
    pub fn to_rgb(&self) -> [f64; 3] {
        match *self {
            Color::Gray(g) => {
                let g = g.clamp(0.0, 1.0);
                [g, g, g]
            }
            Color::Rgb(r, g, b) => [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0)],
            Color::Cmyk(c, m, y, k) => {
                let k = k.clamp(0.0, 1.0);
                [
                    (1.0 - c.clamp(0.0, 1.0)) * (1.0 - k),
                    (1.0 - m.clamp(0.0, 1.0)) * (1.0 - k),
                    (1.0 - y.clamp(0.0, 1.0)) * (1.0 - k),
                ]
            }
        }
    }

    /// 8-bit RGB, rounded.
    pub fn to_rgb8(&self) -> [u8; 3] {
        let [r, g, b] = self.to_rgb();
        [
            (r * 255.0).round() as u8,
            (g * 255.0).round() as u8,
            (b * 255.0).round() as u8,
        ]
    }
}

/// Text rendering mode set by `Tr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextRenderingMode {
    #[default]
    Fill,
    Stroke,
    FillStroke,
    Invisible,
    FillClip,
    StrokeClip,
    FillStrokeClip,
    Clip,
}

impl TextRenderingMode {
    pub fn from_i64(value: i64) -> Option<Self> {
        use TextRenderingMode::*;
        [Fill, Stroke, FillStroke, Invisible, FillClip, StrokeClip, FillStrokeClip, Clip]
            .get(usize::try_from(value).ok()?)
            .copied()
    }

    pub fn fills(self) -> bool {
        use TextRenderingMode::*;
        matches!(self, Fill | FillStroke | FillClip | FillStrokeClip)
    }

    pub fn strokes(self) -> bool {
        use TextRenderingMode::*;
        matches!(self, Stroke | FillStroke | StrokeClip | FillStrokeClip)
    }

    pub fn clips(self) -> bool {
        use TextRenderingMode::*;
        matches!(self, FillClip | StrokeClip | FillStrokeClip | Clip)
    }
}

/// Winding rule for fills and clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillRule {
    #[default]
    NonZero,
    EvenOdd,
}

/// Text state parameters (`Tc Tw Tz TL Tf Tr Ts`).
#[derive(Debug, Clone)]
pub struct TextState {
    pub char_spacing: f64,
    pub word_spacing: f64,
    /// `Tz` divided by 100
    pub horizontal_scaling: f64,
    pub leading: f64,
    pub rise: f64,
    pub render_mode: TextRenderingMode,
    pub font: Option<Arc<PdfFont>>,
    pub font_size: f64,
}

impl Default for TextState {
    fn default() -> Self {
        TextState {
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scaling: 1.0,
            leading: 0.0,
            rise: 0.0,
            render_mode: TextRenderingMode::default(),
            font: None,
            font_size: 0.0,
        }
    }
}

/// The state saved by `q` and restored by `Q`.
#[derive(Debug, Clone)]
pub struct GraphicsState {
    pub ctm: Matrix,
    pub fill_space: ColorSpace,
    pub stroke_space: ColorSpace,
    pub fill_color: Color,
    pub stroke_color: Color,
    pub fill_alpha: f64,
    pub stroke_alpha: f64,
    pub stroke: StrokeProps,
    pub text: TextState,
}

impl Default for GraphicsState {
    fn default() -> Self {
        GraphicsState {
            ctm: Matrix::IDENTITY,
            fill_space: ColorSpace::DeviceGray,
            stroke_space: ColorSpace::DeviceGray,
            fill_color: Color::black(),
            stroke_color: Color::black(),
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            stroke: StrokeProps::default(),
            text: TextState::default(),
        }
    }
}

impl GraphicsState {
    pub fn new(ctm: Matrix) -> Self {
        GraphicsState {
            ctm,
            ..Default::default()
        }
    }

    /// Applies `cm`.
    pub fn concat_matrix(&mut self, matrix: &Matrix) {
        self.ctm = matrix.then(&self.ctm);
    }

    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        self.ctm.transform_point(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = GraphicsState::default();
        assert_eq!(state.ctm, Matrix::IDENTITY);
        assert_eq!(state.fill_color, Color::black());
        assert_eq!(state.stroke.line_width, 1.0);
        assert_eq!(state.text.horizontal_scaling, 1.0);
    }

    #[test]
    fn test_concat_matrix_applies_new_matrix_first() {
        let mut state = GraphicsState::default();
        state.concat_matrix(&Matrix::translate(10.0, 20.0));
        state.concat_matrix(&Matrix::scale(2.0, 2.0));

        // The scale is applied in the translated space.
        assert_eq!(state.transform_point(1.0, 1.0), (12.0, 22.0));
    }

    #[test]
    fn test_invert() {
        let m = Matrix::new(2.0, 0.0, 0.0, 4.0, 10.0, 20.0);
        let inv = m.invert().unwrap();
        let (x, y) = m.transform_point(3.0, 5.0);
        assert_eq!(inv.transform_point(x, y), (3.0, 5.0));
        assert!(Matrix::scale(0.0, 1.0).invert().is_none());
    }

    #[test]
    fn test_cmyk_to_rgb() {
        assert_eq!(Color::Cmyk(0.0, 0.0, 0.0, 1.0).to_rgb8(), [0, 0, 0]);
        assert_eq!(Color::Cmyk(1.0, 0.0, 0.0, 0.0).to_rgb8(), [0, 255, 255]);
        assert_eq!(Color::Gray(2.0).to_rgb8(), [255, 255, 255]);
    }

    #[test]
    fn test_invalid_dash_is_solid() {
        let mut stroke = StrokeProps::default();
        stroke.set_dash(vec![3.0, 2.0], 1.0);
        assert_eq!(stroke.dash_array, vec![3.0, 2.0]);
        stroke.set_dash(vec![0.0, 0.0], 0.0);
        assert!(stroke.dash_array.is_empty());
        stroke.set_dash(vec![-1.0, 2.0], 0.0);
        assert!(stroke.dash_array.is_empty());
    }

    #[test]
    fn test_text_rendering_mode() {
        assert_eq!(TextRenderingMode::from_i64(3), Some(TextRenderingMode::Invisible));
        assert_eq!(TextRenderingMode::from_i64(8), None);
        assert!(TextRenderingMode::FillStrokeClip.clips());
        assert!(!TextRenderingMode::Invisible.fills());
    }
}
