//! Content stream interpretation.
//!
//! [`RenderingContext`] walks the operations of a page (and of the form
//! XObjects and Type 3 glyphs it draws), keeps the graphics state stack and
//! the path under construction, and hands finished paths and images to a
//! [`Device`] with their full transform to device space.
//!
//! Operator failures are local: a bad operand, a missing resource or a
//! broken image is logged and the next operation runs.

use super::color_space::ColorSpace;
use super::device::{Device, Paint};
use super::font::{FontKind, PdfFont, Type3Glyphs};
use super::graphics_state::{
    Color, FillRule, GraphicsState, LineCap, LineJoin, Matrix, TextRenderingMode,
};
use super::image::decode_image;
use super::path::Path;
use crate::core::content_stream::{ContentStreamReader, OpCode, Operation};
use crate::core::decode::DecodedStream;
use crate::core::error::{PDFError, PDFResult};
use crate::core::page::{Page, Rect};
use crate::core::parser::{Dict, PDFObject, PdfStream, Ref};
use crate::core::xref::XRef;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default limit on nested forms and Type 3 glyphs.
const DEFAULT_MAX_FORM_DEPTH: usize = 12;

/// Half-extent of the area painted by `sh` when the device size is unknown.
const UNBOUNDED_SHADING: f64 = 1.0e4;

/// Interprets content streams against a device.
///
/// The initial CTM is the transform from default user space to device
/// pixels, so every device call receives a complete device transform.
pub struct RenderingContext<'a, D: Device> {
    device: D,
    xref: &'a mut XRef,

    state: GraphicsState,
    saved: Vec<GraphicsState>,

    path: Path,
    /// Clip requested by `W`/`W*`, applied by the next painting operator
    pending_clip: Option<FillRule>,

    text_matrix: Matrix,
    line_matrix: Matrix,
    /// Device-space outlines of text shown with a clipping render mode
    text_clip: Option<Path>,

    resources: Option<Dict>,
    fonts: FxHashMap<Ref, Arc<PdfFont>>,

    /// Forms currently executing, for the self-reference guard
    form_stack: Vec<Ref>,
    form_depth: usize,
    max_form_depth: usize,

    device_size: Option<(f64, f64)>,

    executed: usize,
    failed: usize,
}

impl<'a, D: Device> RenderingContext<'a, D> {
    /// Creates a context whose user space maps to the device through `base`.
    pub fn new(device: D, xref: &'a mut XRef, base: Matrix) -> Self {
        RenderingContext {
            device,
            xref,
            state: GraphicsState::new(base),
            saved: Vec::new(),
            path: Path::new(),
            pending_clip: None,
            text_matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            text_clip: None,
            resources: None,
            fonts: FxHashMap::default(),
            form_stack: Vec::new(),
            form_depth: 0,
            max_form_depth: DEFAULT_MAX_FORM_DEPTH,
            device_size: None,
            executed: 0,
            failed: 0,
        }
    }

    pub fn with_max_form_depth(mut self, depth: usize) -> Self {
        self.max_form_depth = depth;
        self
    }

    /// Device extent in pixels, the area `sh` paints when the shading has
    /// no `/BBox`.
    pub fn with_device_size(mut self, width: u32, height: u32) -> Self {
        self.device_size = Some((f64::from(width), f64::from(height)));
        self
    }

    pub fn device(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    pub fn state(&self) -> &GraphicsState {
        &self.state
    }

    /// Operations run so far and how many of them failed.
    pub fn stats(&self) -> (usize, usize) {
        (self.executed, self.failed)
    }

    /// Runs the page's content streams, concatenated in order.
    ///
    /// Parts that fail to decode, or use a filter that is not supported,
    /// are left out; the rest of the page still draws.
    pub fn execute_page(&mut self, page: &Page) -> PDFResult<()> {
        let Some(contents) = page.contents().cloned() else {
            debug!(page = page.index(), "page has no contents");
            return Ok(());
        };
        let parts = match self.xref.fetch_if_ref(&contents)? {
            PDFObject::Array(items) => items,
            _ => vec![contents],
        };

        let mut content = Vec::new();
        for part in &parts {
            match self.xref.decoded_stream(part) {
                Ok(decoded) if decoded.is_skipped() => {
                    warn!(
                        page = page.index(),
                        filter = decoded.skipped.as_deref().unwrap_or_default(),
                        "content stream filter not supported, treating the stream as empty"
                    );
                }
                Ok(decoded) => {
                    content.extend_from_slice(&decoded.data);
                    // Operators may not span streams.
                    content.push(b'\n');
                }
                Err(e) => warn!(page = page.index(), "skipping unreadable content stream: {e}"),
            }
        }

        self.execute_content(content, page.resources().cloned())?;
        debug!(
            page = page.index(),
            operations = self.executed,
            failed = self.failed,
            "page content executed"
        );
        Ok(())
    }

    /// Runs one decoded content stream with `resources` in scope. Saves left
    /// open by the stream are closed when it ends.
    pub fn execute_content(&mut self, content: Vec<u8>, resources: Option<Dict>) -> PDFResult<()> {
        let outer = std::mem::replace(&mut self.resources, resources);
        let depth = self.saved.len();
        let result = self.run(Arc::new(content));
        self.restore_to(depth);
        self.resources = outer;
        result
    }

    fn run(&mut self, content: Arc<Vec<u8>>) -> PDFResult<()> {
        for op in ContentStreamReader::from_shared(content)? {
            self.executed += 1;
            if let Err(e) = self.process_operation(&op) {
                self.failed += 1;
                debug!(op = %op.op, "skipping operator: {e}");
            }
        }
        Ok(())
    }

    /// Applies one operation.
    pub fn process_operation(&mut self, op: &Operation) -> PDFResult<()> {
        match op.op {
            // General graphics state
            OpCode::Save => self.save(),
            OpCode::Restore => self.restore(),
            OpCode::Transform => {
                let m = Matrix::from_values(&numbers::<6>(op)?)
                    .ok_or_else(|| PDFError::content_stream_error("cm with a non-finite matrix"))?;
                self.state.concat_matrix(&m);
            }
            OpCode::SetLineWidth => self.state.stroke.line_width = numbers::<1>(op)?[0],
            OpCode::SetLineCap => {
                let [v] = numbers::<1>(op)?;
                self.state.stroke.line_cap = LineCap::from_i64(v as i64)
                    .ok_or_else(|| PDFError::content_stream_error(format!("invalid line cap {v}")))?;
            }
            OpCode::SetLineJoin => {
                let [v] = numbers::<1>(op)?;
                self.state.stroke.line_join = LineJoin::from_i64(v as i64)
                    .ok_or_else(|| PDFError::content_stream_error(format!("invalid line join {v}")))?;
            }
            OpCode::SetMiterLimit => self.state.stroke.miter_limit = numbers::<1>(op)?[0],
            OpCode::SetDash => self.set_dash(op)?,
            OpCode::SetRenderingIntent | OpCode::SetFlatness => {}
            OpCode::SetGState => self.set_graphics_state(name_operand(op)?)?,

            // Path construction
            OpCode::MoveTo => {
                let [x, y] = numbers::<2>(op)?;
                self.path.move_to(x, y);
            }
            OpCode::LineTo => {
                let [x, y] = numbers::<2>(op)?;
                self.path.line_to(x, y);
            }
            OpCode::CurveTo => {
                let [x1, y1, x2, y2, x3, y3] = numbers::<6>(op)?;
                self.path.curve_to(x1, y1, x2, y2, x3, y3);
            }
            OpCode::CurveTo2 => {
                let [x2, y2, x3, y3] = numbers::<4>(op)?;
                let (x1, y1) = self.current_point(op)?;
                self.path.curve_to(x1, y1, x2, y2, x3, y3);
            }
            OpCode::CurveTo3 => {
                let [x1, y1, x3, y3] = numbers::<4>(op)?;
                self.path.curve_to(x1, y1, x3, y3, x3, y3);
            }
            OpCode::ClosePath => self.path.close_path(),
            OpCode::Rectangle => {
                let [x, y, w, h] = numbers::<4>(op)?;
                self.path.rect(x, y, w, h);
            }

            // Path painting
            OpCode::Stroke => self.paint_path(false, None, true)?,
            OpCode::CloseStroke => self.paint_path(true, None, true)?,
            OpCode::Fill => self.paint_path(false, Some(FillRule::NonZero), false)?,
            OpCode::EOFill => self.paint_path(false, Some(FillRule::EvenOdd), false)?,
            OpCode::FillStroke => self.paint_path(false, Some(FillRule::NonZero), true)?,
            OpCode::EOFillStroke => self.paint_path(false, Some(FillRule::EvenOdd), true)?,
            OpCode::CloseFillStroke => self.paint_path(true, Some(FillRule::NonZero), true)?,
            OpCode::CloseEOFillStroke => self.paint_path(true, Some(FillRule::EvenOdd), true)?,
            OpCode::EndPath => self.paint_path(false, None, false)?,

            OpCode::Clip => self.pending_clip = Some(FillRule::NonZero),
            OpCode::EOClip => self.pending_clip = Some(FillRule::EvenOdd),

            // Text objects
            OpCode::BeginText => {
                self.text_matrix = Matrix::IDENTITY;
                self.line_matrix = Matrix::IDENTITY;
                self.text_clip = None;
            }
            OpCode::EndText => {
                if let Some(clip) = self.text_clip.take() {
                    self.device.clip_path(&clip, &Matrix::IDENTITY, FillRule::NonZero)?;
                }
            }

            // Text state
            OpCode::SetCharSpacing => self.state.text.char_spacing = numbers::<1>(op)?[0],
            OpCode::SetWordSpacing => self.state.text.word_spacing = numbers::<1>(op)?[0],
            OpCode::SetHScale => self.state.text.horizontal_scaling = numbers::<1>(op)?[0] / 100.0,
            OpCode::SetLeading => self.state.text.leading = numbers::<1>(op)?[0],
            OpCode::SetFont => {
                let [size] = numbers::<1>(op)?;
                self.state.text.font_size = size;
                let name = name_operand(op)?;
                let font = self.resource("Font", name)?;
                self.state.text.font = Some(self.load_font(&font)?);
            }
            OpCode::SetTextRenderingMode => {
                let [mode] = numbers::<1>(op)?;
                self.state.text.render_mode = TextRenderingMode::from_i64(mode as i64)
                    .ok_or_else(|| PDFError::content_stream_error(format!("invalid text rendering mode {mode}")))?;
            }
            OpCode::SetTextRise => self.state.text.rise = numbers::<1>(op)?[0],

            // Text positioning
            OpCode::MoveText => {
                let [tx, ty] = numbers::<2>(op)?;
                self.move_text(tx, ty);
            }
            OpCode::SetLeadingMoveText => {
                let [tx, ty] = numbers::<2>(op)?;
                self.state.text.leading = -ty;
                self.move_text(tx, ty);
            }
            OpCode::SetTextMatrix => {
                let m = Matrix::from_values(&numbers::<6>(op)?)
                    .ok_or_else(|| PDFError::content_stream_error("Tm with a non-finite matrix"))?;
                self.text_matrix = m;
                self.line_matrix = m;
            }
            OpCode::NextLine => self.next_line(),

            // Text showing
            OpCode::ShowText => self.show_text(string_operand(op)?)?,
            OpCode::ShowSpacedText => self.show_spaced_text(op)?,
            OpCode::NextLineShowText => {
                self.next_line();
                self.show_text(string_operand(op)?)?;
            }
            OpCode::NextLineSetSpacingShowText => {
                let text = string_operand(op)?;
                let numeric: Vec<f64> = op.args.iter().filter_map(PDFObject::as_number).collect();
                let [word, char] = match numeric.as_slice() {
                    [.., w, c] => [*w, *c],
                    _ => return Err(PDFError::content_stream_error("\" needs two spacing operands")),
                };
                self.state.text.word_spacing = word;
                self.state.text.char_spacing = char;
                self.next_line();
                self.show_text(text)?;
            }

            // Type 3 glyph metrics carry nothing a filled glyph needs.
            OpCode::SetCharWidth | OpCode::SetCharWidthAndBounds => {}

            // Colour
            OpCode::SetStrokeColorSpace => self.set_color_space(op, true)?,
            OpCode::SetFillColorSpace => self.set_color_space(op, false)?,
            OpCode::SetStrokeColor | OpCode::SetStrokeColorN => self.set_color(op, true)?,
            OpCode::SetFillColor | OpCode::SetFillColorN => self.set_color(op, false)?,
            OpCode::SetStrokeGray => {
                let [g] = numbers::<1>(op)?;
                self.set_device_color(true, ColorSpace::DeviceGray, Color::Gray(g));
            }
            OpCode::SetFillGray => {
                let [g] = numbers::<1>(op)?;
                self.set_device_color(false, ColorSpace::DeviceGray, Color::Gray(g));
            }
            OpCode::SetStrokeRGBColor => {
                let [r, g, b] = numbers::<3>(op)?;
                self.set_device_color(true, ColorSpace::DeviceRGB, Color::Rgb(r, g, b));
            }
            OpCode::SetFillRGBColor => {
                let [r, g, b] = numbers::<3>(op)?;
                self.set_device_color(false, ColorSpace::DeviceRGB, Color::Rgb(r, g, b));
            }
            OpCode::SetStrokeCMYKColor => {
                let [c, m, y, k] = numbers::<4>(op)?;
                self.set_device_color(true, ColorSpace::DeviceCMYK, Color::Cmyk(c, m, y, k));
            }
            OpCode::SetFillCMYKColor => {
                let [c, m, y, k] = numbers::<4>(op)?;
                self.set_device_color(false, ColorSpace::DeviceCMYK, Color::Cmyk(c, m, y, k));
            }

            OpCode::ShadingFill => self.fill_shading(name_operand(op)?)?,
            OpCode::InlineImage => {
                let image = op
                    .inline_image()
                    .cloned()
                    .ok_or_else(|| PDFError::content_stream_error("inline image without data"))?;
                let decoded = self.xref.decode_stream(&image)?;
                self.draw_image(&image, &decoded)?;
            }
            OpCode::PaintXObject => self.paint_xobject(name_operand(op)?)?,

            OpCode::MarkPoint
            | OpCode::MarkPointProps
            | OpCode::BeginMarkedContent
            | OpCode::BeginMarkedContentProps
            | OpCode::EndMarkedContent
            | OpCode::BeginCompat
            | OpCode::EndCompat => {}
        }
        Ok(())
    }

    // === Graphics state ===

    fn save(&mut self) {
        self.saved.push(self.state.clone());
        self.device.save_state();
    }

    /// Unbalanced restores are ignored.
    fn restore(&mut self) {
        if let Some(state) = self.saved.pop() {
            self.state = state;
            self.device.restore_state();
        }
    }

    fn restore_to(&mut self, depth: usize) {
        while self.saved.len() > depth {
            self.restore();
        }
    }

    fn set_dash(&mut self, op: &Operation) -> PDFResult<()> {
        let (array, phase) = match op.args.as_slice() {
            [.., array, phase] => (array.as_number_array(), phase.as_number()),
            _ => (None, None),
        };
        match (array, phase) {
            (Some(array), Some(phase)) => {
                self.state.stroke.set_dash(array, phase);
                Ok(())
            }
            _ => Err(PDFError::content_stream_error("d needs a dash array and a phase")),
        }
    }

    /// Applies the `/ExtGState` entry `name`. Soft masks and blend modes
    /// are not drawn and are only logged.
    fn set_graphics_state(&mut self, name: &str) -> PDFResult<()> {
        let obj = self.resource("ExtGState", name)?;
        let resolved = self.xref.fetch_if_ref(&obj)?;
        let dict = resolved
            .as_dict()
            .ok_or_else(|| PDFError::content_stream_error(format!("ExtGState /{name} is not a dictionary")))?;

        for (key, value) in dict {
            let value = self.xref.fetch_if_ref(value)?;
            match key.as_str() {
                "LW" => {
                    if let Some(width) = value.as_number() {
                        self.state.stroke.line_width = width;
                    }
                }
                "LC" => {
                    if let Some(cap) = value.as_i64().and_then(LineCap::from_i64) {
                        self.state.stroke.line_cap = cap;
                    }
                }
                "LJ" => {
                    if let Some(join) = value.as_i64().and_then(LineJoin::from_i64) {
                        self.state.stroke.line_join = join;
                    }
                }
                "ML" => {
                    if let Some(limit) = value.as_number() {
                        self.state.stroke.miter_limit = limit;
                    }
                }
                "D" => {
                    if let Some([array, phase]) = value.as_array() {
                        if let (Some(array), Some(phase)) = (array.as_number_array(), phase.as_number()) {
                            self.state.stroke.set_dash(array, phase);
                        }
                    }
                }
                "CA" => {
                    if let Some(alpha) = value.as_number() {
                        self.state.stroke_alpha = alpha.clamp(0.0, 1.0);
                    }
                }
                "ca" => {
                    if let Some(alpha) = value.as_number() {
                        self.state.fill_alpha = alpha.clamp(0.0, 1.0);
                    }
                }
                "Font" => {
                    if let Some([font, size]) = value.as_array() {
                        if let Some(size) = size.as_number() {
                            self.state.text.font = Some(self.load_font(font)?);
                            self.state.text.font_size = size;
                        }
                    }
                }
                "SMask" | "BM" if !value.is_name("None") && !value.is_name("Normal") => {
                    debug!(key = key.as_str(), "ExtGState entry not drawn");
                }
                _ => {}
            }
        }
        Ok(())
    }

    // === Paths ===

    fn current_point(&self, op: &Operation) -> PDFResult<(f64, f64)> {
        self.path
            .current_point()
            .ok_or_else(|| PDFError::content_stream_error(format!("{} without a current point", op.op)))
    }

    /// Paints and then ends the current path. A pending clip is applied
    /// after painting even when painting fails.
    fn paint_path(&mut self, close: bool, fill: Option<FillRule>, stroke: bool) -> PDFResult<()> {
        if close {
            self.path.close_path();
        }
        let path = std::mem::take(&mut self.path);

        let painted = if path.is_empty() {
            Ok(())
        } else {
            self.fill_and_stroke(&path, fill, stroke)
        };
        let clipped = match self.pending_clip.take() {
            Some(rule) => self.device.clip_path(&path, &self.state.ctm, rule),
            None => Ok(()),
        };
        painted.and(clipped)
    }

    fn fill_and_stroke(&mut self, path: &Path, fill: Option<FillRule>, stroke: bool) -> PDFResult<()> {
        if let Some(rule) = fill {
            let paint = Paint::new(self.state.fill_color, self.state.fill_alpha);
            self.device.fill_path(path, &self.state.ctm, rule, &paint)?;
        }
        if stroke {
            let paint = Paint::new(self.state.stroke_color, self.state.stroke_alpha);
            self.device
                .stroke_path(path, &self.state.ctm, &self.state.stroke, &paint)?;
        }
        Ok(())
    }

    // === Text ===

    fn move_text(&mut self, tx: f64, ty: f64) {
        self.line_matrix = Matrix::translate(tx, ty).then(&self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        let leading = self.state.text.leading;
        self.move_text(0.0, -leading);
    }

    fn load_font(&mut self, obj: &PDFObject) -> PDFResult<Arc<PdfFont>> {
        let key = obj.as_ref();
        if let Some(font) = key.and_then(|r| self.fonts.get(&r)) {
            return Ok(Arc::clone(font));
        }
        let resolved = self.xref.fetch_if_ref(obj)?;
        let dict = resolved
            .as_dict()
            .ok_or_else(|| PDFError::content_stream_error(format!("font is a {}", resolved.type_name())))?;
        let font = Arc::new(PdfFont::load(dict, self.xref)?);
        debug!(
            font = font.base_font(),
            kind = ?font.kind(),
            embedded = font.is_embedded(),
            "loaded font"
        );
        if let Some(r) = key {
            self.fonts.insert(r, Arc::clone(&font));
        }
        Ok(font)
    }

    /// Shows a string: draws each glyph and advances the text matrix.
    /// Fonts without usable outlines still advance.
    fn show_text(&mut self, bytes: &[u8]) -> PDFResult<()> {
        let font = self
            .state
            .text
            .font
            .clone()
            .ok_or_else(|| PDFError::content_stream_error("text shown before Tf"))?;

        let text = &self.state.text;
        let (size, scaling, rise) = (text.font_size, text.horizontal_scaling, text.rise);
        let (char_spacing, word_spacing) = (text.char_spacing, text.word_spacing);
        let mode = text.render_mode;
        let visible = mode.fills() || mode.strokes() || mode.clips();

        let outlines = match font.kind() {
            FontKind::Type3 => None,
            _ if visible => font.outlines(),
            _ => None,
        };
        let mut glyphs = Path::new();

        for code in font.char_codes(bytes) {
            let glyph_to_user = Matrix::new(size * scaling, 0.0, 0.0, size, 0.0, rise).then(&self.text_matrix);
            if visible {
                if let Some(outlines) = &outlines {
                    if let Some(glyph) = outlines.glyph_path(code.code) {
                        glyphs.append_transformed(&glyph, &glyph_to_user);
                    }
                } else if let Some(type3) = font.type3() {
                    if let Err(e) = self.show_type3_glyph(&font, type3, code.code, &glyph_to_user) {
                        debug!(code = code.code, "skipping Type 3 glyph: {e}");
                    }
                }
            }

            let mut advance = font.advance(code.code) * size + char_spacing;
            if code.is_space {
                advance += word_spacing;
            }
            self.text_matrix = Matrix::translate(advance * scaling, 0.0).then(&self.text_matrix);
        }

        if glyphs.is_empty() {
            return Ok(());
        }
        if mode.fills() || mode.strokes() {
            let fill = mode.fills().then_some(FillRule::NonZero);
            self.fill_and_stroke(&glyphs, fill, mode.strokes())?;
        }
        if mode.clips() {
            self.text_clip
                .get_or_insert_with(Path::new)
                .append_transformed(&glyphs, &self.state.ctm);
        }
        Ok(())
    }

    fn show_spaced_text(&mut self, op: &Operation) -> PDFResult<()> {
        let items = op
            .args
            .last()
            .and_then(PDFObject::as_array)
            .ok_or_else(|| PDFError::content_stream_error("TJ needs an array"))?;
        for item in items {
            match item {
                PDFObject::String(bytes) | PDFObject::HexString(bytes) => self.show_text(bytes)?,
                other => {
                    if let Some(adjust) = other.as_number() {
                        let text = &self.state.text;
                        let tx = -adjust / 1000.0 * text.font_size * text.horizontal_scaling;
                        self.text_matrix = Matrix::translate(tx, 0.0).then(&self.text_matrix);
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs the glyph procedure of a Type 3 character.
    fn show_type3_glyph(
        &mut self,
        font: &PdfFont,
        glyphs: &Type3Glyphs,
        code: u32,
        glyph_to_user: &Matrix,
    ) -> PDFResult<()> {
        let Some(proc_obj) = font.glyph_name(code).and_then(|name| glyphs.char_procs.get(name)) else {
            return Ok(());
        };
        let decoded = self.xref.decoded_stream(proc_obj)?;
        let resources = glyphs.resources.clone().or_else(|| self.resources.clone());
        let matrix = glyphs.font_matrix.then(glyph_to_user);

        let (text_matrix, line_matrix) = (self.text_matrix, self.line_matrix);
        let result = self.run_nested(&decoded, &matrix, resources, None);
        self.text_matrix = text_matrix;
        self.line_matrix = line_matrix;
        result
    }

    // === Colour ===

    fn set_device_color(&mut self, stroke: bool, space: ColorSpace, color: Color) {
        if stroke {
            self.state.stroke_space = space;
            self.state.stroke_color = color;
        } else {
            self.state.fill_space = space;
            self.state.fill_color = color;
        }
    }

    fn set_color_space(&mut self, op: &Operation, stroke: bool) -> PDFResult<()> {
        let operand = op
            .args
            .last()
            .ok_or_else(|| PDFError::content_stream_error(format!("{} needs a colour space", op.op)))?;
        let space = ColorSpace::parse(operand, self.resources.as_ref(), self.xref)?;
        let color = space.initial_color();
        self.set_device_color(stroke, space, color);
        Ok(())
    }

    fn set_color(&mut self, op: &Operation, stroke: bool) -> PDFResult<()> {
        let values: Vec<f64> = op.args.iter().filter_map(PDFObject::as_number).collect();
        let space = if stroke {
            &self.state.stroke_space
        } else {
            &self.state.fill_space
        };
        let mut color = space.to_color(&values);

        // A shading pattern is approximated by one colour of its shading.
        let uncoloured = matches!(space, ColorSpace::Pattern { base: None });
        if let (true, Some(name)) = (uncoloured, op.args.last().and_then(PDFObject::as_name)) {
            if let Some(approximation) = self.pattern_color(name)? {
                color = approximation;
            }
        }

        if stroke {
            self.state.stroke_color = color;
        } else {
            self.state.fill_color = color;
        }
        Ok(())
    }

    fn pattern_color(&mut self, name: &str) -> PDFResult<Option<Color>> {
        let obj = self.resource("Pattern", name)?;
        let pattern = self.xref.fetch_if_ref(&obj)?;
        let dict = match &pattern {
            PDFObject::Dictionary(dict) => dict,
            PDFObject::Stream(stream) => &stream.dict,
            _ => return Ok(None),
        };
        match (dict.get("PatternType").and_then(PDFObject::as_i64), dict.get("Shading")) {
            (Some(2), Some(shading)) => self.shading_color(shading).map(Some),
            _ => Ok(None),
        }
    }

    /// One colour standing in for a whole shading: the midpoint of an
    /// exponential function, else the background, else the middle of the
    /// colour space.
    fn shading_color(&mut self, obj: &PDFObject) -> PDFResult<Color> {
        let dict = shading_dict(self.xref.fetch_if_ref(obj)?)?;
        let space = match dict.get("ColorSpace") {
            Some(cs) => ColorSpace::parse(cs, self.resources.as_ref(), self.xref)?,
            None => ColorSpace::DeviceGray,
        };

        let function = match dict.get("Function") {
            Some(f) => self.xref.fetch_if_ref(f)?,
            None => PDFObject::Null,
        };
        if let Some(function) = function.as_dict() {
            let c0 = function.get("C0").and_then(PDFObject::as_number_array);
            let c1 = function.get("C1").and_then(PDFObject::as_number_array);
            let c0 = c0.unwrap_or_else(|| vec![0.0]);
            let c1 = c1.unwrap_or_else(|| vec![1.0]);
            let mid: Vec<f64> = c0.iter().zip(&c1).map(|(a, b)| (a + b) / 2.0).collect();
            return Ok(space.to_color(&mid));
        }
        if let Some(background) = dict.get("Background").and_then(PDFObject::as_number_array) {
            return Ok(space.to_color(&background));
        }
        Ok(space.to_color(&vec![0.5; space.components()]))
    }

    /// `sh`: fills the shading's `/BBox`, or the whole clip, with its
    /// approximation colour.
    fn fill_shading(&mut self, name: &str) -> PDFResult<()> {
        let obj = self.resource("Shading", name)?;
        let color = self.shading_color(&obj)?;
        let dict = shading_dict(self.xref.fetch_if_ref(&obj)?)?;

        let mut area = Path::new();
        let transform = match dict.get("BBox").and_then(Rect::from_object) {
            Some(bbox) => {
                area.rect(bbox.x0, bbox.y0, bbox.width(), bbox.height());
                self.state.ctm
            }
            None => {
                match self.device_size {
                    Some((width, height)) => area.rect(0.0, 0.0, width, height),
                    None => area.rect(
                        -UNBOUNDED_SHADING,
                        -UNBOUNDED_SHADING,
                        2.0 * UNBOUNDED_SHADING,
                        2.0 * UNBOUNDED_SHADING,
                    ),
                }
                Matrix::IDENTITY
            }
        };
        let paint = Paint::new(color, self.state.fill_alpha);
        self.device.fill_path(&area, &transform, FillRule::NonZero, &paint)
    }

    // === XObjects ===

    fn paint_xobject(&mut self, name: &str) -> PDFResult<()> {
        let obj = self.resource("XObject", name)?;
        let resolved = self.xref.fetch_if_ref(&obj)?;
        let stream = resolved
            .as_stream()
            .cloned()
            .ok_or_else(|| PDFError::content_stream_error(format!("XObject /{name} is not a stream")))?;

        match stream.dict.get("Subtype").and_then(PDFObject::as_name) {
            Some("Form") => self.paint_form(&obj, &stream),
            Some("Image") => {
                let decoded = self.xref.decoded_stream(&obj)?;
                self.draw_image(&stream, &decoded)
            }
            Some("PS") => {
                debug!(name, "ignoring PostScript XObject");
                Ok(())
            }
            other => Err(PDFError::content_stream_error(format!(
                "XObject /{name} has unknown subtype {:?}",
                other
            ))),
        }
    }

    fn paint_form(&mut self, obj: &PDFObject, stream: &PdfStream) -> PDFResult<()> {
        let key = obj.as_ref();
        if let Some(r) = key.filter(|r| self.form_stack.contains(r)) {
            warn!(form = %r, "form XObject draws itself, skipping");
            return Ok(());
        }

        let decoded = self.xref.decoded_stream(obj)?;
        let matrix = stream
            .dict
            .get("Matrix")
            .and_then(Matrix::from_object)
            .unwrap_or(Matrix::IDENTITY);
        let bbox = stream.dict.get("BBox").and_then(Rect::from_object);
        let resources = match stream.dict.get("Resources") {
            Some(r) => self.xref.fetch_if_ref(r)?.as_dict().cloned(),
            None => None,
        };
        let resources = resources.or_else(|| self.resources.clone());

        if let Some(r) = key {
            self.form_stack.push(r);
        }
        let result = self.run_nested(&decoded, &matrix, resources, bbox);
        if key.is_some() {
            self.form_stack.pop();
        }
        result
    }

    /// Runs a form or glyph procedure inside its own saved state.
    fn run_nested(
        &mut self,
        decoded: &DecodedStream,
        matrix: &Matrix,
        resources: Option<Dict>,
        bbox: Option<Rect>,
    ) -> PDFResult<()> {
        if self.form_depth >= self.max_form_depth {
            warn!(depth = self.form_depth, "form nesting too deep, skipping");
            return Ok(());
        }
        if let Some(filter) = &decoded.skipped {
            warn!(filter = filter.as_str(), "form filter not supported, skipping");
            return Ok(());
        }

        let outer_path = std::mem::take(&mut self.path);
        let outer_clip = self.pending_clip.take();
        let depth = self.saved.len();
        self.save();
        self.state.concat_matrix(matrix);

        let mut result = Ok(());
        if let Some(bbox) = bbox {
            let mut clip = Path::new();
            clip.rect(bbox.x0, bbox.y0, bbox.width(), bbox.height());
            result = self.device.clip_path(&clip, &self.state.ctm, FillRule::NonZero);
        }
        if result.is_ok() {
            self.form_depth += 1;
            let outer = std::mem::replace(&mut self.resources, resources);
            result = self.run(Arc::clone(&decoded.data));
            self.resources = outer;
            self.form_depth -= 1;
        }

        self.restore_to(depth);
        self.path = outer_path;
        self.pending_clip = outer_clip;
        result
    }

    fn draw_image(&mut self, stream: &PdfStream, decoded: &DecodedStream) -> PDFResult<()> {
        let image = decode_image(
            stream,
            decoded,
            self.resources.as_ref(),
            self.xref,
            self.state.fill_color,
        )?;
        self.device
            .draw_image(&image, &self.state.ctm, self.state.fill_alpha)
    }

    /// Looks up `name` in the `category` resource dictionary. The entry is
    /// returned unresolved so references can key caches.
    fn resource(&mut self, category: &str, name: &str) -> PDFResult<PDFObject> {
        let group = self
            .resources
            .as_ref()
            .and_then(|r| r.get(category))
            .cloned()
            .ok_or_else(|| PDFError::content_stream_error(format!("no /{category} resources for /{name}")))?;
        self.xref
            .fetch_if_ref(&group)?
            .as_dict()
            .and_then(|d| d.get(name))
            .cloned()
            .ok_or_else(|| PDFError::content_stream_error(format!("missing /{category} resource /{name}")))
    }
}

/// The last `N` operands as numbers. Extra leading operands are ignored.
fn numbers<const N: usize>(op: &Operation) -> PDFResult<[f64; N]> {
    let args = &op.args;
    if args.len() < N {
        return Err(PDFError::content_stream_error(format!(
            "{} needs {} operands, found {}",
            op.op,
            N,
            args.len()
        )));
    }
    let mut out = [0.0; N];
    for (slot, arg) in out.iter_mut().zip(&args[args.len() - N..]) {
        *slot = arg.as_number().ok_or_else(|| {
            PDFError::content_stream_error(format!("{} expects numbers, found {}", op.op, arg.type_name()))
        })?;
    }
    Ok(out)
}

fn name_operand(op: &Operation) -> PDFResult<&str> {
    op.args
        .iter()
        .rev()
        .find_map(PDFObject::as_name)
        .ok_or_else(|| PDFError::content_stream_error(format!("{} needs a name", op.op)))
}

fn string_operand(op: &Operation) -> PDFResult<&[u8]> {
    op.args
        .iter()
        .rev()
        .find_map(PDFObject::as_bytes)
        .ok_or_else(|| PDFError::content_stream_error(format!("{} needs a string", op.op)))
}

fn shading_dict(obj: PDFObject) -> PDFResult<Dict> {
    match obj {
        PDFObject::Dictionary(dict) => Ok(dict),
        PDFObject::Stream(stream) => Ok(stream.dict.clone()),
        other => Err(PDFError::content_stream_error(format!("shading is a {}", other.type_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream::Stream;
    use crate::rendering::device::TestDevice;

    fn empty_xref() -> XRef {
        XRef::new(Box::new(Stream::from_bytes(Vec::new())), 4)
    }

    fn dict(entries: &[(&str, PDFObject)]) -> Dict {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn name(n: &str) -> PDFObject {
        PDFObject::Name(n.to_string())
    }

    fn numbers_array(values: &[f64]) -> PDFObject {
        PDFObject::Array(values.iter().map(|v| PDFObject::Number(*v)).collect())
    }

    fn run(content: &[u8], resources: Option<Dict>) -> Vec<String> {
        let mut xref = empty_xref();
        let mut ctx = RenderingContext::new(TestDevice::new(), &mut xref, Matrix::IDENTITY)
            .with_device_size(100, 50);
        ctx.execute_content(content.to_vec(), resources).unwrap();
        ctx.into_device().operations().to_vec()
    }

    #[test]
    fn test_fill_rectangle() {
        let ops = run(b"0 0 1 rg 10 20 30 40 re f", None);
        assert_eq!(
            ops,
            vec!["fill(NonZero, [0, 0, 255], [1 0 0 1 0 0], M 10 20 L 40 20 L 40 60 L 10 60 Z)"]
        );
    }

    #[test]
    fn test_cm_applies_to_following_paths() {
        let ops = run(b"2 0 0 2 10 10 cm 1 0 0 RG 0 0 m 5 0 l S", None);
        assert_eq!(ops, vec!["stroke(1, [255, 0, 0], [2 0 0 2 10 10], M 0 0 L 5 0)"]);
    }

    #[test]
    fn test_save_restore_balances_device() {
        let mut xref = empty_xref();
        let mut ctx = RenderingContext::new(TestDevice::new(), &mut xref, Matrix::IDENTITY);
        ctx.execute_content(b"q q 0.5 g Q".to_vec(), None).unwrap();
        assert_eq!(ctx.state().fill_color, Color::black());
        assert_eq!(ctx.device().depth(), 0);

        // Extra restores are ignored.
        ctx.execute_content(b"Q Q 0 0 1 1 re f".to_vec(), None).unwrap();
        assert_eq!(ctx.device().depth(), 0);
    }

    #[test]
    fn test_clip_applies_after_painting() {
        let ops = run(b"0 0 10 10 re W n 0 0 5 5 re f", None);
        assert_eq!(ops.len(), 2);
        assert!(ops[0].starts_with("clip(NonZero"));
        assert!(ops[1].starts_with("fill(NonZero"));
    }

    #[test]
    fn test_bad_operands_are_skipped() {
        let mut xref = empty_xref();
        let mut ctx = RenderingContext::new(TestDevice::new(), &mut xref, Matrix::IDENTITY);
        ctx.execute_content(b"10 l (x) w 0 0 m 5 5 l S".to_vec(), None).unwrap();
        assert_eq!(ctx.stats(), (5, 2));
        assert_eq!(
            ctx.device().operations(),
            ["stroke(1, [0, 0, 0], [1 0 0 1 0 0], M 0 0 L 5 5)"]
        );
    }

    #[test]
    fn test_curve_shorthands() {
        let ops = run(b"0 0 m 1 1 2 2 v 3 3 4 4 y S", None);
        assert_eq!(
            ops,
            vec!["stroke(1, [0, 0, 0], [1 0 0 1 0 0], M 0 0 C 0 0 1 1 2 2 C 3 3 4 4 4 4)"]
        );
    }

    #[test]
    fn test_text_advances_with_standard_metrics() {
        let font = dict(&[
            ("Type", name("Font")),
            ("Subtype", name("Type1")),
            ("BaseFont", name("Helvetica")),
        ]);
        let resources = dict(&[("Font", PDFObject::Dictionary(dict(&[("F1", PDFObject::Dictionary(font))])))]);

        let mut xref = empty_xref();
        let mut ctx = RenderingContext::new(TestDevice::new(), &mut xref, Matrix::IDENTITY);
        ctx.execute_content(b"BT /F1 10 Tf 100 200 Td (AA) Tj".to_vec(), Some(resources))
            .unwrap();
        assert!((ctx.text_matrix.e - 113.34).abs() < 1e-9);
        assert_eq!(ctx.text_matrix.f, 200.0);
        // No embedded program, so nothing is drawn.
        assert!(ctx.device().operations().is_empty());
    }

    #[test]
    fn test_spaced_text_adjustment() {
        let font = dict(&[("Subtype", name("Type1")), ("BaseFont", name("Courier"))]);
        let resources = dict(&[("Font", PDFObject::Dictionary(dict(&[("F1", PDFObject::Dictionary(font))])))]);

        let mut xref = empty_xref();
        let mut ctx = RenderingContext::new(TestDevice::new(), &mut xref, Matrix::IDENTITY);
        ctx.execute_content(b"BT /F1 10 Tf [(A) -1000 (B)] TJ".to_vec(), Some(resources))
            .unwrap();
        // Two 600-unit glyphs plus one em of extra space.
        assert!((ctx.text_matrix.e - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_leading_and_next_line() {
        let mut xref = empty_xref();
        let mut ctx = RenderingContext::new(TestDevice::new(), &mut xref, Matrix::IDENTITY);
        ctx.execute_content(b"BT 10 700 Td 0 -14 TD T*".to_vec(), None).unwrap();
        assert_eq!(ctx.state.text.leading, 14.0);
        assert_eq!((ctx.text_matrix.e, ctx.text_matrix.f), (10.0, 672.0));
    }

    #[test]
    fn test_ext_gstate() {
        let gs = dict(&[
            ("LW", PDFObject::Number(4.0)),
            ("ca", PDFObject::Number(0.5)),
            ("D", PDFObject::Array(vec![numbers_array(&[3.0, 1.0]), PDFObject::Number(0.0)])),
        ]);
        let resources = dict(&[("ExtGState", PDFObject::Dictionary(dict(&[("GS0", PDFObject::Dictionary(gs))])))]);

        let mut xref = empty_xref();
        let mut ctx = RenderingContext::new(TestDevice::new(), &mut xref, Matrix::IDENTITY);
        ctx.execute_content(b"/GS0 gs".to_vec(), Some(resources)).unwrap();
        assert_eq!(ctx.state.stroke.line_width, 4.0);
        assert_eq!(ctx.state.fill_alpha, 0.5);
        assert_eq!(ctx.state.stroke.dash_array, vec![3.0, 1.0]);
    }

    fn form_resources(content: &[u8]) -> Dict {
        let form = PdfStream::new(
            dict(&[
                ("Subtype", name("Form")),
                ("BBox", numbers_array(&[0.0, 0.0, 10.0, 10.0])),
                ("Matrix", numbers_array(&[2.0, 0.0, 0.0, 2.0, 0.0, 0.0])),
            ]),
            content.to_vec(),
        );
        dict(&[(
            "XObject",
            PDFObject::Dictionary(dict(&[("Fm0", PDFObject::Stream(Arc::new(form)))])),
        )])
    }

    #[test]
    fn test_form_xobject() {
        let ops = run(b"/Fm0 Do", Some(form_resources(b"0 0 5 5 re f")));
        assert_eq!(
            ops,
            vec![
                "save",
                "clip(NonZero, [2 0 0 2 0 0], M 0 0 L 10 0 L 10 10 L 0 10 Z)",
                "fill(NonZero, [0, 0, 0], [2 0 0 2 0 0], M 0 0 L 5 0 L 5 5 L 0 5 Z)",
                "restore",
            ]
        );
    }

    #[test]
    fn test_form_depth_limit() {
        let mut xref = empty_xref();
        let mut ctx = RenderingContext::new(TestDevice::new(), &mut xref, Matrix::IDENTITY).with_max_form_depth(0);
        ctx.execute_content(b"/Fm0 Do".to_vec(), Some(form_resources(b"0 0 5 5 re f")))
            .unwrap();
        assert!(ctx.device().operations().is_empty());
    }

    #[test]
    fn test_unbalanced_form_state_is_restored() {
        let ops = run(b"/Fm0 Do 0 0 1 1 re f", Some(form_resources(b"q q 1 0 0 rg")));
        assert_eq!(ops.last().unwrap(), "fill(NonZero, [0, 0, 0], [1 0 0 1 0 0], M 0 0 L 1 0 L 1 1 L 0 1 Z)");
        assert_eq!(ops.iter().filter(|o| *o == "save").count(), 3);
        assert_eq!(ops.iter().filter(|o| *o == "restore").count(), 3);
    }

    #[test]
    fn test_nested_runs_share_decoded_bytes() {
        let decoded = DecodedStream::new(b"0 0 5 5 re f".to_vec());
        let mut xref = empty_xref();
        let mut ctx = RenderingContext::new(TestDevice::new(), &mut xref, Matrix::IDENTITY);
        for _ in 0..2 {
            ctx.run_nested(&decoded, &Matrix::IDENTITY, None, None).unwrap();
        }
        let fills = ctx.device().operations().iter().filter(|o| o.starts_with("fill")).count();
        assert_eq!(fills, 2);
        // Each reader held the buffer only while it ran
        assert_eq!(Arc::strong_count(&decoded.data), 1);
    }

    #[test]
    fn test_inline_image() {
        let ops = run(b"q 20 0 0 10 5 5 cm BI /W 2 /H 1 /BPC 8 /CS /G ID \x00\xff EI Q", None);
        assert_eq!(ops, vec!["save", "image(2x1, [20 0 0 10 5 5], 1)", "restore"]);
    }

    #[test]
    fn test_shading_fills_device_with_function_midpoint() {
        let function = dict(&[
            ("FunctionType", PDFObject::Number(2.0)),
            ("C0", numbers_array(&[1.0, 0.0, 0.0])),
            ("C1", numbers_array(&[1.0, 0.0, 0.0])),
            ("N", PDFObject::Number(1.0)),
        ]);
        let shading = dict(&[
            ("ShadingType", PDFObject::Number(2.0)),
            ("ColorSpace", name("DeviceRGB")),
            ("Function", PDFObject::Dictionary(function)),
        ]);
        let resources = dict(&[("Shading", PDFObject::Dictionary(dict(&[("Sh0", PDFObject::Dictionary(shading))])))]);

        let ops = run(b"/Sh0 sh", Some(resources));
        assert_eq!(
            ops,
            vec!["fill(NonZero, [255, 0, 0], [1 0 0 1 0 0], M 0 0 L 100 0 L 100 50 L 0 50 Z)"]
        );
    }

    #[test]
    fn test_missing_resource_does_not_stop_page() {
        let ops = run(b"/Missing Do /F9 12 Tf 0 0 1 1 re f", None);
        assert_eq!(ops.len(), 1);
    }
}
