//! Fonts for text showing: code decoding, widths and glyph outlines.
//!
//! Outlines come from embedded TrueType/OpenType programs and bare CFF
//! programs through `ttf-parser`. Type 1 programs are not parsed: text in
//! those fonts advances with the right widths but draws nothing. Type 3
//! glyphs are content streams run by the interpreter.

use super::encoding::{glyph_name_to_unicode, BaseEncoding};
use super::graphics_state::Matrix;
use super::path::Path;
use crate::core::error::PDFResult;
use crate::core::parser::{Dict, PDFObject};
use crate::core::xref::XRef;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use ttf_parser::{GlyphId, OutlineBuilder, PlatformId};

#[rustfmt::skip]
const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

#[rustfmt::skip]
const TIMES_ROMAN: [u16; 95] = [
    250, 333, 408, 500, 500, 833, 778, 180, 333, 333, 500, 564, 250, 333, 250, 278,
    500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 278, 278, 564, 564, 564, 444,
    921, 722, 667, 667, 722, 611, 556, 722, 722, 333, 389, 722, 611, 889, 722, 722,
    556, 722, 667, 556, 611, 722, 722, 944, 722, 722, 611, 333, 278, 333, 469, 500,
    333, 444, 500, 444, 500, 444, 333, 500, 500, 278, 278, 500, 278, 778, 500, 500,
    500, 500, 333, 389, 278, 500, 500, 722, 500, 500, 444, 480, 200, 480, 541,
];

#[rustfmt::skip]
const TIMES_BOLD: [u16; 95] = [
    250, 333, 555, 500, 500, 1000, 833, 278, 333, 333, 500, 570, 250, 333, 250, 278,
    500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 333, 333, 570, 570, 570, 500,
    930, 722, 667, 722, 722, 667, 611, 778, 778, 389, 500, 778, 667, 944, 722, 778,
    611, 778, 722, 556, 667, 722, 722, 1000, 722, 722, 667, 333, 278, 333, 581, 500,
    333, 500, 556, 444, 556, 444, 333, 500, 556, 278, 333, 556, 278, 833, 556, 500,
    556, 556, 444, 389, 333, 556, 500, 722, 500, 500, 444, 394, 220, 394, 520,
];

#[rustfmt::skip]
const TIMES_ITALIC: [u16; 95] = [
    250, 333, 420, 500, 500, 833, 778, 214, 333, 333, 500, 675, 250, 333, 250, 278,
    500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 333, 333, 675, 675, 675, 500,
    920, 611, 611, 667, 722, 611, 611, 722, 722, 333, 444, 667, 556, 833, 667, 722,
    611, 722, 611, 500, 556, 722, 611, 833, 611, 556, 556, 389, 278, 389, 422, 500,
    333, 500, 500, 444, 500, 444, 278, 500, 500, 278, 278, 444, 278, 722, 500, 500,
    500, 500, 389, 389, 278, 500, 444, 667, 444, 444, 389, 400, 275, 400, 541,
];

#[rustfmt::skip]
const TIMES_BOLD_ITALIC: [u16; 95] = [
    250, 389, 555, 500, 500, 833, 778, 278, 333, 333, 500, 570, 250, 333, 250, 278,
    500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 333, 333, 570, 570, 570, 500,
    832, 667, 667, 667, 722, 667, 667, 722, 778, 389, 500, 667, 611, 889, 722, 722,
    611, 722, 667, 556, 611, 722, 667, 889, 667, 611, 611, 333, 278, 333, 570, 500,
    333, 500, 500, 444, 500, 444, 333, 500, 556, 278, 278, 500, 278, 778, 556, 500,
    500, 500, 389, 389, 278, 556, 444, 667, 500, 444, 389, 348, 220, 348, 570,
];

/// Widths of a standard font family member for codes 32..=126, and the
/// width used for every other code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StandardMetrics {
    Proportional(&'static [u16; 95], f64),
    Monospaced(f64),
}

impl StandardMetrics {
    /// Metrics for a base font name, recognising the standard names, the
    /// common Arial/TimesNewRoman/CourierNew aliases and subset prefixes.
    pub fn for_font(base_font: &str) -> Option<StandardMetrics> {
        let name = strip_subset_tag(base_font).to_ascii_lowercase();
        let bold = name.contains("bold");
        let italic = name.contains("italic") || name.contains("oblique");

        if name.starts_with("courier") {
            return Some(StandardMetrics::Monospaced(600.0));
        }
        if name.starts_with("helvetica") || name.starts_with("arial") {
            let table = if bold { &HELVETICA_BOLD } else { &HELVETICA };
            return Some(StandardMetrics::Proportional(table, 556.0));
        }
        if name.starts_with("times") {
            let table = match (bold, italic) {
                (false, false) => &TIMES_ROMAN,
                (true, false) => &TIMES_BOLD,
                (false, true) => &TIMES_ITALIC,
                (true, true) => &TIMES_BOLD_ITALIC,
            };
            return Some(StandardMetrics::Proportional(table, 500.0));
        }
        None
    }

    pub fn width(&self, code: u32) -> f64 {
        match *self {
            StandardMetrics::Monospaced(width) => width,
            StandardMetrics::Proportional(table, fallback) => match code {
                32..=126 => f64::from(table[(code - 32) as usize]),
                _ => fallback,
            },
        }
    }
}

/// Drops a `ABCDEF+` subset prefix.
fn strip_subset_tag(name: &str) -> &str {
    match name.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.bytes().all(|b| b.is_ascii_uppercase()) => rest,
        _ => name,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontKind {
    /// Type1, MMType1 and TrueType: one byte per code
    Simple,
    /// Type0 over a CIDFont: two bytes per code
    Composite,
    Type3,
}

#[derive(Debug, Clone)]
enum FontProgram {
    /// TrueType or OpenType
    Sfnt(Arc<Vec<u8>>),
    /// Bare CFF (`/FontFile3` with `/Type1C` or `/CIDFontType0C`)
    Cff(Arc<Vec<u8>>),
}

/// Glyph procedures of a Type 3 font.
#[derive(Debug, Clone)]
pub struct Type3Glyphs {
    pub char_procs: Dict,
    pub resources: Option<Dict>,
    pub font_matrix: Matrix,
}

/// One character code read from a string operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharCode {
    pub code: u32,
    /// Single-byte code 32, the only code word spacing applies to
    pub is_space: bool,
}

/// A loaded font resource.
#[derive(Debug, Clone)]
pub struct PdfFont {
    base_font: String,
    kind: FontKind,
    /// Glyph names for simple and Type 3 fonts, indexed by code
    encoding: Vec<Option<String>>,
    /// Glyph-space widths keyed by code (simple) or CID (composite)
    widths: FxHashMap<u32, f64>,
    default_width: f64,
    standard: Option<StandardMetrics>,
    cid_to_gid: Option<Vec<u16>>,
    program: Option<FontProgram>,
    symbolic: bool,
    type3: Option<Type3Glyphs>,
}

impl PdfFont {
    /// Loads a font dictionary. Problems with the embedded program or the
    /// metrics are logged and leave a font that still advances text.
    pub fn load(dict: &Dict, xref: &mut XRef) -> PDFResult<PdfFont> {
        let subtype = dict.get("Subtype").and_then(PDFObject::as_name).unwrap_or("Type1");
        let base_font = dict
            .get("BaseFont")
            .and_then(PDFObject::as_name)
            .unwrap_or_default()
            .to_string();

        let mut font = PdfFont {
            base_font,
            kind: FontKind::Simple,
            encoding: vec![None; 256],
            widths: FxHashMap::default(),
            default_width: 0.0,
            standard: None,
            cid_to_gid: None,
            program: None,
            symbolic: false,
            type3: None,
        };

        match subtype {
            "Type0" => font.load_composite(dict, xref)?,
            "Type3" => font.load_type3(dict, xref)?,
            _ => font.load_simple(dict, xref)?,
        }

        debug!(
            font = %font.base_font,
            subtype,
            embedded = font.program.is_some(),
            "loaded font"
        );
        Ok(font)
    }

    fn load_simple(&mut self, dict: &Dict, xref: &mut XRef) -> PDFResult<()> {
        let descriptor = resolve_dict(dict.get("FontDescriptor"), xref)?;
        if let Some(descriptor) = &descriptor {
            self.symbolic = is_symbolic(descriptor);
            self.program = load_program(descriptor, xref)?;
            self.default_width = descriptor.get("MissingWidth").and_then(PDFObject::as_number).unwrap_or(0.0);
        }

        self.load_widths(dict, xref)?;
        if self.widths.is_empty() {
            self.standard = StandardMetrics::for_font(&self.base_font);
        }

        let is_truetype = matches!(dict.get("Subtype").and_then(PDFObject::as_name), Some("TrueType"));
        let default_base = match (&self.program, is_truetype, self.symbolic) {
            // Non-embedded fonts and non-symbolic TrueType use StandardEncoding;
            // embedded Type 1/CFF programs fall back to their built-in encoding.
            (None, _, false) | (Some(_), true, false) => Some(BaseEncoding::Standard),
            _ => None,
        };
        self.load_encoding(dict.get("Encoding"), default_base, xref)?;

        if self.widths.is_empty() && self.standard.is_none() {
            self.widths_from_program();
        }
        Ok(())
    }

    fn load_type3(&mut self, dict: &Dict, xref: &mut XRef) -> PDFResult<()> {
        self.kind = FontKind::Type3;
        let font_matrix = dict
            .get("FontMatrix")
            .and_then(Matrix::from_object)
            .unwrap_or(Matrix::scale(0.001, 0.001));
        let char_procs = resolve_dict(dict.get("CharProcs"), xref)?.unwrap_or_default();
        let resources = resolve_dict(dict.get("Resources"), xref)?;
        self.type3 = Some(Type3Glyphs {
            char_procs,
            resources,
            font_matrix,
        });
        self.load_widths(dict, xref)?;
        self.load_encoding(dict.get("Encoding"), None, xref)
    }

    fn load_composite(&mut self, dict: &Dict, xref: &mut XRef) -> PDFResult<()> {
        self.kind = FontKind::Composite;
        self.default_width = 1000.0;

        if let Some(encoding) = dict.get("Encoding").and_then(PDFObject::as_name) {
            if !encoding.starts_with("Identity") {
                debug!(cmap = encoding, "predefined CMap read as two-byte identity");
            }
        }

        let descendant = match dict.get("DescendantFonts") {
            Some(obj) => match xref.fetch_if_ref(obj)? {
                PDFObject::Array(items) => match items.first() {
                    Some(first) => resolve_dict(Some(first), xref)?,
                    None => None,
                },
                PDFObject::Dictionary(d) => Some(d),
                _ => None,
            },
            None => None,
        };
        let Some(cid_font) = descendant else {
            warn!(font = %self.base_font, "Type0 font without a descendant font");
            return Ok(());
        };

        if let Some(dw) = cid_font.get("DW").and_then(PDFObject::as_number) {
            self.default_width = dw;
        }
        if let Some(w) = cid_font.get("W") {
            let w = xref.fetch_if_ref(w)?;
            self.widths = parse_cid_widths(&w, xref)?;
        }
        if let Some(descriptor) = resolve_dict(cid_font.get("FontDescriptor"), xref)? {
            self.program = load_program(&descriptor, xref)?;
        }
        if let Some(map) = cid_font.get("CIDToGIDMap") {
            let map = xref.fetch_if_ref(map)?;
            if map.as_stream().is_some() {
                let data = xref.decoded_stream(&map)?;
                self.cid_to_gid = Some(
                    data.data
                        .chunks_exact(2)
                        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                        .collect(),
                );
            }
        }
        Ok(())
    }

    fn load_widths(&mut self, dict: &Dict, xref: &mut XRef) -> PDFResult<()> {
        let Some(widths) = dict.get("Widths") else {
            return Ok(());
        };
        let widths = xref.fetch_if_ref(widths)?;
        let first = dict.get("FirstChar").and_then(PDFObject::as_i64).unwrap_or(0).max(0) as u32;
        for (i, width) in widths.as_array().unwrap_or_default().iter().enumerate() {
            if let Some(width) = xref.fetch_if_ref(width)?.as_number() {
                self.widths.insert(first + i as u32, width);
            }
        }
        Ok(())
    }

    fn load_encoding(
        &mut self,
        encoding: Option<&PDFObject>,
        default_base: Option<BaseEncoding>,
        xref: &mut XRef,
    ) -> PDFResult<()> {
        let encoding = match encoding {
            Some(obj) => xref.fetch_if_ref(obj)?,
            None => PDFObject::Null,
        };
        let (base, differences) = match &encoding {
            PDFObject::Name(name) => (BaseEncoding::from_name(name).or(default_base), None),
            PDFObject::Dictionary(dict) => {
                let base = dict
                    .get("BaseEncoding")
                    .and_then(PDFObject::as_name)
                    .and_then(BaseEncoding::from_name)
                    .or(default_base);
                let differences = match dict.get("Differences") {
                    Some(d) => Some(xref.fetch_if_ref(d)?),
                    None => None,
                };
                (base, differences)
            }
            _ => (default_base, None),
        };

        if let Some(base) = base {
            for (slot, name) in self.encoding.iter_mut().zip(base.table()) {
                *slot = name.map(str::to_string);
            }
        }

        // [code /name /name code /name ...]
        if let Some(differences) = differences.as_ref().and_then(PDFObject::as_array) {
            let mut code: Option<usize> = None;
            for item in differences {
                match item {
                    PDFObject::Number(n) => code = Some(*n as usize),
                    PDFObject::Name(name) => {
                        if let Some(c) = code.filter(|c| *c < 256) {
                            self.encoding[c] = Some(name.clone());
                            code = Some(c + 1);
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Fills widths from the embedded program's advances when the font
    /// dictionary has none.
    fn widths_from_program(&mut self) {
        let Some(outlines) = self.outlines() else {
            return;
        };
        let widths: FxHashMap<u32, f64> = (0..256u32)
            .filter_map(|code| Some((code, outlines.advance(code)?)))
            .collect();
        self.widths = widths;
    }

    pub fn base_font(&self) -> &str {
        &self.base_font
    }

    pub fn kind(&self) -> FontKind {
        self.kind
    }

    pub fn is_embedded(&self) -> bool {
        self.program.is_some()
    }

    pub fn type3(&self) -> Option<&Type3Glyphs> {
        self.type3.as_ref()
    }

    /// Glyph name a simple or Type 3 font assigns to `code`.
    pub fn glyph_name(&self, code: u32) -> Option<&str> {
        self.encoding.get(code as usize)?.as_deref()
    }

    /// Splits a string operand into character codes.
    pub fn char_codes(&self, bytes: &[u8]) -> Vec<CharCode> {
        match self.kind {
            FontKind::Composite => bytes
                .chunks(2)
                .map(|pair| match pair {
                    [hi, lo] => CharCode {
                        code: u32::from(u16::from_be_bytes([*hi, *lo])),
                        is_space: false,
                    },
                    [single] => CharCode {
                        code: u32::from(*single),
                        is_space: *single == b' ',
                    },
                    _ => CharCode { code: 0, is_space: false },
                })
                .collect(),
            _ => bytes
                .iter()
                .map(|b| CharCode {
                    code: u32::from(*b),
                    is_space: *b == b' ',
                })
                .collect(),
        }
    }

    /// Horizontal advance of `code` in text space for a font size of 1.
    pub fn advance(&self, code: u32) -> f64 {
        match self.kind {
            FontKind::Type3 => {
                let width = self.widths.get(&code).copied().unwrap_or(0.0);
                let scale = self.type3.as_ref().map_or(0.001, |t| t.font_matrix.a);
                width * scale
            }
            _ => {
                let width = match (self.widths.get(&code), &self.standard) {
                    (Some(w), _) => *w,
                    (None, Some(standard)) => standard.width(code),
                    (None, None) => self.default_width,
                };
                width / 1000.0
            }
        }
    }

    /// Parses the embedded program for outline lookups. `None` when there
    /// is no usable program.
    pub fn outlines(&self) -> Option<GlyphOutlines<'_>> {
        let source = match self.program.as_ref()? {
            FontProgram::Sfnt(data) => {
                let face = ttf_parser::Face::parse(data, 0).ok()?;
                let scale = 1.0 / f64::from(face.units_per_em().max(1));
                GlyphSource::Sfnt(face, scale)
            }
            FontProgram::Cff(data) => GlyphSource::Cff(ttf_parser::cff::Table::parse(data)?),
        };
        Some(GlyphOutlines { font: self, source })
    }
}

enum GlyphSource<'a> {
    Sfnt(ttf_parser::Face<'a>, f64),
    Cff(ttf_parser::cff::Table<'a>),
}

/// A parsed font program borrowed from its [`PdfFont`].
pub struct GlyphOutlines<'a> {
    font: &'a PdfFont,
    source: GlyphSource<'a>,
}

impl GlyphOutlines<'_> {
    fn glyph_id(&self, code: u32) -> Option<GlyphId> {
        let font = self.font;
        if font.kind == FontKind::Composite {
            let gid = match &font.cid_to_gid {
                Some(map) => *map.get(code as usize)?,
                None => u16::try_from(code).ok()?,
            };
            return Some(GlyphId(gid));
        }

        let name = font.glyph_name(code);
        match &self.source {
            GlyphSource::Cff(table) => name
                .and_then(|n| table.glyph_index_by_name(n))
                .or_else(|| table.glyph_index(u8::try_from(code).ok()?)),
            GlyphSource::Sfnt(face, _) => {
                let by_name = (!font.symbolic)
                    .then_some(name)
                    .flatten()
                    .and_then(|n| sfnt_glyph_by_name(face, n));
                by_name.or_else(|| sfnt_glyph_by_code(face, code))
            }
        }
    }

    /// Outline of `code` in text space for a font size of 1. `None` for
    /// missing glyphs and for empty outlines such as spaces.
    pub fn glyph_path(&self, code: u32) -> Option<Path> {
        let gid = self.glyph_id(code)?;
        let mut builder = PathCollector::default();
        let scale = match &self.source {
            GlyphSource::Sfnt(face, scale) => {
                face.outline_glyph(gid, &mut builder)?;
                *scale
            }
            GlyphSource::Cff(table) => {
                table.outline(gid, &mut builder).ok()?;
                0.001
            }
        };
        let mut path = Path::new();
        path.append_transformed(&builder.path, &Matrix::scale(scale, scale));
        (!path.is_empty()).then_some(path)
    }

    /// Glyph-space advance (1000 units per em) from the program.
    fn advance(&self, code: u32) -> Option<f64> {
        let gid = self.glyph_id(code)?;
        match &self.source {
            GlyphSource::Sfnt(face, scale) => Some(f64::from(face.glyph_hor_advance(gid)?) * scale * 1000.0),
            GlyphSource::Cff(table) => table.glyph_width(gid).map(f64::from),
        }
    }
}

/// Looks a glyph up through the Unicode value of its name, then through the
/// `post` table names.
fn sfnt_glyph_by_name(face: &ttf_parser::Face<'_>, name: &str) -> Option<GlyphId> {
    let cmap = face.tables().cmap?;
    if let Some(ch) = glyph_name_to_unicode(name) {
        for subtable in cmap.subtables {
            if subtable.is_unicode() {
                if let Some(gid) = subtable.glyph_index(u32::from(ch)) {
                    return Some(gid);
                }
            }
        }
    }
    face.glyph_index_by_name(name)
}

/// Looks a glyph up by raw code: the (3,0) symbol cmap with its usual
/// offsets, then (1,0) Mac Roman, then any other subtable.
fn sfnt_glyph_by_code(face: &ttf_parser::Face<'_>, code: u32) -> Option<GlyphId> {
    let cmap = face.tables().cmap?;
    let lookup = |platform: PlatformId, encoding: Option<u16>, value: u32| {
        cmap.subtables
            .into_iter()
            .filter(|s| s.platform_id == platform && encoding.is_none_or(|e| s.encoding_id == e))
            .find_map(|s| s.glyph_index(value))
    };
    [0xF000, 0xF100, 0xF200, 0]
        .into_iter()
        .find_map(|offset| lookup(PlatformId::Windows, Some(0), code + offset))
        .or_else(|| lookup(PlatformId::Macintosh, Some(0), code))
        .or_else(|| cmap.subtables.into_iter().find_map(|s| s.glyph_index(code)))
}

/// Collects a `ttf-parser` outline into a [`Path`], raising quadratic
/// segments to cubics.
#[derive(Default)]
struct PathCollector {
    path: Path,
}

impl OutlineBuilder for PathCollector {
    fn move_to(&mut self, x: f32, y: f32) {
        self.path.move_to(f64::from(x), f64::from(y));
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.path.line_to(f64::from(x), f64::from(y));
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x0, y0) = self.path.current_point().unwrap_or((f64::from(x1), f64::from(y1)));
        let (qx, qy) = (f64::from(x1), f64::from(y1));
        let (x, y) = (f64::from(x), f64::from(y));
        self.path.curve_to(
            x0 + 2.0 / 3.0 * (qx - x0),
            y0 + 2.0 / 3.0 * (qy - y0),
            x + 2.0 / 3.0 * (qx - x),
            y + 2.0 / 3.0 * (qy - y),
            x,
            y,
        );
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.path.curve_to(
            f64::from(x1),
            f64::from(y1),
            f64::from(x2),
            f64::from(y2),
            f64::from(x),
            f64::from(y),
        );
    }

    fn close(&mut self) {
        self.path.close_path();
    }
}

fn resolve_dict(obj: Option<&PDFObject>, xref: &mut XRef) -> PDFResult<Option<Dict>> {
    match obj {
        Some(obj) => Ok(match xref.fetch_if_ref(obj)? {
            PDFObject::Dictionary(dict) => Some(dict),
            _ => None,
        }),
        None => Ok(None),
    }
}

/// Flag bit 3 (symbolic) set and bit 6 (non-symbolic) clear.
fn is_symbolic(descriptor: &Dict) -> bool {
    let flags = descriptor.get("Flags").and_then(PDFObject::as_i64).unwrap_or(0);
    flags & 4 != 0 && flags & 32 == 0
}

fn load_program(descriptor: &Dict, xref: &mut XRef) -> PDFResult<Option<FontProgram>> {
    let (obj, is_sfnt) = if let Some(obj) = descriptor.get("FontFile2") {
        (obj, true)
    } else if let Some(obj) = descriptor.get("FontFile3") {
        let stream = xref.fetch_if_ref(obj)?;
        let subtype = stream
            .as_stream()
            .and_then(|s| s.dict.get("Subtype"))
            .and_then(PDFObject::as_name)
            .map(str::to_string);
        (obj, subtype.as_deref() == Some("OpenType"))
    } else {
        if descriptor.contains_key("FontFile") {
            debug!("Type 1 font program is not drawn");
        }
        return Ok(None);
    };

    let decoded = match xref.decoded_stream(obj) {
        Ok(decoded) if !decoded.is_skipped() => decoded,
        Ok(_) => return Ok(None),
        Err(err) => {
            warn!(error = %err, "unreadable embedded font program");
            return Ok(None);
        }
    };
    let data = Arc::clone(&decoded.data);
    let valid = if is_sfnt {
        ttf_parser::Face::parse(&data, 0).is_ok()
    } else {
        ttf_parser::cff::Table::parse(&data).is_some()
    };
    if !valid {
        warn!(sfnt = is_sfnt, "embedded font program could not be parsed");
        return Ok(None);
    }
    Ok(Some(if is_sfnt {
        FontProgram::Sfnt(data)
    } else {
        FontProgram::Cff(data)
    }))
}

/// Reads a CIDFont `/W` array: `c [w1 w2 ...]` and `c_first c_last w`.
fn parse_cid_widths(w: &PDFObject, xref: &mut XRef) -> PDFResult<FxHashMap<u32, f64>> {
    let mut widths = FxHashMap::default();
    let items = w.as_array().unwrap_or_default();
    let mut i = 0;
    while i + 1 < items.len() {
        let Some(first) = items[i].as_i64().filter(|c| *c >= 0) else {
            i += 1;
            continue;
        };
        let first = first as u32;
        match xref.fetch_if_ref(&items[i + 1])? {
            PDFObject::Array(list) => {
                for (offset, width) in list.iter().enumerate() {
                    if let Some(width) = width.as_number() {
                        widths.insert(first + offset as u32, width);
                    }
                }
                i += 2;
            }
            PDFObject::Number(last) => {
                if let Some(width) = items.get(i + 2).and_then(PDFObject::as_number) {
                    let last = (last.max(0.0) as u32).min(first.saturating_add(0xFFFF));
                    for cid in first..=last {
                        widths.insert(cid, width);
                    }
                }
                i += 3;
            }
            _ => i += 1,
        }
    }
    Ok(widths)
}
