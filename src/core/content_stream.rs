//! Content stream reading.
//!
//! Splits a decoded content stream into operations: an operator plus the
//! operands that preceded it. Inline images (`BI ... ID <data> EI`) come
//! back as a single operation carrying the image as a stream operand.

use super::error::{PDFError, PDFResult};
use super::lexer::{find_in_stream, is_whitespace, Lexer};
use super::parser::{Dict, PDFObject, Parser, PdfStream};
use super::stream::Stream;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Operands kept before an operator. More than this is garbage.
const MAX_OPERANDS: usize = 64;

/// How far ahead the end of inline image data is searched for.
const MAX_INLINE_IMAGE: usize = 16 << 20;

macro_rules! operators {
    ($($(#[$doc:meta])* $variant:ident = $name:literal $(| $alias:literal)*,)*) => {
        /// PDF content stream operator codes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum OpCode {
            $($(#[$doc])* $variant,)*
        }

        impl OpCode {
            /// Maps an operator keyword such as `"re"` or `"Tj"` to its code.
            ///
            /// Returns `None` for operators this reader does not know.
            pub fn from_command(cmd: &str) -> Option<OpCode> {
                match cmd {
                    $($name $(| $alias)* => Some(OpCode::$variant),)*
                    _ => None,
                }
            }

            /// Returns the PDF operator string for this opcode.
            pub fn to_command(&self) -> &'static str {
                match self {
                    $(OpCode::$variant => $name,)*
                }
            }
        }
    };
}

operators! {
    // General graphics state
    SetLineWidth = "w",
    SetLineCap = "J",
    SetLineJoin = "j",
    SetMiterLimit = "M",
    SetDash = "d",
    SetRenderingIntent = "ri",
    SetFlatness = "i",
    /// Apply an ExtGState dictionary
    SetGState = "gs",
    Save = "q",
    Restore = "Q",
    /// Concatenate a matrix to the CTM
    Transform = "cm",

    // Path construction
    MoveTo = "m",
    LineTo = "l",
    CurveTo = "c",
    /// Curve whose first control point is the current point
    CurveTo2 = "v",
    /// Curve whose second control point is the end point
    CurveTo3 = "y",
    ClosePath = "h",
    Rectangle = "re",

    // Path painting
    Stroke = "S",
    CloseStroke = "s",
    Fill = "f" | "F",
    EOFill = "f*",
    FillStroke = "B",
    EOFillStroke = "B*",
    CloseFillStroke = "b",
    CloseEOFillStroke = "b*",
    EndPath = "n",

    // Clipping
    Clip = "W",
    EOClip = "W*",

    // Text objects and state
    BeginText = "BT",
    EndText = "ET",
    SetCharSpacing = "Tc",
    SetWordSpacing = "Tw",
    SetHScale = "Tz",
    SetLeading = "TL",
    SetFont = "Tf",
    SetTextRenderingMode = "Tr",
    SetTextRise = "Ts",

    // Text positioning
    MoveText = "Td",
    SetLeadingMoveText = "TD",
    SetTextMatrix = "Tm",
    NextLine = "T*",

    // Text showing
    ShowText = "Tj",
    ShowSpacedText = "TJ",
    NextLineShowText = "'",
    NextLineSetSpacingShowText = "\"",

    // Type 3 glyph metrics
    SetCharWidth = "d0",
    SetCharWidthAndBounds = "d1",

    // Colour
    SetStrokeColorSpace = "CS",
    SetFillColorSpace = "cs",
    SetStrokeColor = "SC",
    SetStrokeColorN = "SCN",
    SetFillColor = "sc",
    SetFillColorN = "scn",
    SetStrokeGray = "G",
    SetFillGray = "g",
    SetStrokeRGBColor = "RG",
    SetFillRGBColor = "rg",
    SetStrokeCMYKColor = "K",
    SetFillCMYKColor = "k",

    ShadingFill = "sh",

    /// A whole inline image; the reader folds `BI`, `ID` and `EI` into it
    InlineImage = "BI",

    PaintXObject = "Do",

    // Marked content
    MarkPoint = "MP",
    MarkPointProps = "DP",
    BeginMarkedContent = "BMC",
    BeginMarkedContentProps = "BDC",
    EndMarkedContent = "EMC",

    // Compatibility sections
    BeginCompat = "BX",
    EndCompat = "EX",
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_command())
    }
}

/// Operand list of one operation.
pub type Operands = SmallVec<[PDFObject; 6]>;

/// A parsed content stream operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub op: OpCode,
    /// The operands, in the order they appeared before the operator
    pub args: Operands,
}

impl Operation {
    pub fn new(op: OpCode, args: impl IntoIterator<Item = PDFObject>) -> Self {
        Operation {
            op,
            args: args.into_iter().collect(),
        }
    }

    /// Inline image carried by an [`OpCode::InlineImage`] operation.
    pub fn inline_image(&self) -> Option<&Arc<PdfStream>> {
        match (self.op, self.args.first()) {
            (OpCode::InlineImage, Some(PDFObject::Stream(image))) => Some(image),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.op)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", arg)?;
        }
        write!(f, ")")
    }
}

/// Reads operations from a decoded content stream.
///
/// Malformed operands and unknown operators are skipped with a debug log;
/// reading only stops at the end of the data.
pub struct ContentStreamReader {
    parser: Parser<'static>,
}

impl ContentStreamReader {
    pub fn new(data: Vec<u8>) -> PDFResult<Self> {
        Self::from_shared(Arc::new(data))
    }

    pub fn from_shared(data: Arc<Vec<u8>>) -> PDFResult<Self> {
        let length = data.len();
        let lexer = Lexer::new(Box::new(Stream::from_arc(data, 0, length)))?;
        Ok(ContentStreamReader {
            parser: Parser::for_content(lexer),
        })
    }

    /// Reads the next operation, or `None` at the end of the stream.
    pub fn read_operation(&mut self) -> PDFResult<Option<Operation>> {
        let mut args = Operands::new();

        loop {
            let before = self.parser.lexer().position();
            let obj = match self.parser.get_object() {
                Ok(obj) => obj,
                Err(e) if e.is_end_of_data() => return Ok(None),
                Err(e) => {
                    tracing::debug!("skipping bad content stream token: {e}");
                    if self.parser.lexer().position() == before && !self.parser.has_lookahead() {
                        return Ok(None);
                    }
                    continue;
                }
            };

            match obj {
                PDFObject::EOF => {
                    if !args.is_empty() {
                        tracing::debug!("content stream ends with {} dangling operands", args.len());
                    }
                    return Ok(None);
                }
                PDFObject::Command(cmd) => match OpCode::from_command(&cmd) {
                    Some(OpCode::InlineImage) => {
                        return match self.read_inline_image() {
                            Ok(image) => Ok(Some(Operation::new(
                                OpCode::InlineImage,
                                [PDFObject::Stream(Arc::new(image))],
                            ))),
                            Err(e) => {
                                tracing::warn!("skipping inline image: {e}");
                                Ok(None)
                            }
                        };
                    }
                    Some(op) => return Ok(Some(Operation { op, args })),
                    None => {
                        tracing::debug!("skipping unknown operator '{cmd}'");
                        args.clear();
                    }
                },
                operand => {
                    if args.len() >= MAX_OPERANDS {
                        tracing::debug!("too many operands, dropping them");
                        args.clear();
                    }
                    args.push(operand);
                }
            }
        }
    }

    /// Reads `key value ... ID <data> EI` after a `BI`.
    fn read_inline_image(&mut self) -> PDFResult<PdfStream> {
        let mut dict = Dict::default();
        loop {
            match self.parser.get_object()? {
                PDFObject::Command(cmd) if cmd == "ID" => break,
                PDFObject::Name(key) => {
                    let value = self.parser.get_object()?;
                    dict.insert(key, value);
                }
                PDFObject::EOF => {
                    return Err(PDFError::content_stream_error(
                        "inline image without ID",
                    ));
                }
                other => tracing::debug!("ignoring {} in inline image dictionary", other.type_name()),
            }
        }

        // A single white-space byte separates ID from the data
        let lexer = self.parser.lexer_mut();
        let mut start = lexer.position();
        if lexer.current_byte().is_some_and(is_whitespace) {
            start += 1;
        }

        let end = match inline_image_length(&dict) {
            Some(length) if ends_with_ei(lexer, start + length) => start + length,
            _ => find_end_marker(lexer, start)?,
        };
        let data = lexer.stream().get_byte_range(start, end.min(lexer.length()))?;

        // Skip past the EI keyword
        let resume = find_in_stream(lexer.stream(), end, b"EI", MAX_INLINE_IMAGE)?;
        lexer.set_position(resume.map_or(lexer.length(), |at| at + 2))?;

        Ok(PdfStream::new(dict, data))
    }
}

impl Iterator for ContentStreamReader {
    type Item = Operation;

    fn next(&mut self) -> Option<Operation> {
        self.read_operation().ok().flatten()
    }
}

/// Byte length of unfiltered inline image data, when it can be computed.
fn inline_image_length(dict: &Dict) -> Option<usize> {
    let get = |short: &str, long: &str| dict.get(short).or_else(|| dict.get(long));
    if get("F", "Filter").is_some() {
        return None;
    }
    let width = get("W", "Width")?.as_usize()?;
    let height = get("H", "Height")?.as_usize()?;
    let is_mask = get("IM", "ImageMask").and_then(PDFObject::as_bool).unwrap_or(false);
    let bpc = if is_mask {
        1
    } else {
        get("BPC", "BitsPerComponent")?.as_usize()?
    };
    let components = if is_mask {
        1
    } else {
        match get("CS", "ColorSpace").and_then(PDFObject::as_name) {
            Some("G" | "DeviceGray" | "I" | "Indexed") => 1,
            Some("RGB" | "DeviceRGB") => 3,
            Some("CMYK" | "DeviceCMYK") => 4,
            // Indexed arrays and named spaces from resources
            Some(_) => return None,
            None => match get("CS", "ColorSpace") {
                Some(PDFObject::Array(_)) => 1,
                _ => return None,
            },
        }
    };
    let row = (width.checked_mul(components)?.checked_mul(bpc)? + 7) / 8;
    row.checked_mul(height)
}

/// True when `EI` follows `at`, after optional white space.
fn ends_with_ei(lexer: &Lexer, at: usize) -> bool {
    let ahead = lexer
        .stream()
        .get_byte_range(at.min(lexer.length()), (at + 8).min(lexer.length()))
        .unwrap_or_default();
    let rest: Vec<u8> = ahead.into_iter().skip_while(|b| is_whitespace(*b)).collect();
    rest.starts_with(b"EI") && rest.get(2).is_none_or(|b| is_whitespace(*b) || *b == b'/')
}

/// Finds white space followed by `EI` and a delimiter; returns the offset
/// where the data ends.
fn find_end_marker(lexer: &Lexer, start: usize) -> PDFResult<usize> {
    let mut from = start;
    while let Some(at) = find_in_stream(lexer.stream(), from, b"EI", MAX_INLINE_IMAGE)? {
        let stream = lexer.stream();
        let before = if at > 0 { stream.get_byte_range(at - 1, at)?.first().copied() } else { None };
        let after = stream
            .get_byte_range(at + 2, (at + 3).min(lexer.length()))?
            .first()
            .copied();
        if before.is_some_and(is_whitespace) && after.is_none_or(|b| is_whitespace(b) || b == b'Q') {
            return Ok(at - 1);
        }
        from = at + 2;
    }
    Ok(lexer.length())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(content: &str) -> Vec<Operation> {
        ContentStreamReader::new(content.as_bytes().to_vec())
            .unwrap()
            .collect()
    }

    #[test]
    fn test_opcode_from_command() {
        assert_eq!(OpCode::from_command("m"), Some(OpCode::MoveTo));
        assert_eq!(OpCode::from_command("F"), Some(OpCode::Fill));
        assert_eq!(OpCode::from_command("cm"), Some(OpCode::Transform));
        assert_eq!(OpCode::from_command("Tj"), Some(OpCode::ShowText));
        assert_eq!(OpCode::from_command("XYZ"), None);
    }

    #[test]
    fn test_opcode_to_command() {
        assert_eq!(OpCode::MoveTo.to_command(), "m");
        assert_eq!(OpCode::Fill.to_command(), "f");
        assert_eq!(OpCode::NextLineSetSpacingShowText.to_command(), "\"");
    }

    #[test]
    fn test_read_simple_path() {
        let ops = read_all("10 20 m\n30 40 l\nS");

        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].op, OpCode::MoveTo);
        assert_eq!(ops[0].args.as_slice(), &[PDFObject::Number(10.0), PDFObject::Number(20.0)]);
        assert_eq!(ops[1].op, OpCode::LineTo);
        assert_eq!(ops[2].op, OpCode::Stroke);
        assert!(ops[2].args.is_empty());
    }

    #[test]
    fn test_read_text_operations() {
        let ops = read_all("BT\n/F1 12 Tf\n[(He) -50 (llo)] TJ\nET");
        let codes: Vec<OpCode> = ops.iter().map(|o| o.op).collect();

        assert_eq!(
            codes,
            vec![OpCode::BeginText, OpCode::SetFont, OpCode::ShowSpacedText, OpCode::EndText]
        );
        assert_eq!(ops[2].args[0].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_unknown_operator_skipped_with_operands() {
        let ops = read_all("1 2 XYZ 3 w");
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op, OpCode::SetLineWidth);
        assert_eq!(ops[0].args.as_slice(), &[PDFObject::Number(3.0)]);
    }

    #[test]
    fn test_stray_delimiter_skipped() {
        let ops = read_all("0 0 m ) 5 5 l");
        let codes: Vec<OpCode> = ops.iter().map(|o| o.op).collect();
        assert_eq!(codes, vec![OpCode::MoveTo, OpCode::LineTo]);
    }

    #[test]
    fn test_inline_image_with_known_length() {
        // Data contains "EI" but the computed length skips over it
        let ops = read_all("q BI /W 2 /H 1 /BPC 8 /CS /RGB ID EI\x00\x01\x02 EI Q");

        assert_eq!(ops.len(), 3);
        let image = ops[1].inline_image().unwrap();
        assert_eq!(image.raw, b"EI\x00\x01\x02 ".to_vec());
        assert_eq!(image.dict.get("W"), Some(&PDFObject::Number(2.0)));
        assert_eq!(ops[2].op, OpCode::Restore);
    }

    #[test]
    fn test_inline_image_filtered_data_scanned() {
        let ops = read_all("BI /W 4 /H 4 /F /AHx ID 00ff00ff> EI 1 g");

        let image = ops[0].inline_image().unwrap();
        assert_eq!(image.raw, b"00ff00ff>");
        assert_eq!(ops[1].op, OpCode::SetFillGray);
    }
}
