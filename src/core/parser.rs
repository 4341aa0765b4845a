use super::error::{PDFError, PDFResult};
use super::lexer::{Lexer, Token};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Dictionary storage. Keys are names without the leading slash.
pub type Dict = FxHashMap<String, PDFObject>;

/// Nesting limit for arrays and dictionaries.
const MAX_NESTING: usize = 256;

/// Indirect object identity (`num gen R`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ref {
    pub num: u32,
    pub generation: u32,
}

impl Ref {
    pub fn new(num: u32, generation: u32) -> Self {
        Ref { num, generation }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.num, self.generation)
    }
}

/// A stream object: its dictionary plus the raw (still encoded) body.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfStream {
    pub dict: Dict,
    pub raw: Vec<u8>,
}

impl PdfStream {
    pub fn new(dict: Dict, raw: Vec<u8>) -> Self {
        PdfStream { dict, raw }
    }
}

/// PDF object types as defined in the PDF specification.
#[derive(Debug, Clone, PartialEq)]
pub enum PDFObject {
    Null,

    Boolean(bool),

    /// Numeric value (integers and reals)
    Number(f64),

    /// Literal string such as (hello)
    String(Vec<u8>),

    /// Hex string such as <48656c6c6f>
    HexString(Vec<u8>),

    Name(String),

    Array(Vec<PDFObject>),

    Dictionary(Dict),

    /// Stream object, shared because decoded pages and resources point at
    /// the same stream many times
    Stream(Arc<PdfStream>),

    /// Indirect object reference (like "5 0 R")
    Ref(Ref),

    /// End of input marker
    EOF,

    /// Keyword or content stream operator (like 'q', 'Q', 'cm', 'Tj')
    Command(String),
}

impl PDFObject {
    pub fn is_eof(&self) -> bool {
        matches!(self, PDFObject::EOF)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PDFObject::Null)
    }

    /// Returns true if this object is the keyword `cmd`.
    pub fn is_command(&self, cmd: &str) -> bool {
        matches!(self, PDFObject::Command(command) if command == cmd)
    }

    /// Returns true if this object is the name `name`.
    pub fn is_name(&self, name: &str) -> bool {
        matches!(self, PDFObject::Name(n) if n == name)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PDFObject::Number(n) if n.is_finite() => Some(*n),
            _ => None,
        }
    }

    /// Integer value; reals are truncated toward zero.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().map(|n| n as i64)
    }

    /// Non-negative integer value.
    pub fn as_usize(&self) -> Option<usize> {
        self.as_number()
            .filter(|n| *n >= 0.0 && *n <= usize::MAX as f64)
            .map(|n| n as usize)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PDFObject::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            PDFObject::Name(n) => Some(n),
            _ => None,
        }
    }

    /// Bytes of a literal or hex string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PDFObject::String(s) | PDFObject::HexString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PDFObject]> {
        match self {
            PDFObject::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Dictionary of a dictionary or stream object.
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            PDFObject::Dictionary(d) => Some(d),
            PDFObject::Stream(s) => Some(&s.dict),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&Arc<PdfStream>> {
        match self {
            PDFObject::Stream(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<Ref> {
        match self {
            PDFObject::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Reads a numeric array such as `/MediaBox [0 0 612 792]`.
    pub fn as_number_array(&self) -> Option<Vec<f64>> {
        self.as_array()?.iter().map(PDFObject::as_number).collect()
    }

    /// Short type label used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            PDFObject::Null => "null",
            PDFObject::Boolean(_) => "boolean",
            PDFObject::Number(_) => "number",
            PDFObject::String(_) | PDFObject::HexString(_) => "string",
            PDFObject::Name(_) => "name",
            PDFObject::Array(_) => "array",
            PDFObject::Dictionary(_) => "dictionary",
            PDFObject::Stream(_) => "stream",
            PDFObject::Ref(_) => "reference",
            PDFObject::EOF => "eof",
            PDFObject::Command(_) => "command",
        }
    }
}

/// Resolves an indirect `/Length` while a stream is being parsed.
pub trait LengthResolver {
    fn resolve_length(&mut self, length_ref: Ref) -> Option<usize>;
}

/// Builds PDF objects from lexer tokens.
///
/// Lookahead is filled lazily: at most two tokens are buffered, and only
/// after a number, to detect `N G R`. Everything else leaves the lexer
/// right after the last consumed token, so callers can switch to raw byte
/// access (stream bodies, inline image data) at any object boundary.
pub struct Parser<'a> {
    lexer: Lexer,

    buf1: Option<Token>,

    buf2: Option<Token>,

    /// Used for streams whose `/Length` is an indirect reference
    resolver: Option<&'a mut dyn LengthResolver>,

    /// When false, `stream` keywords after dictionaries are not followed
    /// (content streams never contain stream objects)
    allow_streams: bool,

    /// Set once the nesting limit is hit; enclosing containers then give
    /// up instead of replacing the element with null
    too_deep: bool,
}

impl<'a> Parser<'a> {
    pub fn new(lexer: Lexer) -> Self {
        Parser {
            lexer,
            buf1: None,
            buf2: None,
            resolver: None,
            allow_streams: true,
            too_deep: false,
        }
    }

    /// Parser for content streams: stream keywords are plain operators.
    pub fn for_content(lexer: Lexer) -> Self {
        Parser {
            allow_streams: false,
            ..Parser::new(lexer)
        }
    }

    pub fn with_resolver(mut self, resolver: &'a mut dyn LengthResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn lexer(&self) -> &Lexer {
        &self.lexer
    }

    /// Direct lexer access for raw reads.
    ///
    /// Only meaningful when no lookahead is buffered, see
    /// [`Parser::has_lookahead`].
    pub fn lexer_mut(&mut self) -> &mut Lexer {
        &mut self.lexer
    }

    pub fn has_lookahead(&self) -> bool {
        self.buf1.is_some()
    }

    /// Drops buffered lookahead and moves the lexer to `offset`.
    pub fn seek(&mut self, offset: usize) -> PDFResult<()> {
        self.buf1 = None;
        self.buf2 = None;
        self.lexer.set_position(offset)
    }

    fn next_token(&mut self) -> PDFResult<Token> {
        match self.buf1.take() {
            Some(token) => {
                self.buf1 = self.buf2.take();
                Ok(token)
            }
            None => self.lexer.next_token(),
        }
    }

    fn peek1(&mut self) -> PDFResult<&Token> {
        if self.buf1.is_none() {
            self.buf1 = Some(self.lexer.next_token()?);
        }
        Ok(self.buf1.get_or_insert(Token::EOF))
    }

    fn peek2(&mut self) -> PDFResult<&Token> {
        self.peek1()?;
        if self.buf2.is_none() {
            self.buf2 = Some(self.lexer.next_token()?);
        }
        Ok(self.buf2.get_or_insert(Token::EOF))
    }

    /// Gets the next PDF object.
    ///
    /// Handles arrays, dictionaries (and streams that follow them),
    /// indirect references and simple objects. Keywords come back as
    /// [`PDFObject::Command`].
    pub fn get_object(&mut self) -> PDFResult<PDFObject> {
        self.too_deep = false;
        self.get_object_nested(0)
    }

    /// Errors that end the enclosing containers too.
    fn is_fatal(&self, e: &PDFError) -> bool {
        self.too_deep || e.is_end_of_data()
    }

    fn get_object_nested(&mut self, depth: usize) -> PDFResult<PDFObject> {
        if depth > MAX_NESTING {
            self.too_deep = true;
            return Err(PDFError::malformed(
                "objects nested too deeply",
                Some(self.lexer.position()),
            ));
        }
        let token = self.next_token()?;

        match token {
            Token::ArrayStart => self.parse_array(depth),
            Token::DictStart => self.parse_dictionary(depth),
            Token::ArrayEnd => Err(PDFError::malformed(
                "unexpected ']'",
                Some(self.lexer.position()),
            )),
            Token::DictEnd => Err(PDFError::malformed(
                "unexpected '>>'",
                Some(self.lexer.position()),
            )),
            Token::Number(n) => {
                // Only a second number warrants looking further ahead
                if let Token::Number(generation) = *self.peek1()? {
                    if self.peek2()? == &Token::Command("R".to_string()) {
                        self.next_token()?;
                        self.next_token()?;
                        if n < 0.0 || generation < 0.0 {
                            return Err(PDFError::malformed(
                                "negative object reference",
                                Some(self.lexer.position()),
                            ));
                        }
                        return Ok(PDFObject::Ref(Ref::new(n as u32, generation as u32)));
                    }
                }
                Ok(PDFObject::Number(n))
            }
            Token::EOF => Ok(PDFObject::EOF),
            Token::Boolean(b) => Ok(PDFObject::Boolean(b)),
            Token::Null => Ok(PDFObject::Null),
            Token::String(s) => Ok(PDFObject::String(s)),
            Token::HexString(s) => Ok(PDFObject::HexString(s)),
            Token::Name(n) => Ok(PDFObject::Name(n)),
            Token::Command(c) => Ok(PDFObject::Command(c)),
        }
    }

    fn parse_array(&mut self, depth: usize) -> PDFResult<PDFObject> {
        let mut array = Vec::new();

        loop {
            match self.peek1()? {
                Token::ArrayEnd => {
                    self.next_token()?;
                    break;
                }
                Token::EOF => {
                    return Err(PDFError::malformed(
                        "unterminated array",
                        Some(self.lexer.position()),
                    ));
                }
                _ => {}
            }

            match self.get_object_nested(depth + 1) {
                Ok(obj) => array.push(obj),
                Err(e) if self.is_fatal(&e) => return Err(e),
                Err(e) => {
                    tracing::debug!("bad array element replaced by null: {e}");
                    array.push(PDFObject::Null);
                }
            }
        }

        Ok(PDFObject::Array(array))
    }

    fn parse_dictionary(&mut self, depth: usize) -> PDFResult<PDFObject> {
        let mut dict = Dict::default();

        loop {
            let key = match self.next_token()? {
                Token::DictEnd => break,
                Token::EOF => {
                    return Err(PDFError::malformed(
                        "unterminated dictionary",
                        Some(self.lexer.position()),
                    ));
                }
                Token::Name(name) => name,
                other => {
                    // Non-name keys happen in damaged files; skip them
                    tracing::debug!("skipping non-name dictionary key {other:?}");
                    continue;
                }
            };

            if matches!(self.peek1()?, Token::DictEnd | Token::EOF) {
                dict.insert(key, PDFObject::Null);
                continue;
            }

            let value = match self.get_object_nested(depth + 1) {
                Ok(value) => value,
                Err(e) if self.is_fatal(&e) => return Err(e),
                Err(e) => {
                    tracing::debug!("bad value for /{key} replaced by null: {e}");
                    PDFObject::Null
                }
            };
            dict.insert(key, value);
        }

        if self.allow_streams && self.peek1()? == &Token::Command("stream".to_string()) {
            self.next_token()?;
            return self.parse_stream(dict);
        }

        Ok(PDFObject::Dictionary(dict))
    }

    /// Reads a stream body. The lexer sits right after the `stream` keyword.
    ///
    /// A declared `/Length` is trusted only when `endstream` follows it;
    /// otherwise the body runs up to the next `endstream` keyword.
    fn parse_stream(&mut self, dict: Dict) -> PDFResult<PDFObject> {
        self.lexer.skip_to_next_line()?;
        let start = self.lexer.position();
        let total = self.lexer.length();

        let declared = match dict.get("Length") {
            Some(PDFObject::Number(n)) if *n >= 0.0 => Some(*n as usize),
            Some(PDFObject::Ref(r)) => match self.resolver.as_deref_mut() {
                Some(resolver) => resolver.resolve_length(*r),
                None => None,
            },
            _ => None,
        };

        let checked = declared.filter(|len| {
            start
                .checked_add(*len)
                .is_some_and(|end| end <= total && self.endstream_follows(end))
        });

        let (data_end, resume) = match checked {
            Some(len) => {
                let end = start + len;
                (end, end)
            }
            None => {
                if declared.is_some() {
                    tracing::debug!("stream /Length {declared:?} is wrong, scanning for endstream");
                }
                match super::lexer::find_in_stream(
                    self.lexer.stream(),
                    start,
                    b"endstream",
                    usize::MAX,
                )? {
                    Some(found) => (trim_eol(self.lexer.stream(), start, found)?, found),
                    None => {
                        return Err(PDFError::malformed(
                            "stream without endstream",
                            Some(start),
                        ));
                    }
                }
            }
        };

        let raw = self.lexer.stream().get_byte_range(start, data_end)?;
        self.lexer.set_position(resume)?;
        if let Token::Command(cmd) = self.peek1()? {
            if cmd == "endstream" {
                self.next_token()?;
            }
        }

        Ok(PDFObject::Stream(Arc::new(PdfStream::new(dict, raw))))
    }

    fn endstream_follows(&self, end: usize) -> bool {
        let stream = self.lexer.stream();
        let limit = (end + 9 + 32).min(stream.length());
        let Ok(tail) = stream.get_byte_range(end, limit) else {
            return false;
        };
        let skip = tail
            .iter()
            .take_while(|b| super::lexer::is_whitespace(**b))
            .count();
        tail[skip..].starts_with(b"endstream")
    }

    /// Parses `num gen obj <object> endobj` at the current position.
    ///
    /// A missing `endobj` is tolerated.
    pub fn parse_indirect_object(&mut self) -> PDFResult<(Ref, PDFObject)> {
        let offset = self.lexer.position();
        let num = self.get_object()?;
        let generation = self.get_object()?;
        let keyword = self.get_object()?;

        let (Some(num), Some(generation)) = (num.as_number(), generation.as_number()) else {
            return Err(PDFError::malformed("expected object header", Some(offset)));
        };
        if !keyword.is_command("obj") || num < 0.0 || generation < 0.0 {
            return Err(PDFError::malformed("expected 'obj' keyword", Some(offset)));
        }

        let object = self.get_object()?;
        if object.is_eof() {
            return Err(PDFError::UnexpectedEndOfStream);
        }
        if let Token::Command(cmd) = self.peek1()? {
            if cmd == "endobj" {
                self.next_token()?;
            }
        }

        Ok((Ref::new(num as u32, generation as u32), object))
    }
}

/// Drops the end-of-line marker that precedes `endstream`.
fn trim_eol(
    stream: &dyn super::base_stream::BaseStream,
    start: usize,
    end: usize,
) -> PDFResult<usize> {
    let mut end = end;
    if end > start && stream.get_byte_range(end - 1, end)?[0] == b'\n' {
        end -= 1;
    }
    if end > start && stream.get_byte_range(end - 1, end)?[0] == b'\r' {
        end -= 1;
    }
    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream::Stream;

    fn parser(input: &[u8]) -> Parser<'static> {
        let lexer = Lexer::new(Box::new(Stream::from_bytes(input.to_vec()))).unwrap();
        Parser::new(lexer)
    }

    fn parse(input: &str) -> PDFResult<PDFObject> {
        parser(input.as_bytes()).get_object()
    }

    fn dict_of(obj: PDFObject) -> Dict {
        match obj {
            PDFObject::Dictionary(d) => d,
            other => panic!("Expected dictionary, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_simple_objects() {
        assert_eq!(parse("42").unwrap(), PDFObject::Number(42.0));
        assert_eq!(parse("true").unwrap(), PDFObject::Boolean(true));
        assert_eq!(parse("null").unwrap(), PDFObject::Null);
        assert_eq!(parse("(hello)").unwrap(), PDFObject::String(b"hello".to_vec()));
        assert_eq!(
            parse("<48656c6c6f>").unwrap(),
            PDFObject::HexString(b"Hello".to_vec())
        );
        assert_eq!(parse("/Type").unwrap(), PDFObject::Name("Type".to_string()));
        assert_eq!(parse("").unwrap(), PDFObject::EOF);
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(parse("12 0 R").unwrap(), PDFObject::Ref(Ref::new(12, 0)));

        let mut p = parser(b"[1 2 3 0 R 4]");
        assert_eq!(
            p.get_object().unwrap(),
            PDFObject::Array(vec![
                PDFObject::Number(1.0),
                PDFObject::Number(2.0),
                PDFObject::Ref(Ref::new(3, 0)),
                PDFObject::Number(4.0),
            ])
        );
    }

    #[test]
    fn test_parse_nested_array() {
        assert_eq!(
            parse("[[1 2] [/A (b)] []]").unwrap(),
            PDFObject::Array(vec![
                PDFObject::Array(vec![PDFObject::Number(1.0), PDFObject::Number(2.0)]),
                PDFObject::Array(vec![
                    PDFObject::Name("A".to_string()),
                    PDFObject::String(b"b".to_vec()),
                ]),
                PDFObject::Array(vec![]),
            ])
        );
    }

    #[test]
    fn test_parse_dictionary() {
        let dict = dict_of(parse("<< /Type /Font /Size 12 /Sub << /Inner 5 0 R >> >>").unwrap());

        assert_eq!(dict.get("Type"), Some(&PDFObject::Name("Font".to_string())));
        assert_eq!(dict.get("Size"), Some(&PDFObject::Number(12.0)));
        let inner = dict.get("Sub").and_then(PDFObject::as_dict).unwrap();
        assert_eq!(inner.get("Inner"), Some(&PDFObject::Ref(Ref::new(5, 0))));
    }

    #[test]
    fn test_dictionary_missing_value_is_null() {
        let dict = dict_of(parse("<< /A 1 /B >>").unwrap());
        assert_eq!(dict.get("B"), Some(&PDFObject::Null));
    }

    #[test]
    fn test_unterminated_containers() {
        assert!(matches!(
            parse("[1 2"),
            Err(PDFError::MalformedObject { .. })
        ));
        assert!(matches!(
            parse("<< /A 1"),
            Err(PDFError::MalformedObject { .. })
        ));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let input = "[".repeat(MAX_NESTING + 10);
        assert!(parse(&input).is_err());

        let input = format!("{}{}", "<< /A ".repeat(MAX_NESTING + 10), ">> ".repeat(MAX_NESTING + 10));
        assert!(parse(&input).is_err());
    }

    #[test]
    fn test_nesting_limit_boundary() {
        let input = format!("{}{} 7", "[".repeat(MAX_NESTING + 2), "]".repeat(MAX_NESTING + 2));
        let mut p = parser(input.as_bytes());
        assert!(p.get_object().is_err());

        // Nesting just under the limit still parses.
        let input = format!("{}{}", "[".repeat(MAX_NESTING), "]".repeat(MAX_NESTING));
        assert!(parse(&input).is_ok());
    }

    #[test]
    fn test_parse_stream_with_length() {
        let mut p = parser(b"<< /Length 5 >>\nstream\nHello\nendstream 7");
        let obj = p.get_object().unwrap();
        let stream = obj.as_stream().unwrap();
        assert_eq!(stream.raw, b"Hello");
        assert_eq!(p.get_object().unwrap(), PDFObject::Number(7.0));
    }

    #[test]
    fn test_parse_stream_with_wrong_length() {
        let mut p = parser(b"<< /Length 99 >>\nstream\r\nHello world\r\nendstream\nendobj");
        let obj = p.get_object().unwrap();
        assert_eq!(obj.as_stream().unwrap().raw, b"Hello world");
        assert!(p.get_object().unwrap().is_command("endobj"));
    }

    #[test]
    fn test_stream_length_resolver() {
        struct Fixed;
        impl LengthResolver for Fixed {
            fn resolve_length(&mut self, length_ref: Ref) -> Option<usize> {
                (length_ref == Ref::new(9, 0)).then_some(3)
            }
        }

        let mut resolver = Fixed;
        let lexer = Lexer::new(Box::new(Stream::from_bytes(
            b"<< /Length 9 0 R >> stream\nabc\nendstream".to_vec(),
        )))
        .unwrap();
        let mut p = Parser::new(lexer).with_resolver(&mut resolver);
        assert_eq!(p.get_object().unwrap().as_stream().unwrap().raw, b"abc");
    }

    #[test]
    fn test_content_parser_ignores_stream_keyword() {
        let lexer = Lexer::new(Box::new(Stream::from_bytes(b"<< /A 1 >> stream".to_vec()))).unwrap();
        let mut p = Parser::for_content(lexer);
        assert!(p.get_object().unwrap().as_dict().is_some());
        assert!(p.get_object().unwrap().is_command("stream"));
    }

    #[test]
    fn test_parse_indirect_object() {
        let mut p = parser(b"4 0 obj\n<< /Type /Page >>\nendobj\n5 1 obj 3.5 endobj");
        let (r, obj) = p.parse_indirect_object().unwrap();
        assert_eq!(r, Ref::new(4, 0));
        assert!(obj.as_dict().unwrap().get("Type").unwrap().is_name("Page"));

        let (r, obj) = p.parse_indirect_object().unwrap();
        assert_eq!(r, Ref::new(5, 1));
        assert_eq!(obj, PDFObject::Number(3.5));
    }

    #[test]
    fn test_bad_object_header() {
        let mut p = parser(b"4 0 notobj 1 endobj");
        assert!(matches!(
            p.parse_indirect_object(),
            Err(PDFError::MalformedObject { .. })
        ));
    }

    #[test]
    fn test_lexer_stays_at_object_boundary() {
        // After a number followed by a keyword, only one token is buffered
        let mut p = parser(b"/W 8 ID \x00\x01 EI");
        p.get_object().unwrap();
        p.get_object().unwrap();
        assert!(p.get_object().unwrap().is_command("ID"));
        assert!(!p.has_lookahead());
        assert_eq!(p.lexer().position(), 7);
    }
}
