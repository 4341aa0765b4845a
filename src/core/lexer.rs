use super::base_stream::BaseStream;
use super::error::{PDFError, PDFResult};

/// PDF token types returned by the Lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// End of input
    EOF,

    Boolean(bool),

    Null,

    /// Numeric value (integers and reals)
    Number(f64),

    /// Literal string such as `(hello)`, escapes already resolved
    String(Vec<u8>),

    /// Hex string such as `<48656c6c6f>`, already decoded
    HexString(Vec<u8>),

    /// Name without its leading slash, `#xx` escapes decoded
    Name(String),

    /// Keyword or content stream operator (`obj`, `R`, `BT`, `re`, ...)
    Command(String),

    ArrayStart,

    ArrayEnd,

    DictStart,

    DictEnd,
}

const MAX_COMMAND_LENGTH: usize = 128;

/// PDF Lexer for tokenizing PDF syntax.
///
/// The lexer keeps one byte of lookahead (`current`). It can be
/// repositioned anywhere in the underlying stream with
/// [`Lexer::set_position`], which is how the xref resolver reads objects
/// at arbitrary offsets.
///
/// The lexer handles:
/// - Whitespace and comment skipping, including NUL and form feed
/// - Numbers, with the usual real-world oddities (`--5`, `4.-3`, `+.5`)
/// - Literal and hexadecimal strings
/// - Names with `#xx` escapes
/// - Keywords and operators
pub struct Lexer {
    stream: Box<dyn BaseStream>,

    /// Byte under the cursor, `None` at end of input
    current: Option<u8>,

    /// Scratch buffer for strings and names
    buf: Vec<u8>,
}

#[inline]
pub fn is_whitespace(ch: u8) -> bool {
    matches!(ch, 0x00 | 0x09 | 0x0A | 0x0C | 0x0D | 0x20)
}

#[inline]
pub fn is_delimiter(ch: u8) -> bool {
    matches!(
        ch,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// Whitespace or delimiter.
#[inline]
pub fn is_special(ch: u8) -> bool {
    is_whitespace(ch) || is_delimiter(ch)
}

fn hex_value(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}

impl Lexer {
    /// Creates a lexer positioned at the start of `stream`.
    pub fn new(stream: Box<dyn BaseStream>) -> PDFResult<Self> {
        Self::new_at(stream, 0)
    }

    /// Creates a lexer positioned at `offset`.
    pub fn new_at(stream: Box<dyn BaseStream>, offset: usize) -> PDFResult<Self> {
        let mut lexer = Lexer {
            stream,
            current: None,
            buf: Vec::new(),
        };
        lexer.set_position(offset)?;
        Ok(lexer)
    }

    /// Moves the cursor to `offset` and discards the lookahead.
    pub fn set_position(&mut self, offset: usize) -> PDFResult<()> {
        self.stream.set_pos(offset)?;
        self.advance()?;
        Ok(())
    }

    /// Offset of the byte under the cursor (the next byte to be lexed).
    pub fn position(&self) -> usize {
        match self.current {
            Some(_) => self.stream.pos().saturating_sub(1),
            None => self.stream.pos(),
        }
    }

    /// Total length of the underlying stream.
    pub fn length(&self) -> usize {
        self.stream.length()
    }

    /// The underlying stream, for raw ranged reads.
    pub fn stream(&self) -> &dyn BaseStream {
        self.stream.as_ref()
    }

    /// Byte under the cursor without consuming it.
    pub fn current_byte(&self) -> Option<u8> {
        self.current
    }

    fn advance(&mut self) -> PDFResult<Option<u8>> {
        self.current = match self.stream.get_byte() {
            Ok(byte) => Some(byte),
            Err(PDFError::UnexpectedEndOfStream) => None,
            Err(e) => return Err(e),
        };
        Ok(self.current)
    }

    fn peek(&mut self) -> PDFResult<Option<u8>> {
        match self.stream.peek_byte() {
            Ok(byte) => Ok(Some(byte)),
            Err(PDFError::UnexpectedEndOfStream) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Consumes raw bytes starting at the cursor, bypassing tokenization.
    ///
    /// Used for binary payloads such as inline image data.
    pub fn read_raw(&mut self, length: usize) -> PDFResult<Vec<u8>> {
        let start = self.position();
        let end = start.saturating_add(length).min(self.stream.length());
        let data = self.stream.get_byte_range(start, end)?;
        self.set_position(end)?;
        Ok(data)
    }

    /// Skips whitespace and comments.
    fn skip_whitespace_and_comments(&mut self) -> PDFResult<()> {
        let mut in_comment = false;
        while let Some(ch) = self.current {
            if in_comment {
                if ch == b'\n' || ch == b'\r' {
                    in_comment = false;
                }
            } else if ch == b'%' {
                in_comment = true;
            } else if !is_whitespace(ch) {
                break;
            }
            self.advance()?;
        }
        Ok(())
    }

    /// Returns the next token.
    pub fn next_token(&mut self) -> PDFResult<Token> {
        self.skip_whitespace_and_comments()?;

        let Some(ch) = self.current else {
            return Ok(Token::EOF);
        };

        match ch {
            b'0'..=b'9' | b'+' | b'-' | b'.' => self.lex_number(),
            b'(' => self.lex_literal_string(),
            b'/' => self.lex_name(),
            b'[' => {
                self.advance()?;
                Ok(Token::ArrayStart)
            }
            b']' => {
                self.advance()?;
                Ok(Token::ArrayEnd)
            }
            b'<' => {
                if self.advance()? == Some(b'<') {
                    self.advance()?;
                    Ok(Token::DictStart)
                } else {
                    self.lex_hex_string()
                }
            }
            b'>' => {
                let offset = self.position();
                if self.advance()? == Some(b'>') {
                    self.advance()?;
                    Ok(Token::DictEnd)
                } else {
                    Err(PDFError::malformed("stray '>'", Some(offset)))
                }
            }
            b')' | b'{' | b'}' => {
                let offset = self.position();
                self.advance()?;
                Err(PDFError::malformed(
                    format!("illegal character '{}'", ch as char),
                    Some(offset),
                ))
            }
            _ => self.lex_command(),
        }
    }

    /// Parses a number token.
    ///
    /// Tolerates a doubled minus sign, line breaks after the sign and minus
    /// signs in the middle of the digits, all of which occur in the wild.
    fn lex_number(&mut self) -> PDFResult<Token> {
        let start = self.position();
        let mut ch = self.current;
        let mut negative = false;

        match ch {
            Some(b'-') => {
                negative = true;
                ch = self.advance()?;
                if ch == Some(b'-') {
                    ch = self.advance()?;
                }
            }
            Some(b'+') => ch = self.advance()?,
            _ => {}
        }
        while matches!(ch, Some(b'\n') | Some(b'\r')) {
            ch = self.advance()?;
        }

        let mut divisor = 0.0f64;
        if ch == Some(b'.') {
            divisor = 10.0;
            ch = self.advance()?;
        }

        let mut value = match ch {
            Some(digit @ b'0'..=b'9') => (digit - b'0') as f64,
            Some(other) if !(is_whitespace(other) || other == b'(' || other == b'<') => {
                return Err(PDFError::malformed(
                    format!("invalid number character '{}'", other as char),
                    Some(start),
                ));
            }
            // A lone sign or dot counts as zero
            _ => return Ok(Token::Number(0.0)),
        };

        let mut exponent: i32 = 0;
        let mut exponent_sign: i32 = 1;
        let mut in_exponent = false;

        loop {
            ch = self.advance()?;
            match ch {
                Some(digit @ b'0'..=b'9') => {
                    let digit = (digit - b'0') as i32;
                    if in_exponent {
                        exponent = exponent.saturating_mul(10).saturating_add(digit);
                    } else {
                        if divisor != 0.0 {
                            divisor *= 10.0;
                        }
                        value = value * 10.0 + digit as f64;
                    }
                }
                Some(b'.') if !in_exponent => {
                    if divisor == 0.0 {
                        divisor = 1.0;
                    } else {
                        break;
                    }
                }
                Some(b'-') => {}
                Some(b'e') | Some(b'E') if !in_exponent => {
                    match self.peek()? {
                        Some(sign @ (b'+' | b'-')) => {
                            exponent_sign = if sign == b'-' { -1 } else { 1 };
                            self.advance()?;
                        }
                        Some(b'0'..=b'9') => {}
                        // `e` starts the next operator
                        _ => break,
                    }
                    in_exponent = true;
                }
                _ => break,
            }
        }

        if divisor != 0.0 {
            value /= divisor;
        }
        if in_exponent {
            value *= 10f64.powi(exponent_sign * exponent.min(308));
        }
        Ok(Token::Number(if negative { -value } else { value }))
    }

    /// Parses a literal string with nested parentheses and escapes.
    fn lex_literal_string(&mut self) -> PDFResult<Token> {
        self.buf.clear();
        let mut depth = 1usize;
        let mut ch = self.advance()?;

        loop {
            let Some(byte) = ch else {
                // Unterminated string: keep what we have
                break;
            };
            match byte {
                b'(' => {
                    depth += 1;
                    self.buf.push(byte);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance()?;
                        break;
                    }
                    self.buf.push(byte);
                }
                b'\\' => {
                    ch = self.advance()?;
                    match ch {
                        None => break,
                        Some(b'n') => self.buf.push(b'\n'),
                        Some(b'r') => self.buf.push(b'\r'),
                        Some(b't') => self.buf.push(b'\t'),
                        Some(b'b') => self.buf.push(0x08),
                        Some(b'f') => self.buf.push(0x0C),
                        Some(first @ b'0'..=b'7') => {
                            let mut code = (first - b'0') as u32;
                            let mut digits = 1;
                            ch = self.advance()?;
                            while digits < 3 {
                                match ch {
                                    Some(d @ b'0'..=b'7') => {
                                        code = code * 8 + (d - b'0') as u32;
                                        digits += 1;
                                        ch = self.advance()?;
                                    }
                                    _ => break,
                                }
                            }
                            self.buf.push((code & 0xFF) as u8);
                            // `ch` already holds the byte after the escape
                            continue;
                        }
                        Some(b'\r') => {
                            if self.peek()? == Some(b'\n') {
                                self.advance()?;
                            }
                        }
                        Some(b'\n') => {}
                        Some(other) => self.buf.push(other),
                    }
                }
                _ => self.buf.push(byte),
            }
            ch = self.advance()?;
        }

        Ok(Token::String(std::mem::take(&mut self.buf)))
    }

    /// Parses a hex string; whitespace and junk digits are skipped and an
    /// odd trailing digit is padded with zero.
    fn lex_hex_string(&mut self) -> PDFResult<Token> {
        self.buf.clear();
        let mut high: Option<u8> = None;

        while let Some(ch) = self.current {
            if ch == b'>' {
                self.advance()?;
                break;
            }
            if let Some(nibble) = hex_value(ch) {
                match high.take() {
                    Some(h) => self.buf.push((h << 4) | nibble),
                    None => high = Some(nibble),
                }
            }
            self.advance()?;
        }
        if let Some(h) = high {
            self.buf.push(h << 4);
        }

        Ok(Token::HexString(std::mem::take(&mut self.buf)))
    }

    /// Parses a name, decoding `#xx` escapes. Invalid escapes are kept
    /// literally.
    fn lex_name(&mut self) -> PDFResult<Token> {
        self.buf.clear();
        let mut ch = self.advance()?;

        while let Some(byte) = ch {
            if is_special(byte) {
                break;
            }
            if byte == b'#' {
                let first = self.advance()?;
                match first.and_then(hex_value) {
                    Some(h) => {
                        let second = self.advance()?;
                        match second.and_then(hex_value) {
                            Some(l) => self.buf.push((h << 4) | l),
                            None => {
                                self.buf.push(b'#');
                                self.buf.extend(first);
                                ch = second;
                                continue;
                            }
                        }
                    }
                    None => {
                        self.buf.push(b'#');
                        ch = first;
                        continue;
                    }
                }
            } else {
                self.buf.push(byte);
            }
            ch = self.advance()?;
        }

        let name = String::from_utf8_lossy(&self.buf).into_owned();
        Ok(Token::Name(name))
    }

    /// Parses a keyword; `true`, `false` and `null` become their own tokens.
    fn lex_command(&mut self) -> PDFResult<Token> {
        let start = self.position();
        let mut command = String::new();

        while let Some(byte) = self.current {
            if is_special(byte) {
                break;
            }
            if command.len() >= MAX_COMMAND_LENGTH {
                return Err(PDFError::malformed("command token too long", Some(start)));
            }
            command.push(byte as char);
            self.advance()?;
        }

        Ok(match command.as_str() {
            "true" => Token::Boolean(true),
            "false" => Token::Boolean(false),
            "null" => Token::Null,
            _ => Token::Command(command),
        })
    }

    /// Skips to just past the next end-of-line marker (CR, LF or CRLF).
    pub fn skip_to_next_line(&mut self) -> PDFResult<()> {
        while let Some(ch) = self.current {
            self.advance()?;
            if ch == b'\r' {
                if self.current == Some(b'\n') {
                    self.advance()?;
                }
                break;
            }
            if ch == b'\n' {
                break;
            }
        }
        Ok(())
    }

    /// Scans forward from the cursor for `needle` and returns its offset.
    ///
    /// The cursor is left unchanged. Reads in windows so it works on
    /// chunked file streams.
    pub fn find_forward(&self, needle: &[u8], limit: usize) -> PDFResult<Option<usize>> {
        find_in_stream(self.stream.as_ref(), self.position(), needle, limit)
    }
}

/// Finds the first occurrence of `needle` in `stream` at or after `from`,
/// looking at most `limit` bytes ahead.
pub fn find_in_stream(
    stream: &dyn BaseStream,
    from: usize,
    needle: &[u8],
    limit: usize,
) -> PDFResult<Option<usize>> {
    const WINDOW: usize = 8192;
    if needle.is_empty() {
        return Ok(Some(from));
    }
    let end = from.saturating_add(limit).min(stream.length());
    let mut offset = from;
    while offset < end {
        let window_end = (offset + WINDOW + needle.len()).min(end);
        let window = stream.get_byte_range(offset, window_end)?;
        if let Some(found) = window.windows(needle.len()).position(|w| w == needle) {
            return Ok(Some(offset + found));
        }
        if window_end == end {
            break;
        }
        offset += WINDOW;
    }
    Ok(None)
}
