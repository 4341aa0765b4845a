use thiserror::Error;

/// Integer status codes reported across the facade boundary.
///
/// Every [`PDFError`] maps onto exactly one of these through
/// [`PDFError::code`]. `Ok` is never produced by an error.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok = 0,
    /// Source unreadable or a read outside its bounds.
    IOError = -1,
    /// Not a structurally valid PDF (bad header/trailer, unrecoverable xref).
    ParseError = -2,
    /// Localized corruption; the engine skipped past it.
    MalformedObjectError = -3,
    /// A construct that is intentionally not implemented.
    UnsupportedFeatureError = -4,
    /// Operation on a released or never-opened handle.
    InvalidHandleError = -5,
    PageOutOfRange = -6,
    InvalidArgument = -7,
    RenderError = -8,
}

impl ErrorCode {
    /// Returns the raw integer value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Maps a raw integer back to a code. Unknown values become `None`.
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => ErrorCode::Ok,
            -1 => ErrorCode::IOError,
            -2 => ErrorCode::ParseError,
            -3 => ErrorCode::MalformedObjectError,
            -4 => ErrorCode::UnsupportedFeatureError,
            -5 => ErrorCode::InvalidHandleError,
            -6 => ErrorCode::PageOutOfRange,
            -7 => ErrorCode::InvalidArgument,
            -8 => ErrorCode::RenderError,
            _ => return None,
        })
    }

    /// Static human readable meaning of the code.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::Ok => "success",
            ErrorCode::IOError => "source unreadable or read out of bounds",
            ErrorCode::ParseError => "not a well-formed PDF document",
            ErrorCode::MalformedObjectError => "malformed object skipped",
            ErrorCode::UnsupportedFeatureError => "unsupported feature",
            ErrorCode::InvalidHandleError => "invalid or released document handle",
            ErrorCode::PageOutOfRange => "page index out of range",
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::RenderError => "rendering failed",
        }
    }
}

/// Universal error type for PDF operations.
///
/// This error type covers everything that can go wrong while reading,
/// parsing and rendering a document.
#[derive(Debug, Clone, Error)]
pub enum PDFError {
    /// The underlying source could not be read.
    #[error("I/O error: {0}")]
    Io(String),

    /// End of stream reached unexpectedly
    #[error("Unexpected end of stream")]
    UnexpectedEndOfStream,

    /// Invalid byte range requested
    #[error("Invalid byte range: {begin}..{end}")]
    InvalidByteRange { begin: usize, end: usize },

    /// Invalid stream position
    #[error("Invalid position {pos} for stream of length {length}")]
    InvalidPosition { pos: usize, length: usize },

    /// Structural parse failure.
    #[error("Parse error: {message}{}", fmt_offset(.offset))]
    Parse {
        message: String,
        offset: Option<usize>,
    },

    /// An object body that could not be parsed.
    #[error("Malformed object: {message}{}", fmt_offset(.offset))]
    MalformedObject {
        message: String,
        offset: Option<usize>,
    },

    /// A page tree node that points back at one of its ancestors.
    #[error("Cyclic page tree at object {object}")]
    CyclicPageTree { object: u32 },

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("Invalid document handle")]
    InvalidHandle,

    #[error("Page index {index} out of range (page count {count})")]
    PageOutOfRange { index: usize, count: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Bad operands or structure inside a content stream.
    #[error("Content stream error: {0}")]
    ContentStream(String),

    #[error("Rendering error: {0}")]
    Rendering(String),
}

fn fmt_offset(offset: &Option<usize>) -> String {
    match offset {
        Some(pos) => format!(" at byte {}", pos),
        None => String::new(),
    }
}

impl PDFError {
    pub fn parse_error(message: impl Into<String>, offset: Option<usize>) -> Self {
        PDFError::Parse {
            message: message.into(),
            offset,
        }
    }

    pub fn malformed(message: impl Into<String>, offset: Option<usize>) -> Self {
        PDFError::MalformedObject {
            message: message.into(),
            offset,
        }
    }

    pub fn unsupported(feature: impl Into<String>) -> Self {
        PDFError::UnsupportedFeature(feature.into())
    }

    pub fn content_stream_error(message: impl Into<String>) -> Self {
        PDFError::ContentStream(message.into())
    }

    /// The facade status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            PDFError::Io(_)
            | PDFError::UnexpectedEndOfStream
            | PDFError::InvalidByteRange { .. }
            | PDFError::InvalidPosition { .. } => ErrorCode::IOError,
            PDFError::Parse { .. } => ErrorCode::ParseError,
            PDFError::MalformedObject { .. }
            | PDFError::CyclicPageTree { .. }
            | PDFError::ContentStream(_) => ErrorCode::MalformedObjectError,
            PDFError::UnsupportedFeature(_) => ErrorCode::UnsupportedFeatureError,
            PDFError::InvalidHandle => ErrorCode::InvalidHandleError,
            PDFError::PageOutOfRange { .. } => ErrorCode::PageOutOfRange,
            PDFError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            PDFError::Rendering(_) => ErrorCode::RenderError,
        }
    }

    /// Errors raised while reading past the available data.
    pub fn is_end_of_data(&self) -> bool {
        matches!(
            self,
            PDFError::UnexpectedEndOfStream | PDFError::InvalidPosition { .. }
        )
    }
}

impl From<std::io::Error> for PDFError {
    fn from(err: std::io::Error) -> Self {
        PDFError::Io(err.to_string())
    }
}

/// Result type alias for PDF operations
pub type PDFResult<T> = Result<T, PDFError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ErrorCode::Ok.as_i32(), 0);
        assert_eq!(ErrorCode::IOError.as_i32(), -1);
        assert_eq!(ErrorCode::InvalidHandleError.as_i32(), -5);
        for raw in -8..=0 {
            let code = ErrorCode::from_i32(raw).unwrap();
            assert_eq!(code.as_i32(), raw);
        }
        assert_eq!(ErrorCode::from_i32(-99), None);
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(PDFError::UnexpectedEndOfStream.code(), ErrorCode::IOError);
        assert_eq!(
            PDFError::parse_error("no trailer", None).code(),
            ErrorCode::ParseError
        );
        assert_eq!(
            PDFError::CyclicPageTree { object: 3 }.code(),
            ErrorCode::MalformedObjectError
        );
        assert_eq!(
            PDFError::unsupported("JBIG2Decode").code(),
            ErrorCode::UnsupportedFeatureError
        );
        assert_eq!(
            PDFError::PageOutOfRange { index: 2, count: 2 }.code(),
            ErrorCode::PageOutOfRange
        );
    }

    #[test]
    fn test_display_includes_offset() {
        let err = PDFError::malformed("bad dictionary", Some(42));
        assert_eq!(err.to_string(), "Malformed object: bad dictionary at byte 42");
        let err = PDFError::parse_error("missing startxref", None);
        assert_eq!(err.to_string(), "Parse error: missing startxref");
    }
}
