pub mod base_stream;
pub mod chunk_manager;
pub mod content_stream;
pub mod crypto;
pub mod decode;
pub mod document;
pub mod error;
pub mod file_chunked_stream;
pub mod lexer;
pub mod options;
pub mod page;
pub mod parser;
pub mod stream;
pub mod xref;
pub mod xref_scan;

pub use base_stream::BaseStream;
pub use chunk_manager::{ChunkLoader, ChunkManager};
pub use content_stream::{ContentStreamReader, OpCode, Operation};
pub use decode::DecodedStream;
pub use document::PDFDocument;
pub use error::{ErrorCode, PDFError, PDFResult};
pub use file_chunked_stream::FileChunkedStream;
pub use lexer::{Lexer, Token};
pub use options::EngineOptions;
pub use page::{Page, Rect};
pub use parser::{Dict, PDFObject, Parser, PdfStream, Ref};
pub use stream::Stream;
pub use xref::{XRef, XRefEntry};
