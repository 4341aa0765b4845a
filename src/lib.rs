//! A native PDF engine: parse documents, query page geometry and render
//! pages to raster buffers.
//!
//! ```no_run
//! use pdf_view::{EngineOptions, PdfView, RenderRequest};
//!
//! let mut view = PdfView::open_path("document.pdf", &EngineOptions::default())?;
//! let (width, height) = view.page_size(0)?;
//! let request = RenderRequest::new(width.ceil() as u32 * 2, height.ceil() as u32 * 2).with_zoom(2.0);
//! let raster = view.render_page(0, &request)?;
//! assert_eq!(raster.pixels().len(), (raster.width() * raster.height()) as usize);
//! view.release();
//! # Ok::<(), pdf_view::PDFError>(())
//! ```

pub mod core;
pub mod ffi;
pub mod rendering;
pub mod view;

pub use core::{
    BaseStream, EngineOptions, ErrorCode, FileChunkedStream, Lexer, PDFDocument, PDFError, PDFObject, PDFResult,
    Page, Parser, Stream, Token, XRef, XRefEntry,
};
pub use view::{PdfView, RasterBuffer, RenderRequest};
