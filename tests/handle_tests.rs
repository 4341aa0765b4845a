//! Handle lifecycle, through the Rust facade and the C ABI.

mod test_utils;

use pdf_view::ffi::{
    pdfview_open_bytes, pdfview_open_path, pdfview_page_count, pdfview_page_size, pdfview_release,
    pdfview_render_page,
};
use pdf_view::{ErrorCode, PDFError, RenderRequest};
use std::ffi::CString;
use std::io::Write;
use test_utils::*;

#[test]
fn test_released_view_rejects_calls() {
    let mut view = open(pages_pdf(&[""]));
    assert!(!view.is_released());
    view.release();
    assert!(view.is_released());

    assert!(matches!(view.page_count(), Err(PDFError::InvalidHandle)));
    assert!(matches!(view.page_size(0), Err(PDFError::InvalidHandle)));
    let err = view.render_page(0, &RenderRequest::new(10, 10)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidHandleError);

    // A second release is harmless.
    view.release();
    assert!(view.is_released());
}

#[test]
fn test_c_handle_lifecycle() {
    let data = rect_pdf(0.0, 0.0, 100.0, 100.0);
    let mut handle = 0;
    assert_eq!(pdfview_open_bytes(data.as_ptr(), data.len(), &mut handle), 0);
    assert_ne!(handle, 0);
    assert_eq!(pdfview_page_count(handle), 1);

    let (mut width, mut height) = (0.0, 0.0);
    assert_eq!(pdfview_page_size(handle, 0, &mut width, &mut height), 0);
    assert_eq!((width, height), (200.0, 200.0));
    assert_eq!(
        pdfview_page_size(handle, 1, &mut width, &mut height),
        ErrorCode::PageOutOfRange.as_i32()
    );

    // Zoom 0.5: the 100 pt square fills the lower-left quarter of 100×100.
    let mut pixels = vec![0u32; 100 * 100];
    let status = pdfview_render_page(handle, 0, 500, 0, 0, 100, 100, 0, pixels.as_mut_ptr(), pixels.len());
    assert_eq!(status, 0);
    assert_eq!(pixels[0], WHITE);
    assert_eq!(pixels[99 * 100], 0xFF00_0000);
    assert_eq!(pixels[60 * 100 + 40], 0xFF00_0000);

    assert_eq!(pdfview_release(handle), 0);
    assert_eq!(pdfview_page_count(handle), ErrorCode::InvalidHandleError.as_i32());
    let status = pdfview_render_page(handle, 0, 1000, 0, 0, 10, 10, 0, pixels.as_mut_ptr(), pixels.len());
    assert_eq!(status, ErrorCode::InvalidHandleError.as_i32());
    assert_eq!(pdfview_release(handle), 0);
}

#[test]
fn test_c_handles_are_independent() {
    let one = pages_pdf(&[""]);
    let three = pages_pdf(&["", "", ""]);
    let (mut a, mut b) = (0, 0);
    assert_eq!(pdfview_open_bytes(one.as_ptr(), one.len(), &mut a), 0);
    assert_eq!(pdfview_open_bytes(three.as_ptr(), three.len(), &mut b), 0);
    assert_ne!(a, b);

    assert_eq!(pdfview_release(a), 0);
    assert_eq!(pdfview_page_count(b), 3);
    assert_eq!(pdfview_release(b), 0);
}

#[test]
fn test_c_open_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&pages_pdf(&["", ""])).unwrap();
    file.flush().unwrap();

    let path = CString::new(file.path().to_str().unwrap()).unwrap();
    let mut handle = 0;
    assert_eq!(pdfview_open_path(path.as_ptr(), &mut handle), 0);
    assert_eq!(pdfview_page_count(handle), 2);
    assert_eq!(pdfview_release(handle), 0);

    let missing = CString::new("/nonexistent/file.pdf").unwrap();
    assert_eq!(
        pdfview_open_path(missing.as_ptr(), &mut handle),
        ErrorCode::IOError.as_i32()
    );
}

#[test]
fn test_views_render_from_threads() {
    let data = rect_pdf(50.0, 50.0, 100.0, 50.0);
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let data = data.clone();
            std::thread::spawn(move || {
                let mut view = open(data);
                render(&mut view, 1.0, 200, 200)
            })
        })
        .collect();

    let rasters: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert!(rasters.windows(2).all(|pair| pair[0] == pair[1]));
}
