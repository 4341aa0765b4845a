//! C ABI over [`PdfView`].
//!
//! Documents live in a process-wide store and are addressed by integer
//! handles. Handles are never reused, so a released handle stays invalid.
//! Every function returns an [`ErrorCode`] value (or a non-negative count)
//! and never unwinds into the caller.

#![allow(clippy::not_unsafe_ptr_arg_deref)]

use crate::core::error::{ErrorCode, PDFError, PDFResult};
use crate::core::options::EngineOptions;
use crate::view::{PdfView, RenderRequest};
use rustc_hash::FxHashMap;
use std::ffi::{c_char, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

/// Opaque document handle. Zero is never a valid handle.
pub type Handle = u64;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Thread-safe map from handles to open documents.
pub struct HandleStore<T> {
    store: Mutex<FxHashMap<Handle, Arc<Mutex<T>>>>,
}

impl<T> HandleStore<T> {
    pub fn new() -> Self {
        HandleStore {
            store: Mutex::new(FxHashMap::default()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, FxHashMap<Handle, Arc<Mutex<T>>>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use = "the handle is the only way to release the value"]
    pub fn insert(&self, value: T) -> Handle {
        let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        self.entries().insert(handle, Arc::new(Mutex::new(value)));
        handle
    }

    pub fn get(&self, handle: Handle) -> Option<Arc<Mutex<T>>> {
        self.entries().get(&handle).cloned()
    }

    pub fn remove(&self, handle: Handle) -> Option<Arc<Mutex<T>>> {
        self.entries().remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandleStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

static VIEWS: LazyLock<HandleStore<PdfView>> = LazyLock::new(HandleStore::new);

fn code_of<T>(result: PDFResult<T>) -> i32 {
    match result {
        Ok(_) => ErrorCode::Ok.as_i32(),
        Err(e) => e.code().as_i32(),
    }
}

/// Runs `f`, turning a panic into `on_panic`.
fn guarded(on_panic: ErrorCode, f: impl FnOnce() -> i32) -> i32 {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        tracing::error!("panic caught at the C boundary");
        on_panic.as_i32()
    })
}

fn with_view<T>(handle: Handle, f: impl FnOnce(&mut PdfView) -> PDFResult<T>) -> PDFResult<T> {
    let view = VIEWS.get(handle).ok_or(PDFError::InvalidHandle)?;
    let mut view = view.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut view)
}

fn store_opened(result: PDFResult<PdfView>, out_handle: *mut Handle) -> i32 {
    match result {
        Ok(view) => {
            let handle = VIEWS.insert(view);
            // SAFETY: checked non-null by the caller of this helper.
            unsafe { *out_handle = handle };
            ErrorCode::Ok.as_i32()
        }
        Err(e) => {
            tracing::warn!("open failed: {e}");
            e.code().as_i32()
        }
    }
}

/// Opens a document from `len` bytes at `data`. The bytes are copied.
#[unsafe(no_mangle)]
pub extern "C" fn pdfview_open_bytes(data: *const u8, len: usize, out_handle: *mut Handle) -> i32 {
    if data.is_null() || out_handle.is_null() {
        return ErrorCode::InvalidArgument.as_i32();
    }
    guarded(ErrorCode::ParseError, || {
        // SAFETY: the caller guarantees `data` points to `len` readable bytes.
        let bytes = unsafe { std::slice::from_raw_parts(data, len) }.to_vec();
        store_opened(PdfView::open_bytes(bytes, &EngineOptions::default()), out_handle)
    })
}

/// Opens the file at the NUL-terminated UTF-8 `path`.
#[unsafe(no_mangle)]
pub extern "C" fn pdfview_open_path(path: *const c_char, out_handle: *mut Handle) -> i32 {
    if path.is_null() || out_handle.is_null() {
        return ErrorCode::InvalidArgument.as_i32();
    }
    guarded(ErrorCode::ParseError, || {
        // SAFETY: the caller guarantees a valid NUL-terminated string.
        let Ok(path) = unsafe { CStr::from_ptr(path) }.to_str() else {
            return ErrorCode::InvalidArgument.as_i32();
        };
        store_opened(PdfView::open_path(path, &EngineOptions::default()), out_handle)
    })
}

/// Opens the document behind an open descriptor. The descriptor stays
/// owned by the caller and its file offset is not moved.
#[cfg(unix)]
#[unsafe(no_mangle)]
pub extern "C" fn pdfview_open_fd(fd: std::ffi::c_int, out_handle: *mut Handle) -> i32 {
    use std::os::fd::BorrowedFd;

    if fd < 0 || out_handle.is_null() {
        return ErrorCode::InvalidArgument.as_i32();
    }
    guarded(ErrorCode::ParseError, || {
        // SAFETY: the caller guarantees `fd` is open for the whole call.
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        store_opened(PdfView::open_fd(fd, &EngineOptions::default()), out_handle)
    })
}

/// Number of pages, or a negative error code.
#[unsafe(no_mangle)]
pub extern "C" fn pdfview_page_count(handle: Handle) -> i32 {
    guarded(ErrorCode::MalformedObjectError, || {
        match with_view(handle, |view| view.page_count()) {
            Ok(count) => i32::try_from(count).unwrap_or(i32::MAX),
            Err(e) => e.code().as_i32(),
        }
    })
}

/// Stores the size of page `index` in points.
#[unsafe(no_mangle)]
pub extern "C" fn pdfview_page_size(handle: Handle, index: u32, width: *mut f64, height: *mut f64) -> i32 {
    if width.is_null() || height.is_null() {
        return ErrorCode::InvalidArgument.as_i32();
    }
    guarded(ErrorCode::MalformedObjectError, || {
        code_of(with_view(handle, |view| {
            let (w, h) = view.page_size(index as usize)?;
            // SAFETY: both pointers were checked non-null.
            unsafe {
                *width = w;
                *height = h;
            }
            Ok(())
        }))
    })
}

/// Renders page `index` into the caller's `out_len` pixels at `out`.
///
/// `zoom` is in thousandths (1000 is one device pixel per point). Pixels
/// are `0xAARRGGBB`, rows top to bottom. The buffer is only written when
/// rendering succeeds.
#[allow(clippy::too_many_arguments)]
#[unsafe(no_mangle)]
pub extern "C" fn pdfview_render_page(
    handle: Handle,
    index: u32,
    zoom: i32,
    left: i32,
    top: i32,
    width: u32,
    height: u32,
    rotation: i32,
    out: *mut u32,
    out_len: usize,
) -> i32 {
    if out.is_null() {
        return ErrorCode::InvalidArgument.as_i32();
    }
    guarded(ErrorCode::RenderError, || {
        code_of(with_view(handle, |view| {
            let needed = width as usize * height as usize;
            if out_len < needed {
                return Err(PDFError::InvalidArgument(format!(
                    "buffer holds {out_len} pixels, {needed} needed"
                )));
            }
            let request = RenderRequest::new(width, height)
                .with_zoom(f64::from(zoom) / 1000.0)
                .with_origin(left, top)
                .with_rotation(rotation);
            let raster = view.render_page(index as usize, &request)?;
            // SAFETY: `out` holds at least `needed` pixels.
            let target = unsafe { std::slice::from_raw_parts_mut(out, needed) };
            target.copy_from_slice(raster.pixels());
            Ok(())
        }))
    })
}

/// Releases `handle`. Unknown and already released handles are ignored.
#[unsafe(no_mangle)]
pub extern "C" fn pdfview_release(handle: Handle) -> i32 {
    guarded(ErrorCode::Ok, || {
        if let Some(view) = VIEWS.remove(handle) {
            view.lock().unwrap_or_else(PoisonError::into_inner).release();
        }
        ErrorCode::Ok.as_i32()
    })
}

/// Static NUL-terminated description of an error code.
#[unsafe(no_mangle)]
pub extern "C" fn pdfview_error_message(code: i32) -> *const c_char {
    let message: &'static CStr = match ErrorCode::from_i32(code) {
        Some(ErrorCode::Ok) => c"success",
        Some(ErrorCode::IOError) => c"source unreadable or read out of bounds",
        Some(ErrorCode::ParseError) => c"not a well-formed PDF document",
        Some(ErrorCode::MalformedObjectError) => c"malformed object skipped",
        Some(ErrorCode::UnsupportedFeatureError) => c"unsupported feature",
        Some(ErrorCode::InvalidHandleError) => c"invalid or released document handle",
        Some(ErrorCode::PageOutOfRange) => c"page index out of range",
        Some(ErrorCode::InvalidArgument) => c"invalid argument",
        Some(ErrorCode::RenderError) => c"rendering failed",
        None => c"unknown error code",
    };
    message.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_PAGE: &[u8] = b"%PDF-1.4
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj
2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj
3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 100 200] >> endobj
trailer << /Root 1 0 R >>
%%EOF
";

    fn open() -> Handle {
        let mut handle = 0;
        let code = pdfview_open_bytes(ONE_PAGE.as_ptr(), ONE_PAGE.len(), &mut handle);
        assert_eq!(code, 0);
        assert_ne!(handle, 0);
        handle
    }

    #[test]
    fn test_open_query_release() {
        let handle = open();
        assert_eq!(pdfview_page_count(handle), 1);

        let (mut w, mut h) = (0.0, 0.0);
        assert_eq!(pdfview_page_size(handle, 0, &mut w, &mut h), 0);
        assert_eq!((w, h), (100.0, 200.0));
        assert_eq!(
            pdfview_page_size(handle, 1, &mut w, &mut h),
            ErrorCode::PageOutOfRange.as_i32()
        );

        assert_eq!(pdfview_release(handle), 0);
        assert_eq!(pdfview_release(handle), 0);
        assert_eq!(pdfview_page_count(handle), ErrorCode::InvalidHandleError.as_i32());
    }

    #[test]
    fn test_render_into_caller_buffer() {
        let handle = open();
        let mut pixels = vec![0u32; 10 * 20];
        let code = pdfview_render_page(handle, 0, 100, 0, 0, 10, 20, 0, pixels.as_mut_ptr(), pixels.len());
        assert_eq!(code, 0);
        assert!(pixels.iter().all(|p| *p == 0xFFFF_FFFF));

        // Too small a buffer is rejected and left untouched.
        let mut small = vec![7u32; 4];
        let code = pdfview_render_page(handle, 0, 1000, 0, 0, 10, 20, 0, small.as_mut_ptr(), small.len());
        assert_eq!(code, ErrorCode::InvalidArgument.as_i32());
        assert!(small.iter().all(|p| *p == 7));
        pdfview_release(handle);
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let data = b"definitely not a pdf";
        let mut handle = 0;
        let code = pdfview_open_bytes(data.as_ptr(), data.len(), &mut handle);
        assert_eq!(code, ErrorCode::ParseError.as_i32());
        assert_eq!(handle, 0);
    }

    #[test]
    fn test_null_arguments() {
        let mut handle = 0;
        assert_eq!(
            pdfview_open_bytes(std::ptr::null(), 0, &mut handle),
            ErrorCode::InvalidArgument.as_i32()
        );
        assert_eq!(pdfview_page_count(0), ErrorCode::InvalidHandleError.as_i32());
    }

    #[test]
    fn test_error_messages_are_static() {
        let message = unsafe { CStr::from_ptr(pdfview_error_message(-6)) };
        assert_eq!(message.to_str().unwrap(), ErrorCode::PageOutOfRange.description());
        let unknown = unsafe { CStr::from_ptr(pdfview_error_message(42)) };
        assert_eq!(unknown.to_str().unwrap(), "unknown error code");
    }
}
