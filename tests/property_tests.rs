//! Property-based tests: arbitrary input never panics, geometry holds for
//! any valid request.

mod test_utils;

use pdf_view::{EngineOptions, Lexer, PDFDocument, Parser, PdfView, RenderRequest, Stream};
use proptest::prelude::*;
use test_utils::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_random_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let _ = PDFDocument::open_bytes(data, &EngineOptions::default());
    }

    #[test]
    fn prop_header_with_garbage_never_panics(tail in prop::collection::vec(any::<u8>(), 0..2048)) {
        let mut data = b"%PDF-1.7\n".to_vec();
        data.extend(tail);
        let _ = PDFDocument::open_bytes(data, &EngineOptions::default());
    }

    #[test]
    fn prop_truncated_document_never_panics(cut in 0usize..400) {
        let mut data = rect_pdf(10.0, 10.0, 50.0, 50.0);
        data.truncate(cut.min(data.len()));
        if let Ok(mut view) = PdfView::open_bytes(data, &EngineOptions::default()) {
            if view.page_count().unwrap_or(0) > 0 {
                let _ = view.render_page(0, &RenderRequest::new(20, 20));
            }
        }
    }

    #[test]
    fn prop_parser_terminates(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let lexer = Lexer::new(Box::new(Stream::from_bytes(data))).unwrap();
        let mut parser = Parser::new(lexer);
        for _ in 0..1024 {
            if parser.get_object().is_err() {
                break;
            }
        }
    }

    #[test]
    fn prop_render_matches_request(
        width in 1u32..64,
        height in 1u32..64,
        zoom in 0.1f64..4.0,
        left in -50i32..50,
        top in -50i32..50,
        quarter in 0i32..4,
    ) {
        let mut view = open(rect_pdf(20.0, 20.0, 100.0, 80.0));
        let request = RenderRequest::new(width, height)
            .with_zoom(zoom)
            .with_origin(left, top)
            .with_rotation(quarter * 90);
        let raster = view.render_page(0, &request).unwrap();
        prop_assert_eq!(raster.width(), width);
        prop_assert_eq!(raster.height(), height);
        prop_assert_eq!(raster.pixels().len(), (width * height) as usize);
    }

    #[test]
    fn prop_content_operators_never_fail_the_page(
        ops in prop::collection::vec(
            prop::sample::select(vec![
                "q", "Q", "1 0 0 1 5 5 cm", "0.5 g", "1 0 0 RG", "2 w", "10 10 m", "50 60 l",
                "0 0 30 30 re", "h", "f", "S", "B*", "W n", "BT", "ET", "/F1 12 Tf", "(x) Tj",
                "[(a) -20 (b)] TJ", "1 2 3 4 5 6 c", "/Missing Do", "0.2 0.4 0.6 0.8 k", "n",
            ]),
            0..40,
        )
    ) {
        let content = ops.join("\n");
        let mut view = open(pages_pdf(&[&content]));
        prop_assert!(view.render_page(0, &RenderRequest::new(40, 40)).is_ok());
    }
}
