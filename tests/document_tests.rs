//! Document loading: cross-reference chains, recovery and page trees.

mod test_utils;

use pdf_view::{EngineOptions, ErrorCode, PDFDocument, PDFError, PdfView};
use std::io::Write;
use test_utils::*;

fn document(data: Vec<u8>) -> PDFDocument {
    PDFDocument::open_bytes(data, &EngineOptions::default()).unwrap()
}

#[test]
fn test_page_count_and_sizes() {
    let view = open(pages_pdf(&["", "", ""]));
    assert_eq!(view.page_count().unwrap(), 3);
    for index in 0..3 {
        assert_eq!(view.page_size(index).unwrap(), (200.0, 200.0));
    }
}

#[test]
fn test_page_out_of_range() {
    let view = open(pages_pdf(&[""]));
    let err = view.page_size(1).unwrap_err();
    assert!(matches!(err, PDFError::PageOutOfRange { index: 1, count: 1 }));
    assert_eq!(err.code(), ErrorCode::PageOutOfRange);
}

#[test]
fn test_incremental_update_wins() {
    let mut builder = PdfBuilder::new();
    builder
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 100 100] >>")
        .xref_table("/Root 1 0 R");
    builder
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 300 400] >>")
        .xref_table("/Root 1 0 R");

    let doc = document(builder.build());
    assert!(!doc.xref().was_rebuilt());
    assert_eq!(doc.page_count(), 1);
    assert_eq!(doc.page(0).unwrap().size(), (300.0, 400.0));
}

#[test]
fn test_update_adds_pages() {
    let mut builder = PdfBuilder::new();
    builder
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 100 100] >>")
        .object(3, "<< /Type /Page /Parent 2 0 R >>")
        .xref_table("/Root 1 0 R");
    builder
        .object(2, "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 /MediaBox [0 0 100 100] >>")
        .object(4, "<< /Type /Page /Parent 2 0 R >>")
        .xref_table("/Root 1 0 R");

    assert_eq!(document(builder.build()).page_count(), 2);
}

#[test]
fn test_shifted_offsets_are_recovered() {
    let mut builder = PdfBuilder::new().with_offset_shift(7);
    builder
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 100 100] >>")
        .object(4, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 50 50] >>")
        .xref_table("/Root 1 0 R");

    let doc = document(builder.build());
    assert_eq!(doc.page_count(), 2);
    assert_eq!(doc.page(1).unwrap().size(), (50.0, 50.0));
}

#[test]
fn test_missing_xref_is_rebuilt() {
    let data = b"%PDF-1.4\n\
        1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
        2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n\
        3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 10 20] >> endobj\n"
        .to_vec();

    let doc = document(data);
    assert!(doc.xref().was_rebuilt());
    assert_eq!(doc.page(0).unwrap().size(), (10.0, 20.0));
}

#[test]
fn test_cyclic_page_tree_terminates() {
    let doc = document(cyclic_pdf());
    assert_eq!(doc.page_count(), 2);
    assert_eq!(doc.page(1).unwrap().size(), (50.0, 80.0));
    assert!(
        doc.diagnostics()
            .iter()
            .any(|d| matches!(d, PDFError::CyclicPageTree { object: 2 }))
    );
}

#[test]
fn test_self_referencing_kid() {
    let mut builder = PdfBuilder::new();
    builder
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [2 0 R 3 0 R] /Count 1 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 10 10] >>")
        .xref_table("/Root 1 0 R");

    assert_eq!(document(builder.build()).page_count(), 1);
}

#[test]
fn test_object_stream_and_xref_stream() {
    let mut builder = PdfBuilder::new();
    builder
        .object_stream(
            5,
            &[
                (1, "<< /Type /Catalog /Pages 2 0 R >>"),
                (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>"),
                (3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 144 72] /Rotate 90 >>"),
            ],
        )
        .xref_stream(6, "/Root 1 0 R");

    let doc = document(builder.build());
    assert!(!doc.xref().was_rebuilt());
    assert_eq!(doc.page_count(), 1);
    assert_eq!(doc.page(0).unwrap().rotation(), 90);
    assert_eq!(doc.page(0).unwrap().size(), (72.0, 144.0));
}

#[test]
fn test_xref_stream_update_over_table() {
    let mut builder = PdfBuilder::new();
    builder
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 100 100] >>")
        .xref_table("/Root 1 0 R");
    builder
        .object_stream(4, &[(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 20 30] >>")])
        .xref_stream(5, "/Root 1 0 R");

    assert_eq!(document(builder.build()).page(0).unwrap().size(), (20.0, 30.0));
}

#[test]
fn test_hybrid_file_reads_compressed_objects() {
    // The classic table lists 1 and 2 as free; /XRefStm places them in
    // the object stream
    let mut builder = PdfBuilder::new();
    builder
        .object_stream(
            4,
            &[
                (1, "<< /Type /Catalog /Pages 2 0 R >>"),
                (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 300 150] >>"),
            ],
        )
        .object(3, "<< /Type /Page /Parent 2 0 R >>")
        .hybrid_table(5, "/Root 1 0 R");

    let doc = document(builder.build());
    assert!(!doc.xref().was_rebuilt());
    assert!(doc.diagnostics().is_empty());
    assert_eq!(doc.page_count(), 1);
    assert_eq!(doc.page(0).unwrap().size(), (300.0, 150.0));
}

#[test]
fn test_update_over_hybrid_file() {
    let mut builder = PdfBuilder::new();
    builder
        .object_stream(
            4,
            &[
                (1, "<< /Type /Catalog /Pages 2 0 R >>"),
                (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 300 150] >>"),
            ],
        )
        .object(3, "<< /Type /Page /Parent 2 0 R >>")
        .hybrid_table(5, "/Root 1 0 R");
    builder
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 40 60] >>")
        .xref_table("/Root 1 0 R");

    let doc = document(builder.build());
    assert!(!doc.xref().was_rebuilt());
    assert_eq!(doc.page_count(), 1);
    assert_eq!(doc.page(0).unwrap().size(), (40.0, 60.0));
}

#[test]
fn test_deeply_nested_kid_is_skipped() {
    let deep = format!("{}{}", "[".repeat(300), "]".repeat(300));
    let mut builder = PdfBuilder::new();
    builder
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 10 20] >>")
        .object(4, &deep)
        .xref_table("/Root 1 0 R");

    let doc = document(builder.build());
    assert_eq!(doc.page_count(), 1);
    assert_eq!(doc.page(0).unwrap().size(), (10.0, 20.0));
    assert!(
        doc.diagnostics()
            .iter()
            .any(|d| d.code() == ErrorCode::MalformedObjectError)
    );
}

#[test]
fn test_inherited_attributes_and_user_unit() {
    let mut builder = PdfBuilder::new();
    builder
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 100 50] /Rotate 270 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R /UserUnit 2 /CropBox [10 10 60 40] >>")
        .xref_table("/Root 1 0 R");

    let doc = document(builder.build());
    let page = doc.page(0).unwrap();
    assert_eq!(page.rotation(), 270);
    assert_eq!(page.user_unit(), 2.0);
    assert_eq!(page.size(), (60.0, 100.0));
}

#[test]
fn test_catalog_version_overrides_header() {
    let mut builder = PdfBuilder::new();
    builder
        .object(1, "<< /Type /Catalog /Pages 2 0 R /Version /2.0 >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
        .xref_table("/Root 1 0 R");

    let doc = document(builder.build());
    assert_eq!(doc.version(), "2.0");
    assert_eq!(doc.page_count(), 0);
}

#[test]
fn test_garbage_is_parse_error() {
    let err = PDFDocument::open_bytes(b"not a pdf at all".to_vec(), &EngineOptions::default())
        .err()
        .unwrap();
    assert_eq!(err.code(), ErrorCode::ParseError);

    let err = PDFDocument::open_bytes(Vec::new(), &EngineOptions::default()).err().unwrap();
    assert_eq!(err.code(), ErrorCode::ParseError);
}

#[test]
fn test_open_path_reads_in_chunks() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&pages_pdf(&["", ""])).unwrap();
    file.flush().unwrap();

    let options = EngineOptions::default().with_chunk_size(64).with_max_cached_chunks(4);
    let view = PdfView::open_path(file.path(), &options).unwrap();
    assert_eq!(view.page_count().unwrap(), 2);
    assert_eq!(view.page_size(1).unwrap(), (200.0, 200.0));
}

#[test]
fn test_open_missing_path_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = PdfView::open_path(dir.path().join("absent.pdf"), &EngineOptions::default())
        .err()
        .unwrap();
    assert_eq!(err.code(), ErrorCode::IOError);
}

#[cfg(unix)]
#[test]
fn test_open_fd_leaves_descriptor_open() {
    use std::io::{Read, Seek, SeekFrom};
    use std::os::fd::AsFd;

    let data = pages_pdf(&[""]);
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&data).unwrap();

    let view = PdfView::open_fd(file.as_fd(), &EngineOptions::default()).unwrap();
    assert_eq!(view.page_count().unwrap(), 1);
    drop(view);

    // The caller still owns the descriptor.
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut header = [0u8; 8];
    file.read_exact(&mut header).unwrap();
    assert_eq!(&header, b"%PDF-1.7");
}
