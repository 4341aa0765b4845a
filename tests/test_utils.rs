//! Test utilities: synthesised PDF documents and raster helpers.
//!
//! Documents are built in memory with exact byte offsets, so tests can
//! also corrupt them on purpose (shifted xref offsets, cycles in the page
//! tree) and check how the engine recovers.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::ZlibEncoder;
use pdf_view::{EngineOptions, PdfView, RasterBuffer, RenderRequest};
use std::collections::BTreeMap;
use std::io::Write;

pub const WHITE: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy)]
enum Entry {
    Offset(usize),
    Compressed { stream: u32, index: u32 },
}

/// Writes a PDF file object by object, one revision at a time.
pub struct PdfBuilder {
    data: Vec<u8>,
    /// Entries written since the last cross-reference section
    revision: BTreeMap<u32, Entry>,
    prev_xref: Option<usize>,
    size: u32,
    offset_shift: i64,
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfBuilder {
    pub fn new() -> Self {
        PdfBuilder {
            data: b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec(),
            revision: BTreeMap::new(),
            prev_xref: None,
            size: 1,
            offset_shift: 0,
        }
    }

    /// Every offset written to classic xref tables is off by `shift` bytes.
    pub fn with_offset_shift(mut self, shift: i64) -> Self {
        self.offset_shift = shift;
        self
    }

    pub fn object(&mut self, num: u32, body: &str) -> &mut Self {
        self.start_object(num);
        write!(self.data, "{num} 0 obj\n{body}\nendobj\n").unwrap();
        self
    }

    pub fn stream(&mut self, num: u32, dict: &str, content: &[u8]) -> &mut Self {
        self.start_object(num);
        write!(self.data, "{num} 0 obj\n<< /Length {} {dict} >>\nstream\n", content.len()).unwrap();
        self.data.extend_from_slice(content);
        self.data.extend_from_slice(b"\nendstream\nendobj\n");
        self
    }

    pub fn flate_stream(&mut self, num: u32, dict: &str, content: &[u8]) -> &mut Self {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        let compressed = encoder.finish().unwrap();
        self.stream(num, &format!("/Filter /FlateDecode {dict}"), &compressed)
    }

    /// An object stream holding `objects`, which then live only inside it.
    pub fn object_stream(&mut self, num: u32, objects: &[(u32, &str)]) -> &mut Self {
        let mut header = String::new();
        let mut body = String::new();
        for (i, (member, text)) in objects.iter().enumerate() {
            header.push_str(&format!("{member} {} ", body.len()));
            body.push_str(text);
            body.push('\n');
            self.revision.insert(
                *member,
                Entry::Compressed {
                    stream: num,
                    index: i as u32,
                },
            );
            self.size = self.size.max(member + 1);
        }
        let first = header.len();
        let content = format!("{header}{body}");
        self.stream(
            num,
            &format!("/Type /ObjStm /N {} /First {first}", objects.len()),
            content.as_bytes(),
        )
    }

    /// Ends the revision with a classic `xref` table and trailer.
    pub fn xref_table(&mut self, trailer: &str) -> &mut Self {
        let start = self.data.len();
        self.write_table(trailer, "");
        self.end_revision(start)
    }

    /// Ends the revision the way hybrid files do: a cross-reference stream
    /// `num` lists the compressed objects, and the classic table lists
    /// them as free and points at the stream with `/XRefStm`.
    pub fn hybrid_table(&mut self, num: u32, trailer: &str) -> &mut Self {
        let compressed: BTreeMap<u32, Entry> = self
            .revision
            .iter()
            .filter(|(_, e)| matches!(e, Entry::Compressed { .. }))
            .map(|(n, e)| (*n, *e))
            .collect();
        let stream_at = self.data.len();
        self.size = self.size.max(num + 1);
        let dict = format!("/Size {}", self.size);
        self.write_stream_section(num, &compressed, false, &dict);
        self.revision.insert(num, Entry::Offset(stream_at));

        let start = self.data.len();
        self.write_table(trailer, &format!(" /XRefStm {stream_at}"));
        self.end_revision(start)
    }

    /// Ends the revision with a cross-reference stream numbered `num`.
    pub fn xref_stream(&mut self, num: u32, trailer: &str) -> &mut Self {
        let start = self.data.len();
        self.revision.insert(num, Entry::Offset(start));
        self.size = self.size.max(num + 1);

        let entries = self.revision.clone();
        let dict = format!("/Size {} {trailer}{}", self.size, self.prev());
        self.write_stream_section(num, &entries, self.prev_xref.is_none(), &dict);
        self.end_revision(start)
    }

    fn write_table(&mut self, trailer: &str, extra: &str) {
        self.data.extend_from_slice(b"xref\n");
        if self.prev_xref.is_none() {
            self.data.extend_from_slice(b"0 1\n0000000000 65535 f\r\n");
        }
        for run in runs(&self.revision) {
            write!(self.data, "{} {}\n", run[0].0, run.len()).unwrap();
            for (_, entry) in run {
                match entry {
                    Entry::Offset(offset) => {
                        let offset = (offset as i64 + self.offset_shift).max(0);
                        write!(self.data, "{offset:010} 00000 n\r\n").unwrap();
                    }
                    Entry::Compressed { .. } => self.data.extend_from_slice(b"0000000000 65535 f\r\n"),
                }
            }
        }
        write!(
            self.data,
            "trailer\n<< /Size {} {trailer}{extra}{} >>\n",
            self.size,
            self.prev()
        )
        .unwrap();
    }

    fn write_stream_section(&mut self, num: u32, entries: &BTreeMap<u32, Entry>, free_head: bool, dict: &str) {
        let mut index = String::new();
        let mut rows = Vec::new();
        if free_head {
            index.push_str("0 1 ");
            rows.extend_from_slice(&[0, 0, 0, 0, 0, 0xFF, 0xFF]);
        }
        for run in runs(entries) {
            index.push_str(&format!("{} {} ", run[0].0, run.len()));
            for (_, entry) in run {
                match entry {
                    Entry::Offset(offset) => {
                        rows.push(1);
                        rows.extend_from_slice(&(offset as u32).to_be_bytes());
                        rows.extend_from_slice(&[0, 0]);
                    }
                    Entry::Compressed { stream, index } => {
                        rows.push(2);
                        rows.extend_from_slice(&stream.to_be_bytes());
                        rows.extend_from_slice(&(index as u16).to_be_bytes());
                    }
                }
            }
        }

        write!(
            self.data,
            "{num} 0 obj\n<< /Length {} /Type /XRef /W [1 4 2] /Index [{}] {dict} >>\nstream\n",
            rows.len(),
            index.trim_end()
        )
        .unwrap();
        self.data.extend_from_slice(&rows);
        self.data.extend_from_slice(b"\nendstream\nendobj\n");
    }

    pub fn build(&self) -> Vec<u8> {
        self.data.clone()
    }

    fn start_object(&mut self, num: u32) {
        self.revision.insert(num, Entry::Offset(self.data.len()));
        self.size = self.size.max(num + 1);
    }

    fn prev(&self) -> String {
        self.prev_xref.map(|p| format!(" /Prev {p}")).unwrap_or_default()
    }

    fn end_revision(&mut self, start: usize) -> &mut Self {
        write!(self.data, "startxref\n{start}\n%%EOF\n").unwrap();
        self.prev_xref = Some(start);
        self.revision.clear();
        self
    }
}

/// Consecutive object numbers grouped into subsections.
fn runs(entries: &BTreeMap<u32, Entry>) -> Vec<Vec<(u32, Entry)>> {
    let mut runs: Vec<Vec<(u32, Entry)>> = Vec::new();
    for (&num, &entry) in entries {
        match runs.last_mut() {
            Some(run) if run.last().is_some_and(|(last, _)| last + 1 == num) => run.push((num, entry)),
            _ => runs.push(vec![(num, entry)]),
        }
    }
    runs
}

/// A document with one 200×200 page per content string.
pub fn pages_pdf(contents: &[&str]) -> Vec<u8> {
    let mut builder = PdfBuilder::new();
    let first_page = 3;
    let kids: Vec<String> = (0..contents.len())
        .map(|i| format!("{} 0 R", first_page + 2 * i as u32))
        .collect();

    builder.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    builder.object(
        2,
        &format!("<< /Type /Pages /Kids [{}] /Count {} /MediaBox [0 0 200 200] >>", kids.join(" "), contents.len()),
    );
    for (i, content) in contents.iter().enumerate() {
        let page = first_page + 2 * i as u32;
        builder.object(page, &format!("<< /Type /Page /Parent 2 0 R /Contents {} 0 R >>", page + 1));
        builder.stream(page + 1, "", content.as_bytes());
    }
    builder.xref_table("/Root 1 0 R");
    builder.build()
}

/// One 200×200 page with a black rectangle.
pub fn rect_pdf(x: f64, y: f64, width: f64, height: f64) -> Vec<u8> {
    pages_pdf(&[&format!("0 0 0 rg {x} {y} {width} {height} re f")])
}

/// A page tree whose second branch points back at the root:
/// root → [page, node → [root, page]]. Two pages are reachable.
pub fn cyclic_pdf() -> Vec<u8> {
    let mut builder = PdfBuilder::new();
    builder
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 /MediaBox [0 0 100 100] >>")
        .object(3, "<< /Type /Page /Parent 2 0 R >>")
        .object(4, "<< /Type /Pages /Parent 2 0 R /Kids [2 0 R 5 0 R] /Count 1 >>")
        .object(5, "<< /Type /Page /Parent 4 0 R /MediaBox [0 0 50 80] >>")
        .xref_table("/Root 1 0 R");
    builder.build()
}

pub fn open(data: Vec<u8>) -> PdfView {
    PdfView::open_bytes(data, &EngineOptions::default()).unwrap()
}

pub fn render(view: &mut PdfView, zoom: f64, width: u32, height: u32) -> RasterBuffer {
    view.render_page(0, &RenderRequest::new(width, height).with_zoom(zoom))
        .unwrap()
}

/// Bounding box `(x0, y0, x1, y1)` of pixels that are not white, inclusive.
pub fn ink_bounds(raster: &RasterBuffer) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for y in 0..raster.height() {
        for x in 0..raster.width() {
            if raster.pixel(x, y) == Some(WHITE) {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
    }
    bounds
}
