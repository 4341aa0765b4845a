//! Linear scan of a damaged file for `N G obj` headers and `trailer`
//! dictionaries, used to rebuild the cross-reference table.

use super::base_stream::BaseStream;
use super::error::{PDFError, PDFResult};
use regex::bytes::Regex;

/// Bytes read per scan window.
const WINDOW: usize = 1 << 20;

/// Overlap between windows so headers on a window edge are seen whole.
const OVERLAP: usize = 64;

/// How far past an object header to look for its `/Type`.
const TYPE_LOOKAHEAD: usize = 512;

/// What a scanned object looks like from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannedKind {
    Plain,
    ObjectStream,
    XRefStream,
    Catalog,
    Page,
}

/// One `N G obj` header found in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedObject {
    pub num: u32,
    pub generation: u32,
    pub offset: usize,
    pub kind: ScannedKind,
}

/// Everything the scan found, in file order.
#[derive(Debug, Clone, Default)]
pub struct ScanIndex {
    pub objects: Vec<ScannedObject>,
    /// Offsets of `trailer` keywords
    pub trailers: Vec<usize>,
}

impl ScanIndex {
    /// Latest definition of `num` in file order.
    pub fn find(&self, num: u32) -> Option<&ScannedObject> {
        self.objects.iter().rev().find(|o| o.num == num)
    }

    pub fn last_of_kind(&self, kind: ScannedKind) -> Option<&ScannedObject> {
        self.objects.iter().rev().find(|o| o.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

fn parse_u32(digits: &[u8]) -> Option<u32> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Scans the whole stream. Reads in windows so chunked file sources never
/// hold the full file.
pub fn scan(stream: &dyn BaseStream) -> PDFResult<ScanIndex> {
    let to_err = |e: regex::Error| PDFError::parse_error(format!("scan pattern: {e}"), None);
    let header = Regex::new(
        r"(?-u)(\d{1,10})[\x00\t\n\x0C\r ]+(\d{1,5})[\x00\t\n\x0C\r ]+obj",
    )
    .map_err(to_err)?;
    let trailer = Regex::new(r"(?-u)trailer[\x00\t\n\x0C\r ]*<<").map_err(to_err)?;
    let type_name = Regex::new(r"(?-u)/Type[\x00\t\n\x0C\r ]*/(ObjStm|XRef|Catalog|Pages?)\b")
        .map_err(to_err)?;
    let body_end = Regex::new(r"(?-u)endobj|stream").map_err(to_err)?;

    let length = stream.length();
    let mut index = ScanIndex::default();
    let mut start = 0usize;

    while start < length {
        let end = (start + WINDOW + OVERLAP + TYPE_LOOKAHEAD).min(length);
        let data = stream.get_byte_range(start, end)?;
        // Matches starting in the overlap belong to the next window
        let limit = if end == length { data.len() } else { WINDOW };
        // A token ending on the previous window may continue into this one
        let before = if start > 0 {
            stream.get_byte_range(start - 1, start)?.first().copied()
        } else {
            None
        };
        let byte_before = |at: usize| if at == 0 { before } else { Some(data[at - 1]) };

        for caps in header.captures_iter(&data) {
            let (Some(whole), Some(num), Some(generation)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let at = whole.start();
            if at >= limit {
                break;
            }
            // The object number must start a token
            if byte_before(at).is_some_and(|b| b.is_ascii_digit()) {
                continue;
            }
            let (Some(num), Some(generation)) =
                (parse_u32(num.as_bytes()), parse_u32(generation.as_bytes()))
            else {
                continue;
            };

            let head_end = (whole.end() + TYPE_LOOKAHEAD).min(data.len());
            let mut head = &data[whole.end()..head_end];
            if let Some(stop) = body_end.find(head) {
                head = &head[..stop.start()];
            }
            let kind = match type_name.captures(head).and_then(|c| c.get(1)) {
                Some(m) => match m.as_bytes() {
                    b"ObjStm" => ScannedKind::ObjectStream,
                    b"XRef" => ScannedKind::XRefStream,
                    b"Catalog" => ScannedKind::Catalog,
                    b"Page" => ScannedKind::Page,
                    _ => ScannedKind::Plain,
                },
                None => ScannedKind::Plain,
            };

            index.objects.push(ScannedObject {
                num,
                generation,
                offset: start + at,
                kind,
            });
        }

        for m in trailer.find_iter(&data) {
            if m.start() >= limit {
                break;
            }
            if byte_before(m.start()).is_some_and(|b| b.is_ascii_alphanumeric()) {
                continue;
            }
            index.trailers.push(start + m.start());
        }

        if end == length {
            break;
        }
        start += WINDOW;
    }

    tracing::debug!(
        "linear scan found {} objects and {} trailers",
        index.objects.len(),
        index.trailers.len()
    );
    Ok(index)
}
