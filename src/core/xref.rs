use super::base_stream::BaseStream;
use super::crypto::CryptoHandler;
use super::decode::{self, DecodedStream};
use super::error::{PDFError, PDFResult};
use super::lexer::{find_in_stream, Lexer, Token};
use super::parser::{Dict, LengthResolver, PDFObject, Parser, PdfStream, Ref};
use super::stream::Stream;
use super::xref_scan::{self, ScanIndex, ScannedKind};
use lru::LruCache;
use rustc_hash::{FxHashMap, FxHashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// How far from the end of the file `startxref` is searched for.
const STARTXREF_SEARCH: usize = 1024;

/// Upper bound on subsection sizes and `/Size`, to reject garbage counts.
const MAX_OBJECTS: u64 = 8_388_607;

/// Cross-reference table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Object number is free
    Free { generation: u32 },

    /// Object is stored uncompressed at the given byte offset
    Uncompressed { offset: usize, generation: u32 },

    /// Object is stored in object stream `stream_num` at position `index`
    Compressed { stream_num: u32, index: usize },
}

impl XRefEntry {
    pub fn is_free(&self) -> bool {
        matches!(self, XRefEntry::Free { .. })
    }

    pub fn generation(&self) -> u32 {
        match self {
            XRefEntry::Free { generation } | XRefEntry::Uncompressed { generation, .. } => *generation,
            XRefEntry::Compressed { .. } => 0,
        }
    }
}

/// Parsed header of an object stream: decoded data plus object offsets.
struct ObjectStreamIndex {
    data: Arc<Vec<u8>>,
    /// `(object number, offset relative to /First)` in stream order
    objects: Vec<(u32, usize)>,
    first: usize,
}

/// Cross-reference table for a PDF document.
///
/// Maps object numbers to their locations and resolves indirect
/// references. Sections are read newest first, following `/XRefStm` and
/// `/Prev`; the first entry seen for an object number wins. When the table
/// cannot be trusted it is rebuilt from a linear scan of the file.
///
/// Fetched objects are cached by object number and returned as clones;
/// streams share their bodies through `Arc`.
pub struct XRef {
    stream: Box<dyn BaseStream>,

    entries: FxHashMap<u32, XRefEntry>,

    /// Merged trailer (newest section first)
    trailer: Dict,

    cache: FxHashMap<u32, PDFObject>,

    object_streams: FxHashMap<u32, Arc<ObjectStreamIndex>>,

    decoded: LruCache<Ref, Arc<DecodedStream>>,

    /// Object numbers currently being resolved
    resolving: FxHashSet<u32>,

    /// Linear scan results, built on first need
    scan: Option<Arc<ScanIndex>>,

    /// Objects the classic section just read marked free; its own
    /// `/XRefStm` may still define them
    section_free: FxHashSet<u32>,

    crypto: Option<CryptoHandler>,

    encrypt_ref: Option<Ref>,

    rebuilt: bool,
}

impl LengthResolver for XRef {
    fn resolve_length(&mut self, length_ref: Ref) -> Option<usize> {
        match self.fetch(length_ref) {
            Ok(obj) => obj.as_usize(),
            Err(e) => {
                tracing::debug!("cannot resolve stream length {length_ref}: {e}");
                None
            }
        }
    }
}

impl XRef {
    /// Creates an empty table over `stream`.
    pub fn new(stream: Box<dyn BaseStream>, decoded_cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(decoded_cache_size).unwrap_or(NonZeroUsize::MIN);
        XRef {
            stream,
            entries: FxHashMap::default(),
            trailer: Dict::default(),
            cache: FxHashMap::default(),
            object_streams: FxHashMap::default(),
            decoded: LruCache::new(capacity),
            resolving: FxHashSet::default(),
            scan: None,
            section_free: FxHashSet::default(),
            crypto: None,
            encrypt_ref: None,
            rebuilt: false,
        }
    }

    /// Reads the cross-reference data, rebuilding it from a linear scan
    /// when it is missing or inconsistent.
    pub fn parse(&mut self) -> PDFResult<()> {
        let outcome = match self.find_startxref()? {
            Some(offset) => self.read_chain(offset),
            None => Err(PDFError::parse_error("startxref not found", None)),
        };

        let problem = match outcome {
            Ok(()) => self.validate(),
            Err(e) => Some(e.to_string()),
        };

        if let Some(problem) = problem {
            tracing::warn!("cross-reference table unusable ({problem}), rebuilding from a full scan");
            self.rebuild()?;
        }
        Ok(())
    }

    /// Sets up decryption when the trailer has `/Encrypt`.
    pub fn setup_encryption(&mut self, password: &[u8]) -> PDFResult<()> {
        let Some(encrypt) = self.trailer.get("Encrypt").cloned() else {
            return Ok(());
        };
        self.encrypt_ref = encrypt.as_ref();
        let encrypt = self.fetch_if_ref(&encrypt)?;
        let dict = encrypt
            .as_dict()
            .ok_or_else(|| PDFError::malformed("/Encrypt is not a dictionary", None))?;

        let file_id = self
            .trailer
            .get("ID")
            .and_then(PDFObject::as_array)
            .and_then(<[PDFObject]>::first)
            .and_then(PDFObject::as_bytes)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();

        self.crypto = Some(CryptoHandler::new(dict, &file_id, password)?);
        // Objects fetched before the handler existed were read undecrypted
        self.cache.clear();
        self.object_streams.clear();
        self.decoded.clear();
        Ok(())
    }

    fn find_startxref(&self) -> PDFResult<Option<usize>> {
        let length = self.stream.length();
        let from = length.saturating_sub(STARTXREF_SEARCH);
        let tail = self.stream.get_byte_range(from, length)?;
        let Some(at) = tail.windows(9).rposition(|w| w == b"startxref") else {
            return Ok(None);
        };

        let mut lexer = Lexer::new_at(self.stream.make_sub_stream(0, length)?, from + at + 9)?;
        match lexer.next_token()? {
            Token::Number(n) if n >= 0.0 => Ok(Some(n as usize)),
            _ => Ok(None),
        }
    }

    fn lexer_at(&self, offset: usize) -> PDFResult<Lexer> {
        Lexer::new_at(self.stream.make_sub_stream(0, self.stream.length())?, offset)
    }

    /// Walks the section chain starting at `start`.
    ///
    /// Failing to read the first section is an error; later sections that
    /// cannot be read end the chain with a warning.
    fn read_chain(&mut self, start: usize) -> PDFResult<()> {
        // (offset, whether it is the /XRefStm of the section read just before)
        let mut pending = vec![(start, false)];
        let mut visited = FxHashSet::default();

        while let Some((offset, hybrid)) = pending.pop() {
            if !visited.insert(offset) {
                tracing::warn!("cross-reference loop at offset {offset}");
                continue;
            }
            if !hybrid {
                self.section_free.clear();
            }
            let trailer = match self.read_section(offset, hybrid) {
                Ok(trailer) => trailer,
                Err(e) if offset == start => return Err(e),
                Err(e) => {
                    tracing::warn!("skipping unreadable cross-reference section at {offset}: {e}");
                    continue;
                }
            };

            let prev = trailer.get("Prev").and_then(PDFObject::as_usize);
            let xref_stm = trailer.get("XRefStm").and_then(PDFObject::as_usize);
            for (key, value) in trailer {
                if key != "Prev" && key != "XRefStm" {
                    self.trailer.entry(key).or_insert(value);
                }
            }

            // Stack order: the hybrid stream is read before the previous section
            if let Some(prev) = prev {
                pending.push((prev, false));
            }
            if let Some(xref_stm) = xref_stm {
                pending.push((xref_stm, true));
            }
        }
        Ok(())
    }

    /// Reads one classic table or xref stream and returns its trailer.
    fn read_section(&mut self, offset: usize, hybrid: bool) -> PDFResult<Dict> {
        if offset >= self.stream.length() {
            return Err(PDFError::parse_error(
                format!("cross-reference offset {offset} outside the file"),
                Some(offset),
            ));
        }
        let mut parser = Parser::new(self.lexer_at(offset)?);
        match parser.get_object()? {
            PDFObject::Command(cmd) if cmd == "xref" => self.read_xref_table(&mut parser),
            PDFObject::Number(_) => {
                parser.seek(offset)?;
                let (_, obj) = parser.parse_indirect_object()?;
                match obj {
                    PDFObject::Stream(stream) if stream.dict.get("Type").is_some_and(|t| t.is_name("XRef")) => {
                        self.read_xref_stream(&stream, hybrid)?;
                        Ok(stream.dict.clone())
                    }
                    other => Err(PDFError::parse_error(
                        format!("expected a cross-reference stream, found {}", other.type_name()),
                        Some(offset),
                    )),
                }
            }
            other => Err(PDFError::parse_error(
                format!("expected 'xref', found {}", other.type_name()),
                Some(offset),
            )),
        }
    }

    /// Reads the subsections of a classic table, then its trailer.
    ///
    /// ```text
    /// xref
    /// 0 3
    /// 0000000000 65535 f
    /// 0000000015 00000 n
    /// 0000000079 00000 n
    /// trailer
    /// << /Size 3 /Root 1 0 R >>
    /// ```
    fn read_xref_table(&mut self, parser: &mut Parser) -> PDFResult<Dict> {
        let mut first_subsection = true;
        loop {
            let first = match parser.get_object()? {
                PDFObject::Command(cmd) if cmd == "trailer" => break,
                PDFObject::Number(n) if n >= 0.0 => n as u64,
                other => {
                    return Err(PDFError::parse_error(
                        format!("expected subsection start, found {}", other.type_name()),
                        Some(parser.lexer().position()),
                    ));
                }
            };
            let count = parser
                .get_object()?
                .as_number()
                .filter(|n| *n >= 0.0 && (*n as u64) <= MAX_OBJECTS)
                .ok_or_else(|| PDFError::parse_error("bad subsection count", Some(parser.lexer().position())))?
                as u64;

            let mut first = first;
            for i in 0..count {
                let offset = parser.get_object()?;
                let generation = parser.get_object()?;
                let kind = parser.get_object()?;
                let (Some(offset), Some(generation)) = (offset.as_usize(), generation.as_usize()) else {
                    return Err(PDFError::parse_error(
                        "malformed cross-reference entry",
                        Some(parser.lexer().position()),
                    ));
                };

                let entry = match &kind {
                    PDFObject::Command(c) if c == "f" => XRefEntry::Free {
                        generation: generation as u32,
                    },
                    PDFObject::Command(c) if c == "n" => XRefEntry::Uncompressed {
                        offset,
                        generation: generation as u32,
                    },
                    _ => {
                        return Err(PDFError::parse_error(
                            "cross-reference entry type must be 'n' or 'f'",
                            Some(parser.lexer().position()),
                        ));
                    }
                };

                // Some writers start the first subsection at 1 although it
                // holds the free head of the list
                if i == 0 && first_subsection && first == 1 && offset == 0 && entry.is_free() {
                    first = 0;
                }

                let num = first + i;
                if num > u32::MAX as u64 {
                    return Err(PDFError::parse_error("object number overflow", None));
                }
                let num = num as u32;
                if !self.entries.contains_key(&num) {
                    if entry.is_free() {
                        self.section_free.insert(num);
                    }
                    self.entries.insert(num, entry);
                }
            }
            first_subsection = false;
        }

        match parser.get_object()? {
            PDFObject::Dictionary(dict) => Ok(dict),
            other => Err(PDFError::parse_error(
                format!("expected trailer dictionary, found {}", other.type_name()),
                Some(parser.lexer().position()),
            )),
        }
    }

    /// Reads the entries of a cross-reference stream.
    ///
    /// The `/XRefStm` of a hybrid file (`hybrid`) fills in objects its
    /// classic section listed as free; everything else keeps the entry
    /// of the newer section.
    fn read_xref_stream(&mut self, stream: &PdfStream, hybrid: bool) -> PDFResult<()> {
        let dict = &stream.dict;
        let widths = dict
            .get("W")
            .and_then(PDFObject::as_number_array)
            .filter(|w| w.len() == 3 && w.iter().all(|v| (0.0..=8.0).contains(v)))
            .ok_or_else(|| PDFError::parse_error("cross-reference stream needs /W", None))?;
        let widths: Vec<usize> = widths.iter().map(|w| *w as usize).collect();
        let size = dict.get("Size").and_then(PDFObject::as_usize).unwrap_or(0);

        let index = match dict.get("Index").and_then(PDFObject::as_number_array) {
            Some(index) if index.len() % 2 == 0 => index,
            _ => vec![0.0, size as f64],
        };

        let chain = decode::filter_chain(dict.get("Filter"), dict.get("DecodeParms"));
        let decoded = decode::decode(&stream.raw, &chain)?;
        if decoded.is_skipped() {
            return Err(PDFError::unsupported("cross-reference stream filter"));
        }
        let data = decoded.data;

        let entry_size: usize = widths.iter().sum();
        if entry_size == 0 {
            return Err(PDFError::parse_error("cross-reference stream /W is empty", None));
        }
        let read_field = |bytes: &[u8], default: u64| -> u64 {
            if bytes.is_empty() {
                return default;
            }
            bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
        };

        let mut position = 0usize;
        for pair in index.chunks(2) {
            let (first, count) = (pair[0].max(0.0) as u64, pair[1].max(0.0) as u64);
            if count > MAX_OBJECTS {
                return Err(PDFError::parse_error("cross-reference stream /Index too large", None));
            }
            for i in 0..count {
                let Some(record) = data.get(position..position + entry_size) else {
                    tracing::warn!("cross-reference stream ends early");
                    return Ok(());
                };
                position += entry_size;

                let (a, rest) = record.split_at(widths[0]);
                let (b, c) = rest.split_at(widths[1]);
                let kind = read_field(a, 1);
                let field2 = read_field(b, 0);
                let field3 = read_field(c, 0);

                let entry = match kind {
                    0 => XRefEntry::Free {
                        generation: field3 as u32,
                    },
                    1 => XRefEntry::Uncompressed {
                        offset: field2 as usize,
                        generation: field3 as u32,
                    },
                    2 => XRefEntry::Compressed {
                        stream_num: field2 as u32,
                        index: field3 as usize,
                    },
                    // Unknown types are references to the null object
                    _ => continue,
                };
                let num = first + i;
                if num > u32::MAX as u64 {
                    continue;
                }
                let num = num as u32;
                let replaces_free = hybrid && !entry.is_free() && self.section_free.remove(&num);
                if replaces_free || !self.entries.contains_key(&num) {
                    self.entries.insert(num, entry);
                }
            }
        }
        Ok(())
    }

    /// Checks the table against the file. Returns a description of the
    /// first inconsistency found.
    fn validate(&mut self) -> Option<String> {
        let length = self.stream.length();
        if let Some((num, _)) = self.entries.iter().find(
            |(_, e)| matches!(e, XRefEntry::Uncompressed { offset, .. } if *offset >= length),
        ) {
            return Some(format!("object {num} points outside the file"));
        }

        if let Some(size) = self.trailer.get("Size").and_then(PDFObject::as_usize) {
            if let Some(max) = self.entries.keys().max() {
                if *max as usize >= size {
                    return Some(format!("object {max} exceeds /Size {size}"));
                }
            }
        }

        let Some(root) = self.trailer.get("Root").and_then(PDFObject::as_ref) else {
            return Some("trailer has no /Root".to_string());
        };
        match self.fetch(root) {
            Ok(obj) if obj.as_dict().is_some() => None,
            Ok(obj) => Some(format!("root is a {}", obj.type_name())),
            Err(e) => Some(format!("root unreadable: {e}")),
        }
    }

    fn scan_index(&mut self) -> PDFResult<Arc<ScanIndex>> {
        if let Some(index) = &self.scan {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(xref_scan::scan(self.stream.as_ref())?);
        self.scan = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Rebuilds the table from a linear scan.
    fn rebuild(&mut self) -> PDFResult<()> {
        let index = self.scan_index()?;
        if index.is_empty() {
            return Err(PDFError::parse_error("no objects found in file", None));
        }

        self.entries.clear();
        self.cache.clear();
        self.object_streams.clear();
        self.decoded.clear();
        self.rebuilt = true;

        // Later definitions in file order replace earlier ones
        for obj in &index.objects {
            self.entries.insert(
                obj.num,
                XRefEntry::Uncompressed {
                    offset: obj.offset,
                    generation: obj.generation,
                },
            );
        }

        // Objects in object streams take the position of their container
        let mut position: FxHashMap<u32, usize> =
            index.objects.iter().map(|o| (o.num, o.offset)).collect();
        for container in index.objects.iter().filter(|o| o.kind == ScannedKind::ObjectStream) {
            if position.get(&container.num) != Some(&container.offset) {
                continue;
            }
            let members = match self.object_stream(container.num) {
                Ok(stream_index) => stream_index.objects.clone(),
                Err(e) => {
                    tracing::warn!("skipping damaged object stream {}: {e}", container.num);
                    continue;
                }
            };
            for (i, (num, _)) in members.into_iter().enumerate() {
                if position.get(&num).is_none_or(|p| *p < container.offset) {
                    position.insert(num, container.offset);
                    self.entries.insert(
                        num,
                        XRefEntry::Compressed {
                            stream_num: container.num,
                            index: i,
                        },
                    );
                }
            }
        }
        self.cache.clear();

        self.trailer = self.recover_trailer(&index)?;
        tracing::info!("rebuilt cross-reference table with {} objects", self.entries.len());
        Ok(())
    }

    /// Trailer for a rebuilt table: the last `trailer` with a `/Root`, else
    /// the last xref stream with one, else a synthetic trailer pointing at
    /// the last catalog object.
    fn recover_trailer(&mut self, index: &ScanIndex) -> PDFResult<Dict> {
        for &offset in index.trailers.iter().rev() {
            let mut parser = Parser::new(self.lexer_at(offset)?);
            parser.get_object()?;
            if let Ok(PDFObject::Dictionary(dict)) = parser.get_object() {
                if self.points_to_dict(dict.get("Root")) {
                    return Ok(dict);
                }
            }
        }

        for obj in index.objects.iter().rev().filter(|o| o.kind == ScannedKind::XRefStream) {
            if let Ok(PDFObject::Stream(stream)) = self.fetch(Ref::new(obj.num, obj.generation)) {
                if self.points_to_dict(stream.dict.get("Root")) {
                    return Ok(stream.dict.clone());
                }
            }
        }

        let catalog = index
            .last_of_kind(ScannedKind::Catalog)
            .ok_or_else(|| PDFError::parse_error("no document catalog found", None))?;
        let mut trailer = Dict::default();
        trailer.insert(
            "Root".to_string(),
            PDFObject::Ref(Ref::new(catalog.num, catalog.generation)),
        );
        Ok(trailer)
    }

    fn points_to_dict(&mut self, root: Option<&PDFObject>) -> bool {
        match root.and_then(PDFObject::as_ref) {
            Some(r) => self.fetch(r).is_ok_and(|o| o.as_dict().is_some()),
            None => false,
        }
    }

    /// Gets an entry from the table.
    pub fn get_entry(&self, num: u32) -> Option<&XRefEntry> {
        self.entries.get(&num)
    }

    /// Fetches an indirect object, resolving it once and caching it.
    ///
    /// Missing and free objects are `null`. An object that cannot be read
    /// where the table says it is gets looked up in the linear scan.
    pub fn fetch(&mut self, r: Ref) -> PDFResult<PDFObject> {
        if let Some(cached) = self.cache.get(&r.num) {
            return Ok(cached.clone());
        }
        if !self.resolving.insert(r.num) {
            return Err(PDFError::malformed(format!("circular reference to {r}"), None));
        }
        let result = self.fetch_uncached(r);
        self.resolving.remove(&r.num);

        let obj = result?;
        self.cache.insert(r.num, obj.clone());
        Ok(obj)
    }

    fn fetch_uncached(&mut self, r: Ref) -> PDFResult<PDFObject> {
        let located = match self.entries.get(&r.num).copied() {
            Some(XRefEntry::Uncompressed { offset, .. }) => self.read_object_at(offset, r),
            Some(XRefEntry::Compressed { stream_num, index }) => {
                return self.read_compressed(stream_num, index, r);
            }
            Some(XRefEntry::Free { .. }) | None => Err(PDFError::malformed(
                format!("object {r} not in the cross-reference table"),
                None,
            )),
        };
        match located {
            Ok(obj) => Ok(obj),
            Err(e) => self.fetch_from_scan(r, e),
        }
    }

    fn fetch_from_scan(&mut self, r: Ref, original: PDFError) -> PDFResult<PDFObject> {
        let index = self.scan_index()?;
        let Some(found) = index.find(r.num).copied() else {
            if matches!(original, PDFError::MalformedObject { offset: None, .. }) {
                // Not defined anywhere: a reference to the null object
                return Ok(PDFObject::Null);
            }
            return Err(original);
        };
        if matches!(self.entries.get(&r.num), Some(XRefEntry::Uncompressed { offset, .. }) if *offset == found.offset)
        {
            return Err(original);
        }
        tracing::warn!("object {r} recovered from linear scan at offset {}", found.offset);
        self.read_object_at(found.offset, r)
    }

    /// Parses `num gen obj ... endobj` at `offset` and checks its number.
    fn read_object_at(&mut self, offset: usize, r: Ref) -> PDFResult<PDFObject> {
        if offset >= self.stream.length() {
            return Err(PDFError::malformed(
                format!("object {r} offset {offset} outside the file"),
                Some(offset),
            ));
        }
        let lexer = self.lexer_at(offset)?;
        let (found, mut obj) = {
            let mut parser = Parser::new(lexer).with_resolver(self);
            parser.parse_indirect_object()?
        };
        if found.num != r.num {
            return Err(PDFError::malformed(
                format!("expected object {r}, found {found}"),
                Some(offset),
            ));
        }

        if let Some(crypto) = &self.crypto {
            if Some(r) != self.encrypt_ref {
                crypto.decrypt_object(&mut obj, r);
            }
        }
        Ok(obj)
    }

    /// Loads and indexes object stream `num`.
    fn object_stream(&mut self, num: u32) -> PDFResult<Arc<ObjectStreamIndex>> {
        if let Some(index) = self.object_streams.get(&num) {
            return Ok(Arc::clone(index));
        }

        let obj = self.fetch(Ref::new(num, 0))?;
        let stream = obj
            .as_stream()
            .ok_or_else(|| PDFError::malformed(format!("object stream {num} is not a stream"), None))?;
        let count = stream.dict.get("N").and_then(PDFObject::as_usize).unwrap_or(0);
        let first = stream.dict.get("First").and_then(PDFObject::as_usize).unwrap_or(0);

        let decoded = self.decode_stream(stream)?;
        if decoded.is_skipped() || decoded.image_codec.is_some() {
            return Err(PDFError::unsupported(format!("object stream {num} filter")));
        }
        let data = decoded.data;

        let mut parser = Parser::new(Lexer::new(Box::new(Stream::from_bytes(
            data[..first.min(data.len())].to_vec(),
        )))?);
        let mut objects = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let (Some(obj_num), Some(offset)) = (
                parser.get_object()?.as_usize(),
                parser.get_object()?.as_usize(),
            ) else {
                break;
            };
            objects.push((obj_num as u32, offset));
        }

        let index = Arc::new(ObjectStreamIndex { data, objects, first });
        self.object_streams.insert(num, Arc::clone(&index));
        Ok(index)
    }

    fn read_compressed(&mut self, stream_num: u32, index: usize, r: Ref) -> PDFResult<PDFObject> {
        let container = self.object_stream(stream_num)?;
        let offset = match container.objects.get(index) {
            Some((num, offset)) if *num == r.num => *offset,
            _ => container
                .objects
                .iter()
                .find(|(num, _)| *num == r.num)
                .map(|(_, offset)| *offset)
                .ok_or_else(|| {
                    PDFError::malformed(format!("object {r} missing from object stream {stream_num}"), None)
                })?,
        };

        let start = container.first.saturating_add(offset);
        if start >= container.data.len() {
            return Err(PDFError::malformed(
                format!("object {r} offset outside object stream {stream_num}"),
                None,
            ));
        }
        let sub = Stream::from_arc(Arc::clone(&container.data), start, container.data.len() - start);
        let mut parser = Parser::new(Lexer::new(Box::new(sub))?);
        parser.get_object()
    }

    /// Fetches `obj` if it is a reference, otherwise returns it as is.
    pub fn fetch_if_ref(&mut self, obj: &PDFObject) -> PDFResult<PDFObject> {
        match obj {
            PDFObject::Ref(r) => self.fetch(*r),
            _ => Ok(obj.clone()),
        }
    }

    /// Runs a stream body through its filter chain. `/Filter` and
    /// `/DecodeParms` may be indirect.
    pub fn decode_stream(&mut self, stream: &PdfStream) -> PDFResult<DecodedStream> {
        let filter = match stream.dict.get("Filter") {
            Some(f) => Some(self.fetch_if_ref(f)?),
            None => None,
        };
        let params = match stream.dict.get("DecodeParms") {
            Some(p) => Some(self.resolve_shallow(p)?),
            None => None,
        };
        let filter = match filter {
            Some(PDFObject::Array(items)) => Some(PDFObject::Array(
                items
                    .iter()
                    .map(|item| self.fetch_if_ref(item))
                    .collect::<PDFResult<_>>()?,
            )),
            other => other,
        };
        decode::decode(&stream.raw, &decode::filter_chain(filter.as_ref(), params.as_ref()))
    }

    /// Resolves `obj` and, for arrays, each element.
    fn resolve_shallow(&mut self, obj: &PDFObject) -> PDFResult<PDFObject> {
        match self.fetch_if_ref(obj)? {
            PDFObject::Array(items) => Ok(PDFObject::Array(
                items
                    .iter()
                    .map(|item| self.fetch_if_ref(item))
                    .collect::<PDFResult<_>>()?,
            )),
            other => Ok(other),
        }
    }

    /// Decoded data of a stream object, cached when it is indirect.
    pub fn decoded_stream(&mut self, obj: &PDFObject) -> PDFResult<Arc<DecodedStream>> {
        let key = obj.as_ref();
        if let Some(key) = key {
            if let Some(hit) = self.decoded.get(&key) {
                return Ok(Arc::clone(hit));
            }
        }
        let resolved = self.fetch_if_ref(obj)?;
        let stream = resolved
            .as_stream()
            .ok_or_else(|| PDFError::malformed(format!("expected a stream, found {}", resolved.type_name()), None))?;
        let decoded = Arc::new(self.decode_stream(stream)?);
        if let Some(key) = key {
            self.decoded.put(key, Arc::clone(&decoded));
        }
        Ok(decoded)
    }

    /// Returns the merged trailer dictionary.
    pub fn trailer(&self) -> &Dict {
        &self.trailer
    }

    /// Returns the document catalog.
    pub fn catalog(&mut self) -> PDFResult<Dict> {
        let root = self
            .trailer
            .get("Root")
            .cloned()
            .ok_or_else(|| PDFError::parse_error("trailer has no /Root", None))?;
        match self.fetch_if_ref(&root)? {
            PDFObject::Dictionary(dict) => Ok(dict),
            other => Err(PDFError::parse_error(
                format!("catalog is a {}", other.type_name()),
                None,
            )),
        }
    }

    /// Object numbers of every in-use entry, ascending.
    pub fn object_numbers(&self) -> Vec<u32> {
        let mut nums: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.is_free())
            .map(|(n, _)| *n)
            .collect();
        nums.sort_unstable();
        nums
    }

    /// Generation recorded for `num` (0 when unknown).
    pub fn generation_of(&self, num: u32) -> u32 {
        self.entries.get(&num).map_or(0, XRefEntry::generation)
    }

    pub fn was_rebuilt(&self) -> bool {
        self.rebuilt
    }

    pub fn is_encrypted(&self) -> bool {
        self.crypto.is_some()
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Searches for `needle` from `offset`, used to sniff the header.
    pub fn find(&self, offset: usize, needle: &[u8], limit: usize) -> PDFResult<Option<usize>> {
        find_in_stream(self.stream.as_ref(), offset, needle, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a file from object bodies with a correct classic table.
    fn build_pdf(objects: &[&str], trailer_extra: &str) -> Vec<u8> {
        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref_at = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for offset in offsets {
            out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R {} >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                trailer_extra,
                xref_at
            )
            .as_bytes(),
        );
        out
    }

    fn open(data: Vec<u8>) -> XRef {
        let mut xref = XRef::new(Box::new(Stream::from_bytes(data)), 8);
        xref.parse().unwrap();
        xref
    }

    #[test]
    fn test_xref_entry_generation() {
        assert!(XRefEntry::Free { generation: 65535 }.is_free());
        assert_eq!(
            XRefEntry::Uncompressed {
                offset: 10,
                generation: 2
            }
            .generation(),
            2
        );
        assert_eq!(
            XRefEntry::Compressed {
                stream_num: 5,
                index: 1
            }
            .generation(),
            0
        );
    }

    #[test]
    fn test_parse_classic_table() {
        let mut xref = open(build_pdf(&["<< /Type /Catalog /Pages 2 0 R >>", "<< /Type /Pages /Kids [] /Count 0 >>"], ""));

        assert!(!xref.was_rebuilt());
        assert_eq!(xref.len(), 3);
        assert!(xref.get_entry(0).unwrap().is_free());
        let catalog = xref.catalog().unwrap();
        assert!(catalog.get("Type").unwrap().is_name("Catalog"));
        let pages = xref.fetch(Ref::new(2, 0)).unwrap();
        assert!(pages.as_dict().unwrap().get("Type").unwrap().is_name("Pages"));
    }

    #[test]
    fn test_missing_object_is_null() {
        let mut xref = open(build_pdf(&["<< /Type /Catalog >>"], ""));
        assert_eq!(xref.fetch(Ref::new(42, 0)).unwrap(), PDFObject::Null);
    }

    #[test]
    fn test_fetch_if_ref_passes_direct_objects() {
        let mut xref = open(build_pdf(&["<< /Type /Catalog >>", "17"], ""));
        assert_eq!(xref.fetch_if_ref(&PDFObject::Number(3.0)).unwrap(), PDFObject::Number(3.0));
        assert_eq!(
            xref.fetch_if_ref(&PDFObject::Ref(Ref::new(2, 0))).unwrap(),
            PDFObject::Number(17.0)
        );
    }

    #[test]
    fn test_indirect_stream_length() {
        let mut xref = open(build_pdf(
            &["<< /Type /Catalog >>", "<< /Length 3 0 R >>\nstream\nabcdef\nendstream", "6"],
            "",
        ));
        let obj = xref.fetch(Ref::new(2, 0)).unwrap();
        assert_eq!(obj.as_stream().unwrap().raw, b"abcdef");
    }

    #[test]
    fn test_decoded_stream_shares_cached_bytes() {
        let mut xref = open(build_pdf(
            &["<< /Type /Catalog >>", "<< /Length 6 >>\nstream\nabcdef\nendstream"],
            "",
        ));
        let form = PDFObject::Ref(Ref::new(2, 0));
        let first = xref.decoded_stream(&form).unwrap();
        let second = xref.decoded_stream(&form).unwrap();
        assert!(Arc::ptr_eq(&first.data, &second.data));
        assert_eq!(*first.data, b"abcdef");
    }

    #[test]
    fn test_self_referencing_length_does_not_recurse() {
        let mut xref = open(build_pdf(
            &["<< /Type /Catalog >>", "<< /Length 2 0 R >>\nstream\nxyz\nendstream"],
            "",
        ));
        // The length cannot resolve, so the body runs to endstream
        let obj = xref.fetch(Ref::new(2, 0)).unwrap();
        assert_eq!(obj.as_stream().unwrap().raw, b"xyz");
    }

    #[test]
    fn test_shifted_offsets_trigger_rebuild() {
        let mut data = build_pdf(&["<< /Type /Catalog /Marker 7 >>", "(two)"], "");
        // Garbage in front shifts every object and the table itself
        let mut shifted = b"GARBAGE GARBAGE\n".to_vec();
        shifted.append(&mut data);

        let mut xref = open(shifted);
        assert!(xref.was_rebuilt());
        let catalog = xref.catalog().unwrap();
        assert_eq!(catalog.get("Marker"), Some(&PDFObject::Number(7.0)));
        assert_eq!(xref.fetch(Ref::new(2, 0)).unwrap(), PDFObject::String(b"two".to_vec()));
    }

    #[test]
    fn test_missing_startxref_rebuilds_from_catalog() {
        let data = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
                     2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n"
            .to_vec();
        let mut xref = open(data);
        assert!(xref.was_rebuilt());
        assert_eq!(xref.trailer().get("Root"), Some(&PDFObject::Ref(Ref::new(1, 0))));
        assert!(xref.catalog().is_ok());
    }

    #[test]
    fn test_first_subsection_starting_at_one() {
        let body = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n";
        let mut data = body.to_vec();
        let xref_at = data.len();
        data.extend_from_slice(
            format!(
                "xref\n1 2\n0000000000 65535 f \n0000000009 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF"
            )
            .as_bytes(),
        );
        let mut xref = open(data);
        assert!(!xref.was_rebuilt());
        assert!(xref.get_entry(0).unwrap().is_free());
        assert!(xref.catalog().is_ok());
    }

    #[test]
    fn test_unrecoverable_file_is_parse_error() {
        let mut xref = XRef::new(Box::new(Stream::from_bytes(b"not a pdf at all".to_vec())), 8);
        let err = xref.parse().unwrap_err();
        assert_eq!(err.code(), crate::core::error::ErrorCode::ParseError);
    }
}
