use super::base_stream::BaseStream;
use super::error::{PDFError, PDFResult};
use super::file_chunked_stream::FileChunkedStream;
use super::options::EngineOptions;
use super::page::{InheritedAttributes, Page};
use super::parser::{Dict, PDFObject, Ref};
use super::stream::Stream;
use super::xref::XRef;
use rustc_hash::FxHashSet;
use std::path::Path;
use tracing::instrument;

#[cfg(unix)]
use std::os::fd::BorrowedFd;

/// How far into the file the `%PDF-` header may start.
const HEADER_SEARCH: usize = 1024;

/// Bound on `/Parent` walks, well above any real tree depth.
const MAX_PARENT_DEPTH: usize = 256;

/// PDF Document reader.
///
/// This is the main entry point for reading and parsing PDF documents.
/// Opening reads the header and the cross-reference data, sets up
/// decryption when needed and resolves the page list. Problems that do not
/// prevent opening (a cyclic page tree, an unsupported security handler)
/// are kept as diagnostics.
pub struct PDFDocument {
    /// The cross-reference table
    xref: XRef,

    pages: Vec<Page>,

    /// Version from the header, possibly raised by the catalog's /Version
    version: String,

    diagnostics: Vec<PDFError>,

    options: EngineOptions,
}

impl PDFDocument {
    /// Opens a PDF document from a byte array with default options.
    ///
    /// # Example
    /// ```no_run
    /// use pdf_view::PDFDocument;
    ///
    /// let pdf_data = std::fs::read("document.pdf").unwrap();
    /// let doc = PDFDocument::open(pdf_data).unwrap();
    /// println!("{} pages", doc.page_count());
    /// ```
    pub fn open(data: Vec<u8>) -> PDFResult<Self> {
        Self::open_bytes(data, &EngineOptions::default())
    }

    pub fn open_bytes(data: Vec<u8>, options: &EngineOptions) -> PDFResult<Self> {
        Self::open_stream(Box::new(Stream::from_bytes(data)), options)
    }

    /// Opens a file, reading it in chunks on demand.
    pub fn open_path<P: AsRef<Path>>(path: P, options: &EngineOptions) -> PDFResult<Self> {
        let stream = FileChunkedStream::open(path, options.chunk_size, options.max_cached_chunks)?;
        Self::open_stream(Box::new(stream), options)
    }

    /// Opens a document through a duplicate of `fd`. The caller keeps its
    /// descriptor and its file offset.
    #[cfg(unix)]
    pub fn open_fd(fd: BorrowedFd<'_>, options: &EngineOptions) -> PDFResult<Self> {
        let stream = FileChunkedStream::from_fd(fd, options.chunk_size, options.max_cached_chunks)?;
        Self::open_stream(Box::new(stream), options)
    }

    /// Opens a document from any byte source.
    #[instrument(skip_all, fields(length = stream.length()))]
    pub fn open_stream(stream: Box<dyn BaseStream>, options: &EngineOptions) -> PDFResult<Self> {
        let version = read_header(stream.as_ref())?;

        let mut xref = XRef::new(stream, options.decoded_stream_cache);
        xref.parse()?;

        let mut diagnostics = Vec::new();
        if let Err(e) = xref.setup_encryption(&options.password) {
            tracing::warn!("cannot decrypt document: {e}");
            diagnostics.push(e);
        }

        let mut doc = PDFDocument {
            xref,
            pages: Vec::new(),
            version,
            diagnostics,
            options: options.clone(),
        };
        doc.apply_catalog_version();
        doc.pages = doc.build_page_list()?;

        tracing::info!(
            pages = doc.pages.len(),
            version = %doc.version,
            rebuilt = doc.xref.was_rebuilt(),
            "opened document"
        );
        Ok(doc)
    }

    /// Returns the document catalog (root dictionary).
    pub fn catalog(&mut self) -> PDFResult<Dict> {
        self.xref.catalog()
    }

    /// Returns a mutable reference to the xref table for fetching objects.
    pub fn xref_mut(&mut self) -> &mut XRef {
        &mut self.xref
    }

    pub fn xref(&self) -> &XRef {
        &self.xref
    }

    /// PDF version such as `"1.7"`.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Recoverable problems met while opening.
    pub fn diagnostics(&self) -> &[PDFError] {
        &self.diagnostics
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> PDFResult<&Page> {
        self.pages.get(index).ok_or(PDFError::PageOutOfRange {
            index,
            count: self.pages.len(),
        })
    }

    fn apply_catalog_version(&mut self) {
        let Ok(catalog) = self.xref.catalog() else {
            return;
        };
        if let Some(version) = catalog.get("Version").and_then(PDFObject::as_name) {
            if parse_version(version) > parse_version(&self.version) {
                self.version = version.to_string();
            }
        }
    }

    /// Walks the page tree depth first, kids in array order.
    ///
    /// A kid that was already visited is a cycle: the branch is dropped and
    /// a [`PDFError::CyclicPageTree`] diagnostic recorded. Without a usable
    /// `/Pages` the list is recovered from every `/Type /Page` object.
    fn build_page_list(&mut self) -> PDFResult<Vec<Page>> {
        let catalog = self.xref.catalog()?;
        let root = match catalog.get("Pages") {
            Some(pages) => self.xref.fetch_if_ref(pages)?,
            None => PDFObject::Null,
        };
        if root.as_dict().is_none() {
            tracing::warn!("catalog has no usable /Pages, collecting page objects");
            self.diagnostics
                .push(PDFError::malformed("catalog has no usable /Pages", None));
            return self.collect_page_objects();
        }

        let mut pages = Vec::new();
        let mut visited = FxHashSet::default();
        if let Some(r) = catalog.get("Pages").and_then(PDFObject::as_ref) {
            visited.insert(r.num);
        }

        // Stack of (reference if indirect, node, attributes carried down)
        let mut stack: Vec<(Option<Ref>, PDFObject, InheritedAttributes)> =
            vec![(catalog.get("Pages").and_then(PDFObject::as_ref), root, InheritedAttributes::default())];

        while let Some((reference, node, inherited)) = stack.pop() {
            let Some(dict) = node.as_dict().cloned() else {
                tracing::warn!("page tree node is a {}, skipping", node.type_name());
                continue;
            };

            if is_page_tree_node(&dict) {
                let mut carried = inherited;
                for key in InheritedAttributes::KEYS {
                    if let Some(value) = dict.get(key) {
                        carried.set(key, self.resolve_attribute(value));
                    }
                }
                let kids = match dict.get("Kids") {
                    Some(kids) => self.xref.fetch_if_ref(kids).unwrap_or(PDFObject::Null),
                    None => PDFObject::Null,
                };
                let kids = kids.as_array().map(<[PDFObject]>::to_vec).unwrap_or_default();

                for kid in kids.into_iter().rev() {
                    let kid_ref = kid.as_ref();
                    if let Some(r) = kid_ref {
                        if !visited.insert(r.num) {
                            tracing::warn!("page tree cycle through object {}", r.num);
                            self.diagnostics.push(PDFError::CyclicPageTree { object: r.num });
                            continue;
                        }
                    }
                    match self.xref.fetch_if_ref(&kid) {
                        Ok(kid_node) => stack.push((kid_ref, kid_node, carried.clone())),
                        Err(e) => {
                            tracing::warn!("skipping unreadable page tree kid: {e}");
                            self.diagnostics.push(e);
                        }
                    }
                }
            } else {
                let attributes = self.leaf_attributes(&dict, &inherited);
                pages.push(Page::new(pages.len(), dict, reference, attributes));
            }
        }

        Ok(pages)
    }

    /// Effective inherited attributes of a leaf: its own value, else the
    /// nearest ancestor's through `/Parent`, else what the traversal
    /// carried down.
    fn leaf_attributes(&mut self, leaf: &Dict, carried: &InheritedAttributes) -> InheritedAttributes {
        let mut attributes = InheritedAttributes::default();
        for key in InheritedAttributes::KEYS {
            let value = match leaf.get(key) {
                Some(value) => Some(self.resolve_attribute(value)),
                None => self
                    .inherited_from_parents(leaf, key)
                    .or_else(|| carried.get(key).cloned()),
            };
            if let Some(value) = value {
                attributes.set(key, value);
            }
        }
        attributes
    }

    fn inherited_from_parents(&mut self, leaf: &Dict, key: &str) -> Option<PDFObject> {
        let mut visited = FxHashSet::default();
        let mut parent = leaf.get("Parent").cloned();

        for _ in 0..MAX_PARENT_DEPTH {
            let reference = parent.as_ref()?.as_ref();
            if let Some(r) = reference {
                if !visited.insert(r.num) {
                    tracing::debug!("/Parent chain loops at object {}", r.num);
                    return None;
                }
            }
            let node = self.xref.fetch_if_ref(parent.as_ref()?).ok()?;
            let dict = node.as_dict()?;
            if let Some(value) = dict.get(key) {
                let value = value.clone();
                return Some(self.resolve_attribute(&value));
            }
            parent = dict.get("Parent").cloned();
        }
        None
    }

    /// Resolves a reference and, for box arrays, their elements.
    fn resolve_attribute(&mut self, value: &PDFObject) -> PDFObject {
        match self.xref.fetch_if_ref(value) {
            Ok(PDFObject::Array(items)) => PDFObject::Array(
                items
                    .iter()
                    .map(|item| self.xref.fetch_if_ref(item).unwrap_or(PDFObject::Null))
                    .collect(),
            ),
            Ok(other) => other,
            Err(e) => {
                tracing::debug!("unresolvable page attribute: {e}");
                PDFObject::Null
            }
        }
    }

    /// Pages recovered from every `/Type /Page` object, in object number
    /// order.
    fn collect_page_objects(&mut self) -> PDFResult<Vec<Page>> {
        let mut pages = Vec::new();
        for num in self.xref.object_numbers() {
            let r = Ref::new(num, self.xref.generation_of(num));
            let Ok(obj) = self.xref.fetch(r) else {
                continue;
            };
            let Some(dict) = obj.as_dict() else {
                continue;
            };
            if dict.get("Type").is_some_and(|t| t.is_name("Page")) && obj.as_stream().is_none() {
                let dict = dict.clone();
                let attributes = self.leaf_attributes(&dict, &InheritedAttributes::default());
                pages.push(Page::new(pages.len(), dict, Some(r), attributes));
            }
        }
        Ok(pages)
    }
}

/// Intermediate nodes are `/Type /Pages`, or untyped nodes with `/Kids`.
fn is_page_tree_node(dict: &Dict) -> bool {
    match dict.get("Type").and_then(PDFObject::as_name) {
        Some("Pages") => true,
        Some("Page") => false,
        _ => dict.contains_key("Kids"),
    }
}

/// Finds `%PDF-x.y` near the start and returns the version.
fn read_header(stream: &dyn BaseStream) -> PDFResult<String> {
    let end = stream.length().min(HEADER_SEARCH);
    let head = stream.get_byte_range(0, end)?;
    let at = head
        .windows(5)
        .position(|w| w == b"%PDF-")
        .ok_or_else(|| PDFError::parse_error("missing %PDF- header", Some(0)))?;

    let version: String = head[at + 5..]
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|b| *b as char)
        .collect();
    if version.is_empty() {
        tracing::warn!("header has no version number, assuming 1.4");
        return Ok("1.4".to_string());
    }
    if at > 0 {
        tracing::debug!("header found at offset {at}");
    }
    Ok(version)
}

fn parse_version(version: &str) -> (u32, u32) {
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}
