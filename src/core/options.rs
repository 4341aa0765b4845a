use super::chunk_manager::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CACHED_CHUNKS};

/// Engine configuration shared by opening and rendering.
///
/// ```
/// use pdf_view::EngineOptions;
///
/// let options = EngineOptions::default()
///     .with_chunk_size(16 * 1024)
///     .with_anti_alias(false);
/// assert_eq!(options.max_cached_chunks, 10);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Bytes per chunk when reading from a path or descriptor.
    pub chunk_size: usize,

    /// Chunks kept in the LRU cache before the oldest is dropped.
    pub max_cached_chunks: usize,

    /// Decoded streams (contents, images, fonts) kept per document.
    pub decoded_stream_cache: usize,

    /// Maximum nesting of form XObjects during rendering.
    pub max_form_depth: usize,

    pub anti_alias: bool,

    /// Page background as `0xAARRGGBB`.
    pub background: u32,

    /// Password for encrypted documents. Empty tries the empty user password.
    pub password: Vec<u8>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_cached_chunks: DEFAULT_MAX_CACHED_CHUNKS,
            decoded_stream_cache: 32,
            max_form_depth: 12,
            anti_alias: true,
            background: 0xFFFF_FFFF,
            password: Vec::new(),
        }
    }
}

impl EngineOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_max_cached_chunks(mut self, max_cached_chunks: usize) -> Self {
        self.max_cached_chunks = max_cached_chunks.max(1);
        self
    }

    pub fn with_decoded_stream_cache(mut self, entries: usize) -> Self {
        self.decoded_stream_cache = entries;
        self
    }

    pub fn with_max_form_depth(mut self, depth: usize) -> Self {
        self.max_form_depth = depth;
        self
    }

    pub fn with_anti_alias(mut self, anti_alias: bool) -> Self {
        self.anti_alias = anti_alias;
        self
    }

    pub fn with_background(mut self, argb: u32) -> Self {
        self.background = argb;
        self
    }

    pub fn with_password(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.password = password.into();
        self
    }
}
