use super::error::{PDFError, PDFResult};
use lru::LruCache;
use rustc_hash::FxHashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default chunk size: 64KB
pub const DEFAULT_CHUNK_SIZE: usize = 65536;

/// Default maximum number of chunks to keep in memory cache
pub const DEFAULT_MAX_CACHED_CHUNKS: usize = 10;

/// Loads raw chunk bytes from a data source.
///
/// Implementers own the data source (a file, a duplicated descriptor)
/// and perform the actual I/O; [`ChunkManager`] decides what to keep.
pub trait ChunkLoader: Send + Sync {
    /// Fills `buf` with the bytes starting at `offset`.
    fn load(&self, offset: usize, buf: &mut [u8]) -> PDFResult<()>;

    /// Returns the total data length in bytes.
    fn total_length(&self) -> usize;
}

/// Tracks which chunks of a source are resident and keeps a bounded
/// LRU cache of them.
///
/// Chunks are handed out as `Arc<[u8]>` so a reader can keep using a
/// chunk after the manager evicted it.
pub struct ChunkManager {
    /// Total length of the data in bytes
    total_length: usize,
    /// Size of each chunk in bytes
    chunk_size: usize,
    /// Total number of chunks
    num_chunks: usize,
    /// Cache of resident chunks
    chunk_cache: LruCache<usize, Arc<[u8]>>,
    /// Every chunk that has been loaded at some point
    loaded_chunks: FxHashSet<usize>,
    /// Number of loads performed, reloads of evicted chunks included
    loads: usize,
}

impl ChunkManager {
    /// Creates a new ChunkManager.
    ///
    /// Zero sizes fall back to the defaults.
    pub fn new(total_length: usize, chunk_size: usize, max_cached_chunks: usize) -> Self {
        let chunk_size = if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };
        let capacity = NonZeroUsize::new(max_cached_chunks)
            .or(NonZeroUsize::new(DEFAULT_MAX_CACHED_CHUNKS))
            .unwrap_or(NonZeroUsize::MIN);

        ChunkManager {
            total_length,
            chunk_size,
            num_chunks: total_length.div_ceil(chunk_size),
            chunk_cache: LruCache::new(capacity),
            loaded_chunks: FxHashSet::default(),
            loads: 0,
        }
    }

    /// Returns the total length of the data.
    pub fn length(&self) -> usize {
        self.total_length
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    /// Byte range covered by `chunk_num`.
    pub fn chunk_bounds(&self, chunk_num: usize) -> (usize, usize) {
        let begin = chunk_num * self.chunk_size;
        let end = (begin + self.chunk_size).min(self.total_length);
        (begin, end)
    }

    /// Stores freshly loaded chunk data, evicting the least recently
    /// used chunk when the cache is full.
    pub fn on_receive_data(&mut self, chunk_num: usize, chunk: Vec<u8>) -> PDFResult<Arc<[u8]>> {
        if chunk_num >= self.num_chunks {
            return Err(PDFError::InvalidByteRange {
                begin: chunk_num * self.chunk_size,
                end: (chunk_num + 1) * self.chunk_size,
            });
        }

        let chunk: Arc<[u8]> = Arc::from(chunk);
        self.loaded_chunks.insert(chunk_num);
        self.loads += 1;
        self.chunk_cache.put(chunk_num, Arc::clone(&chunk));
        Ok(chunk)
    }

    /// Returns a resident chunk and marks it as most recently used.
    pub fn get_chunk(&mut self, chunk_num: usize) -> Option<Arc<[u8]>> {
        self.chunk_cache.get(&chunk_num).cloned()
    }

    /// Returns the chunk, loading it through `loader` when it is not resident.
    pub fn fetch_chunk(&mut self, chunk_num: usize, loader: &dyn ChunkLoader) -> PDFResult<Arc<[u8]>> {
        if let Some(chunk) = self.get_chunk(chunk_num) {
            return Ok(chunk);
        }
        if chunk_num >= self.num_chunks {
            return Err(PDFError::UnexpectedEndOfStream);
        }
        let (begin, end) = self.chunk_bounds(chunk_num);
        let mut buffer = vec![0u8; end - begin];
        loader.load(begin, &mut buffer)?;
        self.on_receive_data(chunk_num, buffer)
    }

    /// Checks if a specific chunk has ever been loaded.
    pub fn has_chunk(&self, chunk: usize) -> bool {
        self.loaded_chunks.contains(&chunk)
    }

    /// Checks if a chunk is currently in the cache (not just loaded).
    pub fn is_chunk_cached(&self, chunk_num: usize) -> bool {
        self.chunk_cache.contains(&chunk_num)
    }

    /// Number of chunks currently resident.
    pub fn num_chunks_cached(&self) -> usize {
        self.chunk_cache.len()
    }

    /// Number of distinct chunks loaded so far.
    pub fn num_chunks_loaded(&self) -> usize {
        self.loaded_chunks.len()
    }

    /// Total loads performed, counting reloads after eviction.
    pub fn num_loads(&self) -> usize {
        self.loads
    }

    /// Drops every resident chunk.
    pub fn clear(&mut self) {
        self.chunk_cache.clear();
    }
}
