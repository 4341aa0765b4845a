use super::base_stream::BaseStream;
use super::chunk_manager::{ChunkLoader, ChunkManager};
use super::error::{PDFError, PDFResult};
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(unix)]
use std::os::fd::BorrowedFd;

/// Reads chunks from an open file with positional I/O.
///
/// On unix the reads never move the file offset, so a descriptor shared
/// with the caller keeps its position.
struct FileLoader {
    file: File,
    length: usize,
    #[cfg(not(unix))]
    seek_lock: Mutex<()>,
}

impl FileLoader {
    fn new(file: File) -> PDFResult<Self> {
        let length = file.metadata()?.len() as usize;
        Ok(FileLoader {
            file,
            length,
            #[cfg(not(unix))]
            seek_lock: Mutex::new(()),
        })
    }
}

impl ChunkLoader for FileLoader {
    #[cfg(unix)]
    fn load(&self, offset: usize, buf: &mut [u8]) -> PDFResult<()> {
        use std::os::unix::fs::FileExt;
        self.file
            .read_exact_at(buf, offset as u64)
            .map_err(|e| PDFError::Io(format!("Failed to read chunk at {}: {}", offset, e)))
    }

    #[cfg(not(unix))]
    fn load(&self, offset: usize, buf: &mut [u8]) -> PDFResult<()> {
        use std::io::{Read, Seek, SeekFrom};
        let _guard = self
            .seek_lock
            .lock()
            .map_err(|_| PDFError::Io("file lock poisoned".to_string()))?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.read_exact(buf)
            .map_err(|e| PDFError::Io(format!("Failed to read chunk at {}: {}", offset, e)))
    }

    fn total_length(&self) -> usize {
        self.length
    }
}

/// Loader plus chunk cache, shared by a stream and all its sub-streams.
struct SharedSource {
    loader: Box<dyn ChunkLoader>,
    manager: Mutex<ChunkManager>,
}

impl SharedSource {
    fn lock_manager(&self) -> PDFResult<MutexGuard<'_, ChunkManager>> {
        self.manager
            .lock()
            .map_err(|_| PDFError::Io("Failed to lock chunk manager (mutex poisoned)".to_string()))
    }

    fn chunk(&self, chunk_num: usize) -> PDFResult<Arc<[u8]>> {
        self.lock_manager()?.fetch_chunk(chunk_num, self.loader.as_ref())
    }
}

/// A stream that loads data from a file on demand.
///
/// Memory stays bounded by the chunk cache:
/// - chunks are read from disk only when a position inside them is touched
/// - an LRU cache keeps the most recently used chunks resident
/// - the whole file is never loaded
///
/// The loader and chunk cache are shared via Arc, allowing sub-streams
/// to reuse the same resources and cache.
pub struct FileChunkedStream {
    source: Arc<SharedSource>,
    /// Absolute offset of this stream's first byte in the file
    start: usize,
    /// Number of bytes visible through this stream
    length: usize,
    /// Current read position, relative to `start`
    pos: usize,
    chunk_size: usize,
    /// Last chunk touched by `get_byte`, kept to avoid locking per byte
    current: Option<(usize, Arc<[u8]>)>,
}

impl FileChunkedStream {
    /// Opens the file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, chunk_size: usize, max_cached_chunks: usize) -> PDFResult<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            PDFError::Io(format!("Failed to open {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_file(file, chunk_size, max_cached_chunks)
    }

    /// Wraps an already open file. The stream takes ownership of it.
    pub fn from_file(file: File, chunk_size: usize, max_cached_chunks: usize) -> PDFResult<Self> {
        let loader = FileLoader::new(file)?;
        Ok(Self::from_loader(Box::new(loader), chunk_size, max_cached_chunks))
    }

    /// Duplicates a borrowed descriptor and reads through the duplicate.
    ///
    /// The caller keeps ownership of `fd` and may close it once this returns.
    #[cfg(unix)]
    pub fn from_fd(fd: BorrowedFd<'_>, chunk_size: usize, max_cached_chunks: usize) -> PDFResult<Self> {
        let owned = fd
            .try_clone_to_owned()
            .map_err(|e| PDFError::Io(format!("Failed to duplicate descriptor: {}", e)))?;
        Self::from_file(File::from(owned), chunk_size, max_cached_chunks)
    }

    /// Builds a stream over any chunk loader.
    pub fn from_loader(loader: Box<dyn ChunkLoader>, chunk_size: usize, max_cached_chunks: usize) -> Self {
        let length = loader.total_length();
        let manager = ChunkManager::new(length, chunk_size, max_cached_chunks);
        let chunk_size = manager.chunk_size();
        FileChunkedStream {
            source: Arc::new(SharedSource {
                loader,
                manager: Mutex::new(manager),
            }),
            start: 0,
            length,
            pos: 0,
            chunk_size,
            current: None,
        }
    }

    /// Number of distinct chunks read from disk so far.
    pub fn num_chunks_loaded(&self) -> usize {
        self.source
            .lock_manager()
            .map(|m| m.num_chunks_loaded())
            .unwrap_or(0)
    }

    /// Number of chunks currently held in memory.
    pub fn num_chunks_cached(&self) -> usize {
        self.source
            .lock_manager()
            .map(|m| m.num_chunks_cached())
            .unwrap_or(0)
    }

    /// Total number of chunks in the file.
    pub fn num_chunks(&self) -> usize {
        self.source
            .lock_manager()
            .map(|m| m.num_chunks())
            .unwrap_or(0)
    }

    /// Copies absolute file range `begin..end` into a new buffer.
    fn copy_absolute(&self, begin: usize, end: usize) -> PDFResult<Vec<u8>> {
        let mut result = Vec::with_capacity(end - begin);
        let mut offset = begin;
        while offset < end {
            let chunk_num = offset / self.chunk_size;
            let chunk = self.source.chunk(chunk_num)?;
            let chunk_start = chunk_num * self.chunk_size;
            let read_start = offset - chunk_start;
            let read_end = (end - chunk_start).min(chunk.len());
            if read_end <= read_start {
                return Err(PDFError::UnexpectedEndOfStream);
            }
            result.extend_from_slice(&chunk[read_start..read_end]);
            offset = chunk_start + read_end;
        }
        Ok(result)
    }
}

impl BaseStream for FileChunkedStream {
    fn length(&self) -> usize {
        self.length
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn set_pos(&mut self, pos: usize) -> PDFResult<()> {
        if pos > self.length {
            return Err(PDFError::InvalidPosition {
                pos,
                length: self.length,
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn get_byte(&mut self) -> PDFResult<u8> {
        if self.pos >= self.length {
            return Err(PDFError::UnexpectedEndOfStream);
        }

        let absolute = self.start + self.pos;
        let chunk_num = absolute / self.chunk_size;
        let offset = absolute - chunk_num * self.chunk_size;

        if !matches!(&self.current, Some((num, _)) if *num == chunk_num) {
            let chunk = self.source.chunk(chunk_num)?;
            self.current = Some((chunk_num, chunk));
        }
        let byte = self
            .current
            .as_ref()
            .and_then(|(_, chunk)| chunk.get(offset).copied())
            .ok_or(PDFError::UnexpectedEndOfStream)?;

        self.pos += 1;
        Ok(byte)
    }

    fn get_bytes(&mut self, length: usize) -> PDFResult<Vec<u8>> {
        let end_pos = self.pos.saturating_add(length).min(self.length);
        if end_pos == self.pos {
            return Ok(Vec::new());
        }
        let bytes = self.copy_absolute(self.start + self.pos, self.start + end_pos)?;
        self.pos = end_pos;
        Ok(bytes)
    }

    fn get_byte_range(&self, begin: usize, end: usize) -> PDFResult<Vec<u8>> {
        if begin > end || end > self.length {
            return Err(PDFError::InvalidByteRange { begin, end });
        }
        if begin == end {
            return Ok(Vec::new());
        }
        self.copy_absolute(self.start + begin, self.start + end)
    }

    fn make_sub_stream(&self, start: usize, length: usize) -> PDFResult<Box<dyn BaseStream>> {
        let end = start.saturating_add(length);
        if end > self.length {
            return Err(PDFError::InvalidByteRange { begin: start, end });
        }
        Ok(Box::new(FileChunkedStream {
            source: Arc::clone(&self.source),
            start: self.start + start,
            length,
            pos: 0,
            chunk_size: self.chunk_size,
            current: None,
        }))
    }
}
