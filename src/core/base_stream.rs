use super::error::{PDFError, PDFResult};

/// Base trait for all byte sources the parser reads from.
///
/// A stream is a cursor over a randomly seekable byte source. Positions
/// are relative to the start of the stream, so a sub-stream created with
/// [`BaseStream::make_sub_stream`] starts at position 0.
///
/// Implementations provide the core reading operations; the trait
/// provides the derived ones (ranged reads, peeking, skipping).
pub trait BaseStream: Send {
    // ============================================================================
    // Required methods (must be implemented by all stream types)
    // ============================================================================

    /// Returns the total length of the stream in bytes.
    fn length(&self) -> usize;

    /// Returns the current position in the stream.
    fn pos(&self) -> usize;

    /// Sets the current position in the stream.
    ///
    /// Positions up to and including `length()` are valid.
    fn set_pos(&mut self, pos: usize) -> PDFResult<()>;

    /// Reads and returns a single byte from the stream, advancing the position.
    ///
    /// Returns [`PDFError::UnexpectedEndOfStream`] at the end of the stream.
    fn get_byte(&mut self) -> PDFResult<u8>;

    /// Reads up to `length` bytes, advancing the position.
    ///
    /// Fewer bytes are returned only when the end of the stream is reached.
    fn get_bytes(&mut self, length: usize) -> PDFResult<Vec<u8>>;

    /// Returns bytes `begin..end` without changing the current position.
    fn get_byte_range(&self, begin: usize, end: usize) -> PDFResult<Vec<u8>>;

    /// Creates an independent cursor over `start..start + length`.
    ///
    /// The new stream shares the underlying data (and caches) with `self`.
    fn make_sub_stream(&self, start: usize, length: usize) -> PDFResult<Box<dyn BaseStream>>;

    // ============================================================================
    // Provided methods with default implementations
    // ============================================================================

    /// Returns true if the stream contains no data.
    fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Size of the underlying source in bytes.
    fn size(&self) -> usize {
        self.length()
    }

    /// Random access read of exactly `length` bytes at `offset`.
    ///
    /// Reads that extend past the end fail with an I/O class error rather
    /// than returning a short buffer.
    fn read(&self, offset: usize, length: usize) -> PDFResult<Vec<u8>> {
        let end = offset
            .checked_add(length)
            .ok_or(PDFError::InvalidByteRange { begin: offset, end: usize::MAX })?;
        if end > self.length() {
            return Err(PDFError::InvalidByteRange { begin: offset, end });
        }
        if length == 0 {
            return Ok(Vec::new());
        }
        self.get_byte_range(offset, end)
    }

    /// Moves the cursor back to the start.
    fn reset(&mut self) -> PDFResult<()> {
        self.set_pos(0)
    }

    /// Reads a single byte without advancing the position.
    fn peek_byte(&mut self) -> PDFResult<u8> {
        let current_pos = self.pos();
        let byte = self.get_byte()?;
        self.set_pos(current_pos)?;
        Ok(byte)
    }

    /// Reads up to `length` bytes without advancing the position.
    fn peek_bytes(&mut self, length: usize) -> PDFResult<Vec<u8>> {
        let current_pos = self.pos();
        let bytes = self.get_bytes(length)?;
        self.set_pos(current_pos)?;
        Ok(bytes)
    }

    /// Skips `n` bytes, clamping at the end of the stream.
    fn skip(&mut self, n: usize) -> PDFResult<()> {
        let target = self.pos().saturating_add(n).min(self.length());
        self.set_pos(target)
    }

    /// Number of bytes left after the cursor.
    fn remaining(&self) -> usize {
        self.length().saturating_sub(self.pos())
    }
}
