use super::base_stream::BaseStream;
use super::error::{PDFError, PDFResult};
use std::sync::Arc;

/// A simple in-memory stream implementation.
///
/// Used for documents opened from a byte buffer and for decoded stream
/// data handed to the content stream reader.
///
/// The underlying data is stored in an Arc, allowing sub-streams to
/// share the same data without cloning.
pub struct Stream {
    /// The underlying byte buffer (shared via Arc)
    bytes: Arc<Vec<u8>>,
    /// Offset of this stream's first byte inside `bytes`
    start: usize,
    /// Length of accessible data from start
    length: usize,
    /// Current read position, relative to `start`
    pos: usize,
}

impl Stream {
    /// Creates a stream over `bytes[start..start + length]`.
    ///
    /// The window is clamped to the buffer.
    pub fn new(bytes: Vec<u8>, start: usize, length: usize) -> Self {
        Self::from_arc(Arc::new(bytes), start, length)
    }

    /// Creates a stream over a window of a shared buffer.
    pub fn from_arc(bytes: Arc<Vec<u8>>, start: usize, length: usize) -> Self {
        let start = start.min(bytes.len());
        let length = length.min(bytes.len() - start);
        Stream {
            bytes,
            start,
            length,
            pos: 0,
        }
    }

    /// Creates a new Stream over the whole byte vector.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let length = bytes.len();
        Self::new(bytes, 0, length)
    }

    /// Returns the bytes visible through this stream.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[self.start..self.start + self.length]
    }
}

impl BaseStream for Stream {
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

    #[inline]
    fn get_byte(&mut self) -> PDFResult<u8> {
        if self.pos >= self.length {
            return Err(PDFError::UnexpectedEndOfStream);
        }
        let byte = self.bytes[self.start + self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn get_bytes(&mut self, length: usize) -> PDFResult<Vec<u8>> {
        let end_pos = self.pos.saturating_add(length).min(self.length);
        let bytes = self.bytes[self.start + self.pos..self.start + end_pos].to_vec();
        self.pos = end_pos;
        Ok(bytes)
    }

    fn get_byte_range(&self, begin: usize, end: usize) -> PDFResult<Vec<u8>> {
        if begin > end || end > self.length {
            return Err(PDFError::InvalidByteRange { begin, end });
        }
        Ok(self.bytes[self.start + begin..self.start + end].to_vec())
    }

    fn make_sub_stream(&self, start: usize, length: usize) -> PDFResult<Box<dyn BaseStream>> {
        let end = start.saturating_add(length);
        if end > self.length {
            return Err(PDFError::InvalidByteRange { begin: start, end });
        }

        // Share the Arc instead of cloning the data
        Ok(Box::new(Stream::from_arc(
            Arc::clone(&self.bytes),
            self.start + start,
            length,
        )))
    }
}
