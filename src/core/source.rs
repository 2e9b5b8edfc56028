use crate::error::{Error, Result};

/// All-or-nothing byte reads: either exactly `len` bytes or an error.
///
/// `WouldBlock` means fewer than `len` bytes are available and nothing was
/// consumed.
pub trait ByteSource {
    fn read(&mut self, len: usize) -> Result<Vec<u8>>;
}

/// Cursor over a borrowed slice.
#[derive(Debug)]
pub struct SliceSource<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

impl ByteSource for SliceSource<'_> {
    fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        if self.remaining() < len {
            return Err(Error::WouldBlock);
        }
        let out = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }
}

impl ByteSource for crate::core::ring_buffer::RingByteBuffer {
    fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        crate::core::ring_buffer::RingByteBuffer::read(self, len)
    }
}
