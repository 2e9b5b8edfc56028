use crate::error::{Error, Result};

/// Initial capacity of a growable buffer.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Writes that do not fit fail with `BufferOverflow`.
    Fixed,
    /// Storage doubles whenever a write would not fit.
    Growable,
}

/// Circular byte store.
///
/// `head` is the next byte to read, `tail` the next slot to write. Both wrap
/// at `capacity`. Fullness is tracked by `size` alone: `head == tail` holds
/// for both the empty and the full buffer.
#[derive(Debug, Clone)]
pub struct RingByteBuffer {
    storage: Vec<u8>,
    head: usize,
    tail: usize,
    size: usize,
    mode: Mode,
}

impl Default for RingByteBuffer {
    fn default() -> Self {
        Self::growable(DEFAULT_CAPACITY)
    }
}

impl RingByteBuffer {
    pub fn fixed(capacity: usize) -> Self {
        Self::with_mode(capacity, Mode::Fixed)
    }

    pub fn growable(initial_capacity: usize) -> Self {
        // Doubling a zero-sized store would never make room.
        Self::with_mode(initial_capacity.max(1), Mode::Growable)
    }

    fn with_mode(capacity: usize, mode: Mode) -> Self {
        Self {
            storage: vec![0; capacity],
            head: 0,
            tail: 0,
            size: 0,
            mode,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn remaining_capacity(&self) -> usize {
        self.capacity() - self.size
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Appends `bytes`. Never writes a partial span.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }

        if self.remaining_capacity() < bytes.len() {
            match self.mode {
                Mode::Fixed => return Err(Error::BufferOverflow),
                Mode::Growable => {
                    while self.remaining_capacity() < bytes.len() {
                        self.expand();
                    }
                }
            }
        }

        let capacity = self.capacity();
        let first = bytes.len().min(capacity - self.tail);
        self.storage[self.tail..self.tail + first].copy_from_slice(&bytes[..first]);
        let rest = bytes.len() - first;
        if rest > 0 {
            self.storage[..rest].copy_from_slice(&bytes[first..]);
        }
        self.tail = (self.tail + bytes.len()) % capacity;
        self.size += bytes.len();

        // A full growable buffer would report zero remaining capacity to the
        // reader pump, which then could never make progress.
        if self.mode == Mode::Growable && self.remaining_capacity() == 0 {
            self.expand();
        }

        Ok(bytes.len())
    }

    /// Removes and returns exactly `len` bytes, or `WouldBlock` if fewer are buffered.
    pub fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let out = self.peek(len)?;
        self.head = (self.head + len) % self.capacity();
        self.size -= len;
        Ok(out)
    }

    /// Like [`read`](Self::read) but leaves the bytes in place.
    pub fn peek(&self, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        if self.size < len {
            return Err(Error::WouldBlock);
        }

        let mut out = vec![0; len];
        self.copy_out(&mut out);
        Ok(out)
    }

    /// Drains everything currently buffered.
    pub fn read_all(&mut self) -> Vec<u8> {
        let len = self.size;
        // `size` bytes are always available.
        self.read(len).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.size = 0;
    }

    /// Copies the first `out.len()` buffered bytes without consuming them.
    fn copy_out(&self, out: &mut [u8]) {
        let len = out.len();
        let first = len.min(self.capacity() - self.head);
        out[..first].copy_from_slice(&self.storage[self.head..self.head + first]);
        if first < len {
            out[first..].copy_from_slice(&self.storage[..len - first]);
        }
    }

    fn expand(&mut self) {
        let mut storage = vec![0; self.capacity() * 2];
        self.copy_out(&mut storage[..self.size]);
        self.storage = storage;
        self.head = 0;
        self.tail = self.size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraparound_preserves_order() {
        let mut buf = RingByteBuffer::fixed(8);
        buf.write(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(buf.read(3).unwrap(), vec![1, 2, 3]);

        // Crosses the end of storage.
        buf.write(&[6, 7, 8, 9, 10, 11]).unwrap();
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.remaining_capacity(), 0);
        assert_eq!(buf.read(8).unwrap(), vec![4, 5, 6, 7, 8, 9, 10, 11]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_is_all_or_nothing() {
        let mut buf = RingByteBuffer::fixed(8);
        buf.write(b"abc").unwrap();
        assert!(matches!(buf.read(4), Err(Error::WouldBlock)));
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.read(3).unwrap(), b"abc");
    }

    #[test]
    fn test_fixed_overflow_writes_nothing() {
        let mut buf = RingByteBuffer::fixed(4);
        buf.write(b"ab").unwrap();
        assert!(matches!(buf.write(b"cde"), Err(Error::BufferOverflow)));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.read_all(), b"ab");
    }

    #[test]
    fn test_full_and_empty_are_distinct() {
        let mut buf = RingByteBuffer::fixed(4);
        buf.write(b"wxyz").unwrap();
        assert_eq!(buf.len(), 4);
        assert!(!buf.is_empty());
        assert_eq!(buf.read(4).unwrap(), b"wxyz");
        assert!(buf.is_empty());
        assert_eq!(buf.remaining_capacity(), 4);
    }

    #[test]
    fn test_zero_length_operations() {
        let mut buf = RingByteBuffer::fixed(2);
        assert_eq!(buf.write(&[]).unwrap(), 0);
        assert!(buf.read(0).unwrap().is_empty());
        buf.write(b"xy").unwrap();
        assert_eq!(buf.write(&[]).unwrap(), 0);
    }

    #[test]
    fn test_zero_capacity_fixed_ring() {
        let mut buf = RingByteBuffer::fixed(0);
        assert!(buf.read(0).unwrap().is_empty());
        assert!(buf.read_all().is_empty());
        assert!(matches!(buf.write(b"a"), Err(Error::BufferOverflow)));
        assert!(matches!(buf.read(1), Err(Error::WouldBlock)));
    }

    #[test]
    fn test_growable_doubles_and_linearizes() {
        let mut buf = RingByteBuffer::growable(4);
        buf.write(b"abc").unwrap();
        buf.read(2).unwrap();
        // head = 2, wraps on the next write, then grows.
        buf.write(b"defghij").unwrap();
        assert!(buf.capacity() >= 8);
        assert_eq!(buf.read_all(), b"cdefghij");
    }

    #[test]
    fn test_growable_never_reports_full() {
        let mut buf = RingByteBuffer::growable(4);
        buf.write(b"abcd").unwrap();
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.remaining_capacity(), 4);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut buf = RingByteBuffer::fixed(4);
        buf.write(b"ab").unwrap();
        buf.read(1).unwrap();
        buf.write(b"cde").unwrap();
        assert_eq!(buf.peek(4).unwrap(), b"bcde");
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.read(4).unwrap(), b"bcde");
    }
}
