//! Frame buffer
//!
//! Holds controller bytes that have not yet been parsed into complete
//! frames. Bytes are appended at the back and consumed from the front.
//! Capacity grows geometrically and never shrinks.

use super::ProtocolError;

/// Default capacity of a fresh buffer (bytes)
pub const DEFAULT_CAPACITY: usize = 8192;

/// Append-only, consume-from-front byte buffer
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Create a buffer with the default capacity
    pub fn new() -> Result<Self, ProtocolError> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a buffer with room for at least `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Result<Self, ProtocolError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| ProtocolError::OutOfMemory {
                requested: capacity,
            })?;
        Ok(Self { buf })
    }

    /// Number of pending bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Pending bytes, oldest first
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Append bytes to the end of the buffer, growing it if needed.
    ///
    /// An empty slice is a no-op. Fails with [`ProtocolError::OutOfMemory`]
    /// if the required size overflows `usize` or the allocation fails; the
    /// buffer is left untouched in that case.
    pub fn append(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if data.is_empty() {
            return Ok(());
        }

        let required = self
            .buf
            .len()
            .checked_add(data.len())
            .ok_or(ProtocolError::OutOfMemory {
                requested: usize::MAX,
            })?;

        if required > self.buf.capacity() {
            self.grow(required)?;
        }

        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Remove the first `n` bytes. Consuming more than is pending clears
    /// the buffer.
    pub fn consume(&mut self, n: usize) {
        if n >= self.buf.len() {
            self.buf.clear();
            return;
        }
        self.buf.drain(..n);
    }

    /// Double the capacity until it covers `required`.
    fn grow(&mut self, required: usize) -> Result<(), ProtocolError> {
        let mut next = self.buf.capacity().max(1);
        while next < required {
            // Past half of the address space doubling would wrap, so take
            // exactly what is needed instead.
            next = next.checked_mul(2).unwrap_or(required);
        }

        tracing::trace!(from = self.buf.capacity(), to = next, "growing frame buffer");

        self.buf
            .try_reserve_exact(next - self.buf.len())
            .map_err(|_| ProtocolError::OutOfMemory { requested: next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_buffer_is_empty() {
        let buf = FrameBuffer::new().unwrap();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= DEFAULT_CAPACITY);
    }

    #[test]
    fn test_append_empty_is_noop() {
        let mut buf = FrameBuffer::with_capacity(4).unwrap();
        let cap = buf.capacity();
        buf.append(&[]).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), cap);
    }

    #[test]
    fn test_growth_doubles() {
        let mut buf = FrameBuffer::with_capacity(4).unwrap();
        buf.append(b"abcd").unwrap();
        buf.append(b"e").unwrap();
        assert!(buf.capacity() >= 8);
        assert_eq!(buf.as_slice(), b"abcde");
    }

    #[test]
    fn test_growth_covers_large_append() {
        let mut buf = FrameBuffer::with_capacity(4).unwrap();
        let data = vec![7u8; 100];
        buf.append(&data).unwrap();
        assert!(buf.capacity() >= 100);
        assert_eq!(buf.len(), 100);
    }

    #[test]
    fn test_growth_from_zero_capacity() {
        let mut buf = FrameBuffer::with_capacity(0).unwrap();
        buf.append(b"xyz").unwrap();
        assert_eq!(buf.as_slice(), b"xyz");
    }

    #[test]
    fn test_capacity_never_shrinks() {
        let mut buf = FrameBuffer::with_capacity(4).unwrap();
        buf.append(&[0u8; 64]).unwrap();
        let cap = buf.capacity();
        buf.consume(64);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), cap);
    }

    #[test]
    fn test_consume_shifts_remaining() {
        let mut buf = FrameBuffer::new().unwrap();
        buf.append(b"hello world").unwrap();
        buf.consume(6);
        assert_eq!(buf.as_slice(), b"world");
    }

    #[test]
    fn test_consume_past_end_clears() {
        let mut buf = FrameBuffer::new().unwrap();
        buf.append(b"abc").unwrap();
        buf.consume(10);
        assert!(buf.is_empty());
        buf.consume(1);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_with_capacity_overflow_is_out_of_memory() {
        assert!(matches!(
            FrameBuffer::with_capacity(usize::MAX),
            Err(ProtocolError::OutOfMemory { requested: usize::MAX })
        ));
    }

    #[test]
    fn test_failed_growth_leaves_buffer_unchanged() {
        let mut buf = FrameBuffer::with_capacity(4).unwrap();
        buf.append(b"ab").unwrap();
        let cap = buf.capacity();

        // Doubling wraps past half the address space, so the request is usize::MAX
        assert!(matches!(
            buf.grow(usize::MAX),
            Err(ProtocolError::OutOfMemory { requested: usize::MAX })
        ));
        assert_eq!(buf.as_slice(), b"ab");
        assert_eq!(buf.capacity(), cap);

        buf.append(b"cd").unwrap();
        assert_eq!(buf.as_slice(), b"abcd");
    }

    proptest! {
        #[test]
        fn prop_append_then_consume_keeps_suffix(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16),
            split in any::<prop::sample::Index>(),
        ) {
            let mut buf = FrameBuffer::with_capacity(1).unwrap();
            let mut all = Vec::new();
            for chunk in &chunks {
                buf.append(chunk).unwrap();
                all.extend_from_slice(chunk);
            }

            let k = if all.is_empty() { 0 } else { split.index(all.len() + 1) };
            buf.consume(k);

            prop_assert_eq!(buf.as_slice(), &all[k..]);
            prop_assert!(buf.len() <= buf.capacity());
        }
    }
}
