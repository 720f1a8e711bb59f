use std::collections::VecDeque;

/// Fixed capacity byte ring.
///
/// When a push finds the ring full, the oldest unread byte is discarded and
/// the sticky overflow flag is raised. The flag is only cleared by
/// [`flush()`](Self::flush()). Callers size their rings so that this never
/// happens in normal operation; an overflow means data was lost.
#[derive(Debug)]
pub struct ByteRing {
    data: VecDeque<u8>,
    capacity: usize,
    overflow: bool,
}

impl ByteRing {
    pub fn new(capacity: usize) -> ByteRing {
        ByteRing {
            data: VecDeque::with_capacity(capacity),
            capacity,
            overflow: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    /// True once a push has discarded an unread byte.
    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    pub fn push(&mut self, byte: u8) {
        if self.data.len() >= self.capacity {
            self.overflow = true;
            if self.data.pop_front().is_none() {
                // terminated ring, nowhere to put the byte
                return;
            }
        }
        self.data.push_back(byte);
    }

    pub fn push_slice(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.push(byte);
        }
    }

    pub fn pop(&mut self) -> Option<u8> {
        self.data.pop_front()
    }

    /// Pop up to `buf.len()` bytes into `buf`, returning how many were copied.
    pub fn pop_into(&mut self, buf: &mut [u8]) -> usize {
        let len = buf.len().min(self.data.len());
        for (dst, src) in buf.iter_mut().zip(self.data.drain(..len)) {
            *dst = src;
        }
        len
    }

    /// The oldest unread bytes, as one contiguous slice. May be shorter than
    /// [`len()`](Self::len()) when the content wraps around.
    pub fn front(&self) -> &[u8] {
        self.data.as_slices().0
    }

    /// Drop `len` bytes from the front, after they were taken through [`front()`](Self::front()).
    pub fn consume(&mut self, len: usize) {
        assert!(len <= self.len());
        self.data.drain(..len);
    }

    pub fn flush(&mut self) {
        self.data.clear();
        self.overflow = false;
    }

    /// Release the backing storage. The ring keeps working with zero capacity,
    /// every later push is flagged as overflow.
    pub fn terminate(&mut self) {
        self.data = VecDeque::new();
        self.capacity = 0;
        self.overflow = false;
    }
}
