//! Fixed-capacity byte ring used for outbound connection data.
//!
//! The simulation serialises messages into a ring buffer and hands it to the
//! connection layer with `consume_send`; the writer task drains it to the
//! socket. Sizing and throttling of the ring are the caller's concern.

/// A fixed-size FIFO of bytes.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    buffer: Box<[u8]>,
    /// Read position.
    head: usize,
    /// Write position.
    tail: usize,
    /// Bytes currently stored.
    len: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Readable byte count.
    #[inline]
    pub fn avail_read(&self) -> usize {
        self.len
    }

    /// Writable byte count.
    #[inline]
    pub fn avail_write(&self) -> usize {
        self.capacity() - self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop all contents and rewind the cursors.
    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }

    /// Write as much of `data` as fits. Returns the number of bytes written.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let count = data.len().min(self.avail_write());
        if count == 0 {
            return 0;
        }
        let cap = self.capacity();
        let first = count.min(cap - self.tail);
        self.buffer[self.tail..self.tail + first].copy_from_slice(&data[..first]);
        self.buffer[..count - first].copy_from_slice(&data[first..count]);
        self.tail = (self.tail + count) % cap;
        self.len += count;
        count
    }

    /// Write `data` only if all of it fits. A message is never split
    /// across a full ring.
    pub fn write_all(&mut self, data: &[u8]) -> bool {
        if data.len() > self.avail_write() {
            return false;
        }
        self.write(data);
        true
    }

    /// Copy up to `out.len()` bytes without moving the read cursor.
    pub fn read_tmp(&self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.len);
        if count == 0 {
            return 0;
        }
        let (a, b) = self.as_slices();
        let first = count.min(a.len());
        out[..first].copy_from_slice(&a[..first]);
        out[first..count].copy_from_slice(&b[..count - first]);
        count
    }

    /// Copy up to `out.len()` bytes and advance the read cursor.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let count = self.read_tmp(out);
        self.advance(count);
        count
    }

    /// Advance the read cursor by `count` bytes. Fails without moving the
    /// cursor when fewer bytes are readable.
    pub fn forward_read(&mut self, count: usize) -> bool {
        if count > self.len {
            return false;
        }
        self.advance(count);
        true
    }

    fn advance(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.head = (self.head + count) % self.capacity();
        self.len -= count;
        if self.len == 0 {
            self.head = 0;
            self.tail = 0;
        }
    }

    /// Readable bytes as at most two contiguous slices, oldest first.
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        if self.len == 0 {
            return (&[], &[]);
        }
        let cap = self.capacity();
        if self.head + self.len <= cap {
            (&self.buffer[self.head..self.head + self.len], &[])
        } else {
            let wrapped = self.head + self.len - cap;
            (&self.buffer[self.head..], &self.buffer[..wrapped])
        }
    }

    /// The oldest contiguous run of readable bytes.
    pub fn contiguous(&self) -> &[u8] {
        self.as_slices().0
    }

    /// Move as much of `src` into `self` as fits. Returns bytes moved.
    pub fn consume_other(&mut self, src: &mut RingBuffer) -> usize {
        let count = src.len.min(self.avail_write());
        let (a, b) = src.as_slices();
        let first = count.min(a.len());
        let mut moved = self.write(&a[..first]);
        moved += self.write(&b[..count - first]);
        src.advance(moved);
        moved
    }
}
