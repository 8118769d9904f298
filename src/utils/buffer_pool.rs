//! # Packet Buffer Pool
//!
//! Small pool of fixed-capacity encode buffers. A buffer is acquired for one
//! send operation, a message is encoded into it, the bytes are copied into
//! the connection's ring buffer, and the buffer returns to the pool on drop.
//!
//! Buffers have a fixed capacity equal to the largest encodable message by
//! default, so encoding into a pooled buffer never has to grow it.
//!
//! ## Usage
//! ```rust
//! use realm_core::core::{FieldType, Header, Message, Schema};
//! use realm_core::utils::buffer_pool::PacketBufferPool;
//!
//! let schema = Schema::define(1, &[(FieldType::UInt32, 1)]).unwrap();
//! let pool = PacketBufferPool::new(4);
//! let mut buf = pool.acquire();
//! let bytes = buf
//!     .encode_top_level(&Message::new(&schema).with(0, 7u32), Header::new(1))
//!     .unwrap();
//! assert_eq!(bytes.len(), 13 + 1 + 4 + 1);
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use crate::core::{Header, Message, MAX_PACKET_SIZE};
use crate::error::Result;

/// Default buffer capacity: one maximum-size message.
pub const DEFAULT_BUFFER_CAPACITY: usize = MAX_PACKET_SIZE + 1;

type Shelf = Arc<Mutex<Vec<Box<[u8]>>>>;

/// A pooled buffer that returns itself to the pool when dropped
pub struct PooledBuffer {
    buffer: Option<Box<[u8]>>,
    len: usize,
    pool: Shelf,
    keep: usize,
}

impl PooledBuffer {
    /// Bytes written by the last encode.
    pub fn as_slice(&self) -> &[u8] {
        match &self.buffer {
            Some(buf) => &buf[..self.len],
            None => &[],
        }
    }

    /// Whole backing storage, for callers encoding by hand.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        match &mut self.buffer {
            Some(buf) => buf,
            None => &mut [],
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, |b| b.len())
    }

    /// Record how many bytes of the storage are valid.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.capacity());
    }

    pub fn encode_top_level(&mut self, message: &Message<'_>, header: Header) -> Result<&[u8]> {
        let len = message.encode_top_level(self.storage_mut(), header)?;
        self.len = len;
        Ok(self.as_slice())
    }

    pub fn encode_nested(&mut self, message: &Message<'_>) -> Result<&[u8]> {
        let len = message.encode_nested(self.storage_mut())?;
        self.len = len;
        Ok(self.as_slice())
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buffer.take() {
            let mut shelf = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
            if shelf.len() < self.keep {
                shelf.push(buf);
            }
        }
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

/// Thread-safe pool of encode buffers
pub struct PacketBufferPool {
    pool: Shelf,
    buffer_capacity: usize,
    keep: usize,
}

impl PacketBufferPool {
    /// Create a pool with `count` pre-allocated buffers of the default capacity.
    pub fn new(count: usize) -> Self {
        Self::with_capacity(count, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(count: usize, buffer_capacity: usize) -> Self {
        let shelf = (0..count)
            .map(|_| vec![0u8; buffer_capacity].into_boxed_slice())
            .collect();
        Self {
            pool: Arc::new(Mutex::new(shelf)),
            buffer_capacity,
            keep: count,
        }
    }

    /// Acquire a buffer, allocating a fresh one if the pool is empty.
    pub fn acquire(&self) -> PooledBuffer {
        let buffer = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_capacity].into_boxed_slice());

        PooledBuffer {
            buffer: Some(buffer),
            len: 0,
            pool: self.pool.clone(),
            keep: self.keep,
        }
    }

    /// Number of buffers currently on the shelf.
    pub fn available(&self) -> usize {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for PacketBufferPool {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Clone for PacketBufferPool {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            buffer_capacity: self.buffer_capacity,
            keep: self.keep,
        }
    }
}
