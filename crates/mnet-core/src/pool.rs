//! Rented byte buffers for decoded frames.
//!
//! A decoded frame only lives for one dispatch call, so its storage is
//! rented from a pool and handed back on drop instead of being freed.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Buffers larger than this are not retained when returned.
const MAX_RETAINED_CAPACITY: usize = 64 * 1024;

/// Default number of idle buffers a pool keeps.
const DEFAULT_MAX_IDLE: usize = 64;

/// A shared pool of reusable byte buffers. Cloning shares the pool.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    /// Create a pool that keeps at most `max_idle` returned buffers.
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                max_idle,
            }),
        }
    }

    /// Rent a zero-filled buffer of exactly `len` bytes.
    pub fn rent(&self, len: usize) -> PooledBuffer {
        let mut buf = self.inner.idle.lock().pop().unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        PooledBuffer {
            buf,
            pool: Some(self.clone()),
        }
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }

    fn give_back(&self, buf: Vec<u8>) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        let mut idle = self.inner.idle.lock();
        if idle.len() < self.inner.max_idle {
            idle.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.idle())
            .field("max_idle", &self.inner.max_idle)
            .finish()
    }
}

/// A buffer rented from a [`BufferPool`]; returned to the pool when dropped.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Option<BufferPool>,
}

impl PooledBuffer {
    /// Wrap an owned buffer that does not belong to any pool.
    pub fn unpooled(buf: Vec<u8>) -> Self {
        Self { buf, pool: None }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.give_back(std::mem::take(&mut self.buf));
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_and_return() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.rent(8);
            buf[0] = 0xAB;
            assert_eq!(buf.len(), 8);
            assert_eq!(pool.idle(), 0);
        }
        assert_eq!(pool.idle(), 1);

        // Reused buffers come back zeroed at the requested length.
        let buf = pool.rent(4);
        assert_eq!(&buf[..], &[0, 0, 0, 0]);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn idle_is_bounded() {
        let pool = BufferPool::with_max_idle(2);
        let rented: Vec<_> = (0..5).map(|_| pool.rent(16)).collect();
        drop(rented);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn oversized_buffers_are_dropped() {
        let pool = BufferPool::new();
        drop(pool.rent(MAX_RETAINED_CAPACITY + 1));
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn unpooled_buffer_has_no_pool() {
        let pool = BufferPool::new();
        drop(PooledBuffer::unpooled(vec![1, 2, 3]));
        assert_eq!(pool.idle(), 0);
    }
}
