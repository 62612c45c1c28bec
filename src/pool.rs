//! Reusable byte buffers for buffered handlers.
//!
//! Every buffered request needs somewhere to hold its whole body. Allocating
//! a fresh `Vec` per request is fine until it is not; the pool keeps a small
//! free list of already-grown buffers instead.
//!
//! Ownership is exclusive: [`BufferPool::acquire`] hands out a [`PooledBuf`]
//! guard, and the buffer only goes back to the free list when that guard is
//! dropped. The mutex is held for the push or pop, never while a buffer is
//! in use.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

/// Idle buffers kept by the global pool.
pub const DEFAULT_MAX_POOLED: usize = 64;

/// Buffers that grew beyond this are dropped rather than pooled (1 MiB).
pub const DEFAULT_MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

static GLOBAL: LazyLock<Arc<BufferPool>> = LazyLock::new(|| {
    Arc::new(BufferPool::new(DEFAULT_MAX_POOLED, DEFAULT_MAX_RETAINED_CAPACITY))
});

/// A bounded free list of byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
    max_retained_capacity: usize,
}

impl BufferPool {
    pub fn new(max_pooled: usize, max_retained_capacity: usize) -> Self {
        Self { free: Mutex::new(Vec::new()), max_pooled, max_retained_capacity }
    }

    /// The process-wide pool used by handlers that were not given their own.
    pub fn global() -> Arc<BufferPool> {
        Arc::clone(&GLOBAL)
    }

    /// Takes an idle buffer, or allocates an empty one if none is idle.
    pub fn acquire(self: &Arc<Self>) -> PooledBuf {
        let buf = self.free.lock().pop().unwrap_or_default();
        PooledBuf { buf, pool: Arc::clone(self) }
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.max_retained_capacity {
            return;
        }
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }
}

/// A buffer on loan from a [`BufferPool`]. Returned, emptied, on drop.
#[derive(Debug)]
pub struct PooledBuf {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> { &self.buf }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> { &mut self.buf }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffers_come_back_empty_with_capacity() {
        let pool = Arc::new(BufferPool::new(4, 1024));
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"secret session token");
        }
        assert_eq!(pool.idle(), 1);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= b"secret session token".len());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn oversized_buffers_are_not_retained() {
        let pool = Arc::new(BufferPool::new(4, 16));
        {
            let mut buf = pool.acquire();
            buf.resize(64, b'x');
        }
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn free_list_is_bounded() {
        let pool = Arc::new(BufferPool::new(2, 1024));
        let held: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        drop(held);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn concurrent_loans_never_alias() {
        let pool = Arc::new(BufferPool::new(8, 1024));
        let threads: Vec<_> = (0..8u8)
            .map(|n| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let mut buf = pool.acquire();
                        assert!(buf.is_empty());
                        buf.extend_from_slice(&[n; 32]);
                        assert!(buf.iter().all(|&b| b == n));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert!(pool.idle() <= 8);
    }
}
