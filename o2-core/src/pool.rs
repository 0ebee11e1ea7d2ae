//! Message store (spec §4.2): allocation and pooling for the codec scratch
//! buffers encode/decode pass through. The C original walks a manual
//! next-pointer free list; Rust ownership already gives every buffer a
//! single owner, so this reimplements the same pooling discipline as a
//! `Vec<u8>` object pool instead (spec §9: reimplement C idioms idiomatically).
const DEFAULT_RESERVE: usize = 64;

/// A small pool of reusable byte buffers, sized to spare the codec repeated
/// heap allocations when encoding many small messages in a row.
#[derive(Default, Debug)]
pub struct BufferPool {
    free: Vec<Vec<u8>>,
}

impl BufferPool {
    /// An empty pool.
    pub fn new() -> Self {
        Self { free: Vec::new() }
    }

    /// Take a buffer sized to hold at least `hint` bytes, reusing a freed one
    /// if available.
    pub fn acquire(&mut self, hint: usize) -> Vec<u8> {
        match self.free.pop() {
            Some(mut buf) => {
                buf.clear();
                if buf.capacity() < hint {
                    buf.reserve(hint - buf.capacity());
                }
                buf
            }
            None => Vec::with_capacity(hint + DEFAULT_RESERVE),
        }
    }

    /// Return a buffer to the pool for reuse. The pool caps how many buffers
    /// it retains, so a burst of large one-off allocations can't pin memory.
    pub fn release(&mut self, mut buf: Vec<u8>) {
        if self.free.len() < MAX_POOLED {
            buf.clear();
            self.free.push(buf);
        }
    }

    /// Number of buffers currently held in reserve.
    pub fn len(&self) -> usize {
        self.free.len()
    }

    /// Whether the pool currently holds no spare buffers.
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}

const MAX_POOLED: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffer_is_reused() {
        let mut pool = BufferPool::new();
        let buf = pool.acquire(16);
        let cap = buf.capacity();
        pool.release(buf);
        assert_eq!(pool.len(), 1);

        let reused = pool.acquire(4);
        assert_eq!(reused.capacity(), cap);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn pool_caps_retained_buffers() {
        let mut pool = BufferPool::new();
        for _ in 0..MAX_POOLED + 10 {
            pool.release(Vec::new());
        }
        assert_eq!(pool.len(), MAX_POOLED);
    }
}
