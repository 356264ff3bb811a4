use parking_lot::Mutex;

/// Bounded pool of reusable bucket write buffers.
///
/// Buffers handed out by [`get`](BufferCache::get) come back through
/// [`put`](BufferCache::put) once their bytes are on disk; buffers beyond
/// the capacity are dropped.
#[derive(Debug)]
pub struct BufferCache {
    pool: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
}

impl BufferCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// An empty buffer, reusing a pooled allocation when one is available.
    pub fn get(&self) -> Vec<u8> {
        self.pool.lock().pop().unwrap_or_default()
    }

    pub fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut pool = self.pool.lock();
        if pool.len() < self.capacity {
            pool.push(buf);
        }
    }

    pub fn pooled(&self) -> usize {
        self.pool.lock().len()
    }
}
