//! 编码缓冲区池
//!
//! 编码器从池中借出 `BytesMut`,写完后把结果复制成定长 `Vec<u8>` 返回,
//! 缓冲区在守卫析构时归还。每次调用独占自己的缓冲区,池本身是 `Send + Sync` 的。

use bytes::BytesMut;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;

/// 池中最多保留的缓冲区数量
const DEFAULT_MAX_POOLED: usize = 16;
/// 超过该容量的缓冲区归还时直接释放
const DEFAULT_MAX_RETAINED_CAPACITY: usize = 16 * 1024 * 1024;

pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    max_pooled: usize,
    max_retained_capacity: usize,
}

impl BufferPool {
    pub fn new(max_pooled: usize, max_retained_capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
            max_retained_capacity,
        }
    }

    /// # Brief
    /// 借出一个至少有 `min_capacity` 容量的空缓冲区
    ///
    /// # Returns
    /// 作用域守卫,析构时缓冲区回到池中
    pub fn acquire(&self, min_capacity: usize) -> PooledBuffer<'_> {
        let mut buf = self.buffers.lock().pop().unwrap_or_default();
        buf.clear();
        buf.reserve(min_capacity);
        PooledBuffer { pool: self, buf }
    }

    /// 当前闲置的缓冲区数量
    pub fn idle(&self) -> usize {
        self.buffers.lock().len()
    }

    fn release(&self, mut buf: BytesMut) {
        if buf.capacity() > self.max_retained_capacity {
            tracing::trace!(capacity = buf.capacity(), "dropping oversized encode buffer");
            return;
        }
        buf.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_pooled {
            buffers.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOLED, DEFAULT_MAX_RETAINED_CAPACITY)
    }
}

/// 借出的缓冲区
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: BytesMut,
}

impl Deref for PooledBuffer<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

/// 进程级共享的缓冲区池
pub fn global_pool() -> &'static BufferPool {
    static POOL: OnceLock<BufferPool> = OnceLock::new();
    POOL.get_or_init(BufferPool::default)
}
