// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pooled, fixed-capacity byte blocks.
//!
//! Producers lease a [`DataBlock`] from their stream, fill it and hand it to
//! [`Stream::append`](crate::stream::Stream::append). Ownership moves with the
//! block: whoever holds it last releases it, either explicitly through
//! [`DataBlock::release`] or by dropping it, and its buffer goes back to the
//! pool's free list. Because a block always has exactly one owner, a block is
//! returned to its pool exactly once.
//!
//! Pools are keyed by block size in a [`DataPoolRegistry`], so streams that
//! share a chunk size share their free list.

use crate::constants::MAX_FREE_BLOCKS;
use hashbrown::HashMap;
use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Free list of equally sized buffers.
#[derive(Debug)]
pub struct DataPool {
    size: usize,
    free: Mutex<Vec<Box<[u8]>>>,
    allocated: AtomicUsize,
    recycled: AtomicUsize,
}

impl DataPool {
    #[must_use]
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            free: Mutex::new(Vec::new()),
            allocated: AtomicUsize::new(0),
            recycled: AtomicUsize::new(0),
        })
    }

    /// Capacity of the blocks handed out by this pool.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.size
    }

    /// Returns an empty block, reusing a released buffer when one is available.
    #[must_use]
    pub fn lease(self: &Arc<Self>) -> DataBlock {
        let recycled = {
            #[allow(clippy::expect_used)]
            let mut free = self.free.lock().expect("lock poisoned");
            free.pop()
        };

        let buf = match recycled {
            Some(buf) => {
                self.recycled.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                vec![0u8; self.size].into_boxed_slice()
            }
        };

        DataBlock {
            buf,
            len: 0,
            pool: Arc::clone(self),
        }
    }

    fn put_back(&self, buf: Box<[u8]>) {
        if buf.len() != self.size {
            return;
        }
        #[allow(clippy::expect_used)]
        let mut free = self.free.lock().expect("lock poisoned");
        if free.len() < MAX_FREE_BLOCKS {
            free.push(buf);
        }
    }

    /// Number of buffers allocated since the pool was created.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of leases served from the free list.
    #[must_use]
    pub fn recycled(&self) -> usize {
        self.recycled.load(Ordering::Relaxed)
    }

    /// Number of buffers currently waiting in the free list.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn free_blocks(&self) -> usize {
        self.free.lock().expect("lock poisoned").len()
    }
}

/// A leased buffer with a fixed capacity and a used length.
pub struct DataBlock {
    buf: Box<[u8]>,
    len: usize,
    pool: Arc<DataPool>,
}

impl DataBlock {
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The used portion of the block.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The whole backing buffer, for producers that fill it in place and then
    /// call [`DataBlock::set_len`].
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Sets the used length, clamped to the capacity.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.buf.len());
    }

    /// Copies as much of `data` as fits after the used portion and returns the
    /// number of bytes copied.
    pub fn fill(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.buf.len() - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
        self.len += n;
        n
    }

    /// Reads once from `reader` into the unused part of the block.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let n = reader.read(&mut self.buf[self.len..])?;
        self.len += n;
        Ok(n)
    }

    /// Returns the block to its pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for DataBlock {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.put_back(buf);
    }
}

impl std::fmt::Debug for DataBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBlock")
            .field("len", &self.len)
            .field("capacity", &self.buf.len())
            .finish()
    }
}

/// Pools keyed by block size.
///
/// Owned by the bundler and handed to each stream it creates.
#[derive(Debug, Default)]
pub struct DataPoolRegistry {
    pools: Mutex<HashMap<usize, Arc<DataPool>>>,
}

impl DataPoolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pool for `size`, creating it on first use.
    #[must_use]
    pub fn pool(&self, size: usize) -> Arc<DataPool> {
        #[allow(clippy::expect_used)]
        let mut pools = self.pools.lock().expect("lock poisoned");
        Arc::clone(pools.entry(size).or_insert_with(|| DataPool::new(size)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_has_pool_capacity() {
        let pool = DataPool::new(64);
        let block = pool.lease();

        assert_eq!(block.capacity(), 64);
        assert!(block.is_empty());
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_release_recycles_buffer() {
        let pool = DataPool::new(64);

        let block = pool.lease();
        block.release();
        assert_eq!(pool.free_blocks(), 1);

        let _block = pool.lease();
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.recycled(), 1);
        assert_eq!(pool.free_blocks(), 0);
    }

    #[test]
    fn test_recycled_block_starts_empty() {
        let pool = DataPool::new(8);
        let mut block = pool.lease();
        block.fill(b"abc");
        drop(block);

        let block = pool.lease();
        assert_eq!(block.len(), 0);
        assert_eq!(block.bytes(), b"");
    }

    #[test]
    fn test_fill_stops_at_capacity() {
        let pool = DataPool::new(4);
        let mut block = pool.lease();

        assert_eq!(block.fill(b"abc"), 3);
        assert_eq!(block.fill(b"def"), 1);
        assert_eq!(block.bytes(), b"abcd");
    }

    #[test]
    fn test_read_from_and_set_len() {
        let pool = DataPool::new(16);
        let mut block = pool.lease();
        let mut reader: &[u8] = b"hello world";

        assert_eq!(block.read_from(&mut reader).unwrap(), 11);
        assert_eq!(block.bytes(), b"hello world");

        block.set_len(100);
        assert_eq!(block.len(), 16);
        block.set_len(5);
        assert_eq!(block.bytes(), b"hello");
    }

    #[test]
    fn test_free_list_is_bounded() {
        let pool = DataPool::new(1);
        let blocks: Vec<_> = (0..MAX_FREE_BLOCKS + 10).map(|_| pool.lease()).collect();
        drop(blocks);

        assert_eq!(pool.free_blocks(), MAX_FREE_BLOCKS);
    }

    #[test]
    fn test_registry_shares_pools_by_size() {
        let registry = DataPoolRegistry::new();

        let a = registry.pool(4096);
        let b = registry.pool(4096);
        let c = registry.pool(1024);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.block_size(), 1024);
    }

    #[test]
    fn test_concurrent_lease_release() {
        let pool = DataPool::new(32);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let mut block = pool.lease();
                        block.fill(b"x");
                        block.release();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.allocated() + pool.recycled(), 4000);
        assert!(pool.allocated() <= 4);
    }
}
