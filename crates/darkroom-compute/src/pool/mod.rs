//! Pooled GPU resources.
//!
//! [`ResourcePool`] recycles textures and buffers by exact key with a bound
//! on how many free entries it keeps; [`StagingBufferPool`] is the fixed
//! ring of mappable buffers used for asynchronous readback.

mod staging;

pub use staging::{
    ReadbackTicket, StagingAllocator, StagingBuffer, StagingBufferPool, StagingLease,
    DEFAULT_STAGING_SLOTS,
};

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use tracing::{debug, trace};

use crate::ComputeResult;

/// Default number of free entries a pool keeps.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Key of a pooled texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureKey {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Backend usage bits.
    pub usage: u32,
}

impl TextureKey {
    pub fn new(width: u32, height: u32, usage: u32) -> Self {
        Self { width, height, usage }
    }
}

/// Key of a pooled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferKey {
    /// Size in bytes.
    pub size: u64,
    /// Backend usage bits.
    pub usage: u32,
}

impl BufferKey {
    pub fn new(size: u64, usage: u32) -> Self {
        Self { size, usage }
    }
}

/// Creates and destroys the resources a pool hands out.
pub trait PoolAllocator<K> {
    /// Resource handle. Clones must refer to the same underlying object.
    type Resource: Clone;

    /// Creates a resource for `key`.
    fn allocate(&self, key: &K) -> ComputeResult<Self::Resource>;

    /// Releases the underlying object immediately.
    fn destroy(&self, resource: &Self::Resource);
}

/// A resource checked out of a pool.
#[derive(Debug)]
pub struct Pooled<K, R> {
    id: u64,
    key: K,
    resource: R,
}

impl<K, R> Pooled<K, R> {
    /// Pool-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Key the resource was created for.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The resource.
    pub fn resource(&self) -> &R {
        &self.resource
    }
}

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Acquires served from the free list.
    pub hits: u64,
    /// Acquires that allocated.
    pub misses: u64,
    /// Releases destroyed because the pool was full.
    pub overflow_destroyed: u64,
    /// Entries currently free.
    pub free: usize,
    /// Entries currently checked out.
    pub outstanding: usize,
}

impl PoolStats {
    /// Hit ratio (0.0 - 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Exact-key resource pool with bounded free entries.
///
/// Single-writer: callers serialize access (the accelerator keeps its pools
/// behind one lock).
pub struct ResourcePool<K, A: PoolAllocator<K>> {
    allocator: A,
    max_size: usize,
    free: HashMap<K, Vec<Pooled<K, A::Resource>>>,
    free_count: usize,
    outstanding: HashMap<u64, A::Resource>,
    next_id: u64,
    hits: u64,
    misses: u64,
    overflow_destroyed: u64,
}

/// Pool of textures.
pub type TexturePool<A> = ResourcePool<TextureKey, A>;

/// Pool of uniform, storage and readback buffers.
pub type BufferPool<A> = ResourcePool<BufferKey, A>;

impl<K, A> ResourcePool<K, A>
where
    K: Clone + Eq + Hash + Debug,
    A: PoolAllocator<K>,
{
    /// Create pool with the default size.
    pub fn new(allocator: A) -> Self {
        Self::with_max_size(allocator, DEFAULT_POOL_SIZE)
    }

    /// Create pool keeping at most `max_size` free entries.
    pub fn with_max_size(allocator: A, max_size: usize) -> Self {
        Self {
            allocator,
            max_size,
            free: HashMap::new(),
            free_count: 0,
            outstanding: HashMap::new(),
            next_id: 0,
            hits: 0,
            misses: 0,
            overflow_destroyed: 0,
        }
    }

    /// Checks out a resource for exactly `key`, allocating on a miss.
    pub fn acquire(&mut self, key: K) -> ComputeResult<Pooled<K, A::Resource>> {
        if let Some(pooled) = self.free.get_mut(&key).and_then(Vec::pop) {
            self.free_count -= 1;
            self.hits += 1;
            trace!(?key, id = pooled.id, "pool hit");
            self.outstanding.insert(pooled.id, pooled.resource.clone());
            return Ok(pooled);
        }

        let resource = self.allocator.allocate(&key)?;
        self.misses += 1;
        let id = self.next_id;
        self.next_id += 1;
        debug!(?key, id, "pool miss, allocated");
        self.outstanding.insert(id, resource.clone());
        Ok(Pooled { id, key, resource })
    }

    /// Returns a resource. Destroys it instead when the pool already holds
    /// `max_size` free entries.
    pub fn release(&mut self, pooled: Pooled<K, A::Resource>) {
        if self.outstanding.remove(&pooled.id).is_none() {
            // Cleared while checked out; already destroyed.
            trace!(id = pooled.id, "release of cleared resource ignored");
            return;
        }
        if self.free_count >= self.max_size {
            debug!(key = ?pooled.key, id = pooled.id, "pool full, destroying");
            self.allocator.destroy(&pooled.resource);
            self.overflow_destroyed += 1;
            return;
        }
        self.free_count += 1;
        self.free.entry(pooled.key.clone()).or_default().push(pooled);
    }

    /// Destroys every free and every checked-out resource.
    pub fn clear(&mut self) {
        let mut destroyed = 0usize;
        for (_, entries) in self.free.drain() {
            for pooled in entries {
                self.allocator.destroy(&pooled.resource);
                destroyed += 1;
            }
        }
        for (_, resource) in self.outstanding.drain() {
            self.allocator.destroy(&resource);
            destroyed += 1;
        }
        self.free_count = 0;
        if destroyed > 0 {
            debug!(destroyed, "pool cleared");
        }
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Maximum free entries kept.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Entries currently free.
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    /// Entries currently checked out.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits,
            misses: self.misses,
            overflow_destroyed: self.overflow_destroyed,
            free: self.free_count,
            outstanding: self.outstanding.len(),
        }
    }

    /// The allocator.
    pub fn allocator(&self) -> &A {
        &self.allocator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Counting {
        allocated: RefCell<u32>,
        destroyed: RefCell<Vec<u32>>,
    }

    #[derive(Clone, Default)]
    struct CountingAllocator(Rc<Counting>);

    impl PoolAllocator<BufferKey> for CountingAllocator {
        type Resource = u32;

        fn allocate(&self, _key: &BufferKey) -> ComputeResult<u32> {
            let mut n = self.0.allocated.borrow_mut();
            *n += 1;
            Ok(*n)
        }

        fn destroy(&self, resource: &u32) {
            self.0.destroyed.borrow_mut().push(*resource);
        }
    }

    #[test]
    fn test_exact_key_reuse() {
        let alloc = CountingAllocator::default();
        let mut pool = ResourcePool::new(alloc.clone());

        let a = pool.acquire(BufferKey::new(64, 1)).unwrap();
        let first = *a.resource();
        pool.release(a);

        let b = pool.acquire(BufferKey::new(64, 1)).unwrap();
        assert_eq!(*b.resource(), first);

        // Same size, different usage: no reuse.
        let c = pool.acquire(BufferKey::new(64, 2)).unwrap();
        assert_ne!(*c.resource(), first);

        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.outstanding, 2);
    }

    #[test]
    fn test_overflow_destroys_on_release() {
        let alloc = CountingAllocator::default();
        let mut pool = ResourcePool::with_max_size(alloc.clone(), 2);

        let held: Vec<_> = (0..3u64)
            .map(|i| pool.acquire(BufferKey::new(16 * (i + 1), 0)).unwrap())
            .collect();
        for p in held {
            pool.release(p);
        }

        // Two kept across different keys, the third destroyed.
        assert_eq!(pool.free_count(), 2);
        assert_eq!(*alloc.0.destroyed.borrow(), vec![3]);
        assert_eq!(pool.stats().overflow_destroyed, 1);
    }

    #[test]
    fn test_clear_destroys_free_and_outstanding() {
        let alloc = CountingAllocator::default();
        let mut pool = ResourcePool::new(alloc.clone());

        let a = pool.acquire(BufferKey::new(8, 0)).unwrap();
        let b = pool.acquire(BufferKey::new(8, 0)).unwrap();
        pool.release(a);
        pool.clear();

        let mut destroyed = alloc.0.destroyed.borrow().clone();
        destroyed.sort();
        assert_eq!(destroyed, vec![1, 2]);
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.outstanding_count(), 0);

        // Releasing a handle invalidated by clear is a no-op.
        pool.release(b);
        assert_eq!(pool.free_count(), 0);
        assert_eq!(alloc.0.destroyed.borrow().len(), 2);
    }

    #[test]
    fn test_zero_size_pool_never_keeps() {
        let alloc = CountingAllocator::default();
        let mut pool = ResourcePool::with_max_size(alloc.clone(), 0);
        let a = pool.acquire(BufferKey::new(4, 0)).unwrap();
        pool.release(a);
        assert_eq!(pool.free_count(), 0);
        assert_eq!(alloc.0.destroyed.borrow().len(), 1);
    }

    #[test]
    fn test_texture_key_pool() {
        let alloc = CountingAllocator::default();
        struct Tex(CountingAllocator);
        impl PoolAllocator<TextureKey> for Tex {
            type Resource = u32;
            fn allocate(&self, key: &TextureKey) -> ComputeResult<u32> {
                self.0.allocate(&BufferKey::new(key.width as u64 * key.height as u64, key.usage))
            }
            fn destroy(&self, resource: &u32) {
                PoolAllocator::<BufferKey>::destroy(&self.0, resource)
            }
        }
        let mut pool: TexturePool<Tex> = ResourcePool::new(Tex(alloc));
        let a = pool.acquire(TextureKey::new(4, 4, 1)).unwrap();
        pool.release(a);
        assert!(pool.acquire(TextureKey::new(4, 4, 1)).is_ok());
        assert_eq!(pool.stats().hits, 1);
        assert!((pool.stats().hit_ratio() - 0.5).abs() < 1e-9);
    }
}
