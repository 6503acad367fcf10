//! Fixed ring of mappable buffers for asynchronous readback.
//!
//! Each slot is `Available`, `InFlight` (owned by a readback task) or
//! `Retired` (its replacement could not be allocated; re-created lazily on
//! the next acquire). Exhaustion never blocks: [`StagingBufferPool::acquire`]
//! returns `None` and the caller keeps its last known data.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, error, trace, warn};

use crate::{lock, ComputeError, ComputeResult};

/// Slot count of a triple-buffered pool.
pub const DEFAULT_STAGING_SLOTS: usize = 3;

/// A buffer the device copies into and the host maps for reading.
pub trait StagingBuffer: Send + Sync + 'static {
    /// Whether the buffer is currently mapped.
    fn is_mapped(&self) -> bool;

    /// Maps the buffer, waits for the mapping and copies its contents out.
    /// The buffer stays mapped until [`unmap`](Self::unmap).
    fn map_read(&self) -> ComputeResult<Vec<u8>>;

    /// Unmaps the buffer. No-op when not mapped.
    fn unmap(&self);
}

/// Creates staging buffers of one fixed size.
pub trait StagingAllocator: Send + 'static {
    type Buffer: StagingBuffer;

    fn allocate(&self) -> ComputeResult<Self::Buffer>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Available,
    InFlight,
    Retired,
}

struct Slot<B> {
    buffer: Option<Arc<B>>,
    state: SlotState,
}

struct Slots<A: StagingAllocator> {
    allocator: A,
    slots: Vec<Slot<A::Buffer>>,
}

impl<A: StagingAllocator> Slots<A> {
    /// Puts a fresh buffer in `index`, or retires the slot if that fails.
    fn replace(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        match self.allocator.allocate() {
            Ok(buffer) => {
                slot.buffer = Some(Arc::new(buffer));
                slot.state = SlotState::Available;
                debug!(slot = index, "staging slot replaced");
            }
            Err(e) => {
                slot.buffer = None;
                slot.state = SlotState::Retired;
                warn!(slot = index, error = %e, "staging slot retired");
            }
        }
    }
}

/// A slot checked out of the pool.
pub struct StagingLease<B> {
    index: usize,
    buffer: Arc<B>,
}

impl<B> StagingLease<B> {
    /// Slot index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The slot's buffer.
    pub fn buffer(&self) -> &B {
        &self.buffer
    }
}

/// Handle to a detached readback task.
#[derive(Debug)]
pub struct ReadbackTicket {
    handle: JoinHandle<ComputeResult<()>>,
}

impl ReadbackTicket {
    /// Waits for the task. Only a lost device surfaces as an error; other
    /// readback failures were already logged and swallowed by the task.
    pub fn wait(self) -> ComputeResult<()> {
        self.handle
            .join()
            .map_err(|_| ComputeError::InternalError("readback task panicked".into()))?
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Fixed-size staging ring shared with detached readback tasks.
pub struct StagingBufferPool<A: StagingAllocator> {
    inner: Arc<Mutex<Slots<A>>>,
}

impl<A: StagingAllocator> StagingBufferPool<A> {
    /// Pre-allocates `size` slots.
    pub fn new(allocator: A, size: usize) -> ComputeResult<Self> {
        let mut slots = Vec::with_capacity(size);
        for _ in 0..size {
            slots.push(Slot {
                buffer: Some(Arc::new(allocator.allocate()?)),
                state: SlotState::Available,
            });
        }
        Ok(Self { inner: Arc::new(Mutex::new(Slots { allocator, slots })) })
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        lock(&self.inner).slots.len()
    }

    /// Whether the pool has no slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots ready to be acquired.
    pub fn available_count(&self) -> usize {
        lock(&self.inner)
            .slots
            .iter()
            .filter(|s| s.state == SlotState::Available)
            .count()
    }

    /// First available slot whose buffer is unmapped, or `None`.
    pub fn acquire(&self) -> Option<StagingLease<A::Buffer>> {
        let mut inner = lock(&self.inner);
        for index in 0..inner.slots.len() {
            if inner.slots[index].state == SlotState::Retired {
                inner.replace(index);
            }
            let slot = &mut inner.slots[index];
            if slot.state != SlotState::Available {
                continue;
            }
            let Some(buffer) = slot.buffer.as_ref() else { continue };
            if buffer.is_mapped() {
                continue;
            }
            slot.state = SlotState::InFlight;
            trace!(slot = index, "staging slot acquired");
            return Some(StagingLease { index, buffer: Arc::clone(buffer) });
        }
        None
    }

    /// Returns a slot to the ring.
    pub fn release(&self, lease: StagingLease<A::Buffer>) {
        release_slot(&self.inner, &lease);
    }

    /// Copies device data into a free slot and reads it back on a detached
    /// thread.
    ///
    /// `enqueue` records and submits the copy into the slot's buffer. When no
    /// slot is free nothing is enqueued and `Ok(None)` is returned. On success
    /// `on_complete` receives the bytes after the slot has been released.
    pub fn readback_async<E, F>(&self, enqueue: E, on_complete: F) -> ComputeResult<Option<ReadbackTicket>>
    where
        E: FnOnce(&A::Buffer) -> ComputeResult<()>,
        F: FnOnce(Vec<u8>) + Send + 'static,
    {
        let Some(lease) = self.acquire() else {
            debug!("staging pool exhausted, skipping readback");
            return Ok(None);
        };

        if let Err(e) = enqueue(lease.buffer()) {
            self.release(lease);
            return Err(e);
        }

        let inner = Arc::clone(&self.inner);
        let index = lease.index;
        let spawned = std::thread::Builder::new()
            .name("darkroom-readback".into())
            .spawn(move || complete_readback(inner, lease, on_complete));

        match spawned {
            Ok(handle) => Ok(Some(ReadbackTicket { handle })),
            Err(e) => {
                lock(&self.inner).replace(index);
                Err(ComputeError::InternalError(format!("failed to spawn readback task: {e}")))
            }
        }
    }
}

fn release_slot<A: StagingAllocator>(inner: &Mutex<Slots<A>>, lease: &StagingLease<A::Buffer>) {
    let mut inner = lock(inner);
    let Some(slot) = inner.slots.get_mut(lease.index) else { return };
    // A replaced slot holds a different buffer; the stale lease is dropped.
    if slot.buffer.as_ref().is_some_and(|b| Arc::ptr_eq(b, &lease.buffer)) {
        slot.state = SlotState::Available;
        trace!(slot = lease.index, "staging slot released");
    }
}

fn complete_readback<A, F>(
    inner: Arc<Mutex<Slots<A>>>,
    lease: StagingLease<A::Buffer>,
    on_complete: F,
) -> ComputeResult<()>
where
    A: StagingAllocator,
    F: FnOnce(Vec<u8>),
{
    match lease.buffer.map_read() {
        Ok(bytes) => {
            lease.buffer.unmap();
            release_slot(&inner, &lease);
            on_complete(bytes);
            Ok(())
        }
        Err(err) => {
            lease.buffer.unmap();
            lock(&inner).replace(lease.index);
            match err {
                ComputeError::DeviceLost(_) => {
                    error!(slot = lease.index, error = %err, "readback failed: device lost");
                    Err(err)
                }
                other => {
                    warn!(slot = lease.index, error = %other, "readback failed, slot replaced");
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryStagingAllocator, StagingFailure};
    use std::sync::mpsc;

    #[test]
    fn test_exhaustion_returns_none() {
        let pool = StagingBufferPool::new(MemoryStagingAllocator::new(16), 3).unwrap();
        let leases: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.available_count(), 0);

        for lease in leases {
            pool.release(lease);
        }
        assert_eq!(pool.available_count(), 3);
    }

    #[test]
    fn test_any_release_frees_a_slot() {
        let pool = StagingBufferPool::new(MemoryStagingAllocator::new(16), 3).unwrap();
        let mut leases: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();

        for i in 0..3 {
            assert!(pool.acquire().is_none());
            pool.release(leases.remove(i));
            let lease = pool.acquire().expect("slot freed by release");
            assert!(pool.acquire().is_none());
            leases.insert(i, lease);
        }
    }

    #[test]
    fn test_readback_delivers_and_releases() {
        let pool = StagingBufferPool::new(MemoryStagingAllocator::new(4), 3).unwrap();
        let (tx, rx) = mpsc::channel();

        let ticket = pool
            .readback_async(
                |buf| {
                    buf.write(&[1, 2, 3, 4]);
                    Ok(())
                },
                move |bytes| tx.send(bytes).unwrap(),
            )
            .unwrap()
            .expect("slot available");

        ticket.wait().unwrap();
        assert_eq!(rx.recv().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(pool.available_count(), 3);
    }

    #[test]
    fn test_exhausted_readback_skips_enqueue() {
        let pool = StagingBufferPool::new(MemoryStagingAllocator::new(4), 1).unwrap();
        let held = pool.acquire().unwrap();

        let mut enqueued = false;
        let ticket = pool.readback_async(|_| { enqueued = true; Ok(()) }, |_| {}).unwrap();
        assert!(ticket.is_none());
        assert!(!enqueued);
        pool.release(held);
    }

    #[test]
    fn test_mapped_buffer_is_skipped() {
        let alloc = MemoryStagingAllocator::new(4);
        let pool = StagingBufferPool::new(alloc, 2).unwrap();
        let first = pool.acquire().unwrap();
        first.buffer().force_mapped(true);
        pool.release(first);

        // Slot 0 is available but still mapped.
        let lease = pool.acquire().unwrap();
        assert_eq!(lease.index(), 1);
    }

    #[test]
    fn test_device_lost_surfaces_and_slot_is_replaced() {
        let alloc = MemoryStagingAllocator::new(4);
        alloc.fail_next_map(StagingFailure::DeviceLost);
        let pool = StagingBufferPool::new(alloc.clone(), 3).unwrap();

        let ticket = pool
            .readback_async(|_| Ok(()), |_| panic!("must not complete"))
            .unwrap()
            .unwrap();
        assert!(matches!(ticket.wait(), Err(ComputeError::DeviceLost(_))));

        // Capacity preserved by a fresh buffer.
        assert_eq!(pool.available_count(), 3);
        assert_eq!(alloc.allocations(), 4);
        assert!(alloc.unmap_calls() >= 1);
    }

    #[test]
    fn test_other_failure_is_swallowed() {
        let alloc = MemoryStagingAllocator::new(4);
        alloc.fail_next_map(StagingFailure::Other);
        let pool = StagingBufferPool::new(alloc.clone(), 3).unwrap();

        let ticket = pool.readback_async(|_| Ok(()), |_| {}).unwrap().unwrap();
        assert!(ticket.wait().is_ok());
        assert_eq!(pool.available_count(), 3);
    }

    #[test]
    fn test_failed_replacement_retires_then_recovers() {
        let alloc = MemoryStagingAllocator::new(4);
        alloc.fail_next_map(StagingFailure::Other);
        let pool = StagingBufferPool::new(alloc.clone(), 1).unwrap();
        alloc.fail_allocations(1);

        let ticket = pool.readback_async(|_| Ok(()), |_| {}).unwrap().unwrap();
        ticket.wait().unwrap();
        assert_eq!(pool.available_count(), 0);

        // Next acquire re-allocates the retired slot.
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn test_enqueue_error_releases_slot() {
        let pool = StagingBufferPool::new(MemoryStagingAllocator::new(4), 1).unwrap();
        let res = pool.readback_async(
            |_| Err(ComputeError::ValidationError("bad copy".into())),
            |_| {},
        );
        assert!(res.is_err());
        assert_eq!(pool.available_count(), 1);
    }
}
