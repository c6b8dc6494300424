use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::debug;

use crate::{Error, Result};

/// Fixed-size storage for a single transfer.
///
/// Buffers are allocated once by [BufferManager::new] and move by value between
/// the producer and consumer, so only one side can touch a buffer at a time.
#[derive(Debug)]
pub struct TransferBuffer {
    slot: usize,
    data: Box<[u8]>,
    bytes_used: usize,
}

impl TransferBuffer {
    fn new(slot: usize, capacity: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity).map_err(|err| {
            Error::ResourceExhausted(format!(
                "allocating {capacity} bytes for buffer {slot}: {err}"
            ))
        })?;
        data.resize(capacity, 0);
        Ok(TransferBuffer {
            slot,
            data: data.into_boxed_slice(),
            bytes_used: 0,
        })
    }

    /// Pool-wide identifier of this buffer.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Valid bytes from the last completed transfer.
    #[must_use]
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// Record the number of valid bytes, clamped to the capacity.
    pub fn set_bytes_used(&mut self, n: usize) {
        self.bytes_used = n.min(self.data.len());
    }

    /// The valid bytes.
    #[must_use]
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.bytes_used]
    }

    /// The whole buffer, for the transport to fill.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Two-queue handoff of [TransferBuffer]s between a producer and a consumer.
///
/// The empty and full queues have separate locks, and no call blocks waiting for a
/// buffer; `None` from an acquire means try again later. Every buffer is in exactly one
/// place at a time: a queue, or held by whoever last acquired it.
#[derive(Debug)]
pub struct BufferManager {
    empty: Mutex<VecDeque<TransferBuffer>>,
    full: Mutex<VecDeque<TransferBuffer>>,
    pool_size: usize,
    capacity: usize,
}

// Queue operations are single push/pop calls, so a poisoned queue is still intact.
fn lock(queue: &Mutex<VecDeque<TransferBuffer>>) -> MutexGuard<'_, VecDeque<TransferBuffer>> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BufferManager {
    /// Allocate `pool_size` buffers of `capacity` bytes, all initially empty.
    ///
    /// # Errors
    /// [Error::ResourceExhausted] if the pool is empty or a buffer cannot be
    /// allocated.
    pub fn new(pool_size: usize, capacity: usize) -> Result<Self> {
        if pool_size == 0 {
            return Err(Error::ResourceExhausted("buffer pool size is 0".into()));
        }
        let buffers = (0..pool_size)
            .map(|slot| TransferBuffer::new(slot, capacity))
            .collect::<Result<VecDeque<_>>>()?;
        debug!(pool_size, capacity, "allocated transfer buffers");

        Ok(BufferManager {
            empty: Mutex::new(buffers),
            full: Mutex::new(VecDeque::with_capacity(pool_size)),
            pool_size,
            capacity,
        })
    }

    #[must_use]
    pub fn acquire_empty(&self) -> Option<TransferBuffer> {
        lock(&self.empty).pop_front()
    }

    pub fn submit_full(&self, buf: TransferBuffer) {
        lock(&self.full).push_back(buf);
    }

    /// Oldest full buffer, if any.
    #[must_use]
    pub fn acquire_full(&self) -> Option<TransferBuffer> {
        lock(&self.full).pop_front()
    }

    /// Return a consumed buffer to the empty queue, resetting its byte count.
    pub fn release_empty(&self, mut buf: TransferBuffer) {
        buf.bytes_used = 0;
        lock(&self.empty).push_back(buf);
    }

    #[must_use]
    pub fn empty_count(&self) -> usize {
        lock(&self.empty).len()
    }

    #[must_use]
    pub fn full_count(&self) -> usize {
        lock(&self.full).len()
    }

    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.capacity
    }
}
