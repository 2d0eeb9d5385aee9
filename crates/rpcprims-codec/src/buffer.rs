use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::error::{Result, RpcError};

/// Fixed-capacity message storage with a used length.
///
/// Reads stop at [`used`](Self::used); writes stop at [`capacity`](Self::capacity).
/// Buffers leased from a [`BufferPool`] remember their slot so the pool can
/// take them back.
pub struct MessageBuffer {
    data: Box<[u8]>,
    used: usize,
    slot: Option<usize>,
}

impl MessageBuffer {
    /// Create a standalone buffer that belongs to no pool.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            used: 0,
            slot: None,
        }
    }

    fn pooled(data: Box<[u8]>, slot: usize) -> Self {
        Self {
            data,
            used: 0,
            slot: Some(slot),
        }
    }

    /// Total bytes this buffer can hold.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently holding message data.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Mark the first `used` bytes as message data.
    pub fn set_used(&mut self, used: usize) -> Result<()> {
        if used > self.data.len() {
            return Err(RpcError::BufferOverrun);
        }
        self.used = used;
        Ok(())
    }

    pub(crate) fn extend_used(&mut self, end: usize) {
        if end > self.used && end <= self.data.len() {
            self.used = end;
        }
    }

    /// Forget the current contents.
    pub fn clear(&mut self) {
        self.used = 0;
    }

    /// The message bytes (`..used`).
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// The whole backing storage, for transports filling the buffer.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Replace the contents with `bytes`.
    pub fn fill_from(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.data.len() {
            return Err(RpcError::BufferOverrun);
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.used = bytes.len();
        Ok(())
    }

    /// Exchange storage, used length and slot ownership with `other`.
    pub fn swap(&mut self, other: &mut MessageBuffer) {
        std::mem::swap(self, other);
    }

    /// Pool slot this buffer was leased from, if any.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }
}

impl std::fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("capacity", &self.data.len())
            .field("used", &self.used)
            .field("slot", &self.slot)
            .finish()
    }
}

/// Source of message buffers.
///
/// Every successful [`create`](Self::create) must be matched by exactly one
/// [`dispose`](Self::dispose).
pub trait MessageBufferFactory: Send + Sync {
    /// Lease a buffer, or fail with [`RpcError::MemoryError`].
    fn create(&self) -> Result<MessageBuffer>;

    /// Return a leased buffer.
    fn dispose(&self, buffer: MessageBuffer);

    /// Whether a server must lease a fresh buffer for every receive.
    fn create_server_buffer(&self) -> bool {
        true
    }
}

struct PoolSlots {
    storage: Vec<Option<Box<[u8]>>>,
    free: Vec<usize>,
}

/// Fixed-capacity arena of equally sized buffers.
///
/// Exhaustion yields [`RpcError::MemoryError`]; the pool never grows.
pub struct BufferPool {
    slots: Mutex<PoolSlots>,
    buffer_size: usize,
}

impl BufferPool {
    /// Create a pool with `count` buffers of `buffer_size` bytes each.
    pub fn new(count: usize, buffer_size: usize) -> Self {
        let storage = (0..count)
            .map(|_| Some(vec![0u8; buffer_size].into_boxed_slice()))
            .collect();
        // Pop order hands out slot 0 first.
        let free = (0..count).rev().collect();
        Self {
            slots: Mutex::new(PoolSlots { storage, free }),
            buffer_size,
        }
    }

    /// Create a pool sized by `config`.
    pub fn with_config(config: &PoolConfig) -> Self {
        Self::new(config.buffer_slots, config.buffer_size)
    }

    /// Size of every buffer in the pool.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of slots that can currently be leased.
    pub fn available(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .free
            .len()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .storage
            .len()
    }
}

impl MessageBufferFactory for BufferPool {
    fn create(&self) -> Result<MessageBuffer> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slots.free.pop() else {
            debug!(capacity = slots.storage.len(), "buffer pool exhausted");
            return Err(RpcError::MemoryError);
        };
        match slots.storage[slot].take() {
            Some(data) => Ok(MessageBuffer::pooled(data, slot)),
            None => Err(RpcError::MemoryError),
        }
    }

    fn dispose(&self, buffer: MessageBuffer) {
        let Some(slot) = buffer.slot else {
            warn!("disposing a buffer that was not leased from this pool");
            return;
        };
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let returned = match slots.storage.get_mut(slot) {
            Some(entry) if entry.is_none() && buffer.data.len() == self.buffer_size => {
                *entry = Some(buffer.data);
                true
            }
            _ => false,
        };
        if returned {
            slots.free.push(slot);
        } else {
            warn!(slot, "rejected buffer returned to the wrong pool or twice");
        }
    }
}
