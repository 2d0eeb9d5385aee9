use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::codec::Codec;
use crate::config::PoolConfig;
use crate::error::{Result, RpcError};

/// Source of codecs.
///
/// Every successful [`create`](Self::create) must be matched by exactly one
/// [`dispose`](Self::dispose). Unbind the codec's buffer before disposing it.
pub trait CodecFactory: Send + Sync {
    /// Lease a codec, or fail with [`RpcError::MemoryError`].
    fn create(&self) -> Result<Codec>;

    /// Return a leased codec.
    fn dispose(&self, codec: Codec);
}

struct CodecSlots {
    leased: Vec<bool>,
    free: Vec<usize>,
}

/// Fixed number of codec slots.
pub struct CodecPool {
    slots: Mutex<CodecSlots>,
}

impl CodecPool {
    pub fn new(count: usize) -> Self {
        Self {
            slots: Mutex::new(CodecSlots {
                leased: vec![false; count],
                free: (0..count).rev().collect(),
            }),
        }
    }

    pub fn with_config(config: &PoolConfig) -> Self {
        Self::new(config.codec_slots)
    }

    /// Number of codecs that can currently be leased.
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
            .leased
            .len()
    }
}

impl CodecFactory for CodecPool {
    fn create(&self) -> Result<Codec> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slots.free.pop() else {
            debug!(capacity = slots.leased.len(), "codec pool exhausted");
            return Err(RpcError::MemoryError);
        };
        slots.leased[slot] = true;
        Ok(Codec::pooled(slot))
    }

    fn dispose(&self, codec: Codec) {
        if codec.buffer().is_some() {
            warn!("codec disposed with a buffer still bound");
        }
        let Some(slot) = codec.slot() else {
            warn!("disposing a codec that was not leased from this pool");
            return;
        };
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.leased.get_mut(slot) {
            Some(leased) if *leased => {
                *leased = false;
                slots.free.push(slot);
            }
            _ => warn!(slot, "rejected codec returned to the wrong pool or twice"),
        }
    }
}
