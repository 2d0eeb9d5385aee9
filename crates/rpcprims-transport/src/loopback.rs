use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rpcprims_codec::Channel;
use tracing::trace;

use crate::link::Link;

/// Shaping applied to one end of a loopback pair.
#[derive(Debug, Clone, Default)]
pub struct LoopbackConfig {
    /// Most bytes moved by a single call. `None` means unlimited.
    pub chunk_limit: Option<usize>,
    /// Make every n-th call report no progress.
    pub stall_every: Option<u64>,
}

/// Counters for one end of a loopback pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Calls that made no progress, injected stalls included.
    pub stalls: u64,
}

type Pipe = Arc<Mutex<VecDeque<u8>>>;

/// One end of an in-memory duplex byte pipe.
///
/// Channels are ignored; every byte goes to the other end.
#[derive(Debug)]
pub struct LoopbackLink {
    inbound: Pipe,
    outbound: Pipe,
    config: LoopbackConfig,
    calls: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    stalls: AtomicU64,
}

impl LoopbackLink {
    /// Create a connected pair with no shaping.
    pub fn pair() -> (Self, Self) {
        Self::pair_with(LoopbackConfig::default())
    }

    /// Create a connected pair, both ends shaped by `config`.
    pub fn pair_with(config: LoopbackConfig) -> (Self, Self) {
        let a_to_b = Pipe::default();
        let b_to_a = Pipe::default();
        (
            Self::end(b_to_a.clone(), a_to_b.clone(), config.clone()),
            Self::end(a_to_b, b_to_a, config),
        )
    }

    fn end(inbound: Pipe, outbound: Pipe, config: LoopbackConfig) -> Self {
        Self {
            inbound,
            outbound,
            config,
            calls: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            stalls: AtomicU64::new(0),
        }
    }

    /// Bytes queued towards this end and not yet received.
    pub fn pending(&self) -> usize {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn stats(&self) -> LoopbackStats {
        LoopbackStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
        }
    }

    /// Whether this call is an injected stall.
    fn stalled(&self) -> bool {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let stalled = self
            .config
            .stall_every
            .is_some_and(|every| every > 0 && call % every == 0);
        if stalled {
            self.stalls.fetch_add(1, Ordering::Relaxed);
        }
        stalled
    }

    fn limit(&self, len: usize) -> usize {
        self.config.chunk_limit.map_or(len, |limit| len.min(limit))
    }
}

impl Link for LoopbackLink {
    fn send(&self, _channel: Channel, bytes: &[u8]) -> io::Result<usize> {
        if bytes.is_empty() || self.stalled() {
            return Ok(0);
        }
        let n = self.limit(bytes.len());
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(&bytes[..n]);
        self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
        trace!(n, "loopback sent");
        Ok(n)
    }

    fn receive(&self, _channel: Channel, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.stalled() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let mut inbound = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        let n = self.limit(buf.len().min(inbound.len()));
        if n == 0 {
            self.stalls.fetch_add(1, Ordering::Relaxed);
            return Err(io::ErrorKind::WouldBlock.into());
        }
        for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
            *slot = byte;
        }
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
        trace!(n, "loopback received");
        Ok(n)
    }

    fn ready_channel(&self) -> Option<Channel> {
        (self.pending() > 0).then_some(Channel::ZERO)
    }
}
