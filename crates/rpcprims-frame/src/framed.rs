use std::sync::{Mutex, PoisonError};

use rpcprims_codec::{Channel, MessageBuffer, Progress, Result, RpcError};
use rpcprims_transport::{receive_some, send_some, Crc16, Link, Transport};
use tracing::{debug, trace, warn};

use crate::envelope::{FrameHeader, HEADER_SIZE, MAX_MESSAGE_SIZE};

/// Configuration for [`FramedTransport`].
#[derive(Debug, Clone)]
pub struct FramedConfig {
    /// Largest message accepted in either direction. Default and ceiling: 65535.
    pub max_message_size: usize,
}

impl Default for FramedConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

#[derive(Debug, Default)]
struct ReceiveState {
    raw: [u8; HEADER_SIZE],
    header_filled: usize,
    /// Agreed size and CRC once the header is accepted.
    expected: Option<(usize, u16)>,
    payload_filled: usize,
    channel: Option<Channel>,
}

impl ReceiveState {
    fn in_progress(&self) -> bool {
        self.header_filled > 0 || self.expected.is_some()
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Default)]
struct SendState {
    header: Option<[u8; HEADER_SIZE]>,
    header_sent: usize,
    payload_sent: usize,
}

impl SendState {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Transport framing each message in a redundant-length, CRC-checked envelope.
///
/// Both directions resume exactly where a `Pending` left them. A frame with a
/// bad header or CRC is dropped and the receiver goes back to waiting for a
/// header.
pub struct FramedTransport<L> {
    link: L,
    crc: Crc16,
    config: FramedConfig,
    rx: Mutex<ReceiveState>,
    tx: Mutex<SendState>,
}

impl<L: Link> FramedTransport<L> {
    pub fn new(link: L) -> Self {
        Self::with_config(link, FramedConfig::default())
    }

    pub fn with_config(link: L, config: FramedConfig) -> Self {
        Self {
            link,
            crc: Crc16::default(),
            config: FramedConfig {
                max_message_size: config.max_message_size.min(MAX_MESSAGE_SIZE),
            },
            rx: Mutex::new(ReceiveState::default()),
            tx: Mutex::new(SendState::default()),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn crc16(&self) -> Crc16 {
        self.crc
    }

    /// Accept or reject a complete header.
    fn accept_header(&self, raw: &[u8; HEADER_SIZE], capacity: usize) -> Result<(usize, u16)> {
        let header = FrameHeader::decode(raw);
        let Some(size) = header.message_size() else {
            warn!(sizes = ?header.sizes, "dropping frame: size copies disagree");
            return Err(RpcError::ReceiveFailed);
        };
        let size = usize::from(size);
        let limit = capacity.min(self.config.max_message_size);
        if size == 0 || size > limit {
            warn!(size, limit, "dropping frame: size out of bounds");
            return Err(RpcError::ReceiveFailed);
        }
        if header.sizes.iter().any(|&copy| usize::from(copy) != size) {
            debug!(sizes = ?header.sizes, size, "frame size repaired by majority");
        }
        Ok((size, header.crc))
    }
}

impl<L: Link> Transport for FramedTransport<L> {
    fn send(&self, channel: Channel, message: &MessageBuffer) -> Result<Progress> {
        let mut guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        let payload = message.as_slice();

        let header = match state.header {
            Some(header) => header,
            None => {
                if payload.len() > self.config.max_message_size {
                    warn!(
                        size = payload.len(),
                        max = self.config.max_message_size,
                        "message too large to frame"
                    );
                    return Err(RpcError::SendFailed);
                }
                let size = payload.len() as u16;
                let header = FrameHeader::new(size, self.crc.compute(payload)).encode();
                state.header = Some(header);
                header
            }
        };

        if state.header_sent < HEADER_SIZE {
            match send_some(&self.link, channel, &header[state.header_sent..]) {
                Ok(n) => state.header_sent += n,
                Err(err) => {
                    state.reset();
                    return Err(err);
                }
            }
            if state.header_sent < HEADER_SIZE {
                trace!(sent = state.header_sent, "frame header pending");
                return Ok(Progress::Pending);
            }
        }

        match send_some(&self.link, channel, &payload[state.payload_sent..]) {
            Ok(n) => state.payload_sent += n,
            Err(err) => {
                state.reset();
                return Err(err);
            }
        }
        if state.payload_sent < payload.len() {
            trace!(sent = state.payload_sent, total = payload.len(), "frame payload pending");
            return Ok(Progress::Pending);
        }

        state.reset();
        debug!(%channel, size = payload.len(), "frame sent");
        Ok(Progress::Done)
    }

    fn receive(
        &self,
        channel: Channel,
        message: &mut MessageBuffer,
        skip_crc: bool,
    ) -> Result<Progress> {
        let mut guard = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        state.channel = Some(channel);

        let (size, expected_crc) = match state.expected {
            Some(expected) => expected,
            None => {
                let filled = state.header_filled;
                match receive_some(&self.link, channel, &mut state.raw[filled..]) {
                    Ok(n) => state.header_filled += n,
                    Err(err) => {
                        state.reset();
                        return Err(err);
                    }
                }
                if state.header_filled < HEADER_SIZE {
                    if state.header_filled == 0 {
                        state.channel = None;
                    }
                    return Ok(Progress::Pending);
                }
                match self.accept_header(&state.raw, message.capacity()) {
                    Ok(expected) => {
                        state.expected = Some(expected);
                        state.header_filled = 0;
                        state.payload_filled = 0;
                        expected
                    }
                    Err(err) => {
                        state.reset();
                        return Err(err);
                    }
                }
            }
        };

        if size > message.capacity() {
            warn!(size, capacity = message.capacity(), "receive buffer shrank mid-frame");
            state.reset();
            return Err(RpcError::ReceiveFailed);
        }

        let storage = &mut message.storage_mut()[..size];
        match receive_some(&self.link, channel, &mut storage[state.payload_filled..]) {
            Ok(n) => state.payload_filled += n,
            Err(err) => {
                state.reset();
                return Err(err);
            }
        }
        if state.payload_filled < size {
            trace!(received = state.payload_filled, size, "frame payload pending");
            return Ok(Progress::Pending);
        }

        state.reset();
        if !skip_crc {
            let computed = self.crc.compute(&storage[..size]);
            if computed != expected_crc {
                warn!(
                    expected = expected_crc,
                    computed, size, "dropping frame: crc mismatch"
                );
                return Err(RpcError::CrcCheckFailed);
            }
        }
        message.set_used(size)?;
        debug!(%channel, size, "frame received");
        Ok(Progress::Done)
    }

    fn set_crc16(&mut self, crc: Crc16) {
        self.crc = crc;
    }

    fn flush(&self) -> Result<()> {
        self.link.flush().map_err(|e| {
            warn!(error = %e, "link flush failed");
            RpcError::SendFailed
        })
    }

    fn has_message(&self) -> Option<Channel> {
        let state = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        if state.in_progress() {
            return state.channel.or(Some(Channel::ZERO));
        }
        drop(state);
        self.link.ready_channel()
    }
}
