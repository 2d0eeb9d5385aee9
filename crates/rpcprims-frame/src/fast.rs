use std::sync::{Mutex, PoisonError};

use rpcprims_codec::{Channel, Codec, MessageBuffer, Progress, Result, RpcError};
use rpcprims_transport::{receive_some, send_some, Crc16, Link, Transport};
use tracing::{debug, trace};

/// Size of every fast frame: the fast header byte plus the inline payload.
pub const FAST_FRAME_SIZE: usize = 7;

#[derive(Debug, Default)]
struct FrameProgress {
    frame: [u8; FAST_FRAME_SIZE],
    done: usize,
    started: bool,
    channel: Option<Channel>,
}

impl FrameProgress {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Transport moving every message as one fixed 7-byte frame.
///
/// The first byte is the codec's fast header; six payload bytes follow.
/// Longer messages are cut to fit and shorter ones are zero padded. There is
/// no integrity check.
pub struct FastTransport<L> {
    link: L,
    rx: Mutex<FrameProgress>,
    tx: Mutex<FrameProgress>,
}

impl<L: Link> FastTransport<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            rx: Mutex::new(FrameProgress::default()),
            tx: Mutex::new(FrameProgress::default()),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }
}

impl<L: Link> Transport for FastTransport<L> {
    fn send(&self, channel: Channel, message: &MessageBuffer) -> Result<Progress> {
        let mut guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        if !state.started {
            let bytes = message.as_slice();
            let n = bytes.len().min(FAST_FRAME_SIZE);
            if bytes.len() > FAST_FRAME_SIZE {
                debug!(size = bytes.len(), "truncating message to fast frame");
            }
            state.frame = [0; FAST_FRAME_SIZE];
            state.frame[..n].copy_from_slice(&bytes[..n]);
            state.started = true;
        }

        match send_some(&self.link, channel, &state.frame[state.done..]) {
            Ok(n) => state.done += n,
            Err(err) => {
                state.reset();
                return Err(err);
            }
        }
        if state.done < FAST_FRAME_SIZE {
            trace!(sent = state.done, "fast frame pending");
            return Ok(Progress::Pending);
        }
        state.reset();
        Ok(Progress::Done)
    }

    fn receive(
        &self,
        channel: Channel,
        message: &mut MessageBuffer,
        _skip_crc: bool,
    ) -> Result<Progress> {
        if message.capacity() < FAST_FRAME_SIZE {
            return Err(RpcError::ReceiveFailed);
        }
        let mut guard = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        state.channel = Some(channel);

        let done = state.done;
        match receive_some(&self.link, channel, &mut state.frame[done..]) {
            Ok(n) => state.done += n,
            Err(err) => {
                state.reset();
                return Err(err);
            }
        }
        if state.done < FAST_FRAME_SIZE {
            if state.done == 0 {
                state.channel = None;
            }
            return Ok(Progress::Pending);
        }
        let frame = state.frame;
        state.reset();
        message.fill_from(&frame)?;
        debug!(%channel, header = frame[0], "fast frame received");
        Ok(Progress::Done)
    }

    fn set_crc16(&mut self, _crc: Crc16) {}

    fn flush(&self) -> Result<()> {
        self.link.flush().map_err(|_| RpcError::SendFailed)
    }

    fn has_message(&self) -> Option<Channel> {
        let state = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        if state.done > 0 {
            return state.channel.or(Some(Channel::ZERO));
        }
        drop(state);
        self.link.ready_channel()
    }

    fn on_codec_created(&self, codec: &mut Codec) {
        codec.set_fast(true);
    }
}

#[cfg(test)]
mod tests {
    use rpcprims_codec::{Hash, MessageHeader, MessageType};
    use rpcprims_transport::{LoopbackConfig, LoopbackLink};

    use super::*;

    const CH: Channel = Channel::ZERO;

    fn pair() -> (FastTransport<LoopbackLink>, FastTransport<LoopbackLink>) {
        let (a, b) = LoopbackLink::pair();
        (FastTransport::new(a), FastTransport::new(b))
    }

    fn message(bytes: &[u8]) -> MessageBuffer {
        let mut buffer = MessageBuffer::new(16);
        buffer.fill_from(bytes).unwrap();
        buffer
    }

    #[test]
    fn short_message_is_zero_padded() {
        let (a, b) = pair();
        assert_eq!(a.send(CH, &message(&[0x81, 1, 2])), Ok(Progress::Done));

        let mut buffer = MessageBuffer::new(16);
        assert_eq!(b.receive(CH, &mut buffer, false), Ok(Progress::Done));
        assert_eq!(buffer.as_slice(), &[0x81, 1, 2, 0, 0, 0, 0]);
    }

    #[test]
    fn long_message_is_truncated() {
        let (a, b) = pair();
        let bytes: Vec<u8> = (1..=10).collect();
        a.send(CH, &message(&bytes)).unwrap();
        assert_eq!(b.link().pending(), FAST_FRAME_SIZE);

        let mut buffer = MessageBuffer::new(16);
        b.receive(CH, &mut buffer, false).unwrap();
        assert_eq!(buffer.as_slice(), &bytes[..FAST_FRAME_SIZE]);
    }

    #[test]
    fn partial_progress_resumes() {
        let (a, b) = LoopbackLink::pair_with(LoopbackConfig {
            chunk_limit: Some(2),
            stall_every: Some(2),
        });
        let (a, b) = (FastTransport::new(a), FastTransport::new(b));

        let sent = message(&[5, 6, 7, 8, 9, 10, 11]);
        let mut sends = 1;
        while a.send(CH, &sent).unwrap().is_pending() {
            sends += 1;
        }
        assert!(sends > 1);

        let mut buffer = MessageBuffer::new(8);
        while b.receive(CH, &mut buffer, false).unwrap().is_pending() {}
        assert_eq!(buffer.as_slice(), sent.as_slice());
    }

    #[test]
    fn small_receive_buffer_is_rejected() {
        let (_a, b) = pair();
        let mut buffer = MessageBuffer::new(FAST_FRAME_SIZE - 1);
        assert_eq!(
            b.receive(CH, &mut buffer, false),
            Err(RpcError::ReceiveFailed)
        );
    }

    #[test]
    fn codecs_switch_to_fast_headers() {
        let (a, _b) = pair();
        let mut codec = Codec::with_buffer(MessageBuffer::new(16));
        a.on_codec_created(&mut codec);
        assert!(codec.is_fast());

        codec.start_write_message(&MessageHeader::new(MessageType::Invocation, 3, Hash(7), 1));
        codec.write(0x1122u16);
        a.send(CH, codec.buffer().unwrap()).unwrap();
        assert_eq!(a.has_message(), None);
    }
}
