//! Partial-I/O equivalence: however the link slices and stalls the byte
//! stream, a framed message arrives intact.

use proptest::prelude::*;
use rpcprims_codec::{Channel, MessageBuffer, RpcError};
use rpcprims_frame::{FastTransport, FramedTransport, FAST_FRAME_SIZE};
use rpcprims_transport::{LoopbackConfig, LoopbackLink, Transport};

const CH: Channel = Channel::ZERO;

/// Drive `send` and `receive` alternately until both finish.
fn transfer<T: Transport>(a: &T, b: &T, sent: &MessageBuffer, capacity: usize) -> MessageBuffer {
    let mut received = MessageBuffer::new(capacity);
    let mut send_done = false;
    let mut receive_done = false;
    for _ in 0..100_000 {
        if !send_done {
            send_done = a.send(CH, sent).unwrap().is_done();
        }
        if !receive_done {
            receive_done = b.receive(CH, &mut received, false).unwrap().is_done();
        }
        if send_done && receive_done {
            return received;
        }
    }
    panic!("transfer did not finish");
}

fn link_config() -> impl Strategy<Value = LoopbackConfig> {
    (
        prop::option::of(1usize..=16),
        prop::option::of(2u64..=5),
    )
        .prop_map(|(chunk_limit, stall_every)| LoopbackConfig {
            chunk_limit,
            stall_every,
        })
}

proptest! {
    #[test]
    fn framed_payload_survives_any_slicing(
        payload in prop::collection::vec(any::<u8>(), 1..=200),
        config in link_config(),
    ) {
        let (a, b) = LoopbackLink::pair_with(config);
        let (a, b) = (FramedTransport::new(a), FramedTransport::new(b));
        let mut sent = MessageBuffer::new(256);
        sent.fill_from(&payload).unwrap();

        let received = transfer(&a, &b, &sent, 256);
        prop_assert_eq!(received.as_slice(), payload.as_slice());
    }

    #[test]
    fn back_to_back_frames_keep_their_boundaries(
        first in prop::collection::vec(any::<u8>(), 1..=64),
        second in prop::collection::vec(any::<u8>(), 1..=64),
        config in link_config(),
    ) {
        let (a, b) = LoopbackLink::pair_with(config);
        let (a, b) = (FramedTransport::new(a), FramedTransport::new(b));
        for payload in [&first, &second] {
            let mut sent = MessageBuffer::new(64);
            sent.fill_from(payload).unwrap();
            let received = transfer(&a, &b, &sent, 64);
            prop_assert_eq!(received.as_slice(), payload.as_slice());
        }
    }

    #[test]
    fn fast_frame_is_the_padded_prefix(
        payload in prop::collection::vec(any::<u8>(), 0..=16),
        config in link_config(),
    ) {
        let (a, b) = LoopbackLink::pair_with(config);
        let (a, b) = (FastTransport::new(a), FastTransport::new(b));
        let mut sent = MessageBuffer::new(16);
        sent.fill_from(&payload).unwrap();

        let received = transfer(&a, &b, &sent, 16);
        let mut expected = [0u8; FAST_FRAME_SIZE];
        let n = payload.len().min(FAST_FRAME_SIZE);
        expected[..n].copy_from_slice(&payload[..n]);
        prop_assert_eq!(received.as_slice(), &expected[..]);
    }

    #[test]
    fn any_single_payload_bit_flip_is_caught(
        payload in prop::collection::vec(any::<u8>(), 1..=64),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut wire = bytes::BytesMut::new();
        rpcprims_frame::encode_frame(&payload, &rpcprims_transport::Crc16::default(), &mut wire)
            .unwrap();
        let at = rpcprims_frame::HEADER_SIZE + index.index(payload.len());
        wire[at] ^= 1 << bit;

        let (a, b) = LoopbackLink::pair();
        rpcprims_transport::send_some(&a, CH, &wire).unwrap();
        let b = FramedTransport::new(b);
        let mut received = MessageBuffer::new(64);
        prop_assert_eq!(
            b.receive(CH, &mut received, false),
            Err(RpcError::CrcCheckFailed)
        );
    }
}
