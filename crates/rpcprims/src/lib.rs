//! Small-footprint RPC runtime.
//!
//! rpcprims moves remote procedure calls between peers over byte links such as
//! serial ports or sockets, with fixed pools of codecs and buffers and state
//! machines that tolerate partial, non-blocking I/O.
//!
//! # Crate Structure
//!
//! - [`codec`]: message buffers, pools and the little-endian wire codec
//! - [`transport`]: the transport contract, byte links and CRC-16
//! - [`frame`]: framed (CRC-checked) and fast (fixed 7-byte) transports
//! - [`peer`]: client request manager and polled server (behind `peer` feature)

/// Re-export codec types.
pub mod codec {
    pub use rpcprims_codec::*;
}

/// Re-export transport types.
pub mod transport {
    pub use rpcprims_transport::*;
}

/// Re-export framing types.
pub mod frame {
    pub use rpcprims_frame::*;
}

/// Re-export client and server types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use rpcprims_peer::*;
}
