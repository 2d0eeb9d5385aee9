//! Message framing for rpcprims.
//!
//! Two [`Transport`](rpcprims_transport::Transport) strategies over any
//! [`Link`](rpcprims_transport::Link):
//! - [`FramedTransport`]: variable-size messages in an envelope with three
//!   redundant 16-bit size copies and a CRC-16 over the payload
//! - [`FastTransport`]: fixed 7-byte frames for tiny calls, no CRC
//!
//! Both resume partial transfers across `Pending` results.

pub mod envelope;
pub mod error;
pub mod fast;
pub mod framed;

pub use envelope::{
    encode_frame, inspect_frame, FrameHeader, FrameReport, HEADER_SIZE, MAX_MESSAGE_SIZE,
};
pub use error::{FrameError, Result};
pub use fast::{FastTransport, FAST_FRAME_SIZE};
pub use framed::{FramedConfig, FramedTransport};
