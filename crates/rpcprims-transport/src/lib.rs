//! Transport contract and byte links for rpcprims.
//!
//! A [`Transport`] moves whole messages and reports partial progress as
//! [`Progress::Pending`](rpcprims_codec::Progress). It sits on top of a
//! [`Link`], the raw byte primitive:
//! - [`IoLink`] wraps any `Read + Write` stream (Unix domain sockets, serial
//!   ports opened as files)
//! - [`LoopbackLink`] is an in-memory duplex pair for tests and demos
//!
//! Framing lives one layer up, in `rpcprims-frame`.

pub mod crc16;
pub mod io_link;
pub mod link;
pub mod loopback;
pub mod traits;

pub use crc16::Crc16;
pub use io_link::IoLink;
pub use link::{receive_some, send_some, Link};
pub use loopback::{LoopbackConfig, LoopbackLink, LoopbackStats};
pub use traits::{create_codec, Transport};
