//! Message buffers, pools and the wire codec for rpcprims.
//!
//! This is the lowest layer of rpcprims. A [`Codec`] serializes typed values
//! into a bound [`MessageBuffer`] and records the first failure as a sticky
//! status instead of panicking. Codecs and buffers come from fixed-slot pools
//! ([`CodecPool`], [`BufferPool`]) so a deployment can bound its memory up
//! front.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod header;
pub mod pool;

pub use buffer::{BufferPool, MessageBuffer, MessageBufferFactory};
pub use codec::{Codec, WireValue, IS_NULL, NOT_NULL};
pub use config::{PoolConfig, DEFAULT_BUFFER_SIZE, DEFAULT_BUFFER_SLOTS, DEFAULT_CODEC_SLOTS};
pub use error::{Progress, Result, RpcError};
pub use header::{
    Channel, Hash, MessageHeader, MessageType, BASIC_HEADER_SIZE, CODEC_VERSION, FAST_HEADER_SIZE,
    PAYLOAD_HEADER_SIZE,
};
pub use pool::{CodecFactory, CodecPool};
