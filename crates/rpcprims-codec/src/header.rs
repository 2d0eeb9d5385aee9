//! Message header vocabulary shared by both wire modes.
//!
//! Basic mode:
//! ```text
//! ┌─────────┬─────────┬──────────────┬────────┬───────────────┐
//! │ Version │ Service │ Request hash │ Type   │ Sequence      │
//! │ u8 = 1  │ u8      │ u32 LE       │ u8     │ u32 LE        │
//! └─────────┴─────────┴──────────────┴────────┴───────────────┘
//! ```
//!
//! Fast mode is a single byte: the low 7 bits carry the service id and bit 7
//! flags a oneway message.

use crate::error::RpcError;

/// Codec version written in every basic header.
pub const CODEC_VERSION: u8 = 1;

/// Size of the fixed payload header (version, service, hash, type).
pub const PAYLOAD_HEADER_SIZE: usize = 7;

/// Size of the complete basic header, including the trailing sequence number.
pub const BASIC_HEADER_SIZE: usize = PAYLOAD_HEADER_SIZE + 4;

/// Size of the fast header.
pub const FAST_HEADER_SIZE: usize = 1;

/// Bit of the fast header byte that marks a oneway message.
pub const FAST_ONEWAY_BIT: u8 = 0x80;

/// Bits of the fast header byte that carry the service id.
pub const FAST_SERVICE_MASK: u8 = 0x7F;

/// Opaque fixed-size identifier for methods and channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash(pub u32);

impl Hash {
    /// The "nothing" identifier.
    pub const ZERO: Hash = Hash(0);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Hash {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Route selector understood by the transport.
pub type Channel = Hash;

/// Kind of message carried by a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Invocation = 0,
    Oneway = 1,
    Reply = 2,
    Notification = 3,
    /// Fast-mode request expecting a reply.
    Fast = 4,
    /// Fast-mode request without a reply.
    FastOneway = 5,
}

impl MessageType {
    /// Whether the receiver must answer this message.
    pub fn expects_reply(self) -> bool {
        matches!(self, MessageType::Invocation | MessageType::Fast)
    }

    /// Whether this message asks a server to run a method.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            MessageType::Invocation
                | MessageType::Oneway
                | MessageType::Fast
                | MessageType::FastOneway
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = RpcError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Invocation),
            1 => Ok(MessageType::Oneway),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Notification),
            4 => Ok(MessageType::Fast),
            5 => Ok(MessageType::FastOneway),
            _ => Err(RpcError::Fail),
        }
    }
}

/// Decoded or to-be-encoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub msg_type: MessageType,
    pub service: u32,
    pub request: Hash,
    pub sequence: u32,
}

impl MessageHeader {
    pub fn new(msg_type: MessageType, service: u32, request: Hash, sequence: u32) -> Self {
        Self {
            msg_type,
            service,
            request,
            sequence,
        }
    }

    /// The reply header answering this request.
    pub fn reply(&self) -> Self {
        Self {
            msg_type: MessageType::Reply,
            ..*self
        }
    }
}
