/// Default number of codec slots.
pub const DEFAULT_CODEC_SLOTS: usize = 4;

/// Default number of message buffer slots.
pub const DEFAULT_BUFFER_SLOTS: usize = 4;

/// Default size of each message buffer in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 256;

/// Sizing of the codec and buffer pools.
///
/// Provision for the largest number of messages in flight at once: client
/// requests, nested re-entry and the server's own message.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of codecs that can be leased at once. Default: 4.
    pub codec_slots: usize,
    /// Number of buffers that can be leased at once. Default: 4.
    pub buffer_slots: usize,
    /// Capacity of every buffer. Default: 256 bytes.
    pub buffer_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            codec_slots: DEFAULT_CODEC_SLOTS,
            buffer_slots: DEFAULT_BUFFER_SLOTS,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}
