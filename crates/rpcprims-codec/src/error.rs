/// Hard failures of the RPC runtime.
///
/// `Success` and `Pending` are not errors and live in [`Progress`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum RpcError {
    /// A pool slot could not be leased, or no buffer was bound.
    #[error("memory error (pool exhausted or no buffer bound)")]
    MemoryError,

    /// A read or write would cross the bound buffer's limits.
    #[error("buffer overrun")]
    BufferOverrun,

    /// The basic message header carried an unexpected codec version.
    #[error("invalid message version")]
    InvalidMessageVersion,

    /// The peer encoded a pointer wider than the local pointer width.
    #[error("peer pointer width exceeds local address size")]
    BadAddressScale,

    /// A callback was not found in the candidate table.
    #[error("unknown callback")]
    UnknownCallback,

    /// The payload CRC did not match the frame header.
    #[error("crc check failed")]
    CrcCheckFailed,

    /// The link failed or delivered an unusable frame.
    #[error("receive failed")]
    ReceiveFailed,

    /// The link refused the outgoing frame.
    #[error("send failed")]
    SendFailed,

    /// A blocking client call was issued from inside a server dispatch.
    #[error("nested call failure")]
    NestedCallFailure,

    /// The server has been stopped.
    #[error("server is down")]
    ServerIsDown,

    /// A received reply does not answer the outstanding request.
    #[error("expected a reply to the outstanding request")]
    ExpectedReply,

    /// No service is registered for the decoded service id.
    #[error("unknown service {0}")]
    UnknownService(u32),

    /// Generic failure.
    #[error("operation failed")]
    Fail,
}

pub type Result<T> = std::result::Result<T, RpcError>;

/// Non-error outcome of a resumable operation.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The operation ran to completion.
    Done,
    /// The operation is incomplete; invoke it again with the same inputs.
    Pending,
}

impl Progress {
    pub fn is_done(self) -> bool {
        self == Progress::Done
    }

    pub fn is_pending(self) -> bool {
        self == Progress::Pending
    }
}
