use std::fmt;

use rpcprims_codec::RpcError;
use rpcprims_frame::FrameError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    let code = match err {
        RpcError::SendFailed | RpcError::ReceiveFailed | RpcError::ServerIsDown => {
            TRANSPORT_ERROR
        }
        RpcError::CrcCheckFailed
        | RpcError::InvalidMessageVersion
        | RpcError::ExpectedReply
        | RpcError::BufferOverrun => DATA_INVALID,
        RpcError::MemoryError => INTERNAL,
        _ => FAILURE,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}
