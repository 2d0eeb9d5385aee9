/// Errors found while encoding or inspecting a framed envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Fewer bytes than the header or declared payload needs.
    #[error("frame truncated ({len} bytes, need {need})")]
    Truncated { len: usize, need: usize },

    /// No two of the three size copies agree.
    #[error("frame size copies disagree: {sizes:?}")]
    SizeDisagreement { sizes: [u16; 3] },

    /// The agreed size is zero.
    #[error("frame declares an empty payload")]
    EmptyFrame,

    /// The payload does not fit the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
