use thiserror::Error;

/// Library error type for the firewall's data plane and configuration layer.
#[derive(Debug, Error)]
pub enum FirewallError {
    /// MBAP header shorter than the minimum 8-byte ADU.
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    /// `protocol_id` field was not zero.
    #[error("invalid protocol id: {0:#06x}")]
    InvalidProtocolId(u16),

    /// Declared `length` field did not match the actual remainder, was
    /// below the 2-byte minimum, or pushed the total ADU past 260 bytes.
    #[error("length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: u16, actual: usize },

    /// DPI structural validation failed for a specific reason.
    #[error("structural error: {0}")]
    Structural(String),

    /// Configuration error (missing file, bad value, etc).
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error, typically from socket or log file operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FirewallError>;
