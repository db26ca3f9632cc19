//! Error types shared across SDP

use thiserror::Error;

/// Result type alias for common SDP operations
pub type Result<T> = std::result::Result<T, SdpError>;

/// Error type for crate-agnostic SDP operations
#[derive(Error, Debug)]
pub enum SdpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
