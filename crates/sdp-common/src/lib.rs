//! SDP Common Library
//!
//! Shared utilities for the SDP workspace:
//!
//! - **Error Handling**: the workspace-wide error type
//! - **Digests**: content digesting for dataset directories
//! - **Logging**: tracing initialization for all SDP binaries

pub mod digest;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, SdpError};
