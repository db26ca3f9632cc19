//! SDP Processing Pipeline
//!
//! The scheduler binary and its stages:
//!
//! - **Scheduler**: poll loop claiming jobs from the shared store, bounded
//!   worker concurrency, graceful drain on shutdown
//! - **Pipeline**: the per-job state machine and the shared find stage
//! - **Converters**: per-datatype conversion via external tools
//! - **Volume / Pyramid**: minimal NIfTI-1 reader and the multi-resolution
//!   JPEG tile generator
//! - **Physio**: physiological recording lookup by protocol tag and time
//!   window

pub mod converters;
pub mod error;
pub mod physio;
pub mod pipeline;
pub mod pyramid;
pub mod scheduler;
pub mod volume;

pub use error::{ProcError, Result};
pub use pipeline::PipelineContext;
pub use scheduler::Scheduler;
