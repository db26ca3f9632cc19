//! Pipeline error type.
//!
//! Anything escaping a converter stage ends up as a failed job with the
//! error's display text in the job's activity column, so variants carry
//! enough context to be read there.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcError {
    #[error(transparent)]
    Core(#[from] sdp_core::CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid volume: {0}")]
    Volume(String),

    /// Montage came out with zero area. Caught locally by the pyramid
    /// generator, which writes a fallback page instead of failing the job.
    #[error("montage has no nonzero content")]
    DegenerateMontage,

    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("conversion produced no output")]
    NoOutput,

    #[error("no converter registered for datatype {0:?}")]
    UnknownDatatype(String),
}

pub type Result<T> = std::result::Result<T, ProcError>;
