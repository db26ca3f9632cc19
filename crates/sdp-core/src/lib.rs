//! SDP Core Library
//!
//! Domain model and Postgres-backed store for the SDP processing backend:
//!
//! - **Models**: containers (Experiment/Subject/Session/Epoch), datasets, jobs
//! - **Store**: the shared relational store, including the job queue with
//!   dependency-aware claiming and the cascading trash operations
//! - **Content**: deterministic dataset path allocation on the data root
//! - **Ingest**: idempotent registration of primary instrument files
//! - **Seams**: metadata extraction and access-privilege interfaces consumed
//!   from external collaborators

pub mod access;
pub mod content;
pub mod error;
pub mod ingest;
pub mod metadata;
pub mod models;
pub mod store;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use models::container::{Container, ContainerKind, ContainerPayload};
pub use models::dataset::{Dataset, DatasetKind};
pub use models::job::{Job, JobStatus, JobTask};
pub use store::{Store, TrashFilter};
