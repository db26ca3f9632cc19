//! Domain models persisted in the shared store

pub mod container;
pub mod dataset;
pub mod job;
