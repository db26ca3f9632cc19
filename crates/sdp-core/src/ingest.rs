//! Ingestion of primary instrument files.
//!
//! A file is identified by the extractor registry, slotted into the
//! containment hierarchy (creating any missing ancestors, keyed on stable
//! instrument identifiers), copied into the primary dataset's directory,
//! and queued for the find and proc pipeline stages. Every step is
//! idempotent: re-ingesting the same file changes nothing.

use crate::error::Result;
use crate::metadata::ExtractorRegistry;
use crate::models::dataset::{Dataset, DatasetKind};
use crate::models::job::JobTask;
use crate::store::Store;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Outcome of one ingestion attempt.
#[derive(Debug)]
pub enum IngestOutcome {
    /// The file was registered into this primary dataset.
    Registered(Dataset),
    /// No extractor recognized the file; not an instrument file, skipped.
    Unrecognized,
}

/// Ingest one instrument file from `path` into the store and data root.
pub async fn ingest_file(
    store: &Store,
    registry: &ExtractorRegistry,
    data_root: &Path,
    path: &Path,
) -> Result<IngestOutcome> {
    let Some(md) = registry.identify(path) else {
        debug!(path = %path.display(), "no extractor recognized file");
        return Ok(IngestOutcome::Unrecognized);
    };

    let epoch = store.epoch_from_metadata(&md).await?;
    let primary = match store.primary_dataset(epoch.id).await? {
        Some(existing) => existing,
        None => {
            store
                .create_dataset(data_root, epoch.id, DatasetKind::Primary, &md.datatype, false)
                .await?
        }
    };

    let file_name = path
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file path"))?;
    let dest = data_root.join(primary.relpath()).join(file_name);
    fs::copy(path, &dest)?;

    let changed = store.refresh_digest(data_root, primary.id).await?;
    let refreshed = store.dataset(primary.id).await?;
    store
        .set_file_counts(primary.id, refreshed.file_cnt_act, refreshed.file_cnt_act)
        .await?;

    store.create_job(epoch.id, JobTask::Find).await?;
    store.create_job(epoch.id, JobTask::Proc).await?;
    store.set_needs(epoch.id, true, true).await?;

    info!(
        path = %path.display(),
        dataset = primary.id,
        epoch = epoch.id,
        changed,
        "ingested instrument file"
    );
    Ok(IngestOutcome::Registered(refreshed))
}
