//! Job execution.
//!
//! A claimed job runs through exactly one state machine: activity "started"
//! is persisted, the converter for the container's primary datatype runs the
//! stage, and any error escaping it is caught once here, recorded as
//! activity text with status failed. Success persists status done. Every
//! transition hits the store before the worker exits.

use crate::converters::{self, ConverterRegistry};
use crate::error::Result;
use crate::physio;
use sdp_core::models::dataset::{datatypes, DatasetKind};
use sdp_core::{Container, CoreError, Job, JobStatus, JobTask, Store};
use std::path::PathBuf;
use tracing::{error, info, warn};

pub struct PipelineContext {
    pub store: Store,
    pub data_root: PathBuf,
    pub physio_root: PathBuf,
    pub registry: ConverterRegistry,
    pub tile_size: u32,
    pub viewer_script_url: String,
}

/// Run one claimed job to completion, recording the outcome. Never returns
/// an error: failures end up in the job record.
pub async fn run_job(ctx: &PipelineContext, job: Job) {
    info!(job = %job, "job started");
    if let Err(e) = ctx.store.set_job_activity(job.id, "started").await {
        error!(job = %job, error = %e, "failed to record job start");
    }

    match dispatch(ctx, &job).await {
        Ok(()) => {
            if let Err(e) = ctx.store.set_job_status(job.id, JobStatus::Done, "done").await {
                error!(job = %job, error = %e, "failed to record job completion");
            }
            info!(job = %job, "job done");
        }
        Err(e) => {
            warn!(job = %job, error = %e, "job failed");
            let activity = format!("failed: {e}");
            if let Err(e) = ctx
                .store
                .set_job_status(job.id, JobStatus::Failed, &activity)
                .await
            {
                error!(job = %job, error = %e, "failed to record job failure");
            }
        }
    }
}

async fn dispatch(ctx: &PipelineContext, job: &Job) -> Result<()> {
    let epoch = ctx.store.container(job.container_id).await?;
    let primary = ctx
        .store
        .primary_dataset(epoch.id)
        .await?
        .ok_or(CoreError::NoPrimaryDataset(epoch.id))?;
    // The converter is picked once, by the primary dataset's declared
    // datatype; stages never probe file contents to decide.
    let converter = ctx.registry.get(&primary.datatype)?;

    match job.task()? {
        JobTask::Find => {
            converter.find(ctx, job, &epoch, &primary).await?;
            ctx.store
                .set_needs(epoch.id, false, epoch.needs_processing)
                .await?;
        }
        JobTask::Proc => {
            converter.process(ctx, job, &epoch, &primary).await?;
            ctx.store
                .set_needs(epoch.id, epoch.needs_finding, false)
                .await?;
        }
    }
    Ok(())
}

/// Shared find stage: collect physiological recordings matching the epoch's
/// protocol name within its acquisition window. Finding nothing is an
/// activity note, not a failure.
pub(crate) async fn find_physio(
    ctx: &PipelineContext,
    job: &Job,
    epoch: &Container,
) -> Result<()> {
    if !epoch.physio_flag() {
        ctx.store
            .set_job_activity(job.id, "physio not expected")
            .await?;
        return Ok(());
    }

    let psd = epoch.psd().unwrap_or_default();
    let matches = physio::find_recordings(
        &ctx.physio_root,
        psd,
        epoch.timestamp,
        epoch.duration_secs,
    )?;
    if matches.is_empty() {
        ctx.store
            .set_job_activity(job.id, "no physio files found")
            .await?;
        return Ok(());
    }

    let dataset = converters::register_files(
        ctx,
        job,
        epoch.id,
        DatasetKind::Secondary,
        datatypes::PHYSIO,
        &matches,
        None,
    )
    .await?;
    ctx.store
        .set_job_activity(job.id, &format!("found {} physio files", matches.len()))
        .await?;
    info!(
        job = %job,
        dataset = dataset.id,
        files = matches.len(),
        "registered physio recordings"
    );
    Ok(())
}
