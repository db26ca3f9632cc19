//! K-space recording reconstruction.
//!
//! Only the real-time spiral family of protocols (psd name containing
//! "sprt") has a reconstruction; other protocols produce no output and
//! that is not an error.

use super::{is_volumetric, list_files, register_files, run_command, Converter};
use crate::error::{ProcError, Result};
use crate::pipeline::PipelineContext;
use async_trait::async_trait;
use sdp_core::models::dataset::{datatypes, DatasetKind};
use sdp_core::{Container, Dataset, Job};
use tracing::info;

const RECON_PSD_MARKER: &str = "sprt";

pub struct KspaceConverter {
    command: String,
}

impl KspaceConverter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Converter for KspaceConverter {
    fn datatype(&self) -> &'static str {
        datatypes::KSPACE
    }

    async fn process(
        &self,
        ctx: &PipelineContext,
        job: &Job,
        epoch: &Container,
        primary: &Dataset,
    ) -> Result<()> {
        if !epoch
            .psd()
            .is_some_and(|psd| psd.contains(RECON_PSD_MARKER))
        {
            ctx.store
                .set_job_activity(job.id, "no reconstruction for this protocol")
                .await?;
            return Ok(());
        }

        let input_dir = ctx.data_root.join(primary.relpath());
        let Some(input) = list_files(&input_dir)?.into_iter().next() else {
            return Err(ProcError::NoOutput);
        };

        let workdir = tempfile::TempDir::new()?;
        let outbase = workdir.path().join(epoch.name());
        run_command(
            &self.command,
            &[input.as_os_str(), outbase.as_os_str()],
        )
        .await?;

        let volumes: Vec<_> = list_files(workdir.path())?
            .into_iter()
            .filter(|p| is_volumetric(p))
            .collect();
        if volumes.is_empty() {
            ctx.store
                .set_job_activity(job.id, "no conversion output")
                .await?;
            info!(job = %job, "no conversion output");
            return Ok(());
        }

        let nifti = register_files(
            ctx,
            job,
            epoch.id,
            DatasetKind::Derived,
            datatypes::NIFTI_RAW,
            &volumes,
            Some(primary.id),
        )
        .await?;
        ctx.store.set_job_activity(job.id, "generated NIfTI").await?;
        info!(job = %job, dataset = nifti.id, "reconstructed k-space recording");
        Ok(())
    }
}
