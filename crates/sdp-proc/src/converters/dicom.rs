//! DICOM series conversion.
//!
//! Runs the external series-to-volume tool over the primary dataset's
//! directory inside a scoped temp dir. Volumetric output becomes a derived
//! NIfTI dataset plus an image-pyramid dataset; bitmap output (screenshots,
//! localizer captures) becomes a derived bitmap dataset with no pyramid.

use super::{is_volumetric, list_files, register_files, run_command, Converter};
use crate::error::{ProcError, Result};
use crate::pipeline::PipelineContext;
use crate::pyramid::{self, ImagePyramid};
use crate::volume::Volume;
use async_trait::async_trait;
use sdp_core::models::dataset::{datatypes, DatasetKind};
use sdp_core::{Container, Dataset, Job};
use std::ffi::OsStr;
use tracing::{info, warn};

pub struct DicomConverter {
    command: String,
}

impl DicomConverter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Converter for DicomConverter {
    fn datatype(&self) -> &'static str {
        datatypes::DICOM
    }

    async fn process(
        &self,
        ctx: &PipelineContext,
        job: &Job,
        epoch: &Container,
        primary: &Dataset,
    ) -> Result<()> {
        let workdir = tempfile::TempDir::new()?;
        let input = ctx.data_root.join(primary.relpath());
        let outbase = workdir.path().join(epoch.name());
        run_command(
            &self.command,
            &[input.as_os_str(), outbase.as_os_str()],
        )
        .await?;

        let outputs = list_files(workdir.path())?;
        let volumes: Vec<_> = outputs
            .iter()
            .filter(|p| is_volumetric(p))
            .cloned()
            .collect();
        let bitmaps: Vec<_> = outputs
            .iter()
            .filter(|p| {
                p.extension()
                    .and_then(OsStr::to_str)
                    .is_some_and(|e| matches!(e, "png" | "jpg" | "jpeg" | "bmp"))
            })
            .cloned()
            .collect();

        if !volumes.is_empty() {
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
            info!(job = %job, dataset = nifti.id, "generated NIfTI");

            self.generate_pyramid(ctx, job, epoch, &nifti, &volumes[0])
                .await?;
        } else if !bitmaps.is_empty() {
            let bitmap = register_files(
                ctx,
                job,
                epoch.id,
                DatasetKind::Derived,
                datatypes::BITMAP,
                &bitmaps,
                Some(primary.id),
            )
            .await?;
            ctx.store.set_job_activity(job.id, "generated bitmap").await?;
            info!(job = %job, dataset = bitmap.id, "generated bitmap");
        } else {
            // The tool recognized nothing convertible; register nothing.
            ctx.store
                .set_job_activity(job.id, "no conversion output")
                .await?;
            info!(job = %job, "no conversion output");
        }
        Ok(())
    }
}

impl DicomConverter {
    async fn generate_pyramid(
        &self,
        ctx: &PipelineContext,
        job: &Job,
        epoch: &Container,
        nifti: &Dataset,
        volume_file: &std::path::Path,
    ) -> Result<()> {
        let volume = Volume::read(volume_file)?;
        let dataset = ctx
            .store
            .create_dataset(
                &ctx.data_root,
                epoch.id,
                DatasetKind::Derived,
                datatypes::IMAGE_PYRAMID,
                false,
            )
            .await?;
        let dir = ctx.data_root.join(dataset.relpath());

        match ImagePyramid::from_volume(&volume, ctx.tile_size) {
            Ok(pyr) => pyr.generate(&dir, &ctx.viewer_script_url)?,
            Err(ProcError::DegenerateMontage) => {
                // Not a job failure: leave a placeholder page instead.
                warn!(job = %job, dataset = dataset.id, "degenerate montage, writing fallback page");
                pyramid::write_fallback_page(&dir)?;
            }
            Err(e) => return Err(e),
        }

        ctx.store.refresh_digest(&ctx.data_root, dataset.id).await?;
        ctx.store.add_dataset_parent(dataset.id, nifti.id).await?;
        ctx.store
            .set_job_activity(job.id, "image pyramid generated")
            .await?;
        info!(job = %job, dataset = dataset.id, "image pyramid generated");
        Ok(())
    }
}
