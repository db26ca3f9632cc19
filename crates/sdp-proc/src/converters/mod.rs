//! Format converters.
//!
//! One converter per primary datatype, resolved once per job from the
//! registry. The find stage is shared (physio lookup) unless a converter
//! overrides it; process is format-specific and shells out to the external
//! conversion tools.

mod dicom;
mod kspace;

pub use dicom::DicomConverter;
pub use kspace::KspaceConverter;

use crate::error::{ProcError, Result};
use crate::pipeline::{self, PipelineContext};
use async_trait::async_trait;
use sdp_core::models::dataset::DatasetKind;
use sdp_core::{Container, Dataset, Job};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait Converter: Send + Sync {
    /// Primary datatype this converter handles.
    fn datatype(&self) -> &'static str;

    /// Find stage: locate ancillary recordings for the epoch. The default
    /// is the shared physio lookup.
    async fn find(
        &self,
        ctx: &PipelineContext,
        job: &Job,
        epoch: &Container,
        _primary: &Dataset,
    ) -> Result<()> {
        pipeline::find_physio(ctx, job, epoch).await
    }

    /// Proc stage: convert the primary dataset into derived datasets.
    async fn process(
        &self,
        ctx: &PipelineContext,
        job: &Job,
        epoch: &Container,
        primary: &Dataset,
    ) -> Result<()>;
}

/// Converters keyed by primary datatype.
#[derive(Default)]
pub struct ConverterRegistry {
    converters: HashMap<&'static str, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, converter: Arc<dyn Converter>) {
        self.converters.insert(converter.datatype(), converter);
    }

    pub fn get(&self, datatype: &str) -> Result<Arc<dyn Converter>> {
        self.converters
            .get(datatype)
            .cloned()
            .ok_or_else(|| ProcError::UnknownDatatype(datatype.to_string()))
    }
}

/// Run an external conversion tool, surfacing a non-zero exit as an error
/// carrying the tool's stderr.
pub(crate) async fn run_command(program: &str, args: &[&OsStr]) -> Result<()> {
    debug!(program, ?args, "running conversion command");
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await?;
    if !output.status.success() {
        let stderr: String = String::from_utf8_lossy(&output.stderr)
            .trim()
            .chars()
            .take(500)
            .collect();
        return Err(ProcError::Command {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr,
        });
    }
    Ok(())
}

/// Regular files in a directory, sorted by name.
pub(crate) fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Publish `files` as a new dataset on `container_id`.
///
/// The dataset record is created before any file is copied, so a crash
/// mid-copy leaves a record a restart can find and delete. The target count
/// is fixed up front and the actual count incremented per copied file.
pub(crate) async fn register_files(
    ctx: &PipelineContext,
    job: &Job,
    container_id: i64,
    kind: DatasetKind,
    datatype: &str,
    files: &[PathBuf],
    parent: Option<i64>,
) -> Result<Dataset> {
    let dataset = ctx
        .store
        .create_dataset(&ctx.data_root, container_id, kind, datatype, false)
        .await?;
    ctx.store
        .set_file_counts(dataset.id, 0, files.len() as i32)
        .await?;

    let dir = ctx.data_root.join(dataset.relpath());
    for (i, file) in files.iter().enumerate() {
        let name = file.file_name().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file path")
        })?;
        std::fs::copy(file, dir.join(name))?;
        ctx.store.increment_file_count(dataset.id).await?;
        ctx.store
            .set_job_progress(job.id, ((i + 1) * 100 / files.len()) as i32)
            .await?;
    }

    ctx.store.refresh_digest(&ctx.data_root, dataset.id).await?;
    if let Some(parent_id) = parent {
        ctx.store.add_dataset_parent(dataset.id, parent_id).await?;
    }
    ctx.store.dataset(dataset.id).await.map_err(Into::into)
}

/// True for the volumetric outputs of a conversion tool.
pub(crate) fn is_volumetric(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(OsStr::to_str) else {
        return false;
    };
    name.ends_with(".nii") || name.ends_with(".nii.gz")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdp_core::models::dataset::datatypes;

    struct Noop;

    #[async_trait]
    impl Converter for Noop {
        fn datatype(&self) -> &'static str {
            datatypes::DICOM
        }

        async fn process(
            &self,
            _ctx: &PipelineContext,
            _job: &Job,
            _epoch: &Container,
            _primary: &Dataset,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_resolves_by_datatype() {
        let mut registry = ConverterRegistry::new();
        registry.register(Arc::new(Noop));
        assert!(registry.get(datatypes::DICOM).is_ok());
        assert!(matches!(
            registry.get("Unknown Format"),
            Err(ProcError::UnknownDatatype(_))
        ));
    }

    #[test]
    fn test_is_volumetric() {
        assert!(is_volumetric(Path::new("/tmp/out.nii")));
        assert!(is_volumetric(Path::new("/tmp/out.nii.gz")));
        assert!(!is_volumetric(Path::new("/tmp/out.png")));
        assert!(!is_volumetric(Path::new("/tmp/out.nii.txt")));
    }

    #[tokio::test]
    async fn test_run_command_captures_stderr() {
        let err = run_command("sh", &["-c".as_ref(), "echo boom >&2; exit 3".as_ref()])
            .await
            .unwrap_err();
        match err {
            ProcError::Command { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("expected command error, got {other}"),
        }
    }
}
