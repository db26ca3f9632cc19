//! Dataset records: one stored unit of file content at a deterministic path.

use crate::content;
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Well-known datatype labels.
pub mod datatypes {
    /// Primary DICOM series
    pub const DICOM: &str = "Dicom Files";
    /// Primary k-space recording
    pub const KSPACE: &str = "K-Space Recording";
    /// Secondary physiological recordings
    pub const PHYSIO: &str = "Physio Data";
    /// Derived volumetric image
    pub const NIFTI_RAW: &str = "NIfTI (raw)";
    /// Derived flat bitmap
    pub const BITMAP: &str = "Bitmap";
    /// Derived multi-resolution viewer tiles
    pub const IMAGE_PYRAMID: &str = "Image Pyramid";
}

/// Dataset kind within its container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    /// Unprocessed instrument data establishing the container's identity
    Primary,
    /// Ancillary files discovered by the find stage
    Secondary,
    /// Pipeline conversion output
    Derived,
}

impl DatasetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DatasetKind::Primary => "primary",
            DatasetKind::Secondary => "secondary",
            DatasetKind::Derived => "derived",
        }
    }
}

impl std::str::FromStr for DatasetKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary" => Ok(DatasetKind::Primary),
            "secondary" => Ok(DatasetKind::Secondary),
            "derived" => Ok(DatasetKind::Derived),
            other => Err(CoreError::invalid_field("dataset kind", other)),
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One stored dataset
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Dataset {
    pub id: i64,
    pub container_id: i64,
    pub kind: String,
    pub datatype: String,
    pub offset_secs: f64,
    pub trash_time: Option<DateTime<Utc>>,
    pub update_time: DateTime<Utc>,
    pub digest: Option<Vec<u8>>,
    pub compressed: bool,
    pub archived: bool,
    pub file_cnt_act: i32,
    pub file_cnt_tgt: i32,
}

impl Dataset {
    pub fn kind(&self) -> Result<DatasetKind> {
        self.kind.parse()
    }

    pub fn is_trash(&self) -> bool {
        self.trash_time.is_some()
    }

    /// Storage path relative to the data root; a pure function of the
    /// dataset's id and archived flag.
    pub fn relpath(&self) -> PathBuf {
        content::relpath(self.id, self.archived)
    }
}
