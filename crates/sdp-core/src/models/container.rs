//! Containment hierarchy records.
//!
//! The four container levels (Experiment → Subject → Session → Epoch) share
//! one table, tagged by a variant discriminator, with the variant-specific
//! fields carried in a JSON payload. Parent/child edges are static: an
//! experiment has no parent, a subject's parent is an experiment, and so on.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// Container variant discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Experiment,
    Subject,
    Session,
    Epoch,
}

impl ContainerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerKind::Experiment => "experiment",
            ContainerKind::Subject => "subject",
            ContainerKind::Session => "session",
            ContainerKind::Epoch => "epoch",
        }
    }

    /// The kind one level down the hierarchy, if any.
    pub fn child_kind(self) -> Option<ContainerKind> {
        match self {
            ContainerKind::Experiment => Some(ContainerKind::Subject),
            ContainerKind::Subject => Some(ContainerKind::Session),
            ContainerKind::Session => Some(ContainerKind::Epoch),
            ContainerKind::Epoch => None,
        }
    }

    /// The kind one level up the hierarchy, if any.
    pub fn parent_kind(self) -> Option<ContainerKind> {
        match self {
            ContainerKind::Experiment => None,
            ContainerKind::Subject => Some(ContainerKind::Experiment),
            ContainerKind::Session => Some(ContainerKind::Subject),
            ContainerKind::Epoch => Some(ContainerKind::Session),
        }
    }
}

impl std::str::FromStr for ContainerKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "experiment" => Ok(ContainerKind::Experiment),
            "subject" => Ok(ContainerKind::Subject),
            "session" => Ok(ContainerKind::Session),
            "epoch" => Ok(ContainerKind::Epoch),
            other => Err(CoreError::invalid_field("kind", other)),
        }
    }
}

impl std::fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Variant-specific container fields, stored as the JSON payload column.
///
/// The serde tag matches the table's `kind` column; both are written
/// together at creation time and never change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContainerPayload {
    Experiment {
        /// Owning research-group key (identity service is external)
        group: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        irb: Option<String>,
    },
    Subject {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        firstname: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lastname: Option<String>,
    },
    Session {
        /// Stable exam identifier from the instrument
        uid: String,
        exam: i32,
    },
    Epoch {
        /// Stable series identifier from the instrument
        uid: String,
        series: i32,
        acq: i32,
        description: String,
        /// Acquisition protocol (pulse sequence) name
        psd: String,
        physio_flag: bool,
    },
}

impl ContainerPayload {
    pub fn kind(&self) -> ContainerKind {
        match self {
            ContainerPayload::Experiment { .. } => ContainerKind::Experiment,
            ContainerPayload::Subject { .. } => ContainerKind::Subject,
            ContainerPayload::Session { .. } => ContainerKind::Session,
            ContainerPayload::Epoch { .. } => ContainerKind::Epoch,
        }
    }
}

/// One node of the containment hierarchy
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Container {
    pub id: i64,
    pub kind: String,
    pub parent_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub duration_secs: f64,
    pub trash_time: Option<DateTime<Utc>>,
    pub updated: bool,
    pub needs_finding: bool,
    pub needs_processing: bool,
    pub payload: Json<ContainerPayload>,
}

impl Container {
    pub fn kind(&self) -> Result<ContainerKind> {
        self.kind.parse()
    }

    pub fn is_trash(&self) -> bool {
        self.trash_time.is_some()
    }

    /// Display name, also used as the output basename during conversion.
    pub fn name(&self) -> String {
        match &*self.payload {
            ContainerPayload::Experiment { group, name, .. } => format!("{}/{}", group, name),
            ContainerPayload::Subject { code, .. } => code.clone(),
            ContainerPayload::Session { exam, .. } => {
                format!("{}_{}", self.timestamp.format("%Y%m%d_%H%M"), exam)
            }
            ContainerPayload::Epoch {
                series,
                acq,
                description,
                ..
            } => format!(
                "{}_{}_{}_{}",
                self.timestamp.format("%H%M%S"),
                series,
                acq,
                description
            ),
        }
    }

    /// Epoch-only accessor: acquisition protocol name.
    pub fn psd(&self) -> Option<&str> {
        match &*self.payload {
            ContainerPayload::Epoch { psd, .. } => Some(psd),
            _ => None,
        }
    }

    /// Epoch-only accessor: whether synchronized physiological recordings
    /// are expected for this acquisition.
    pub fn physio_flag(&self) -> bool {
        matches!(
            &*self.payload,
            ContainerPayload::Epoch {
                physio_flag: true,
                ..
            }
        )
    }
}
