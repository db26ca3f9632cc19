//! Job records for the store-backed work queue.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};

/// Job lifecycle state: `new → active → {done | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    New,
    Active,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Active => "active",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(JobStatus::New),
            "active" => Ok(JobStatus::Active),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(CoreError::invalid_field("job status", other)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline stage a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobTask {
    /// Discover ancillary files (physio recordings)
    Find,
    /// Convert the primary dataset into derivative formats
    Proc,
}

impl JobTask {
    pub fn as_str(self) -> &'static str {
        match self {
            JobTask::Find => "find",
            JobTask::Proc => "proc",
        }
    }

    /// The dataset kind this task produces; restart deletes these.
    pub fn output_kind(self) -> crate::models::dataset::DatasetKind {
        match self {
            JobTask::Find => crate::models::dataset::DatasetKind::Secondary,
            JobTask::Proc => crate::models::dataset::DatasetKind::Derived,
        }
    }
}

impl std::str::FromStr for JobTask {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "find" => Ok(JobTask::Find),
            "proc" => Ok(JobTask::Proc),
            other => Err(CoreError::invalid_field("job task", other)),
        }
    }
}

impl std::fmt::Display for JobTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One queued unit of pipeline work, bound to a container
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub task: String,
    pub redo_all: bool,
    pub progress: Option<i32>,
    pub activity: Option<String>,
    pub container_id: i64,
}

impl Job {
    pub fn status(&self) -> Result<JobStatus> {
        self.status.parse()
    }

    pub fn task(&self) -> Result<JobTask> {
        self.task.parse()
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.container_id, self.task)
    }
}
