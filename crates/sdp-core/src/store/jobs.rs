//! Job queue: dependency-aware, mutually exclusive claiming over the
//! shared store, plus the restart/reset recovery primitives.

use super::{Store, TrashFilter};
use crate::error::{CoreError, Result};
use crate::models::job::{Job, JobStatus, JobTask};
use std::path::Path;
use tracing::{debug, info};

const JOB_COLS: &str = "id, timestamp, status, task, redo_all, progress, activity, container_id";

impl Store {
    /// Fetch one job by id.
    pub async fn job(&self, id: i64) -> Result<Job> {
        let sql = format!("SELECT {JOB_COLS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(CoreError::JobNotFound(id))
    }

    /// Enqueue a job for a container. Idempotent: an existing pending job
    /// of the same task on the same container is returned instead.
    pub async fn create_job(&self, container_id: i64, task: JobTask) -> Result<Job> {
        let find_sql = format!(
            "SELECT {JOB_COLS} FROM jobs \
             WHERE container_id = $1 AND task = $2 AND status = 'new' \
             ORDER BY id LIMIT 1"
        );
        if let Some(existing) = sqlx::query_as::<_, Job>(&find_sql)
            .bind(container_id)
            .bind(task.as_str())
            .fetch_optional(self.pool())
            .await?
        {
            return Ok(existing);
        }
        let sql = format!(
            "INSERT INTO jobs (container_id, task) VALUES ($1, $2) RETURNING {JOB_COLS}"
        );
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(container_id)
            .bind(task.as_str())
            .fetch_one(self.pool())
            .await?;
        debug!(id = job.id, container = container_id, task = %task, "enqueued job");
        Ok(job)
    }

    /// Claim the next eligible job, atomically marking it active.
    ///
    /// Eligible: status=new (optionally filtered by task) and no other job
    /// on the same container with a lower id and a status other than done;
    /// strict per-container FIFO, best-effort lowest-id-first across
    /// containers. The row lock held across select-and-update is the only
    /// exclusion primitive: concurrent claimants skip locked candidates, so
    /// no job is ever returned twice.
    pub async fn claim_next(&self, task: Option<JobTask>) -> Result<Option<Job>> {
        let mut tx = self.pool().begin().await?;
        let sql = format!(
            "SELECT {JOB_COLS} FROM jobs \
             WHERE status = 'new' \
             AND ($1::text IS NULL OR task = $1) \
             AND NOT EXISTS (
                 SELECT 1 FROM jobs prior \
                 WHERE prior.container_id = jobs.container_id \
                 AND prior.id < jobs.id \
                 AND prior.status <> 'done') \
             ORDER BY id \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED"
        );
        let candidate = sqlx::query_as::<_, Job>(&sql)
            .bind(task.map(JobTask::as_str))
            .fetch_optional(&mut *tx)
            .await?;

        let Some(job) = candidate else {
            tx.rollback().await?;
            return Ok(None);
        };

        let claim_sql = format!(
            "UPDATE jobs SET status = 'active' WHERE id = $1 RETURNING {JOB_COLS}"
        );
        let claimed = sqlx::query_as::<_, Job>(&claim_sql)
            .bind(job.id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(claimed))
    }

    /// Persist a status transition with its activity text.
    pub async fn set_job_status(
        &self,
        id: i64,
        status: JobStatus,
        activity: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = $2, activity = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(activity)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Update a running job's activity text.
    pub async fn set_job_activity(&self, id: i64, activity: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET activity = $2 WHERE id = $1")
            .bind(id)
            .bind(activity)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Update a running job's progress indicator.
    pub async fn set_job_progress(&self, id: i64, progress: i32) -> Result<()> {
        sqlx::query("UPDATE jobs SET progress = $2 WHERE id = $1")
            .bind(id)
            .bind(progress)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Reset a job to new, deleting every dataset its stage already
    /// produced (secondary for find, derived for proc) along with the
    /// on-disk content. Stale progress is cleared with the status.
    /// Idempotent: running it again deletes nothing more.
    pub async fn restart_job(&self, data_root: &Path, job: &Job) -> Result<()> {
        let output_kind = job.task()?.output_kind();
        let outputs: Vec<_> = self
            .datasets(job.container_id, TrashFilter::ShowAll)
            .await?
            .into_iter()
            .filter(|ds| ds.kind == output_kind.as_str())
            .collect();
        for dataset in &outputs {
            self.delete_dataset(data_root, dataset).await?;
        }
        sqlx::query(
            "UPDATE jobs SET status = 'new', progress = NULL, activity = 'reset to new' \
             WHERE id = $1",
        )
        .bind(job.id)
        .execute(self.pool())
        .await?;
        debug!(id = job.id, deleted = outputs.len(), "restarted job");
        Ok(())
    }

    /// Administrative recovery: restart every active or failed job,
    /// optionally filtered by task. Never triggered automatically.
    pub async fn reset_active_and_failed(
        &self,
        data_root: &Path,
        task: Option<JobTask>,
    ) -> Result<usize> {
        let sql = format!(
            "SELECT {JOB_COLS} FROM jobs \
             WHERE status IN ('active', 'failed') \
             AND ($1::text IS NULL OR task = $1) \
             ORDER BY id"
        );
        let jobs = sqlx::query_as::<_, Job>(&sql)
            .bind(task.map(JobTask::as_str))
            .fetch_all(self.pool())
            .await?;
        for job in &jobs {
            self.restart_job(data_root, job).await?;
            info!(id = job.id, job = %job, "reset to new");
        }
        Ok(jobs.len())
    }

    /// Jobs on one container, oldest first.
    pub async fn jobs_for_container(&self, container_id: i64) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLS} FROM jobs WHERE container_id = $1 ORDER BY id"
        );
        Ok(sqlx::query_as::<_, Job>(&sql)
            .bind(container_id)
            .fetch_all(self.pool())
            .await?)
    }
}
