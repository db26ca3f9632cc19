//! Container hierarchy operations: idempotent find-or-create keyed on
//! stable instrument identifiers, listings, and the cascading trash state.

use super::{Store, TrashFilter};
use crate::access::{AccessPolicy, AccessPrivilege};
use crate::error::{CoreError, Result};
use crate::metadata::Metadata;
use crate::models::container::{Container, ContainerPayload};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use tracing::debug;

pub(crate) const CONTAINER_COLS: &str = "id, kind, parent_id, timestamp, duration_secs, \
     trash_time, updated, needs_finding, needs_processing, payload";

pub(crate) fn trash_clause(filter: TrashFilter) -> &'static str {
    match filter {
        TrashFilter::ShowAll => "",
        TrashFilter::HideTrash => " AND trash_time IS NULL",
        TrashFilter::OnlyTrash => " AND trash_time IS NOT NULL",
    }
}

impl Store {
    /// Fetch one container by id.
    pub async fn container(&self, id: i64) -> Result<Container> {
        let sql = format!("SELECT {CONTAINER_COLS} FROM containers WHERE id = $1");
        sqlx::query_as::<_, Container>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(CoreError::ContainerNotFound(id))
    }

    async fn insert_container(
        &self,
        parent_id: Option<i64>,
        timestamp: DateTime<Utc>,
        duration_secs: f64,
        payload: &ContainerPayload,
    ) -> Result<Container> {
        let sql = format!(
            "INSERT INTO containers (kind, parent_id, timestamp, duration_secs, payload) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {CONTAINER_COLS}"
        );
        let container = sqlx::query_as::<_, Container>(&sql)
            .bind(payload.kind().as_str())
            .bind(parent_id)
            .bind(timestamp)
            .bind(duration_secs)
            .bind(Json(payload))
            .fetch_one(self.pool())
            .await?;
        debug!(id = container.id, kind = %container.kind, "created container");
        Ok(container)
    }

    /// Find or create an experiment by its owning group and name.
    pub async fn find_or_create_experiment(&self, group: &str, name: &str) -> Result<Container> {
        let sql = format!(
            "SELECT {CONTAINER_COLS} FROM containers \
             WHERE kind = 'experiment' AND payload ->> 'group' = $1 AND payload ->> 'name' = $2"
        );
        if let Some(existing) = sqlx::query_as::<_, Container>(&sql)
            .bind(group)
            .bind(name)
            .fetch_optional(self.pool())
            .await?
        {
            return Ok(existing);
        }
        let payload = ContainerPayload::Experiment {
            group: group.to_string(),
            name: name.to_string(),
            irb: None,
        };
        self.insert_container(None, Utc::now(), 0.0, &payload).await
    }

    /// Find or create the subject for `md` within an experiment.
    ///
    /// Keyed on the subject code when present, otherwise on first/last name;
    /// with neither, a sequential code (`s001`, `s002`, ...) is assigned.
    pub async fn find_or_create_subject(
        &self,
        experiment_id: i64,
        md: &Metadata,
    ) -> Result<Container> {
        if let Some(code) = &md.subj_code {
            let sql = format!(
                "SELECT {CONTAINER_COLS} FROM containers \
                 WHERE kind = 'subject' AND parent_id = $1 AND payload ->> 'code' = $2"
            );
            if let Some(existing) = sqlx::query_as::<_, Container>(&sql)
                .bind(experiment_id)
                .bind(code)
                .fetch_optional(self.pool())
                .await?
            {
                return Ok(existing);
            }
        } else if md.subj_firstname.is_some() && md.subj_lastname.is_some() {
            let sql = format!(
                "SELECT {CONTAINER_COLS} FROM containers \
                 WHERE kind = 'subject' AND parent_id = $1 \
                 AND payload ->> 'firstname' = $2 AND payload ->> 'lastname' = $3"
            );
            if let Some(existing) = sqlx::query_as::<_, Container>(&sql)
                .bind(experiment_id)
                .bind(&md.subj_firstname)
                .bind(&md.subj_lastname)
                .fetch_optional(self.pool())
                .await?
            {
                return Ok(existing);
            }
        }

        let code = match &md.subj_code {
            Some(code) => code.clone(),
            None => self.next_subject_code(experiment_id).await?,
        };
        let payload = ContainerPayload::Subject {
            code,
            firstname: md.subj_firstname.clone(),
            lastname: md.subj_lastname.clone(),
        };
        self.insert_container(Some(experiment_id), md.timestamp, 0.0, &payload)
            .await
    }

    async fn next_subject_code(&self, experiment_id: i64) -> Result<String> {
        let codes: Vec<String> = sqlx::query_scalar(
            "SELECT payload ->> 'code' FROM containers \
             WHERE kind = 'subject' AND parent_id = $1",
        )
        .bind(experiment_id)
        .fetch_all(self.pool())
        .await?;
        let next = codes
            .iter()
            .filter_map(|c| c.trim_start_matches(|ch: char| !ch.is_ascii_digit()).parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        Ok(format!("s{:03}", next))
    }

    /// Find or create the session for `md`, keyed on the exam uid.
    pub async fn find_or_create_session(&self, md: &Metadata) -> Result<Container> {
        let sql = format!(
            "SELECT {CONTAINER_COLS} FROM containers \
             WHERE kind = 'session' AND payload ->> 'uid' = $1"
        );
        if let Some(existing) = sqlx::query_as::<_, Container>(&sql)
            .bind(&md.exam_uid)
            .fetch_optional(self.pool())
            .await?
        {
            // A session starts at its earliest epoch.
            if existing.timestamp > md.timestamp {
                sqlx::query("UPDATE containers SET timestamp = $2 WHERE id = $1")
                    .bind(existing.id)
                    .bind(md.timestamp)
                    .execute(self.pool())
                    .await?;
            }
            return Ok(existing);
        }

        let experiment = self
            .find_or_create_experiment(&md.group_name, &md.exp_name)
            .await?;
        let subject = self.find_or_create_subject(experiment.id, md).await?;
        let payload = ContainerPayload::Session {
            uid: md.exam_uid.clone(),
            exam: md.exam_no,
        };
        self.insert_container(Some(subject.id), md.timestamp, 0.0, &payload)
            .await
    }

    /// Find or create the epoch for `md`, keyed on series uid plus
    /// acquisition number; creates the whole ancestor chain as needed.
    pub async fn epoch_from_metadata(&self, md: &Metadata) -> Result<Container> {
        let sql = format!(
            "SELECT {CONTAINER_COLS} FROM containers \
             WHERE kind = 'epoch' AND payload ->> 'uid' = $1 \
             AND (payload ->> 'acq')::int = $2"
        );
        if let Some(existing) = sqlx::query_as::<_, Container>(&sql)
            .bind(&md.series_uid)
            .bind(md.acq_no)
            .fetch_optional(self.pool())
            .await?
        {
            return Ok(existing);
        }

        let session = self.find_or_create_session(md).await?;
        let payload = ContainerPayload::Epoch {
            uid: md.series_uid.clone(),
            series: md.series_no,
            acq: md.acq_no,
            description: md.series_desc.clone(),
            psd: md.psd_name.clone(),
            physio_flag: md.physio_flag,
        };
        self.insert_container(Some(session.id), md.timestamp, md.duration_secs, &payload)
            .await
    }

    /// Child containers of `parent_id`, under an explicit trash filter.
    pub async fn children(&self, parent_id: i64, filter: TrashFilter) -> Result<Vec<Container>> {
        let sql = format!(
            "SELECT {CONTAINER_COLS} FROM containers WHERE parent_id = $1{} ORDER BY id",
            trash_clause(filter)
        );
        Ok(sqlx::query_as::<_, Container>(&sql)
            .bind(parent_id)
            .fetch_all(self.pool())
            .await?)
    }

    /// All experiments, under an explicit trash filter.
    pub async fn experiments(&self, filter: TrashFilter) -> Result<Vec<Container>> {
        let sql = format!(
            "SELECT {CONTAINER_COLS} FROM containers WHERE kind = 'experiment'{} ORDER BY id",
            trash_clause(filter)
        );
        Ok(sqlx::query_as::<_, Container>(&sql)
            .fetch_all(self.pool())
            .await?)
    }

    /// Experiments visible to `user` at `min` privilege, per the external
    /// access policy.
    pub async fn experiments_for_user(
        &self,
        policy: &dyn AccessPolicy,
        user: &str,
        min: AccessPrivilege,
        filter: TrashFilter,
    ) -> Result<Vec<Container>> {
        let mut experiments = self.experiments(filter).await?;
        experiments.retain(|e| policy.user_has_privilege(user, e.id, min));
        Ok(experiments)
    }

    /// Trash a container: set one identical `trash_time` on it and every
    /// descendant container and dataset.
    pub async fn trash_container(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        let updated = sqlx::query(
            "WITH RECURSIVE subtree AS (
                 SELECT id FROM containers WHERE id = $1
                 UNION ALL
                 SELECT c.id FROM containers c JOIN subtree s ON c.parent_id = s.id)
             UPDATE containers SET trash_time = $2 WHERE id IN (SELECT id FROM subtree)",
        )
        .bind(id)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(CoreError::ContainerNotFound(id));
        }
        sqlx::query(
            "WITH RECURSIVE subtree AS (
                 SELECT id FROM containers WHERE id = $1
                 UNION ALL
                 SELECT c.id FROM containers c JOIN subtree s ON c.parent_id = s.id)
             UPDATE datasets SET trash_time = $2 \
             WHERE container_id IN (SELECT id FROM subtree)",
        )
        .bind(id)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Untrash a container: clear `trash_time` on it, on every descendant
    /// container and dataset, and on every trashed ancestor.
    pub async fn untrash_container(&self, id: i64) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        let updated = sqlx::query(
            "WITH RECURSIVE subtree AS (
                 SELECT id FROM containers WHERE id = $1
                 UNION ALL
                 SELECT c.id FROM containers c JOIN subtree s ON c.parent_id = s.id)
             UPDATE containers SET trash_time = NULL WHERE id IN (SELECT id FROM subtree)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(CoreError::ContainerNotFound(id));
        }
        sqlx::query(
            "WITH RECURSIVE subtree AS (
                 SELECT id FROM containers WHERE id = $1
                 UNION ALL
                 SELECT c.id FROM containers c JOIN subtree s ON c.parent_id = s.id)
             UPDATE datasets SET trash_time = NULL \
             WHERE container_id IN (SELECT id FROM subtree)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "WITH RECURSIVE ancestors AS (
                 SELECT id, parent_id FROM containers WHERE id = $1
                 UNION ALL
                 SELECT c.id, c.parent_id FROM containers c \
                 JOIN ancestors a ON a.parent_id = c.id)
             UPDATE containers SET trash_time = NULL \
             WHERE id IN (SELECT id FROM ancestors) AND trash_time IS NOT NULL",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Whether the subtree rooted at `id` holds any trashed container or
    /// dataset.
    pub async fn contains_trash(&self, id: i64) -> Result<bool> {
        let found: bool = sqlx::query_scalar(
            "WITH RECURSIVE subtree AS (
                 SELECT id, trash_time FROM containers WHERE id = $1
                 UNION ALL
                 SELECT c.id, c.trash_time FROM containers c \
                 JOIN subtree s ON c.parent_id = s.id)
             SELECT EXISTS (SELECT 1 FROM subtree WHERE trash_time IS NOT NULL)
                 OR EXISTS (SELECT 1 FROM datasets \
                            WHERE container_id IN (SELECT id FROM subtree) \
                            AND trash_time IS NOT NULL)",
        )
        .bind(id)
        .fetch_one(self.pool())
        .await?;
        Ok(found)
    }

    /// Flag or clear the container's pending-work markers.
    pub async fn set_needs(&self, id: i64, finding: bool, processing: bool) -> Result<()> {
        sqlx::query("UPDATE containers SET needs_finding = $2, needs_processing = $3 WHERE id = $1")
            .bind(id)
            .bind(finding)
            .bind(processing)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Set or clear the container's updated flag.
    pub async fn set_updated(&self, id: i64, updated: bool) -> Result<()> {
        sqlx::query("UPDATE containers SET updated = $2 WHERE id = $1")
            .bind(id)
            .bind(updated)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Parent container, if any.
    pub async fn parent(&self, container: &Container) -> Result<Option<Container>> {
        match container.parent_id {
            Some(pid) => Ok(Some(self.container(pid).await?)),
            None => Ok(None),
        }
    }
}
