//! Dataset operations: content-addressed allocation, digest refresh,
//! provenance edges, and deletion with on-disk content.

use super::containers::trash_clause;
use super::{Store, TrashFilter};
use crate::content;
use crate::error::{CoreError, Result};
use crate::models::dataset::{Dataset, DatasetKind};
use sdp_common::digest;
use std::path::Path;
use tracing::{debug, info};

const DATASET_COLS: &str = "id, container_id, kind, datatype, offset_secs, trash_time, \
     update_time, digest, compressed, archived, file_cnt_act, file_cnt_tgt";

impl Store {
    /// Fetch one dataset by id.
    pub async fn dataset(&self, id: i64) -> Result<Dataset> {
        let sql = format!("SELECT {DATASET_COLS} FROM datasets WHERE id = $1");
        sqlx::query_as::<_, Dataset>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(CoreError::DatasetNotFound(id))
    }

    /// Allocate a dataset: insert the record, then create its directory
    /// under `data_root` at the path determined by the new id. This is the
    /// only way datasets come into existence.
    pub async fn create_dataset(
        &self,
        data_root: &Path,
        container_id: i64,
        kind: DatasetKind,
        datatype: &str,
        archived: bool,
    ) -> Result<Dataset> {
        let sql = format!(
            "INSERT INTO datasets (container_id, kind, datatype, archived) \
             VALUES ($1, $2, $3, $4) RETURNING {DATASET_COLS}"
        );
        let dataset = sqlx::query_as::<_, Dataset>(&sql)
            .bind(container_id)
            .bind(kind.as_str())
            .bind(datatype)
            .bind(archived)
            .fetch_one(self.pool())
            .await?;
        content::ensure_dir(data_root, dataset.id, dataset.archived)?;
        debug!(
            id = dataset.id,
            container = container_id,
            datatype,
            "allocated dataset at {}",
            dataset.relpath().display()
        );
        Ok(dataset)
    }

    /// The container's primary dataset, if registered.
    pub async fn primary_dataset(&self, container_id: i64) -> Result<Option<Dataset>> {
        let sql = format!(
            "SELECT {DATASET_COLS} FROM datasets \
             WHERE container_id = $1 AND kind = 'primary'"
        );
        Ok(sqlx::query_as::<_, Dataset>(&sql)
            .bind(container_id)
            .fetch_optional(self.pool())
            .await?)
    }

    /// Datasets of a container, under an explicit trash filter.
    pub async fn datasets(
        &self,
        container_id: i64,
        filter: TrashFilter,
    ) -> Result<Vec<Dataset>> {
        let sql = format!(
            "SELECT {DATASET_COLS} FROM datasets WHERE container_id = $1{} ORDER BY id",
            trash_clause(filter)
        );
        Ok(sqlx::query_as::<_, Dataset>(&sql)
            .bind(container_id)
            .fetch_all(self.pool())
            .await?)
    }

    /// Set the dataset's file-count bookkeeping.
    pub async fn set_file_counts(&self, id: i64, actual: i32, target: i32) -> Result<()> {
        sqlx::query(
            "UPDATE datasets SET file_cnt_act = $2, file_cnt_tgt = $3, update_time = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(actual)
        .bind(target)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Bump `file_cnt_act` by one, as each file lands on disk.
    pub async fn increment_file_count(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE datasets SET file_cnt_act = file_cnt_act + 1, update_time = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Recompute the dataset's content digest and file count from disk.
    ///
    /// Returns whether the digest changed versus the stored value; a change
    /// also flips the owning container's updated flag.
    pub async fn refresh_digest(&self, data_root: &Path, id: i64) -> Result<bool> {
        let dataset = self.dataset(id).await?;
        let dir = data_root.join(dataset.relpath());
        let (new_digest, file_count) = digest::digest_dir(&dir)?;
        let changed = dataset.digest.as_deref() != Some(&new_digest[..]);

        sqlx::query(
            "UPDATE datasets SET digest = $2, file_cnt_act = $3, update_time = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&new_digest[..])
        .bind(file_count as i32)
        .execute(self.pool())
        .await?;

        if changed {
            self.set_updated(dataset.container_id, true).await?;
            debug!(
                id,
                digest = %digest::to_hex(&new_digest),
                files = file_count,
                "dataset content changed"
            );
        }
        Ok(changed)
    }

    /// Record a provenance edge: `id` was derived from `parent_id`.
    pub async fn add_dataset_parent(&self, id: i64, parent_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO dataset_parents (dataset_id, parent_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(parent_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Provenance parents of a dataset.
    pub async fn dataset_parents(&self, id: i64) -> Result<Vec<Dataset>> {
        let sql = format!(
            "SELECT {DATASET_COLS} FROM datasets WHERE id IN \
             (SELECT parent_id FROM dataset_parents WHERE dataset_id = $1) ORDER BY id"
        );
        Ok(sqlx::query_as::<_, Dataset>(&sql)
            .bind(id)
            .fetch_all(self.pool())
            .await?)
    }

    /// Remove a dataset and its on-disk content, detaching it from the
    /// hierarchy. Missing directories are fine: deletion is idempotent.
    pub async fn delete_dataset(&self, data_root: &Path, dataset: &Dataset) -> Result<()> {
        let dir = data_root.join(dataset.relpath());
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        sqlx::query("DELETE FROM dataset_parents WHERE dataset_id = $1 OR parent_id = $1")
            .bind(dataset.id)
            .execute(self.pool())
            .await?;
        sqlx::query("DELETE FROM datasets WHERE id = $1")
            .bind(dataset.id)
            .execute(self.pool())
            .await?;
        info!(id = dataset.id, datatype = %dataset.datatype, "deleted dataset");
        Ok(())
    }

    /// Trash a single dataset.
    pub async fn trash_dataset(&self, id: i64, at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let updated = sqlx::query("UPDATE datasets SET trash_time = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(self.pool())
            .await?;
        if updated.rows_affected() == 0 {
            return Err(CoreError::DatasetNotFound(id));
        }
        Ok(())
    }

    /// Untrash a dataset, clearing every trashed ancestor container too.
    pub async fn untrash_dataset(&self, id: i64) -> Result<()> {
        let dataset = self.dataset(id).await?;
        sqlx::query("UPDATE datasets SET trash_time = NULL WHERE id = $1")
            .bind(id)
            .execute(self.pool())
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
        .bind(dataset.container_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
