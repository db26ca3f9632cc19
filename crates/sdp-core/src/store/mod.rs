//! Postgres-backed store.
//!
//! The relational store is the sole synchronization point between the
//! scheduler, its workers, and any other process: all cross-worker
//! coordination state lives here, and the job queue's row lock is the only
//! mutual-exclusion primitive in the system.

mod containers;
mod datasets;
mod jobs;

use crate::error::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Trash visibility for listing calls. Always passed explicitly; there is
/// no ambient per-session default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrashFilter {
    /// Trashed and live records alike
    ShowAll,
    /// Live records only
    #[default]
    HideTrash,
    /// Trashed records only
    OnlyTrash,
}

/// Handle to the shared relational store
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to the store at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, embedding).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
