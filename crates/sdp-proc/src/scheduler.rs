//! Poll-and-claim scheduler loop.
//!
//! Claims jobs from the shared store while in-flight workers stay under the
//! configured cap, running each as an independent tokio task. On shutdown
//! the loop stops claiming and drains in-flight workers to completion; jobs
//! are never cancelled mid-stage.

use crate::pipeline::{self, PipelineContext};
use sdp_core::JobTask;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub struct Scheduler {
    ctx: Arc<PipelineContext>,
    task: Option<JobTask>,
    max_jobs: usize,
    sleeptime: Duration,
}

impl Scheduler {
    pub fn new(
        ctx: Arc<PipelineContext>,
        task: Option<JobTask>,
        max_jobs: usize,
        sleeptime: Duration,
    ) -> Self {
        Self {
            ctx,
            task,
            max_jobs: max_jobs.max(1),
            sleeptime,
        }
    }

    /// Run until `shutdown` flips to true, then drain in-flight jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_jobs = self.max_jobs,
            task = ?self.task.map(|t| t.as_str()),
            "scheduler started"
        );
        let mut workers: JoinSet<()> = JoinSet::new();

        loop {
            while let Some(result) = workers.try_join_next() {
                if let Err(e) = result {
                    warn!(error = %e, "worker task panicked");
                }
            }
            if *shutdown.borrow() {
                break;
            }

            if workers.len() < self.max_jobs {
                match self.ctx.store.claim_next(self.task).await {
                    Ok(Some(job)) => {
                        let ctx = Arc::clone(&self.ctx);
                        workers.spawn(async move {
                            pipeline::run_job(&ctx, job).await;
                        });
                        // There may be more eligible work; claim again
                        // before sleeping.
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "claim failed"),
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(self.sleeptime) => {}
            }
        }

        if !workers.is_empty() {
            info!(in_flight = workers.len(), "draining in-flight jobs");
        }
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "worker task panicked");
            }
        }
        info!("scheduler stopped");
    }
}
