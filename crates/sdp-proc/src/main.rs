//! SDP Proc - pipeline scheduler daemon

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use sdp_common::logging::{init_logging, LogConfig, LogLevel};
use sdp_core::{JobTask, Store};
use sdp_proc::converters::{ConverterRegistry, DicomConverter, KspaceConverter};
use sdp_proc::pyramid::DEFAULT_TILE_SIZE;
use sdp_proc::{PipelineContext, Scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sdp-proc")]
#[command(author, version, about = "SDP pipeline scheduler")]
struct Cli {
    /// Postgres store URI
    db_uri: String,

    /// Data root holding dataset directories
    data_path: PathBuf,

    /// Physiological recording archive
    physio_path: PathBuf,

    /// Only run jobs of this task
    #[arg(short, long)]
    task: Option<Task>,

    /// Maximum concurrent jobs
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Reset active and failed jobs to new on startup
    #[arg(short, long)]
    reset: bool,

    /// Seconds to sleep between queue polls
    #[arg(short, long, default_value_t = 10)]
    sleeptime: u64,

    /// Process name used in log output
    #[arg(short = 'n', long, default_value = "sdp-proc")]
    logname: String,

    /// Log file; console only when unset
    #[arg(short = 'f', long)]
    logfile: Option<PathBuf>,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    loglevel: LogLevel,

    /// DICOM series-to-volume conversion command
    #[arg(long, default_value = "dcm2nii")]
    dicom_command: String,

    /// K-space reconstruction command
    #[arg(long, default_value = "sprec")]
    recon_command: String,

    /// Pyramid tile edge length in pixels
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    tile_size: u32,

    /// Script URL written into pyramid viewer pages
    #[arg(long, default_value = "/static/pyramid.js")]
    viewer_script_url: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Task {
    Find,
    Proc,
}

impl From<Task> for JobTask {
    fn from(task: Task) -> JobTask {
        match task {
            Task::Find => JobTask::Find,
            Task::Proc => JobTask::Proc,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::new(&cli.logname, cli.loglevel, cli.logfile.as_deref());
    init_logging(&log_config)?;

    let store = Store::connect(&cli.db_uri)
        .await
        .context("Failed to connect to store")?;
    store.migrate().await.context("Failed to run migrations")?;

    if cli.reset {
        let count = store
            .reset_active_and_failed(&cli.data_path, cli.task.map(Into::into))
            .await?;
        info!(count, "reset jobs on startup");
    }

    let mut registry = ConverterRegistry::new();
    registry.register(Arc::new(DicomConverter::new(&cli.dicom_command)));
    registry.register(Arc::new(KspaceConverter::new(&cli.recon_command)));

    let ctx = Arc::new(PipelineContext {
        store,
        data_root: cli.data_path,
        physio_root: cli.physio_path,
        registry,
        tile_size: cli.tile_size,
        viewer_script_url: cli.viewer_script_url,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let scheduler = Scheduler::new(
        ctx,
        cli.task.map(Into::into),
        cli.jobs,
        Duration::from_secs(cli.sleeptime),
    );
    scheduler.run(shutdown_rx).await;
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
