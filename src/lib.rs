// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod lock;
pub mod logging;
pub mod notify;
pub mod packager;
pub mod persist;
pub mod platform;
pub mod types;
pub mod wrapper;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::config::FileConfigSource;
use crate::dag::{JobGraph, build_job_graph};
use crate::engine::{RunOutcome, SchedulerCore, SchedulerLoop};
use crate::errors::ExpflowError;
use crate::lock::LockManager;
use crate::notify::LogNotifier;
use crate::persist::{JsonFileStore, PersistenceStore};
use crate::platform::PlatformRegistry;
use crate::wrapper::PackageTable;

/// How the process should exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Finished(RunOutcome),
    /// Another instance holds the experiment lock.
    AlreadyRunning,
    DryRun,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Finished(outcome) => outcome.exit_code(),
            ExitStatus::AlreadyRunning => 3,
            ExitStatus::DryRun => 0,
        }
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the experiment lock
/// - saved state or a freshly built job graph
/// - platform adapters
/// - Ctrl-C handling
/// - the scheduler loop
pub async fn run(args: CliArgs) -> Result<ExitStatus> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let transitive_reduction = args.notransitive.then_some(false);

    if args.dry_run {
        let graph = build_job_graph(&cfg, transitive_reduction)?;
        print_dry_run(&cfg, &graph);
        return Ok(ExitStatus::DryRun);
    }

    let expid = cfg.expid().to_string();
    let locks = LockManager::new(&cfg.experiment.state_dir);
    let _lock = match locks
        .acquire(&expid, Duration::from_secs(args.lock_timeout))
        .await
    {
        Ok(lock) => lock,
        Err(ExpflowError::AlreadyLocked(_)) => {
            warn!(expid = %expid, "experiment is already running elsewhere; nothing to do");
            return Ok(ExitStatus::AlreadyRunning);
        }
        Err(e) => return Err(e.into()),
    };

    let store = JsonFileStore::new(&cfg.experiment.state_dir);
    let (graph, packages) = match store.load(&expid)? {
        Some(state) => (state.graph, state.packages),
        None => {
            let graph = build_job_graph(&cfg, transitive_reduction)?;
            info!(expid = %expid, jobs = graph.len(), "job graph built");
            (graph, PackageTable::new())
        }
    };

    let platforms = PlatformRegistry::from_config(&cfg)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            cancel.cancel();
        });
    }

    let core = SchedulerCore::new(graph, packages, cfg);
    let scheduler = SchedulerLoop::new(
        core,
        platforms,
        Box::new(store),
        Box::new(FileConfigSource::new(config_path)),
        Arc::new(LogNotifier),
        cancel,
    );
    let summary = scheduler.run().await?;
    Ok(ExitStatus::Finished(summary.outcome))
}

/// Print the expanded job graph without touching any platform.
fn print_dry_run(cfg: &ConfigFile, graph: &JobGraph) {
    println!("expflow dry-run");
    println!("  experiment = {}", cfg.expid());
    println!("  default_platform = {}", graph.default_platform());
    println!("  wrapper = {}", cfg.wrapper.wrapper_type);
    println!();

    println!("jobs ({}):", graph.len());
    for job in graph.jobs() {
        println!("  - {} [{}]", job.name, job.status);
        println!("      platform: {}", graph.platform_of(job));
        if !job.parents.is_empty() {
            println!("      parents: {:?}", job.parents);
        }
        if let Some(ref script) = job.script {
            println!("      script: {script}");
        }
    }
}
