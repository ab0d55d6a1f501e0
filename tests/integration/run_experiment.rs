// tests/integration/run_experiment.rs

use std::path::Path;
use std::time::Duration;

use expflow::cli::CliArgs;
use expflow::dag::Status;
use expflow::engine::RunOutcome;
use expflow::lock::LockManager;
use expflow::persist::{JsonFileStore, PersistenceStore};
use expflow::{ExitStatus, run};
use tempfile::TempDir;

use crate::common::{TestResult, init_tracing, with_timeout};

/// Write an experiment config into `dir` and return its path.
///
/// INI runs once per member; SIM runs per chunk behind INI and itself.
fn write_experiment(dir: &Path, sim_script: &str) -> std::io::Result<String> {
    let state_dir = dir.join("state");
    let contents = format!(
        r#"
[experiment]
expid = "t001"
dates = ["20000101"]
members = ["fc0"]
num_chunks = 2
default_platform = "local"
safety_sleep_time = 0
state_dir = '{state}'

[parameters]
GREETING = "hello"

[platform.local]
type = "local"

[job.INI]
running = "member"
script = "echo %GREETING% %MEMBER%"

[job.SIM]
running = "chunk"
dependencies = ["INI", "SIM-1"]
script = "{sim_script}"
"#,
        state = state_dir.display(),
    );
    let path = dir.join("Expflow.toml");
    std::fs::write(&path, contents)?;
    Ok(path.display().to_string())
}

fn args(config: String) -> CliArgs {
    CliArgs {
        config,
        log_level: None,
        dry_run: false,
        notransitive: false,
        lock_timeout: 0,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_experiment_runs_to_completion_on_local_platform() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let config = write_experiment(dir.path(), "echo chunk %CHUNK%")?;

    let status = with_timeout(run(args(config.clone()))).await?;
    assert_eq!(status, ExitStatus::Finished(RunOutcome::Completed));
    assert_eq!(status.code(), 0);

    let store = JsonFileStore::new(dir.path().join("state"));
    let state = store.load("t001")?.expect("state persisted");
    assert_eq!(state.graph.len(), 3);
    assert!(state.graph.jobs().all(|j| j.status == Status::Completed));

    let platform_root = dir.path().join("state/t001/platforms/local");
    let ini_log = std::fs::read_to_string(platform_root.join("t001_20000101_fc0_INI.out"))?;
    assert_eq!(ini_log.trim(), "hello fc0");
    assert!(platform_root.join("t001_20000101_fc0_2_SIM_COMPLETED").exists());

    // A finished experiment resumes from its saved state and ends at once.
    let again = with_timeout(run(args(config))).await?;
    assert_eq!(again, ExitStatus::Finished(RunOutcome::Completed));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_script_fails_the_experiment() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let config = write_experiment(dir.path(), "exit 1")?;

    let status = with_timeout(run(args(config))).await?;
    assert_eq!(
        status,
        ExitStatus::Finished(RunOutcome::Failed(vec!["t001_20000101_fc0_1_SIM".to_string()]))
    );
    assert_eq!(status.code(), 1);
    Ok(())
}

#[tokio::test]
async fn test_locked_experiment_exits_with_already_running() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let config = write_experiment(dir.path(), "true")?;

    let _held = LockManager::new(dir.path().join("state")).acquire("t001", Duration::ZERO).await?;

    let status = with_timeout(run(args(config))).await?;
    assert_eq!(status, ExitStatus::AlreadyRunning);
    assert_eq!(status.code(), 3);
    Ok(())
}

#[tokio::test]
async fn test_dry_run_touches_nothing() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let config = write_experiment(dir.path(), "true")?;

    let mut dry = args(config);
    dry.dry_run = true;
    let status = with_timeout(run(dry)).await?;

    assert_eq!(status, ExitStatus::DryRun);
    assert_eq!(status.code(), 0);
    assert!(!dir.path().join("state").exists());
    Ok(())
}

#[tokio::test]
async fn test_invalid_config_is_an_error() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let path = dir.path().join("Expflow.toml");
    std::fs::write(&path, "[experiment]\nexpid = \"t001\"\ndefault_platform = \"local\"\n")?;

    let result = run(args(path.display().to_string())).await;
    assert!(result.is_err());
    Ok(())
}
