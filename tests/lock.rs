// tests/lock.rs

mod common;
use crate::common::TestResult;

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use expflow::errors::ExpflowError;
use expflow::lock::LockManager;

#[tokio::test]
async fn test_second_holder_times_out_with_already_locked() -> TestResult {
    let dir = tempfile::tempdir()?;
    let manager = LockManager::new(dir.path());

    let _held = manager.acquire("a000", Duration::from_millis(200)).await?;

    let started = Instant::now();
    match manager.acquire("a000", Duration::from_millis(200)).await {
        Err(ExpflowError::AlreadyLocked(expid)) => assert_eq!(expid, "a000"),
        other => panic!("expected AlreadyLocked, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_millis(200));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn test_waiting_for_lock_leaves_runtime_free() -> TestResult {
    let dir = tempfile::tempdir()?;
    let manager = LockManager::new(dir.path());
    let _held = manager.acquire("a000", Duration::ZERO).await?;

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let result = manager.acquire("a000", Duration::from_millis(300)).await;
    ticker.abort();

    assert!(matches!(result, Err(ExpflowError::AlreadyLocked(_))));
    assert!(
        ticks.load(Ordering::SeqCst) > 0,
        "other tasks should run while acquire waits"
    );
    Ok(())
}

#[tokio::test]
async fn test_dropping_the_lock_releases_it() -> TestResult {
    let dir = tempfile::tempdir()?;
    let manager = LockManager::new(dir.path());

    let first = manager.acquire("a000", Duration::ZERO).await?;
    assert_eq!(first.expid(), "a000");
    drop(first);

    let again = manager.acquire("a000", Duration::ZERO).await?;
    assert_eq!(again.path(), manager.lock_path("a000").as_path());
    Ok(())
}

#[tokio::test]
async fn test_experiments_lock_independently() -> TestResult {
    let dir = tempfile::tempdir()?;
    let manager = LockManager::new(dir.path());

    let _a = manager.acquire("a000", Duration::ZERO).await?;
    let _b = manager.acquire("b111", Duration::ZERO).await?;
    Ok(())
}

#[tokio::test]
async fn test_lock_file_records_holder_pid() -> TestResult {
    let dir = tempfile::tempdir()?;
    let manager = LockManager::new(dir.path());

    let lock = manager.acquire("a000", Duration::ZERO).await?;
    assert!(lock.path().ends_with("a000/tmp/expflow.lock"));
    let payload: serde_json::Value = serde_json::from_str(&fs::read_to_string(lock.path())?)?;
    assert_eq!(payload["pid"], serde_json::json!(std::process::id()));
    Ok(())
}
