pub mod builders;
pub mod fake_platform;

use std::sync::{Arc, Mutex, Once};

use expflow::config::{ConfigFile, StaticConfigSource};
use expflow::dag::{JobGraph, build_job_graph};
use expflow::engine::{SchedulerCore, SchedulerLoop};
use expflow::errors::Result;
use expflow::notify::{Notifier, StatusNotification};
use expflow::persist::{ExperimentState, PersistenceStore};
use expflow::platform::PlatformRegistry;
use expflow::wrapper::PackageTable;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

use crate::fake_platform::{PlatformLog, ScriptedPlatform};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Notifier that keeps every notification it was handed.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    seen: Arc<Mutex<Vec<StatusNotification>>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<StatusNotification> {
        self.seen.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &StatusNotification) {
        self.seen.lock().unwrap().push(notification.clone());
    }
}

/// In-memory store that counts saves and keeps the latest state.
#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    inner: Arc<Mutex<StoreLog>>,
}

#[derive(Debug, Default)]
struct StoreLog {
    saves: usize,
    latest: Option<ExperimentState>,
}

impl RecordingStore {
    pub fn saves(&self) -> usize {
        self.inner.lock().unwrap().saves
    }

    pub fn latest(&self) -> Option<ExperimentState> {
        self.inner.lock().unwrap().latest.clone()
    }
}

impl PersistenceStore for RecordingStore {
    fn load(&self, _expid: &str) -> Result<Option<ExperimentState>> {
        Ok(self.latest())
    }

    fn save(&self, _expid: &str, graph: &JobGraph, packages: &PackageTable) -> Result<()> {
        let mut log = self.inner.lock().unwrap();
        log.saves += 1;
        log.latest = Some(ExperimentState {
            graph: graph.clone(),
            packages: packages.clone(),
        });
        Ok(())
    }
}

/// A scheduler loop wired to one scripted platform plus recording
/// collaborators.
pub struct Harness {
    pub scheduler: SchedulerLoop,
    pub platform: Arc<Mutex<PlatformLog>>,
    pub notifier: RecordingNotifier,
    pub store: RecordingStore,
    pub cancel: CancellationToken,
}

impl Harness {
    /// Build the graph from `cfg` and register `platform` under its name.
    pub fn new(cfg: ConfigFile, platform: ScriptedPlatform) -> Self {
        Self::with_cancel(cfg, platform, CancellationToken::new())
    }

    pub fn with_cancel(cfg: ConfigFile, platform: ScriptedPlatform, cancel: CancellationToken) -> Self {
        let graph = build_job_graph(&cfg, None).expect("graph builds from config");
        Self::from_graph(cfg, graph, platform, cancel)
    }

    pub fn from_graph(
        cfg: ConfigFile,
        graph: JobGraph,
        platform: ScriptedPlatform,
        cancel: CancellationToken,
    ) -> Self {
        use expflow::platform::PlatformAdapter;

        let log = platform.log();
        let mut registry = PlatformRegistry::new();
        let name = platform.name().to_string();
        registry.register(&name, Box::new(platform));

        let notifier = RecordingNotifier::default();
        let store = RecordingStore::default();
        let core = SchedulerCore::new(graph, PackageTable::new(), cfg.clone());
        let scheduler = SchedulerLoop::new(
            core,
            registry,
            Box::new(store.clone()),
            Box::new(StaticConfigSource::new(cfg)),
            Arc::new(notifier.clone()),
            cancel.clone(),
        );

        Self {
            scheduler,
            platform: log,
            notifier,
            store,
            cancel,
        }
    }

    pub fn submission_count(&self) -> usize {
        self.platform.lock().unwrap().submissions.len()
    }
}
