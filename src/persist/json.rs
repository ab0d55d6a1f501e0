// src/persist/json.rs

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::dag::JobGraph;
use crate::errors::{ExpflowError, Result};
use crate::persist::{ExperimentState, ExperimentStateRef, PersistenceStore};
use crate::wrapper::PackageTable;

/// Stores each experiment as one JSON document under
/// `<root>/<expid>/pkl/job_list_<expid>.json`.
///
/// Saves write a temporary sibling file, fsync it, then rename it over the
/// previous document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn state_path(&self, expid: &str) -> PathBuf {
        self.root
            .join(expid)
            .join("pkl")
            .join(format!("job_list_{expid}.json"))
    }
}

impl PersistenceStore for JsonFileStore {
    fn load(&self, expid: &str) -> Result<Option<ExperimentState>> {
        let path = self.state_path(expid);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(expid, path = %path.display(), "no saved state");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let state: ExperimentState = serde_json::from_slice(&bytes)?;
        if state.graph.expid() != expid {
            return Err(ExpflowError::ConfigError(format!(
                "state file {} belongs to experiment '{}', not '{expid}'",
                path.display(),
                state.graph.expid()
            )));
        }
        info!(
            expid,
            jobs = state.graph.len(),
            wrappers = state.packages.len(),
            "restored saved state"
        );
        Ok(Some(state))
    }

    fn save(&self, expid: &str, graph: &JobGraph, packages: &PackageTable) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&ExperimentStateRef { graph, packages })?;
        let path = self.state_path(expid);
        atomic_write_bytes(&path, &bytes)?;
        debug!(expid, path = %path.display(), bytes = bytes.len(), "state saved");
        Ok(())
    }
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("state");
    let tmp = path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
