// src/persist/mod.rs

//! Persistence of the job graph and the package-membership table.
//!
//! The store must be atomic: after a crash the saved state is either the
//! previous save or the new one, never a mix.

pub mod json;

use serde::{Deserialize, Serialize};

use crate::dag::JobGraph;
use crate::errors::Result;
use crate::wrapper::PackageTable;

pub use json::JsonFileStore;

/// Everything needed to resume an experiment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExperimentState {
    pub graph: JobGraph,
    #[serde(default)]
    pub packages: PackageTable,
}

/// Borrowed view written by [`PersistenceStore::save`].
#[derive(Debug, Serialize)]
pub(crate) struct ExperimentStateRef<'a> {
    pub graph: &'a JobGraph,
    pub packages: &'a PackageTable,
}

/// Loads and saves experiment state keyed by experiment id.
pub trait PersistenceStore: Send {
    /// `Ok(None)` when nothing was saved for `expid` yet.
    fn load(&self, expid: &str) -> Result<Option<ExperimentState>>;

    fn save(&self, expid: &str, graph: &JobGraph, packages: &PackageTable) -> Result<()>;
}
