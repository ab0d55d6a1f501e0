// src/platform/mod.rs

//! Platform adapter abstraction.
//!
//! The scheduler loop talks to every batch system through a
//! [`PlatformAdapter`]. Adapters are looked up by canonical platform name in
//! the [`registry::PlatformRegistry`]; [`local::LocalPlatform`] is the
//! built-in adapter that runs job scripts as local processes. Tests provide
//! their own scripted adapters.

pub mod local;
pub mod registry;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::dag::{Job, Status};
use crate::packager::Package;
use crate::types::RemoteId;

pub use local::LocalPlatform;
pub use registry::PlatformRegistry;

/// Boxed future returned by adapter methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Experiment-wide `[parameters]` handed to every submission.
pub type RuntimeParameters = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum PlatformError {
    /// Network hiccup or similar; the loop retries on the next iteration.
    #[error("transient platform error: {0}")]
    Transient(String),

    #[error("template substitution failed for job {job}: {detail}")]
    TemplateSubstitution { job: String, detail: String },

    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("platform IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlatformError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Transient(_))
    }
}

/// Everything an adapter needs to submit one package.
#[derive(Debug, Clone)]
pub struct Submission {
    pub expid: String,
    pub package: Package,
    /// Snapshots of the package members, in package order.
    pub jobs: Vec<Job>,
    /// Remote id the package must wait for, if chained.
    pub remote_dependency: Option<RemoteId>,
}

impl Submission {
    /// Runtime parameters for one member: experiment-wide values overlaid
    /// with the job's own coordinates.
    pub fn parameters_for(&self, job: &Job, experiment: &RuntimeParameters) -> RuntimeParameters {
        let mut params = experiment.clone();
        params.extend(job.parameters(&self.expid));
        params
    }
}

/// Result of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub remote_id: RemoteId,
}

/// Trait abstracting one remote batch system.
///
/// Methods take `&mut self`: calls to the same platform never overlap.
pub trait PlatformAdapter: Send {
    /// Canonical platform name.
    fn name(&self) -> &str;

    /// Submit a package as a single remote unit.
    fn submit<'a>(
        &'a mut self,
        submission: &'a Submission,
        parameters: &'a RuntimeParameters,
    ) -> BoxFuture<'a, Result<SubmissionOutcome, PlatformError>>;

    /// Current state of a remote unit.
    fn check_job<'a>(&'a mut self, remote_id: &'a str) -> BoxFuture<'a, Result<Status, PlatformError>>;

    /// Whether the job's completion marker exists.
    fn get_completed_files<'a>(
        &'a mut self,
        job_name: &'a str,
        retries: u32,
    ) -> BoxFuture<'a, Result<bool, PlatformError>>;

    /// Bring the logs of a finished job home.
    fn get_logs_files<'a>(
        &'a mut self,
        expid: &'a str,
        remote_log_path: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>>;
}
