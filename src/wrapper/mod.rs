// src/wrapper/mod.rs

//! Runtime view of submitted packages.
//!
//! A package of one job is tracked through the job itself. A package of
//! several jobs becomes a [`WrapperJob`]: one remote id shared by all
//! members, whose status is derived from the members instead of stored.

pub mod table;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::dag::{Job, JobGraph, Status};
use crate::packager::Package;
use crate::types::{JobName, RemoteId, Wallclock, WrapperType};

pub use table::PackageTable;

/// Anything the loop can ask "what state are you in".
pub trait StatusQuery {
    fn status(&self, graph: &JobGraph) -> Status;
}

impl StatusQuery for Job {
    fn status(&self, _graph: &JobGraph) -> Status {
        self.status
    }
}

/// A submitted multi-job package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrapperJob {
    pub name: String,
    pub platform: String,
    pub remote_id: RemoteId,
    pub wrapper_type: WrapperType,
    /// Members in submission order.
    pub members: Vec<JobName>,
    pub wallclock: Wallclock,
    pub processors: u32,
    /// Last state the platform reported for the remote id.
    #[serde(default = "initial_remote_status")]
    pub remote_status: Status,
    /// Last time the wrapper was polled; never persisted.
    #[serde(skip)]
    pub checked_time: Option<Instant>,
}

fn initial_remote_status() -> Status {
    Status::Submitted
}

impl WrapperJob {
    pub fn from_package(package: &Package, remote_id: RemoteId) -> Self {
        Self {
            name: package.name.clone(),
            platform: package.platform.clone(),
            remote_id,
            wrapper_type: package.wrapper_type,
            members: package.jobs.clone(),
            wallclock: package.wallclock,
            processors: package.processors,
            remote_status: Status::Submitted,
            checked_time: None,
        }
    }

    /// Polled at most once per `interval`.
    pub fn due_for_check(&self, now: Instant, interval: Duration) -> bool {
        match self.checked_time {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= interval,
        }
    }

    pub fn mark_checked(&mut self, now: Instant) {
        self.checked_time = Some(now);
    }

    /// Every member reached COMPLETED or FAILED.
    pub fn is_finished(&self, graph: &JobGraph) -> bool {
        self.members.iter().all(|m| {
            matches!(
                graph.status_of(m),
                Some(Status::Completed | Status::Failed) | None
            )
        })
    }

    /// Members not yet COMPLETED or FAILED, in submission order.
    pub fn unfinished_members<'a>(&'a self, graph: &'a JobGraph) -> impl Iterator<Item = &'a JobName> {
        self.members.iter().filter(move |m| {
            !matches!(
                graph.status_of(m),
                Some(Status::Completed | Status::Failed) | None
            )
        })
    }
}

impl StatusQuery for WrapperJob {
    /// COMPLETED iff every member completed, FAILED if any member failed,
    /// otherwise RUNNING or QUEUING after the remote state.
    fn status(&self, graph: &JobGraph) -> Status {
        let statuses: Vec<Status> = self
            .members
            .iter()
            .filter_map(|m| graph.status_of(m))
            .collect();

        if !statuses.is_empty() && statuses.iter().all(|s| *s == Status::Completed) {
            Status::Completed
        } else if statuses.contains(&Status::Failed) {
            Status::Failed
        } else if self.remote_status == Status::Running || statuses.contains(&Status::Running) {
            Status::Running
        } else {
            Status::Queuing
        }
    }
}

/// One thing to poll: a plain job or a whole wrapper.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PollUnit {
    Single(JobName),
    Composite(String),
}

impl PollUnit {
    pub fn name(&self) -> &str {
        match self {
            PollUnit::Single(name) | PollUnit::Composite(name) => name,
        }
    }

    pub fn status(&self, graph: &JobGraph, packages: &PackageTable) -> Option<Status> {
        match self {
            PollUnit::Single(name) => graph.job(name).map(|j| j.status(graph)),
            PollUnit::Composite(name) => packages.get(name).map(|w| w.status(graph)),
        }
    }
}
