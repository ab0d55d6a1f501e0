// src/dag/job.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::dag::Status;
use crate::types::{JobName, RemoteId, Wallclock};

/// One unit of work in the experiment, parameterised by
/// date / member / chunk / split and owned by the job graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: JobName,
    pub id: u64,
    pub section: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub member: Option<String>,
    #[serde(default)]
    pub chunk: Option<u32>,
    #[serde(default)]
    pub split: Option<u32>,

    pub status: Status,
    /// Explicit platform; `None` means the experiment default.
    #[serde(default)]
    pub platform: Option<String>,

    #[serde(default)]
    pub parents: BTreeSet<JobName>,
    #[serde(default)]
    pub children: BTreeSet<JobName>,

    #[serde(default)]
    pub fail_count: u32,
    pub max_retrials: u32,
    /// `max_retrials` came from the job section rather than the experiment default.
    #[serde(default)]
    pub explicit_retrials: bool,

    pub wallclock: Wallclock,
    pub processors: u32,
    #[serde(default)]
    pub notify_on: BTreeSet<Status>,
    #[serde(default)]
    pub skippable: bool,
    #[serde(default)]
    pub script: Option<String>,

    /// Loop iteration at which the job last became READY.
    #[serde(default)]
    pub ready_since: Option<u64>,
    #[serde(default)]
    pub remote_id: Option<RemoteId>,
}

impl Job {
    /// A job with default resources; the builder fills in the rest.
    pub fn new(name: impl Into<JobName>, section: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: 0,
            section: section.into(),
            date: None,
            member: None,
            chunk: None,
            split: None,
            status: Status::Waiting,
            platform: None,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            fail_count: 0,
            max_retrials: 0,
            explicit_retrials: false,
            wallclock: Wallclock::ZERO,
            processors: 1,
            notify_on: BTreeSet::new(),
            skippable: false,
            script: None,
            ready_since: None,
            remote_id: None,
        }
    }

    pub fn has_parents(&self) -> bool {
        !self.parents.is_empty()
    }

    /// Platform this job runs on, falling back to the experiment default.
    pub fn platform_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.platform.as_deref().unwrap_or(default)
    }

    /// FAILED with no retrials left.
    pub fn is_exhausted(&self) -> bool {
        self.status == Status::Failed && self.fail_count >= self.max_retrials
    }

    /// COMPLETED, exhausted FAILED, or SUSPENDED.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, Status::Completed | Status::Suspended) || self.is_exhausted()
    }

    /// Per-job runtime parameters handed to the platform on submission.
    pub fn parameters(&self, expid: &str) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("EXPID".to_string(), expid.to_string());
        params.insert("JOBNAME".to_string(), self.name.clone());
        params.insert("SECTION".to_string(), self.section.clone());
        if let Some(date) = &self.date {
            params.insert("SDATE".to_string(), date.clone());
        }
        if let Some(member) = &self.member {
            params.insert("MEMBER".to_string(), member.clone());
        }
        if let Some(chunk) = self.chunk {
            params.insert("CHUNK".to_string(), chunk.to_string());
        }
        if let Some(split) = self.split {
            params.insert("SPLIT".to_string(), split.to_string());
        }
        params
    }
}
