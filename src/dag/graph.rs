// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::dag::{Job, Status, Transition};
use crate::errors::{ExpflowError, Result};
use crate::types::JobName;
use crate::wrapper::{PackageTable, PollUnit};

/// Free submission slots per platform.
///
/// Platforms without an entry are unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capacity {
    slots: BTreeMap<String, usize>,
}

impl Capacity {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform: impl Into<String>, free: usize) -> Self {
        self.slots.insert(platform.into(), free);
        self
    }

    pub fn set(&mut self, platform: impl Into<String>, free: usize) {
        self.slots.insert(platform.into(), free);
    }

    pub fn free(&self, platform: &str) -> usize {
        self.slots.get(platform).copied().unwrap_or(usize::MAX)
    }

    /// Consume one slot; returns false when the platform is full.
    pub fn take(&mut self, platform: &str) -> bool {
        match self.slots.get_mut(platform) {
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
            None => true,
        }
    }
}

/// The experiment's jobs and their parent/child edges.
///
/// Edges are fixed once the graph is built; afterwards only job status and
/// bookkeeping fields change. The graph is always acyclic.
#[derive(Debug, Clone, PartialEq)]
pub struct JobGraph {
    expid: String,
    default_platform: String,
    jobs: BTreeMap<JobName, Job>,
}

impl JobGraph {
    /// Build a graph from fully populated jobs.
    ///
    /// `parents` is authoritative: `children` is recomputed from it. Fails on
    /// duplicate names, dangling parents and cycles.
    pub fn from_jobs(
        expid: impl Into<String>,
        default_platform: impl Into<String>,
        jobs: Vec<Job>,
        transitive_reduction: bool,
    ) -> Result<Self> {
        let mut map: BTreeMap<JobName, Job> = BTreeMap::new();
        for mut job in jobs {
            job.children.clear();
            if map.contains_key(&job.name) {
                return Err(ExpflowError::DuplicateParameter {
                    kind: "job name",
                    value: job.name,
                });
            }
            map.insert(job.name.clone(), job);
        }

        let mut edges: Vec<(JobName, JobName)> = Vec::new();
        for job in map.values() {
            for parent in &job.parents {
                if !map.contains_key(parent) {
                    return Err(ExpflowError::JobNotFound(format!(
                        "{parent} (parent of {})",
                        job.name
                    )));
                }
                edges.push((parent.clone(), job.name.clone()));
            }
        }
        for (parent, child) in edges {
            if let Some(p) = map.get_mut(&parent) {
                p.children.insert(child);
            }
        }

        let mut graph = Self {
            expid: expid.into(),
            default_platform: default_platform.into(),
            jobs: map,
        };
        graph.check_acyclic()?;

        if transitive_reduction {
            let removed = graph.transitive_reduction();
            debug!(removed, "transitive reduction applied");
        }

        Ok(graph)
    }

    fn petgraph(&self) -> DiGraphMap<&str, ()> {
        let mut g: DiGraphMap<&str, ()> = DiGraphMap::new();
        for job in self.jobs.values() {
            g.add_node(job.name.as_str());
        }
        for job in self.jobs.values() {
            for parent in &job.parents {
                g.add_edge(parent.as_str(), job.name.as_str(), ());
            }
        }
        g
    }

    fn check_acyclic(&self) -> Result<()> {
        let g = self.petgraph();
        match toposort(&g, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(ExpflowError::DagCycle(format!(
                "cycle detected in job graph involving job '{}'",
                cycle.node_id()
            ))),
        }
    }

    /// Drop every edge `p -> c` for which `c` is also reachable from `p`
    /// through another parent of `c`. Returns the number of removed edges.
    fn transitive_reduction(&mut self) -> usize {
        let redundant: Vec<(JobName, JobName)> = {
            let g = self.petgraph();
            let mut out = Vec::new();
            for job in self.jobs.values() {
                for p in &job.parents {
                    let implied = job
                        .parents
                        .iter()
                        .filter(|q| *q != p)
                        .any(|q| has_path_connecting(&g, p.as_str(), q.as_str(), None));
                    if implied {
                        out.push((p.clone(), job.name.clone()));
                    }
                }
            }
            out
        };

        for (parent, child) in &redundant {
            if let Some(c) = self.jobs.get_mut(child) {
                c.parents.remove(parent);
            }
            if let Some(p) = self.jobs.get_mut(parent) {
                p.children.remove(child);
            }
        }
        redundant.len()
    }

    pub fn expid(&self) -> &str {
        &self.expid
    }

    pub fn default_platform(&self) -> &str {
        &self.default_platform
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.get(name)
    }

    pub(crate) fn job_mut(&mut self, name: &str) -> Option<&mut Job> {
        self.jobs.get_mut(name)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub(crate) fn jobs_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.jobs.values_mut()
    }

    pub fn status_of(&self, name: &str) -> Option<Status> {
        self.jobs.get(name).map(|j| j.status)
    }

    /// Resolved platform of a job.
    pub fn platform_of<'a>(&'a self, job: &'a Job) -> &'a str {
        job.platform_or(&self.default_platform)
    }

    pub fn dependencies_of<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        self.jobs
            .get(name)
            .into_iter()
            .flat_map(|j| j.parents.iter().map(String::as_str))
    }

    pub fn dependents_of<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        self.jobs
            .get(name)
            .into_iter()
            .flat_map(|j| j.children.iter().map(String::as_str))
    }

    /// A parent lets its children run once COMPLETED, or once it has ended
    /// any other way if it is skippable.
    pub fn parent_satisfied(parent: &Job) -> bool {
        parent.status == Status::Completed || (parent.skippable && parent.is_terminal())
    }

    pub fn dependencies_satisfied(&self, name: &str) -> bool {
        let Some(job) = self.jobs.get(name) else {
            return false;
        };
        job.parents.iter().all(|p| match self.jobs.get(p) {
            Some(parent) => Self::parent_satisfied(parent),
            None => false,
        })
    }

    /// Pending jobs that can never run because an ancestor ended without
    /// completing.
    pub fn blocked(&self) -> BTreeSet<JobName> {
        let mut blocked = BTreeSet::new();
        let mut queue: VecDeque<&str> = self
            .jobs
            .values()
            .filter(|j| j.is_terminal() && !Self::parent_satisfied(j))
            .map(|j| j.name.as_str())
            .collect();

        while let Some(name) = queue.pop_front() {
            for child in self.dependents_of(name) {
                let Some(job) = self.jobs.get(child) else {
                    continue;
                };
                if job.status.is_pending() && blocked.insert(job.name.clone()) {
                    queue.push_back(child);
                }
            }
        }
        blocked
    }

    /// Jobs that still have work ahead of them.
    pub fn active(&self) -> Vec<&Job> {
        let blocked = self.blocked();
        self.jobs
            .values()
            .filter(|j| !j.is_terminal() && !blocked.contains(&j.name))
            .collect()
    }

    pub fn has_active(&self) -> bool {
        !self.active().is_empty()
    }

    pub fn completed(&self) -> Vec<&Job> {
        self.with_status(Status::Completed)
    }

    /// Jobs FAILED with no retrials left.
    pub fn failed(&self) -> Vec<&Job> {
        self.jobs.values().filter(|j| j.is_exhausted()).collect()
    }

    pub fn with_status(&self, status: Status) -> Vec<&Job> {
        self.jobs.values().filter(|j| j.status == status).collect()
    }

    pub fn in_queue(&self) -> Vec<&Job> {
        self.jobs.values().filter(|j| j.status.is_in_queue()).collect()
    }

    /// Count of in-queue jobs on `platform`, split into
    /// (submitted + queuing, every in-queue state).
    pub fn queue_load(&self, platform: &str) -> (usize, usize) {
        let mut waiting = 0;
        let mut in_queue = 0;
        for job in self.jobs.values() {
            if !job.status.is_in_queue() || self.platform_of(job) != platform {
                continue;
            }
            in_queue += 1;
            if matches!(job.status, Status::Submitted | Status::Queuing) {
                waiting += 1;
            }
        }
        (waiting, in_queue)
    }

    /// Runnable jobs, earliest-ready first (ties by name), limited per
    /// platform by `capacity`.
    pub fn ready(&self, capacity: &Capacity) -> Vec<&Job> {
        let mut capacity = capacity.clone();
        self.runnable_in_order()
            .into_iter()
            .filter(|job| capacity.take(self.platform_of(job)))
            .collect()
    }

    fn runnable_in_order(&self) -> Vec<&Job> {
        let mut runnable: Vec<&Job> = self
            .jobs
            .values()
            .filter(|j| j.status.is_pending() && self.dependencies_satisfied(&j.name))
            .collect();
        runnable.sort_by(|a, b| {
            let ka = a.ready_since.unwrap_or(u64::MAX);
            let kb = b.ready_since.unwrap_or(u64::MAX);
            ka.cmp(&kb).then_with(|| a.name.cmp(&b.name))
        });
        runnable
    }

    /// In-queue work per resolved platform. Members of one wrapper collapse
    /// into a single composite unit.
    pub fn in_queue_grouped_by_platform(
        &self,
        packages: &PackageTable,
    ) -> BTreeMap<String, Vec<PollUnit>> {
        let mut grouped: BTreeMap<String, Vec<PollUnit>> = BTreeMap::new();
        let mut seen_wrappers: BTreeSet<&str> = BTreeSet::new();

        for job in self.jobs.values().filter(|j| j.status.is_in_queue()) {
            match packages.wrapper_of(&job.name) {
                Some(wrapper) => {
                    if seen_wrappers.insert(wrapper.name.as_str()) {
                        grouped
                            .entry(wrapper.platform.clone())
                            .or_default()
                            .push(PollUnit::Composite(wrapper.name.clone()));
                    }
                }
                None => {
                    grouped
                        .entry(self.platform_of(job).to_string())
                        .or_default()
                        .push(PollUnit::Single(job.name.clone()));
                }
            }
        }
        grouped
    }

    /// Move a job to `status`, enforcing the status machine.
    ///
    /// Returns `None` when the job already had that status.
    pub fn set_status(&mut self, name: &str, status: Status) -> Result<Option<Transition>> {
        let job = self
            .jobs
            .get_mut(name)
            .ok_or_else(|| ExpflowError::JobNotFound(name.to_string()))?;
        let from = job.status;
        if from == status {
            return Ok(None);
        }
        if !from.can_transition(status) {
            return Err(ExpflowError::IllegalTransition {
                job: name.to_string(),
                from,
                to: status,
            });
        }
        if from == Status::Failed && status.is_pending() && job.fail_count >= job.max_retrials {
            return Err(ExpflowError::IllegalTransition {
                job: name.to_string(),
                from,
                to: status,
            });
        }

        job.status = status;
        if status == Status::Submitted {
            job.ready_since = None;
        }
        debug!(job = %name, %from, to = %status, "status changed");
        Ok(Some(Transition {
            job: name.to_string(),
            from,
            to: status,
        }))
    }

    /// Promote runnable WAITING/DELAYED jobs to READY while their platform
    /// has spare capacity; the rest wait as DELAYED.
    pub fn promote_runnable(&mut self, capacity: &Capacity, iteration: u64) -> Vec<Transition> {
        let mut capacity = capacity.clone();
        let order: Vec<(JobName, String, Status)> = self
            .runnable_in_order()
            .into_iter()
            .map(|j| (j.name.clone(), self.platform_of(j).to_string(), j.status))
            .collect();

        let mut transitions = Vec::new();
        for (name, platform, status) in order {
            let target = if capacity.take(&platform) {
                Status::Ready
            } else if status == Status::Waiting {
                Status::Delayed
            } else {
                continue;
            };
            if let Ok(Some(t)) = self.set_status(&name, target) {
                if target == Status::Ready {
                    if let Some(job) = self.jobs.get_mut(&name) {
                        job.ready_since = Some(iteration);
                    }
                }
                transitions.push(t);
            }
        }
        transitions
    }

    /// Re-arm every FAILED job that still has retrials left.
    pub fn retry_failed(&mut self, iteration: u64) -> Vec<Transition> {
        let retryable: Vec<JobName> = self
            .jobs
            .values()
            .filter(|j| j.status == Status::Failed && j.fail_count < j.max_retrials)
            .map(|j| j.name.clone())
            .collect();

        let mut transitions = Vec::new();
        for name in retryable {
            let target = if self.dependencies_satisfied(&name) {
                Status::Ready
            } else {
                Status::Waiting
            };
            match self.set_status(&name, target) {
                Ok(Some(t)) => {
                    if let Some(job) = self.jobs.get_mut(&name) {
                        job.fail_count += 1;
                        job.remote_id = None;
                        if target == Status::Ready {
                            job.ready_since = Some(iteration);
                        }
                        info!(
                            job = %name,
                            attempt = job.fail_count,
                            max_retrials = job.max_retrials,
                            "retrying failed job"
                        );
                    }
                    transitions.push(t);
                }
                Ok(None) => {}
                Err(e) => warn!(job = %name, error = %e, "could not retry job"),
            }
        }
        transitions
    }

    /// Fail every in-queue descendant of `name`: work submitted behind a failed
    /// job can no longer succeed.
    pub fn fail_in_queue_descendants(&mut self, name: &str) -> Vec<Transition> {
        let mut stack: Vec<JobName> = self.dependents_of(name).map(str::to_string).collect();
        let mut visited: BTreeSet<JobName> = BTreeSet::new();
        let mut transitions = Vec::new();

        while let Some(child) = stack.pop() {
            if !visited.insert(child.clone()) {
                continue;
            }
            let in_queue = self
                .jobs
                .get(&child)
                .map(|j| j.status.is_in_queue())
                .unwrap_or(false);
            if !in_queue {
                continue;
            }
            if let Ok(Some(t)) = self.set_status(&child, Status::Failed) {
                debug!(job = %child, upstream = %name, "failing descendant of failed job");
                transitions.push(t);
            }
            stack.extend(self.dependents_of(&child).map(str::to_string));
        }
        transitions
    }

    /// Operator override: park a job.
    pub fn suspend(&mut self, name: &str) -> Result<Option<Transition>> {
        self.set_status(name, Status::Suspended)
    }

    /// Operator override: release a suspended job back to WAITING.
    pub fn resume(&mut self, name: &str) -> Result<Option<Transition>> {
        let status = self
            .status_of(name)
            .ok_or_else(|| ExpflowError::JobNotFound(name.to_string()))?;
        if status != Status::Suspended {
            return Err(ExpflowError::IllegalTransition {
                job: name.to_string(),
                from: status,
                to: Status::Waiting,
            });
        }
        self.set_status(name, Status::Waiting)
    }
}

#[derive(Serialize)]
struct GraphRecordRef<'a> {
    expid: &'a str,
    default_platform: &'a str,
    jobs: Vec<&'a Job>,
}

#[derive(Deserialize)]
struct GraphRecord {
    expid: String,
    default_platform: String,
    jobs: Vec<Job>,
}

impl Serialize for JobGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        GraphRecordRef {
            expid: &self.expid,
            default_platform: &self.default_platform,
            jobs: self.jobs.values().collect(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for JobGraph {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let record = GraphRecord::deserialize(deserializer)?;
        JobGraph::from_jobs(record.expid, record.default_platform, record.jobs, false)
            .map_err(serde::de::Error::custom)
    }
}
