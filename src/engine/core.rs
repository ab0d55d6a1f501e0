// src/engine/core.rs

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::model::ConfigFile;
use crate::dag::{Capacity, JobGraph, Status, Transition};
use crate::engine::{LoopTiming, RunOutcome};
use crate::notify::{StatusNotification, wants_notification};
use crate::packager::{Package, Packager, WrappingPolicy};
use crate::platform::{Submission, SubmissionOutcome};
use crate::types::{JobName, RemoteId, WrapperType};
use crate::wrapper::{PackageTable, WrapperJob};

/// Pure scheduler state: job graph, in-flight wrappers and the active
/// configuration.
///
/// Nothing here does IO. The async shell feeds observations in and gets
/// transitions and packages back.
pub struct SchedulerCore {
    graph: JobGraph,
    packages: PackageTable,
    config: ConfigFile,
    iteration: u64,
}

impl fmt::Debug for SchedulerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerCore")
            .field("expid", &self.graph.expid())
            .field("jobs", &self.graph.len())
            .field("wrappers", &self.packages.len())
            .field("iteration", &self.iteration)
            .finish()
    }
}

impl SchedulerCore {
    pub fn new(graph: JobGraph, packages: PackageTable, config: ConfigFile) -> Self {
        Self {
            graph,
            packages,
            config,
            iteration: 0,
        }
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    /// Direct access for operator overrides such as suspend / resume.
    pub fn graph_mut(&mut self) -> &mut JobGraph {
        &mut self.graph
    }

    pub fn packages(&self) -> &PackageTable {
        &self.packages
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn into_parts(self) -> (JobGraph, PackageTable) {
        (self.graph, self.packages)
    }

    pub fn timing(&self) -> LoopTiming {
        LoopTiming {
            safety_sleep: Duration::from_secs(self.config.experiment.safety_sleep_time),
            wrapper_check: Duration::from_secs(self.config.experiment.wrapper_check_time),
        }
    }

    pub fn begin_iteration(&mut self) -> u64 {
        self.iteration += 1;
        self.iteration
    }

    /// Swap in a freshly loaded configuration and refresh retrial budgets.
    ///
    /// A configuration for another experiment is ignored.
    pub fn apply_config(&mut self, config: ConfigFile) {
        if config.expid() != self.graph.expid() {
            warn!(
                loaded = config.expid(),
                running = self.graph.expid(),
                "reloaded configuration names another experiment; ignoring it"
            );
            return;
        }

        let mut refreshed = 0usize;
        for job in self.graph.jobs_mut() {
            let (max_retrials, explicit) = config.retrials_for(&job.section);
            if job.max_retrials != max_retrials || job.explicit_retrials != explicit {
                job.max_retrials = max_retrials;
                job.explicit_retrials = explicit;
                refreshed += 1;
            }
        }
        if refreshed > 0 {
            info!(jobs = refreshed, "retrial budgets refreshed from configuration");
        }
        self.config = config;
    }

    /// Spare submission slots per configured platform.
    ///
    /// A platform is bounded both by jobs waiting in its queue and by
    /// everything it currently holds.
    pub fn capacity(&self) -> Capacity {
        let mut capacity = Capacity::unlimited();
        for (name, platform) in self.config.platform.iter() {
            let (waiting, in_queue) = self.graph.queue_load(name);
            let free = platform
                .max_waiting_jobs
                .saturating_sub(waiting)
                .min(platform.total_jobs.saturating_sub(in_queue));
            capacity.set(name.clone(), free);
        }
        capacity
    }

    /// Retry failed jobs that have budget left, then promote runnable jobs.
    pub fn update_list(&mut self) -> Vec<Transition> {
        let mut transitions = self.graph.retry_failed(self.iteration);
        let capacity = self.capacity();
        transitions.extend(self.graph.promote_runnable(&capacity, self.iteration));
        transitions
    }

    /// Apply a status observed for one job.
    ///
    /// Transitions the status machine forbids are logged and dropped. A job
    /// that fails takes its in-queue descendants down with it.
    pub fn apply_job_status(&mut self, job: &str, observed: Status) -> Vec<Transition> {
        match self.graph.set_status(job, observed) {
            Ok(Some(t)) => {
                let mut transitions = vec![t];
                if observed == Status::Failed {
                    transitions.extend(self.graph.fail_in_queue_descendants(job));
                }
                transitions
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(job, status = %observed, error = %e, "ignoring reported status");
                Vec::new()
            }
        }
    }

    pub fn wrapper_due(&self, name: &str, now: Instant) -> bool {
        let interval = self.timing().wrapper_check;
        self.packages
            .get(name)
            .map(|w| w.due_for_check(now, interval))
            .unwrap_or(false)
    }

    pub fn mark_wrapper_checked(&mut self, name: &str, now: Instant) {
        if let Some(wrapper) = self.packages.get_mut(name) {
            wrapper.mark_checked(now);
        }
    }

    /// Members whose completion marker must be looked up before a wrapper
    /// report can be applied.
    pub fn wrapper_markers_needed(&self, name: &str, reported: Status) -> Vec<JobName> {
        let Some(wrapper) = self.packages.get(name) else {
            return Vec::new();
        };
        match reported {
            Status::Completed | Status::Failed | Status::Running => {
                wrapper.unfinished_members(&self.graph).cloned().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Fold the platform's report for a wrapper into its members.
    ///
    /// `markers` holds the completion-marker result for the members named by
    /// [`Self::wrapper_markers_needed`].
    pub fn apply_wrapper_report(
        &mut self,
        name: &str,
        reported: Status,
        markers: &BTreeMap<JobName, bool>,
    ) -> Vec<Transition> {
        let Some(wrapper) = self.packages.get_mut(name) else {
            warn!(wrapper = name, "report for unknown wrapper");
            return Vec::new();
        };
        wrapper.remote_status = reported;
        let wrapper_type = wrapper.wrapper_type;

        let unfinished: Vec<JobName> = self
            .packages
            .get(name)
            .map(|w| w.unfinished_members(&self.graph).cloned().collect())
            .unwrap_or_default();
        let has_marker = |job: &JobName| markers.get(job).copied().unwrap_or(false);

        let mut completed: Vec<JobName> = Vec::new();
        let mut others: Vec<(JobName, Status)> = Vec::new();
        match reported {
            Status::Completed | Status::Failed => {
                for member in unfinished {
                    if has_marker(&member) {
                        completed.push(member);
                    } else {
                        others.push((member, Status::Failed));
                    }
                }
            }
            Status::Running => {
                let mut still_running = Vec::new();
                for member in unfinished {
                    if has_marker(&member) {
                        completed.push(member);
                    } else {
                        still_running.push(member);
                    }
                }
                let take = match wrapper_type {
                    WrapperType::Horizontal => still_running.len(),
                    _ => 1,
                };
                others.extend(
                    still_running
                        .into_iter()
                        .take(take)
                        .map(|m| (m, Status::Running)),
                );
            }
            Status::Submitted | Status::Queuing => {
                for member in unfinished {
                    if self.graph.status_of(&member) == Some(Status::Submitted) {
                        others.push((member, Status::Queuing));
                    }
                }
            }
            Status::Unknown => {
                others.extend(unfinished.into_iter().map(|m| (m, Status::Unknown)));
            }
            other => {
                warn!(wrapper = name, status = %other, "unexpected wrapper status");
            }
        }

        // Completions first so a failing member cannot drag down a sibling
        // that already finished.
        let mut transitions = Vec::new();
        for member in completed {
            transitions.extend(self.apply_job_status(&member, Status::Completed));
        }
        for (member, status) in others {
            transitions.extend(self.apply_job_status(&member, status));
        }
        transitions
    }

    /// Drop wrappers whose members have all finished.
    /// Drop wrappers whose members all finished, with their final status.
    pub fn retire_finished_wrappers(&mut self) -> Vec<(String, Status)> {
        let retired = self.packages.retire_finished(&self.graph);
        for (name, status) in retired.iter() {
            info!(wrapper = %name, status = %status, "wrapper finished");
        }
        retired
    }

    /// Platforms jobs can be packaged for, in name order.
    pub fn platforms(&self) -> Vec<String> {
        self.config.platform.keys().cloned().collect()
    }

    /// Package the runnable jobs of `platform` within its spare capacity.
    pub fn packages_for(&self, platform: &str) -> Vec<Package> {
        let Some(platform_cfg) = self.config.platform.get(platform) else {
            return Vec::new();
        };
        let policy = WrappingPolicy::from_config(&self.config.wrapper, platform_cfg);
        let capacity = self.capacity();
        let ready: Vec<JobName> = self
            .graph
            .ready(&capacity)
            .into_iter()
            .filter(|job| self.graph.platform_of(job) == platform)
            .map(|job| job.name.clone())
            .collect();
        Packager::new(&self.graph, &policy).package(
            platform,
            &ready,
            capacity.free(platform),
            &self.packages,
        )
    }

    pub fn submission_for(&self, package: &Package, remote_dependency: Option<RemoteId>) -> Submission {
        Submission {
            expid: self.graph.expid().to_string(),
            package: package.clone(),
            jobs: package
                .jobs
                .iter()
                .filter_map(|name| self.graph.job(name).cloned())
                .collect(),
            remote_dependency,
        }
    }

    /// Record an accepted submission: members go to SUBMITTED under the
    /// returned remote id, and a multi-job package becomes a wrapper.
    pub fn mark_submitted(&mut self, package: &Package, outcome: &SubmissionOutcome) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for name in package.jobs.iter() {
            if matches!(
                self.graph.status_of(name),
                Some(Status::Waiting | Status::Delayed)
            ) {
                match self.graph.set_status(name, Status::Ready) {
                    Ok(Some(t)) => transitions.push(t),
                    Ok(None) => {}
                    Err(e) => warn!(job = %name, error = %e, "could not ready packaged job"),
                }
            }
            match self.graph.set_status(name, Status::Submitted) {
                Ok(Some(t)) => transitions.push(t),
                Ok(None) => {}
                Err(e) => warn!(job = %name, error = %e, "could not mark job submitted"),
            }
            if let Some(job) = self.graph.job_mut(name) {
                job.remote_id = Some(outcome.remote_id.clone());
            }
        }
        if package.is_wrapped() {
            self.packages
                .insert(WrapperJob::from_package(package, outcome.remote_id.clone()));
        }
        transitions
    }

    /// Remote id of an in-flight package, by package name.
    pub fn remote_id_of_package(&self, package: &str) -> Option<RemoteId> {
        if let Some(wrapper) = self.packages.get(package) {
            return Some(wrapper.remote_id.clone());
        }
        self.graph
            .job(package)
            .filter(|job| job.status.is_in_queue())
            .and_then(|job| job.remote_id.clone())
    }

    /// Notifications due for `transitions`, when notifications are enabled.
    pub fn notifications_for(&self, transitions: &[Transition]) -> Vec<StatusNotification> {
        if !self.config.notifications.enabled {
            return Vec::new();
        }
        transitions
            .iter()
            .filter_map(|t| {
                let job = self.graph.job(&t.job)?;
                wants_notification(job, t.to).then(|| StatusNotification {
                    expid: self.graph.expid().to_string(),
                    job: t.job.clone(),
                    from: t.from,
                    to: t.to,
                    recipients: self.config.notifications.mails_to.clone(),
                })
            })
            .collect()
    }

    /// (platform, job) pairs whose logs should be copied home.
    pub fn logs_to_fetch(&self, transitions: &[Transition]) -> Vec<(String, JobName)> {
        if !self.config.experiment.copy_remote_logs {
            return Vec::new();
        }
        transitions
            .iter()
            .filter(|t| matches!(t.to, Status::Completed | Status::Failed))
            .filter_map(|t| {
                let job = self.graph.job(&t.job)?;
                Some((self.graph.platform_of(job).to_string(), t.job.clone()))
            })
            .collect()
    }

    /// `None` while work remains.
    ///
    /// Once nothing is active the run failed if any job ran out of retrials
    /// or if pending jobs sit behind a suspended one.
    pub fn outcome(&self) -> Option<RunOutcome> {
        if self.graph.has_active() {
            return None;
        }
        let mut failed: Vec<JobName> = self
            .graph
            .failed()
            .into_iter()
            .map(|job| job.name.clone())
            .collect();
        if self.graph.blocked().is_empty() && failed.is_empty() {
            return Some(RunOutcome::Completed);
        }
        failed.extend(
            self.graph
                .with_status(Status::Suspended)
                .into_iter()
                .map(|job| job.name.clone()),
        );
        Some(RunOutcome::Failed(failed))
    }
}

/// Whether a reported status must be confirmed by the completion marker.
pub fn needs_marker(reported: Status) -> bool {
    matches!(
        reported,
        Status::Completed | Status::Failed | Status::Unknown
    )
}

/// Final status of a plain job given the platform's report and, when it was
/// looked up, its completion marker. `None` means the lookup itself failed.
pub fn resolve_reported(reported: Status, marker: Option<bool>) -> Status {
    if !needs_marker(reported) {
        return reported;
    }
    match (reported, marker) {
        (_, None) => Status::Unknown,
        (_, Some(true)) => Status::Completed,
        (Status::Unknown, Some(false)) => Status::Unknown,
        (_, Some(false)) => Status::Failed,
    }
}
