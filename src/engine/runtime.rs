// src/engine/runtime.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConfigSource;
use crate::dag::{Status, Transition};
use crate::errors::Result;
use crate::notify::Notifier;
use crate::persist::PersistenceStore;
use crate::platform::{PlatformAdapter, PlatformError, PlatformRegistry};
use crate::types::RemoteId;
use crate::wrapper::PollUnit;

use super::core::{SchedulerCore, needs_marker, resolve_reported};
use super::{COMPLETED_FILE_RETRIES, IterationResult, RunOutcome, RunReport, RunSummary};

/// Drives a [`SchedulerCore`] against real platforms.
///
/// This is the IO shell: it polls and submits through the platform
/// adapters, persists state, delivers notifications and sleeps between
/// iterations. Every status decision is made by the core.
pub struct SchedulerLoop {
    core: SchedulerCore,
    platforms: PlatformRegistry,
    store: Box<dyn PersistenceStore>,
    config_source: Box<dyn ConfigSource>,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
    report: RunReport,
    dirty: bool,
    primed: bool,
}

impl fmt::Debug for SchedulerLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerLoop")
            .field("core", &self.core)
            .field("platforms", &self.platforms)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl SchedulerLoop {
    pub fn new(
        core: SchedulerCore,
        platforms: PlatformRegistry,
        store: Box<dyn PersistenceStore>,
        config_source: Box<dyn ConfigSource>,
        notifier: Arc<dyn Notifier>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            core,
            platforms,
            store,
            config_source,
            notifier,
            cancel,
            report: RunReport::default(),
            dirty: false,
            primed: false,
        }
    }

    pub fn core(&self) -> &SchedulerCore {
        &self.core
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until nothing is active or the token is cancelled.
    pub async fn run(mut self) -> Result<RunSummary> {
        info!(
            expid = %self.core.graph().expid(),
            jobs = self.core.graph().len(),
            "scheduler loop started"
        );

        if self.cancel.is_cancelled() {
            let outcome = self.stop_cancelled();
            return Ok(self.summary(outcome));
        }

        self.prime().await?;
        loop {
            match self.run_iteration().await? {
                IterationResult::Continue => self.sleep().await,
                IterationResult::Finished(outcome) => {
                    info!(
                        ?outcome,
                        iterations = self.report.iterations,
                        submissions = self.report.submissions,
                        "scheduler loop finished"
                    );
                    return Ok(self.summary(outcome));
                }
            }
        }
    }

    fn summary(self, outcome: RunOutcome) -> RunSummary {
        RunSummary {
            outcome,
            report: self.report,
        }
    }

    /// Promote, package and submit everything already runnable, then save.
    ///
    /// Runs once; [`Self::run_iteration`] calls it if nobody did.
    pub async fn prime(&mut self) -> Result<()> {
        if self.primed {
            return Ok(());
        }
        self.primed = true;

        let transitions = self.core.update_list();
        self.after_transitions(transitions).await;
        self.submit_ready().await;
        self.persist()
    }

    /// One pass of the loop, without the trailing sleep.
    pub async fn run_iteration(&mut self) -> Result<IterationResult> {
        if self.cancel.is_cancelled() {
            return Ok(IterationResult::Finished(self.stop_cancelled()));
        }
        if !self.primed {
            self.prime().await?;
        }

        self.reload_config();
        let iteration = self.core.begin_iteration();
        self.report.iterations += 1;
        debug!(iteration, "iteration started");

        if self.poll_all().await {
            return Ok(IterationResult::Finished(self.stop_cancelled()));
        }

        if !self.core.retire_finished_wrappers().is_empty() {
            self.dirty = true;
        }
        let transitions = self.core.update_list();
        self.after_transitions(transitions).await;

        self.submit_ready().await;

        if self.dirty {
            self.persist()?;
        }

        Ok(match self.core.outcome() {
            Some(outcome) => IterationResult::Finished(outcome),
            None => IterationResult::Continue,
        })
    }

    fn stop_cancelled(&mut self) -> RunOutcome {
        info!("cancellation requested; saving state and stopping");
        if let Err(e) = self.persist() {
            error!(error = %e, "could not save state while stopping");
        }
        RunOutcome::Cancelled
    }

    fn reload_config(&mut self) {
        match self.config_source.reload() {
            Ok(config) => self.core.apply_config(config),
            Err(e) => warn!(error = %e, "configuration reload failed; keeping previous configuration"),
        }
    }

    fn persist(&mut self) -> Result<()> {
        let expid = self.core.graph().expid().to_string();
        self.store
            .save(&expid, self.core.graph(), self.core.packages())?;
        self.dirty = false;
        Ok(())
    }

    async fn sleep(&self) {
        let pause = self.core.timing().safety_sleep;
        tokio::select! {
            _ = self.cancel.cancelled() => debug!("sleep interrupted by cancellation"),
            _ = tokio::time::sleep(pause) => {}
        }
    }

    /// Poll every in-flight unit. Returns true when cancellation arrived
    /// after a status change.
    async fn poll_all(&mut self) -> bool {
        let groups = self
            .core
            .graph()
            .in_queue_grouped_by_platform(self.core.packages());

        for (platform, units) in groups {
            for unit in units {
                let changed = match &unit {
                    PollUnit::Single(job) => self.poll_job(&platform, job).await,
                    PollUnit::Composite(wrapper) => self.poll_wrapper(&platform, wrapper).await,
                };
                if changed {
                    if let Some(status) = unit.status(self.core.graph(), self.core.packages()) {
                        debug!(unit = unit.name(), status = %status, "unit status after poll");
                    }
                    if self.cancel.is_cancelled() {
                        return true;
                    }
                }
            }
        }
        false
    }

    async fn poll_job(&mut self, platform: &str, job: &str) -> bool {
        let remote_id = self.core.graph().job(job).and_then(|j| j.remote_id.clone());
        let Some(adapter) = self.platforms.get_mut(platform) else {
            warn!(platform, job, "no adapter registered for platform");
            return false;
        };

        let reported = match &remote_id {
            Some(id) => observe(adapter, id).await,
            None => {
                warn!(job, "in-queue job has no remote id");
                Status::Failed
            }
        };
        let status = if needs_marker(reported) {
            let marker = match adapter.get_completed_files(job, COMPLETED_FILE_RETRIES).await {
                Ok(found) => Some(found),
                Err(e) => {
                    warn!(job, error = %e, "completion marker lookup failed");
                    None
                }
            };
            resolve_reported(reported, marker)
        } else {
            reported
        };

        let transitions = self.core.apply_job_status(job, status);
        self.after_transitions(transitions).await
    }

    async fn poll_wrapper(&mut self, platform: &str, name: &str) -> bool {
        let now = Instant::now();
        if !self.core.wrapper_due(name, now) {
            debug!(wrapper = name, "wrapper check skipped until next interval");
            return false;
        }
        let Some(remote_id) = self.core.packages().get(name).map(|w| w.remote_id.clone()) else {
            return false;
        };
        let Some(adapter) = self.platforms.get_mut(platform) else {
            warn!(platform, wrapper = name, "no adapter registered for platform");
            return false;
        };

        let mut reported = observe(adapter, &remote_id).await;
        let mut markers = BTreeMap::new();
        for member in self.core.wrapper_markers_needed(name, reported) {
            match adapter
                .get_completed_files(&member, COMPLETED_FILE_RETRIES)
                .await
            {
                Ok(found) => {
                    markers.insert(member, found);
                }
                Err(e) => {
                    warn!(wrapper = name, job = %member, error = %e, "completion marker lookup failed");
                    reported = Status::Unknown;
                    markers.clear();
                    break;
                }
            }
        }

        self.core.mark_wrapper_checked(name, now);
        let transitions = self.core.apply_wrapper_report(name, reported, &markers);
        self.after_transitions(transitions).await
    }

    async fn submit_ready(&mut self) {
        for platform in self.core.platforms() {
            if self.cancel.is_cancelled() {
                return;
            }
            let packages = self.core.packages_for(&platform);
            if packages.is_empty() {
                continue;
            }
            debug!(platform, packages = packages.len(), "packages built");

            let mut submitted: BTreeMap<String, RemoteId> = BTreeMap::new();
            for package in packages {
                let remote_dependency = match &package.remote_dependency {
                    None => None,
                    Some(upstream) => match submitted
                        .get(upstream)
                        .cloned()
                        .or_else(|| self.core.remote_id_of_package(upstream))
                    {
                        Some(id) => Some(id),
                        None => {
                            warn!(
                                package = %package.name,
                                upstream = %upstream,
                                "upstream package not on the platform; holding back"
                            );
                            continue;
                        }
                    },
                };

                let submission = self.core.submission_for(&package, remote_dependency);
                let parameters = self.core.config().parameters.clone();
                let Some(adapter) = self.platforms.get_mut(&platform) else {
                    error!(platform, "no adapter registered for platform");
                    break;
                };

                let result = adapter.submit(&submission, &parameters).await;
                match result {
                    Ok(outcome) => {
                        info!(
                            platform,
                            package = %package.name,
                            remote_id = %outcome.remote_id,
                            jobs = package.len(),
                            "package submitted"
                        );
                        self.report.submissions += 1;
                        self.dirty = true;
                        submitted.insert(package.name.clone(), outcome.remote_id.clone());
                        let transitions = self.core.mark_submitted(&package, &outcome);
                        self.after_transitions(transitions).await;
                        if self.cancel.is_cancelled() {
                            return;
                        }
                    }
                    Err(PlatformError::TemplateSubstitution { job, detail }) => {
                        warn!(
                            package = %package.name,
                            job = %job,
                            detail = %detail,
                            "template substitution failed; job stays READY"
                        );
                        self.report.submission_failures += 1;
                    }
                    Err(e) if e.is_transient() => {
                        warn!(package = %package.name, error = %e, "transient submission error; retrying next iteration");
                    }
                    Err(e) => {
                        error!(package = %package.name, error = %e, "submission failed");
                        self.report.submission_failures += 1;
                    }
                }
            }
        }
    }

    /// Record, log, notify and fetch logs for applied transitions.
    /// Returns whether anything changed.
    async fn after_transitions(&mut self, transitions: Vec<Transition>) -> bool {
        if transitions.is_empty() {
            return false;
        }
        for t in transitions.iter() {
            info!(job = %t.job, from = %t.from, to = %t.to, "job status changed");
        }
        for notification in self.core.notifications_for(&transitions) {
            self.notifier.notify(&notification);
        }

        let expid = self.core.graph().expid().to_string();
        for (platform, job) in self.core.logs_to_fetch(&transitions) {
            let Some(adapter) = self.platforms.get_mut(&platform) else {
                continue;
            };
            let log = format!("{job}.out");
            if let Err(e) = adapter.get_logs_files(&expid, &log).await {
                warn!(job = %job, error = %e, "could not copy remote logs");
            }
        }

        self.report.record(&transitions);
        self.dirty = true;
        true
    }
}

/// Ask the platform for a remote unit's state. Errors read as UNKNOWN so
/// the unit is polled again next iteration.
async fn observe(adapter: &mut (dyn PlatformAdapter + 'static), remote_id: &str) -> Status {
    let result = adapter.check_job(remote_id).await;
    match result {
        Ok(status) => status,
        Err(e) => {
            warn!(
                platform = adapter.name(),
                remote_id,
                transient = e.is_transient(),
                error = %e,
                "status check failed"
            );
            Status::Unknown
        }
    }
}
