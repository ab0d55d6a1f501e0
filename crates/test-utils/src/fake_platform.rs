use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use expflow::dag::Status;
use expflow::platform::{
    BoxFuture, PlatformAdapter, PlatformError, RuntimeParameters, Submission, SubmissionOutcome,
};
use tokio_util::sync::CancellationToken;

/// What a [`ScriptedPlatform`] does with the jobs it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// COMPLETED (marker written) on the first poll.
    CompleteOnFirstPoll,
    /// RUNNING on the first poll, COMPLETED on the second.
    RunThenComplete,
    /// FAILED on the first poll, no marker.
    AlwaysFail,
    /// Every status check errors out transiently.
    TransientChecks,
    /// Submission fails with a template substitution error.
    TemplateError,
    /// Submission is refused outright.
    RejectSubmission,
}

/// One accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub remote_id: String,
    pub package: String,
    pub jobs: Vec<String>,
    pub remote_dependency: Option<String>,
    pub parameters: BTreeMap<String, String>,
}

/// Everything the platform saw, shared with the test.
#[derive(Debug, Default)]
pub struct PlatformLog {
    pub submissions: Vec<SubmissionRecord>,
    pub submit_attempts: usize,
    pub checks: Vec<String>,
    pub marker_checks: Vec<String>,
    pub log_fetches: Vec<String>,
}

#[derive(Debug)]
struct RemoteUnit {
    jobs: Vec<String>,
    polls: u32,
}

/// In-memory platform driven by per-job [`Behaviour`]s.
pub struct ScriptedPlatform {
    name: String,
    default: Behaviour,
    overrides: BTreeMap<String, Behaviour>,
    remotes: BTreeMap<String, RemoteUnit>,
    markers: BTreeSet<String>,
    log: Arc<Mutex<PlatformLog>>,
    next_id: u64,
    cancel_on_submit: Option<(usize, CancellationToken)>,
}

impl ScriptedPlatform {
    pub fn new(name: &str, default: Behaviour) -> Self {
        Self {
            name: name.to_string(),
            default,
            overrides: BTreeMap::new(),
            remotes: BTreeMap::new(),
            markers: BTreeSet::new(),
            log: Arc::new(Mutex::new(PlatformLog::default())),
            next_id: 0,
            cancel_on_submit: None,
        }
    }

    /// Give one job its own behaviour.
    pub fn with_job(mut self, job: &str, behaviour: Behaviour) -> Self {
        self.overrides.insert(job.to_string(), behaviour);
        self
    }

    /// Pretend a completion marker already exists.
    pub fn with_marker(mut self, job: &str) -> Self {
        self.markers.insert(job.to_string());
        self
    }

    /// Cancel `token` right after the `n`-th accepted submission.
    pub fn cancel_after_submissions(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_on_submit = Some((n, token));
        self
    }

    pub fn log(&self) -> Arc<Mutex<PlatformLog>> {
        Arc::clone(&self.log)
    }

    fn behaviour_of(&self, job: &str) -> Behaviour {
        self.overrides.get(job).copied().unwrap_or(self.default)
    }

    /// Finish a remote unit: markers for members that succeed, and the
    /// unit's overall status.
    fn finish(&mut self, jobs: &[String]) -> Status {
        let mut failed = false;
        for job in jobs {
            if self.behaviour_of(job) == Behaviour::AlwaysFail {
                failed = true;
            } else {
                self.markers.insert(job.clone());
            }
        }
        if failed { Status::Failed } else { Status::Completed }
    }
}

impl PlatformAdapter for ScriptedPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit<'a>(
        &'a mut self,
        submission: &'a Submission,
        parameters: &'a RuntimeParameters,
    ) -> BoxFuture<'a, Result<SubmissionOutcome, PlatformError>> {
        Box::pin(async move {
            self.log.lock().unwrap().submit_attempts += 1;

            for job in submission.package.jobs.iter() {
                match self.behaviour_of(job) {
                    Behaviour::TemplateError => {
                        return Err(PlatformError::TemplateSubstitution {
                            job: job.clone(),
                            detail: "no value for %MISSING%".to_string(),
                        });
                    }
                    Behaviour::RejectSubmission => {
                        return Err(PlatformError::Rejected(format!("job {job} refused")));
                    }
                    _ => {}
                }
            }

            self.next_id += 1;
            let remote_id = format!("{}-{}", self.name, self.next_id);
            self.remotes.insert(
                remote_id.clone(),
                RemoteUnit {
                    jobs: submission.package.jobs.clone(),
                    polls: 0,
                },
            );

            let accepted = {
                let mut log = self.log.lock().unwrap();
                log.submissions.push(SubmissionRecord {
                    remote_id: remote_id.clone(),
                    package: submission.package.name.clone(),
                    jobs: submission.package.jobs.clone(),
                    remote_dependency: submission.remote_dependency.clone(),
                    parameters: parameters.clone(),
                });
                log.submissions.len()
            };
            if let Some((n, token)) = &self.cancel_on_submit {
                if accepted >= *n {
                    token.cancel();
                }
            }

            Ok(SubmissionOutcome { remote_id })
        })
    }

    fn check_job<'a>(&'a mut self, remote_id: &'a str) -> BoxFuture<'a, Result<Status, PlatformError>> {
        Box::pin(async move {
            self.log.lock().unwrap().checks.push(remote_id.to_string());

            let Some(unit) = self.remotes.get_mut(remote_id) else {
                return Ok(Status::Failed);
            };
            unit.polls += 1;
            let polls = unit.polls;
            let jobs = unit.jobs.clone();

            let lead = jobs
                .first()
                .map(|j| self.behaviour_of(j))
                .unwrap_or(self.default);
            match lead {
                Behaviour::TransientChecks => Err(PlatformError::Transient(
                    "connection reset by peer".to_string(),
                )),
                Behaviour::RunThenComplete if polls == 1 => Ok(Status::Running),
                _ => Ok(self.finish(&jobs)),
            }
        })
    }

    fn get_completed_files<'a>(
        &'a mut self,
        job_name: &'a str,
        _retries: u32,
    ) -> BoxFuture<'a, Result<bool, PlatformError>> {
        Box::pin(async move {
            self.log.lock().unwrap().marker_checks.push(job_name.to_string());
            Ok(self.markers.contains(job_name))
        })
    }

    fn get_logs_files<'a>(
        &'a mut self,
        _expid: &'a str,
        remote_log_path: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(async move {
            self.log
                .lock()
                .unwrap()
                .log_fetches
                .push(remote_log_path.to_string());
            Ok(())
        })
    }
}
