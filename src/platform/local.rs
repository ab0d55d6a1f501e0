// src/platform/local.rs

//! Platform adapter that runs job scripts as local processes.
//!
//! Each submitted package runs in a background Tokio task. Members of a
//! vertical package run one after another and stop at the first failure;
//! members of a horizontal package run side by side. Every member writes
//! `<job>.out` / `<job>.err` under the platform root and, on success, a
//! `<job>_COMPLETED` marker.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::dag::Status;
use crate::platform::{
    BoxFuture, PlatformAdapter, PlatformError, RuntimeParameters, Submission, SubmissionOutcome,
};
use crate::types::{RemoteId, WrapperType};

static PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"%([A-Za-z_][A-Za-z0-9_]*)%"));

const DEPENDENCY_POLL: Duration = Duration::from_millis(100);

type StateMap = Arc<Mutex<HashMap<RemoteId, Status>>>;

/// One member ready to run: name plus fully substituted command line.
#[derive(Debug, Clone)]
struct LocalCommand {
    job: String,
    cmd: String,
}

pub struct LocalPlatform {
    name: String,
    root: PathBuf,
    states: StateMap,
    next_id: u64,
}

impl std::fmt::Debug for LocalPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPlatform")
            .field("name", &self.name)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl LocalPlatform {
    pub fn new(name: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_lowercase(),
            root: root.into(),
            states: Arc::new(Mutex::new(HashMap::new())),
            next_id: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn completion_marker(&self, job: &str) -> PathBuf {
        self.root.join(format!("{job}_COMPLETED"))
    }

    fn render_commands(
        submission: &Submission,
        parameters: &RuntimeParameters,
    ) -> Result<Vec<LocalCommand>, PlatformError> {
        submission
            .jobs
            .iter()
            .map(|job| {
                let params = submission.parameters_for(job, parameters);
                let cmd = match &job.script {
                    Some(script) => substitute(&job.name, script, &params)?,
                    None => "true".to_string(),
                };
                Ok::<_, PlatformError>(LocalCommand {
                    job: job.name.clone(),
                    cmd,
                })
            })
            .collect()
    }
}

/// Replace every `%KEY%` in `template` with its parameter value.
pub fn substitute(
    job: &str,
    template: &str,
    params: &BTreeMap<String, String>,
) -> Result<String, PlatformError> {
    let placeholder = PLACEHOLDER
        .as_ref()
        .map_err(|e| PlatformError::TemplateSubstitution {
            job: job.to_string(),
            detail: e.to_string(),
        })?;

    if let Some(missing) = placeholder
        .captures_iter(template)
        .filter_map(|c| c.get(1))
        .find(|m| !params.contains_key(m.as_str()))
    {
        return Err(PlatformError::TemplateSubstitution {
            job: job.to_string(),
            detail: format!("no value for %{}%", missing.as_str()),
        });
    }

    Ok(placeholder
        .replace_all(template, |caps: &regex::Captures<'_>| {
            params.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

fn set_state(states: &StateMap, id: &str, status: Status) {
    match states.lock() {
        Ok(mut guard) => {
            guard.insert(id.to_string(), status);
        }
        Err(_) => error!(remote_id = %id, "local platform state lock poisoned"),
    }
}

fn get_state(states: &StateMap, id: &str) -> Option<Status> {
    states.lock().ok().and_then(|guard| guard.get(id).copied())
}

impl PlatformAdapter for LocalPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit<'a>(
        &'a mut self,
        submission: &'a Submission,
        parameters: &'a RuntimeParameters,
    ) -> BoxFuture<'a, Result<SubmissionOutcome, PlatformError>> {
        Box::pin(async move {
            let commands = Self::render_commands(submission, parameters)?;
            tokio::fs::create_dir_all(&self.root).await?;

            self.next_id += 1;
            let remote_id = format!("{}-{}", self.name, self.next_id);
            let initial = if submission.remote_dependency.is_some() {
                Status::Queuing
            } else {
                Status::Submitted
            };
            set_state(&self.states, &remote_id, initial);

            info!(
                platform = %self.name,
                remote_id = %remote_id,
                package = %submission.package.name,
                jobs = commands.len(),
                "local submission accepted"
            );

            let unit = LocalUnit {
                remote_id: remote_id.clone(),
                root: self.root.clone(),
                states: Arc::clone(&self.states),
                parallel: submission.package.wrapper_type == WrapperType::Horizontal,
                dependency: submission.remote_dependency.clone(),
                commands,
            };
            tokio::spawn(unit.run());

            Ok(SubmissionOutcome { remote_id })
        })
    }

    fn check_job<'a>(&'a mut self, remote_id: &'a str) -> BoxFuture<'a, Result<Status, PlatformError>> {
        Box::pin(async move {
            // Ids from a previous process are gone: report FAILED and let the
            // completion marker decide.
            Ok(get_state(&self.states, remote_id).unwrap_or(Status::Failed))
        })
    }

    fn get_completed_files<'a>(
        &'a mut self,
        job_name: &'a str,
        _retries: u32,
    ) -> BoxFuture<'a, Result<bool, PlatformError>> {
        Box::pin(async move {
            let marker = self.completion_marker(job_name);
            Ok(tokio::fs::try_exists(&marker).await?)
        })
    }

    fn get_logs_files<'a>(
        &'a mut self,
        expid: &'a str,
        remote_log_path: &'a str,
    ) -> BoxFuture<'a, Result<(), PlatformError>> {
        Box::pin(async move {
            debug!(
                platform = %self.name,
                expid,
                log = remote_log_path,
                "logs already local; nothing to copy"
            );
            Ok(())
        })
    }
}

/// Background execution of one submitted package.
struct LocalUnit {
    remote_id: RemoteId,
    root: PathBuf,
    states: StateMap,
    parallel: bool,
    dependency: Option<RemoteId>,
    commands: Vec<LocalCommand>,
}

impl LocalUnit {
    async fn run(self) {
        if let Some(dep) = &self.dependency {
            match wait_for(&self.states, dep).await {
                Status::Completed => {}
                other => {
                    warn!(
                        remote_id = %self.remote_id,
                        dependency = %dep,
                        dependency_status = %other,
                        "remote dependency did not complete; package not started"
                    );
                    set_state(&self.states, &self.remote_id, Status::Failed);
                    return;
                }
            }
        }

        set_state(&self.states, &self.remote_id, Status::Running);

        let ok = if self.parallel {
            let mut set = JoinSet::new();
            for command in self.commands.iter().cloned() {
                let root = self.root.clone();
                set.spawn(async move { run_member(&root, &command).await });
            }
            let mut all_ok = true;
            while let Some(res) = set.join_next().await {
                all_ok &= matches!(res, Ok(true));
            }
            all_ok
        } else {
            let mut all_ok = true;
            for command in self.commands.iter() {
                if !run_member(&self.root, command).await {
                    all_ok = false;
                    break;
                }
            }
            all_ok
        };

        let final_status = if ok { Status::Completed } else { Status::Failed };
        set_state(&self.states, &self.remote_id, final_status);
    }
}

async fn wait_for(states: &StateMap, remote_id: &str) -> Status {
    loop {
        match get_state(states, remote_id) {
            Some(s @ (Status::Completed | Status::Failed)) => return s,
            None => return Status::Unknown,
            Some(_) => tokio::time::sleep(DEPENDENCY_POLL).await,
        }
    }
}

/// Run one member; true on success.
async fn run_member(root: &Path, command: &LocalCommand) -> bool {
    match run_member_inner(root, command).await {
        Ok(ok) => ok,
        Err(err) => {
            error!(job = %command.job, error = %err, "local job execution error");
            false
        }
    }
}

async fn run_member_inner(root: &Path, command: &LocalCommand) -> Result<bool> {
    info!(job = %command.job, cmd = %command.cmd, "starting local job");

    let stdout = std::fs::File::create(root.join(format!("{}.out", command.job)))
        .with_context(|| format!("creating stdout log for job '{}'", command.job))?;
    let stderr = std::fs::File::create(root.join(format!("{}.err", command.job)))
        .with_context(|| format!("creating stderr log for job '{}'", command.job))?;

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&command.cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&command.cmd);
        c
    };
    cmd.current_dir(root)
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);

    let status = cmd
        .status()
        .await
        .with_context(|| format!("running process for job '{}'", command.job))?;

    let code = status.code().unwrap_or(-1);
    info!(
        job = %command.job,
        exit_code = code,
        success = status.success(),
        "local job exited"
    );

    if status.success() {
        tokio::fs::write(root.join(format!("{}_COMPLETED", command.job)), b"")
            .await
            .with_context(|| format!("writing completion marker for job '{}'", command.job))?;
    }
    Ok(status.success())
}
