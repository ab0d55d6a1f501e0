// src/config/model.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::dag::Status;
use crate::types::{Running, Wallclock, WrapperType};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [experiment]
/// expid = "a000"
/// dates = ["19900101"]
/// members = ["fc0"]
/// num_chunks = 2
/// default_platform = "local"
///
/// [platform.local]
/// type = "local"
///
/// [job.SIM]
/// running = "chunk"
/// dependencies = ["SIM-1"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    pub experiment: ExperimentSection,

    #[serde(default)]
    pub notifications: NotificationSection,

    #[serde(default)]
    pub wrapper: WrapperSection,

    /// Free-form `[parameters]`, passed to every submission.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    /// Platforms from `[platform.<name>]`.
    #[serde(default)]
    pub platform: BTreeMap<String, PlatformConfig>,

    /// Job sections from `[job.<SECTION>]`.
    #[serde(default)]
    pub job: BTreeMap<String, JobSectionConfig>,
}

/// Validated configuration.
///
/// Produced from [`RawConfigFile`] via `TryFrom` (see `config::validate`).
/// Platform names are canonical (lower case) everywhere.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub experiment: ExperimentSection,
    pub notifications: NotificationSection,
    pub wrapper: WrapperSection,
    pub parameters: BTreeMap<String, String>,
    pub platform: BTreeMap<String, PlatformConfig>,
    pub job: BTreeMap<String, JobSectionConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            experiment: raw.experiment,
            notifications: raw.notifications,
            wrapper: raw.wrapper,
            parameters: raw.parameters,
            platform: raw.platform,
            job: raw.job,
        }
    }

    pub fn expid(&self) -> &str {
        &self.experiment.expid
    }

    /// Retrial budget of a section and whether the section set it itself.
    pub fn retrials_for(&self, section: &str) -> (u32, bool) {
        match self.job.get(section).and_then(|s| s.retrials) {
            Some(n) => (n, true),
            None => (self.experiment.retrials, false),
        }
    }

    /// Chunk numbers of the experiment, in order.
    pub fn chunks(&self) -> Vec<u32> {
        (self.experiment.chunk_ini..=self.experiment.num_chunks).collect()
    }
}

/// `[experiment]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentSection {
    /// Experiment identifier; prefixes every job name.
    pub expid: String,

    /// Start dates of the sweep.
    #[serde(default)]
    pub dates: Vec<String>,

    /// Ensemble members of the sweep.
    #[serde(default)]
    pub members: Vec<String>,

    /// Last chunk number.
    #[serde(default = "default_num_chunks")]
    pub num_chunks: u32,

    /// First chunk number.
    #[serde(default = "default_chunk_ini")]
    pub chunk_ini: u32,

    pub default_platform: String,

    /// Default retrial budget for sections that do not set their own.
    #[serde(default)]
    pub retrials: u32,

    /// Seconds slept between loop iterations.
    #[serde(default = "default_safety_sleep_time")]
    pub safety_sleep_time: u64,

    /// Minimum seconds between two polls of the same wrapper.
    #[serde(default = "default_wrapper_check_time")]
    pub wrapper_check_time: u64,

    #[serde(default = "default_true")]
    pub transitive_reduction: bool,

    /// Fetch logs of finished jobs from their platform.
    #[serde(default)]
    pub copy_remote_logs: bool,

    /// Root directory for persisted state and locks.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_num_chunks() -> u32 {
    1
}

fn default_chunk_ini() -> u32 {
    1
}

fn default_safety_sleep_time() -> u64 {
    10
}

fn default_wrapper_check_time() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".expflow")
}

/// `[notifications]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub mails_to: Vec<String>,
}

/// `[wrapper]` section: how runnable jobs are bundled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WrapperSection {
    #[serde(default, rename = "type")]
    pub wrapper_type: WrapperType,

    /// Maximum jobs per package; unlimited when unset.
    #[serde(default)]
    pub max_wrapped: Option<usize>,

    /// Chain packages through platform-level dependencies.
    #[serde(default)]
    pub remote_dependencies: bool,

    /// Sections eligible for wrapping; empty means every section.
    #[serde(default)]
    pub sections: Vec<String>,
}

impl WrapperSection {
    pub fn wraps_section(&self, section: &str) -> bool {
        self.sections.is_empty() || self.sections.iter().any(|s| s == section)
    }
}

/// `[platform.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Adapter type, e.g. `"local"`.
    #[serde(rename = "type")]
    pub platform_type: String,

    /// Cap on jobs submitted or queuing at once.
    #[serde(default = "default_queue_limit")]
    pub max_waiting_jobs: usize,

    /// Cap on jobs in the platform queue in any state.
    #[serde(default = "default_queue_limit")]
    pub total_jobs: usize,

    #[serde(default)]
    pub max_wallclock: Option<Wallclock>,

    #[serde(default)]
    pub max_processors: Option<u32>,

    #[serde(default = "default_true")]
    pub allow_wrappers: bool,

    /// Working directory for adapters that need one.
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
}

fn default_queue_limit() -> usize {
    20
}

/// `[job.<SECTION>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobSectionConfig {
    #[serde(default)]
    pub running: Running,

    /// Dependency keys such as `"INI"`, `"SIM-1"` or `"POST+1"`.
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub platform: Option<String>,

    #[serde(default)]
    pub wallclock: Option<Wallclock>,

    #[serde(default)]
    pub processors: Option<u32>,

    #[serde(default)]
    pub retrials: Option<u32>,

    /// Number of splits per chunk; `None` or `0` disables splitting.
    #[serde(default)]
    pub splits: Option<u32>,

    #[serde(default)]
    pub skippable: bool,

    #[serde(default)]
    pub notify_on: Vec<Status>,

    /// Command line run by script-executing platforms.
    #[serde(default)]
    pub script: Option<String>,
}

impl JobSectionConfig {
    pub fn split_count(&self) -> Option<u32> {
        self.splits.filter(|n| *n > 0)
    }

    pub fn dependency_keys(&self) -> Result<Vec<DependencyKey>, String> {
        self.dependencies.iter().map(|d| d.parse()).collect()
    }
}

/// A parsed dependency key: a section plus a signed distance along the
/// parent's finest dimension (`SIM-1` is `-1`, `POST+2` is `+2`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyKey {
    pub section: String,
    pub offset: i64,
}

impl FromStr for DependencyKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        if key.is_empty() {
            return Err("empty dependency key".to_string());
        }

        if let Some(pos) = key.rfind(['-', '+']) {
            let (section, rest) = key.split_at(pos);
            let digits = &rest[1..];
            if !section.is_empty() && !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                let distance: i64 = digits
                    .parse()
                    .map_err(|_| format!("invalid distance in dependency '{key}'"))?;
                let offset = if rest.starts_with('-') { -distance } else { distance };
                return Ok(DependencyKey {
                    section: section.to_string(),
                    offset,
                });
            }
        }

        Ok(DependencyKey {
            section: key.to_string(),
            offset: 0,
        })
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            0 => f.write_str(&self.section),
            n if n < 0 => write!(f, "{}{}", self.section, n),
            n => write!(f, "{}+{}", self.section, n),
        }
    }
}
