#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use expflow::config::{
    ConfigFile, ExperimentSection, JobSectionConfig, NotificationSection, PlatformConfig,
    RawConfigFile, WrapperSection,
};
use expflow::dag::Status;
use expflow::types::{Running, Wallclock, WrapperType};

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts with one `local` platform as the default and no sleep between
/// loop iterations.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(expid: &str) -> Self {
        let mut platform = BTreeMap::new();
        platform.insert("local".to_string(), PlatformBuilder::new().build());
        Self {
            config: RawConfigFile {
                experiment: ExperimentSection {
                    expid: expid.to_string(),
                    dates: Vec::new(),
                    members: Vec::new(),
                    num_chunks: 1,
                    chunk_ini: 1,
                    default_platform: "local".to_string(),
                    retrials: 0,
                    safety_sleep_time: 0,
                    wrapper_check_time: 0,
                    transitive_reduction: true,
                    copy_remote_logs: false,
                    state_dir: PathBuf::from(".expflow"),
                },
                notifications: NotificationSection::default(),
                wrapper: WrapperSection::default(),
                parameters: BTreeMap::new(),
                platform,
                job: BTreeMap::new(),
            },
        }
    }

    pub fn dates(mut self, dates: &[&str]) -> Self {
        self.config.experiment.dates = dates.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn members(mut self, members: &[&str]) -> Self {
        self.config.experiment.members = members.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn chunks(mut self, num_chunks: u32) -> Self {
        self.config.experiment.num_chunks = num_chunks;
        self
    }

    pub fn chunk_ini(mut self, chunk_ini: u32) -> Self {
        self.config.experiment.chunk_ini = chunk_ini;
        self
    }

    pub fn retrials(mut self, retrials: u32) -> Self {
        self.config.experiment.retrials = retrials;
        self
    }

    pub fn safety_sleep(mut self, secs: u64) -> Self {
        self.config.experiment.safety_sleep_time = secs;
        self
    }

    pub fn wrapper_check(mut self, secs: u64) -> Self {
        self.config.experiment.wrapper_check_time = secs;
        self
    }

    pub fn transitive_reduction(mut self, enabled: bool) -> Self {
        self.config.experiment.transitive_reduction = enabled;
        self
    }

    pub fn copy_remote_logs(mut self, enabled: bool) -> Self {
        self.config.experiment.copy_remote_logs = enabled;
        self
    }

    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.experiment.state_dir = dir.into();
        self
    }

    pub fn default_platform(mut self, name: &str) -> Self {
        self.config.experiment.default_platform = name.to_string();
        self
    }

    pub fn platform(mut self, name: &str, platform: PlatformBuilder) -> Self {
        self.config.platform.insert(name.to_string(), platform.build());
        self
    }

    pub fn job(mut self, section: &str, job: JobSectionBuilder) -> Self {
        self.config.job.insert(section.to_string(), job.build());
        self
    }

    pub fn wrapper(mut self, wrapper_type: WrapperType, max_wrapped: Option<usize>) -> Self {
        self.config.wrapper.wrapper_type = wrapper_type;
        self.config.wrapper.max_wrapped = max_wrapped;
        self
    }

    pub fn remote_dependencies(mut self, enabled: bool) -> Self {
        self.config.wrapper.remote_dependencies = enabled;
        self
    }

    pub fn wrapper_sections(mut self, sections: &[&str]) -> Self {
        self.config.wrapper.sections = sections.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn notifications(mut self, enabled: bool, mails_to: &[&str]) -> Self {
        self.config.notifications.enabled = enabled;
        self.config.notifications.mails_to = mails_to.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn parameter(mut self, key: &str, value: &str) -> Self {
        self.config.parameters.insert(key.to_string(), value.to_string());
        self
    }

    /// The unvalidated configuration, for validation tests.
    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for `PlatformConfig`.
pub struct PlatformBuilder {
    platform: PlatformConfig,
}

impl PlatformBuilder {
    pub fn new() -> Self {
        Self {
            platform: PlatformConfig {
                platform_type: "local".to_string(),
                max_waiting_jobs: 20,
                total_jobs: 20,
                max_wallclock: None,
                max_processors: None,
                allow_wrappers: true,
                root_dir: None,
            },
        }
    }

    pub fn platform_type(mut self, kind: &str) -> Self {
        self.platform.platform_type = kind.to_string();
        self
    }

    pub fn max_waiting_jobs(mut self, n: usize) -> Self {
        self.platform.max_waiting_jobs = n;
        self
    }

    pub fn total_jobs(mut self, n: usize) -> Self {
        self.platform.total_jobs = n;
        self
    }

    pub fn max_wallclock(mut self, hhmm: &str) -> Self {
        self.platform.max_wallclock = Some(hhmm.parse::<Wallclock>().expect("valid HH:MM"));
        self
    }

    pub fn max_processors(mut self, n: u32) -> Self {
        self.platform.max_processors = Some(n);
        self
    }

    pub fn allow_wrappers(mut self, allowed: bool) -> Self {
        self.platform.allow_wrappers = allowed;
        self
    }

    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.platform.root_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> PlatformConfig {
        self.platform
    }
}

impl Default for PlatformBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobSectionConfig`.
pub struct JobSectionBuilder {
    section: JobSectionConfig,
}

impl JobSectionBuilder {
    pub fn new() -> Self {
        Self {
            section: JobSectionConfig::default(),
        }
    }

    pub fn running(mut self, running: Running) -> Self {
        self.section.running = running;
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.section.dependencies.push(dep.to_string());
        self
    }

    pub fn platform(mut self, name: &str) -> Self {
        self.section.platform = Some(name.to_string());
        self
    }

    pub fn wallclock(mut self, hhmm: &str) -> Self {
        self.section.wallclock = Some(hhmm.parse::<Wallclock>().expect("valid HH:MM"));
        self
    }

    pub fn processors(mut self, n: u32) -> Self {
        self.section.processors = Some(n);
        self
    }

    pub fn retrials(mut self, n: u32) -> Self {
        self.section.retrials = Some(n);
        self
    }

    pub fn splits(mut self, n: u32) -> Self {
        self.section.splits = Some(n);
        self
    }

    pub fn skippable(mut self) -> Self {
        self.section.skippable = true;
        self
    }

    pub fn notify_on(mut self, status: Status) -> Self {
        self.section.notify_on.push(status);
        self
    }

    pub fn script(mut self, script: &str) -> Self {
        self.section.script = Some(script.to_string());
        self
    }

    pub fn build(self) -> JobSectionConfig {
        self.section
    }
}

impl Default for JobSectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
