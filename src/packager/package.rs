// src/packager/package.rs

use crate::types::{JobName, Wallclock, WrapperType};

/// Jobs grouped for one physical submission on one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub platform: String,
    pub section: String,
    /// `None` for single-job packages.
    pub wrapper_type: WrapperType,
    /// Members in execution order.
    pub jobs: Vec<JobName>,
    pub wallclock: Wallclock,
    pub processors: u32,
    /// Name of the package this one must wait for on the platform.
    pub remote_dependency: Option<String>,
}

impl Package {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Submitted as a wrapper rather than as a plain job.
    pub fn is_wrapped(&self) -> bool {
        self.jobs.len() > 1
    }
}
