#![allow(dead_code, unused_imports)]

pub use expflow_test_utils::builders;
pub use expflow_test_utils::fake_platform;
pub use expflow_test_utils::{Harness, RecordingNotifier, RecordingStore, init_tracing, with_timeout};

use expflow::config::ConfigFile;
use expflow::dag::{Job, Status};

use crate::common::builders::{ConfigFileBuilder, JobSectionBuilder};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Three single-run sections chained A -> B -> C.
pub fn chain_config(expid: &str) -> ConfigFile {
    ConfigFileBuilder::new(expid)
        .job("A", JobSectionBuilder::new())
        .job("B", JobSectionBuilder::new().after("A"))
        .job("C", JobSectionBuilder::new().after("B"))
        .build()
}

/// A hand-made job for graph-level tests.
pub fn job(name: &str, section: &str, status: Status, parents: &[&str]) -> Job {
    let mut job = Job::new(name, section);
    job.status = status;
    job.parents = parents.iter().map(|p| p.to_string()).collect();
    if status == Status::Ready {
        job.ready_since = Some(0);
    }
    job
}
