// tests/config_validation.rs

mod common;
use crate::common::TestResult;
use crate::common::builders::{ConfigFileBuilder, JobSectionBuilder, PlatformBuilder};

use std::io::Write;

use expflow::config::{ConfigFile, load_and_validate, load_from_str};
use expflow::dag::Status;
use expflow::errors::ExpflowError;
use expflow::types::{Running, Wallclock, WrapperType};

const FULL_CONFIG: &str = r#"
[experiment]
expid = "a000"
dates = ["19900101", "19900201"]
members = ["fc0", "fc1"]
num_chunks = 3
default_platform = "HPC"
retrials = 1
safety_sleep_time = 5
copy_remote_logs = true

[notifications]
enabled = true
mails_to = ["ops@example.org"]

[wrapper]
type = "vertical"
max_wrapped = 4
remote_dependencies = true
sections = ["SIM"]

[parameters]
MODEL = "ecearth"

[platform.HPC]
type = "local"
max_waiting_jobs = 5
total_jobs = 10
max_wallclock = "08:00"
max_processors = 256

[platform.login]
type = "LOCAL"

[job.INI]
running = "member"

[job.SIM]
running = "chunk"
dependencies = ["INI", "SIM-1"]
wallclock = "02:30"
processors = 128
retrials = 3
notify_on = ["failed", "COMPLETED"]

[job.POST]
running = "chunk"
dependencies = ["SIM"]
platform = "Login"
splits = 2
skippable = true
"#;

fn expect_config_error(result: Result<ConfigFile, ExpflowError>, needle: &str) {
    match result {
        Err(ExpflowError::ConfigError(msg)) => {
            assert!(msg.contains(needle), "error '{msg}' should mention '{needle}'")
        }
        other => panic!("expected ConfigError mentioning '{needle}', got {other:?}"),
    }
}

#[test]
fn test_full_config_parses_and_validates() -> TestResult {
    let cfg = ConfigFile::try_from(load_from_str(FULL_CONFIG)?)?;

    assert_eq!(cfg.expid(), "a000");
    assert_eq!(cfg.chunks(), vec![1, 2, 3]);
    assert_eq!(cfg.experiment.default_platform, "hpc");
    assert_eq!(cfg.experiment.wrapper_check_time, 60);
    assert!(cfg.experiment.transitive_reduction);

    let platforms: Vec<&str> = cfg.platform.keys().map(String::as_str).collect();
    assert_eq!(platforms, vec!["hpc", "login"]);
    let hpc = &cfg.platform["hpc"];
    assert_eq!(hpc.max_wallclock, Some(Wallclock::from_minutes(480)));
    assert_eq!(hpc.max_processors, Some(256));
    assert!(hpc.allow_wrappers);
    assert_eq!(cfg.platform["login"].max_waiting_jobs, 20);

    assert_eq!(cfg.wrapper.wrapper_type, WrapperType::Vertical);
    assert_eq!(cfg.wrapper.max_wrapped, Some(4));
    assert!(cfg.wrapper.wraps_section("SIM"));
    assert!(!cfg.wrapper.wraps_section("POST"));

    let sim = &cfg.job["SIM"];
    assert_eq!(sim.running, Running::Chunk);
    assert_eq!(sim.wallclock, Some(Wallclock::from_minutes(150)));
    assert_eq!(sim.notify_on, vec![Status::Failed, Status::Completed]);
    assert_eq!(cfg.job["POST"].platform.as_deref(), Some("login"));
    assert_eq!(cfg.job["POST"].split_count(), Some(2));
    assert_eq!(cfg.job["INI"].running, Running::Member);

    assert_eq!(cfg.retrials_for("SIM"), (3, true));
    assert_eq!(cfg.retrials_for("POST"), (1, false));
    assert_eq!(cfg.parameters.get("MODEL").map(String::as_str), Some("ecearth"));
    assert_eq!(cfg.notifications.mails_to, vec!["ops@example.org"]);
    Ok(())
}

#[test]
fn test_malformed_toml_is_reported() {
    assert!(matches!(
        load_from_str("[experiment\nexpid = 1"),
        Err(ExpflowError::TomlError(_))
    ));
    let bad_wallclock = FULL_CONFIG.replace("\"02:30\"", "\"2h30\"");
    assert!(matches!(load_from_str(&bad_wallclock), Err(ExpflowError::TomlError(_))));
}

#[test]
fn test_oversized_wallclock_is_rejected_not_wrapped() {
    let err = "99999999:00".parse::<Wallclock>().expect_err("hours overflow minutes");
    assert!(err.contains("out of range"), "{err}");
    assert_eq!("71582788:15".parse::<Wallclock>(), Ok(Wallclock::from_minutes(4_294_967_295)));

    let huge = FULL_CONFIG.replace("\"02:30\"", "\"99999999:00\"");
    assert!(matches!(load_from_str(&huge), Err(ExpflowError::TomlError(_))));
}

#[test]
fn test_hybrid_wrapper_types_are_rejected() {
    for hybrid in ["vertical-mixed", "vertical-horizontal", "horizontal-vertical"] {
        let raw = FULL_CONFIG.replace("type = \"vertical\"", &format!("type = \"{hybrid}\""));
        assert!(
            matches!(load_from_str(&raw), Err(ExpflowError::TomlError(_))),
            "{hybrid} should not parse"
        );
    }
}

#[test]
fn test_unknown_dependency_is_rejected() {
    let raw = ConfigFileBuilder::new("a000")
        .job("SIM", JobSectionBuilder::new().after("INI"))
        .raw();
    expect_config_error(ConfigFile::try_from(raw), "unknown dependency 'INI'");
}

#[test]
fn test_self_dependency_needs_a_distance() {
    let raw = ConfigFileBuilder::new("a000")
        .job("SIM", JobSectionBuilder::new().after("SIM"))
        .raw();
    expect_config_error(ConfigFile::try_from(raw), "cannot depend on itself");

    let ok = ConfigFileBuilder::new("a000")
        .dates(&["19900101"])
        .members(&["fc0"])
        .chunks(2)
        .job(
            "SIM",
            JobSectionBuilder::new().running(Running::Chunk).after("SIM-1"),
        )
        .raw();
    assert!(ConfigFile::try_from(ok).is_ok());
}

#[test]
fn test_section_cycle_is_rejected() {
    let raw = ConfigFileBuilder::new("a000")
        .job("A", JobSectionBuilder::new().after("C"))
        .job("B", JobSectionBuilder::new().after("A"))
        .job("C", JobSectionBuilder::new().after("B"))
        .raw();
    assert!(matches!(ConfigFile::try_from(raw), Err(ExpflowError::DagCycle(_))));
}

#[test]
fn test_platform_problems_are_rejected() {
    let unsupported = ConfigFileBuilder::new("a000")
        .platform("hpc", PlatformBuilder::new().platform_type("slurm"))
        .job("A", JobSectionBuilder::new())
        .raw();
    expect_config_error(ConfigFile::try_from(unsupported), "unsupported type 'slurm'");

    let missing_default = ConfigFileBuilder::new("a000")
        .default_platform("hpc")
        .job("A", JobSectionBuilder::new())
        .raw();
    expect_config_error(ConfigFile::try_from(missing_default), "default platform 'hpc'");

    let unknown_section_platform = ConfigFileBuilder::new("a000")
        .job("A", JobSectionBuilder::new().platform("nowhere"))
        .raw();
    expect_config_error(ConfigFile::try_from(unknown_section_platform), "unknown platform 'nowhere'");

    let duplicate = ConfigFileBuilder::new("a000")
        .platform("LOCAL", PlatformBuilder::new())
        .job("A", JobSectionBuilder::new())
        .raw();
    expect_config_error(ConfigFile::try_from(duplicate), "more than once");

    let zero_queue = ConfigFileBuilder::new("a000")
        .platform("local", PlatformBuilder::new().max_waiting_jobs(0))
        .job("A", JobSectionBuilder::new())
        .raw();
    expect_config_error(ConfigFile::try_from(zero_queue), "must be >= 1");
}

#[test]
fn test_wrapper_problems_are_rejected() {
    let zero = ConfigFileBuilder::new("a000")
        .wrapper(WrapperType::Vertical, Some(0))
        .job("A", JobSectionBuilder::new())
        .raw();
    expect_config_error(ConfigFile::try_from(zero), "max_wrapped");

    let unknown_section = ConfigFileBuilder::new("a000")
        .wrapper(WrapperType::Horizontal, Some(2))
        .wrapper_sections(&["SIM"])
        .job("A", JobSectionBuilder::new())
        .raw();
    expect_config_error(ConfigFile::try_from(unknown_section), "unknown job section 'SIM'");
}

#[test]
fn test_sweep_must_match_section_granularity() {
    let no_dates = ConfigFileBuilder::new("a000")
        .job("SIM", JobSectionBuilder::new().running(Running::Chunk))
        .raw();
    expect_config_error(ConfigFile::try_from(no_dates), "dates");

    let no_members = ConfigFileBuilder::new("a000")
        .dates(&["19900101"])
        .job("SIM", JobSectionBuilder::new().running(Running::Member))
        .raw();
    expect_config_error(ConfigFile::try_from(no_members), "members");

    let bad_chunk_ini = ConfigFileBuilder::new("a000")
        .dates(&["19900101"])
        .members(&["fc0"])
        .chunks(2)
        .chunk_ini(3)
        .job("SIM", JobSectionBuilder::new().running(Running::Chunk))
        .raw();
    expect_config_error(ConfigFile::try_from(bad_chunk_ini), "chunk_ini");

    let no_jobs = ConfigFileBuilder::new("a000").raw();
    expect_config_error(ConfigFile::try_from(no_jobs), "at least one");
}

#[test]
fn test_load_and_validate_reads_from_disk() -> TestResult {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(FULL_CONFIG.as_bytes())?;
    file.flush()?;

    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.job.len(), 3);

    assert!(matches!(
        load_and_validate(file.path().with_extension("missing")),
        Err(ExpflowError::IoError(_))
    ));
    Ok(())
}
