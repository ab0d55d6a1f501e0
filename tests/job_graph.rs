// tests/job_graph.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, JobSectionBuilder};
use crate::common::{TestResult, job};

use std::collections::BTreeSet;

use expflow::dag::{Capacity, JobGraph, Status, build_job_graph};
use expflow::errors::ExpflowError;
use expflow::types::{Running, WrapperType};
use expflow::wrapper::{PackageTable, PollUnit, StatusQuery, WrapperJob};
use expflow::packager::Package;
use expflow::types::Wallclock;

fn names(set: &BTreeSet<String>) -> Vec<&str> {
    set.iter().map(String::as_str).collect()
}

/// INI per member, SIM per chunk after INI and its previous chunk, POST per
/// chunk after SIM.
fn sweep_config(transitive: bool) -> expflow::config::ConfigFile {
    ConfigFileBuilder::new("a000")
        .dates(&["19900101"])
        .members(&["fc0"])
        .chunks(3)
        .transitive_reduction(transitive)
        .job("INI", JobSectionBuilder::new().running(Running::Member))
        .job(
            "SIM",
            JobSectionBuilder::new()
                .running(Running::Chunk)
                .after("INI")
                .after("SIM-1"),
        )
        .job("POST", JobSectionBuilder::new().running(Running::Chunk).after("SIM"))
        .build()
}

#[test]
fn test_builder_expands_sections_over_the_sweep() -> TestResult {
    let graph = build_job_graph(&sweep_config(true), None)?;

    assert_eq!(graph.len(), 7);
    let ini = graph.job("a000_19900101_fc0_INI").expect("INI exists");
    assert_eq!(ini.status, Status::Ready);
    assert!(!ini.has_parents());

    let sim1 = graph.job("a000_19900101_fc0_1_SIM").expect("SIM 1 exists");
    assert_eq!(names(&sim1.parents), vec!["a000_19900101_fc0_INI"]);
    assert_eq!(sim1.status, Status::Waiting);
    assert_eq!(sim1.chunk, Some(1));

    // INI -> SIM 2 is implied by INI -> SIM 1 -> SIM 2.
    let sim2 = graph.job("a000_19900101_fc0_2_SIM").expect("SIM 2 exists");
    assert_eq!(names(&sim2.parents), vec!["a000_19900101_fc0_1_SIM"]);

    let post3 = graph.job("a000_19900101_fc0_3_POST").expect("POST 3 exists");
    assert_eq!(names(&post3.parents), vec!["a000_19900101_fc0_3_SIM"]);

    let children: Vec<&str> = graph.dependents_of("a000_19900101_fc0_1_SIM").collect();
    assert_eq!(children, vec!["a000_19900101_fc0_1_POST", "a000_19900101_fc0_2_SIM"]);
    Ok(())
}

#[test]
fn test_builder_keeps_redundant_edges_without_reduction() -> TestResult {
    let graph = build_job_graph(&sweep_config(true), Some(false))?;
    let sim2 = graph.job("a000_19900101_fc0_2_SIM").expect("SIM 2 exists");
    assert_eq!(
        names(&sim2.parents),
        vec!["a000_19900101_fc0_1_SIM", "a000_19900101_fc0_INI"]
    );

    let from_config = build_job_graph(&sweep_config(false), None)?;
    assert_eq!(from_config, graph);
    Ok(())
}

#[test]
fn test_fan_in_over_missing_dimensions() -> TestResult {
    let cfg = ConfigFileBuilder::new("a000")
        .dates(&["19900101"])
        .members(&["fc0", "fc1"])
        .chunks(2)
        .job(
            "SIM",
            JobSectionBuilder::new().running(Running::Chunk).after("SIM-1"),
        )
        .job("CLEAN", JobSectionBuilder::new().after("SIM"))
        .build();

    let full = build_job_graph(&cfg, Some(false))?;
    let clean = full.job("a000_CLEAN").expect("CLEAN exists");
    assert_eq!(clean.parents.len(), 4);

    let reduced = build_job_graph(&cfg, Some(true))?;
    let clean = reduced.job("a000_CLEAN").expect("CLEAN exists");
    assert_eq!(
        names(&clean.parents),
        vec!["a000_19900101_fc0_2_SIM", "a000_19900101_fc1_2_SIM"]
    );
    Ok(())
}

#[test]
fn test_forward_distance_clamps_to_last_chunk() -> TestResult {
    let cfg = ConfigFileBuilder::new("a000")
        .dates(&["19900101"])
        .members(&["fc0"])
        .chunks(3)
        .job("SIM", JobSectionBuilder::new().running(Running::Chunk))
        .job(
            "POST",
            JobSectionBuilder::new().running(Running::Chunk).after("SIM+1"),
        )
        .build();
    let graph = build_job_graph(&cfg, None)?;

    let parent_of = |chunk: u32| -> Vec<String> {
        graph
            .dependencies_of(&format!("a000_19900101_fc0_{chunk}_POST"))
            .map(str::to_string)
            .collect()
    };
    assert_eq!(parent_of(1), vec!["a000_19900101_fc0_2_SIM"]);
    assert_eq!(parent_of(2), vec!["a000_19900101_fc0_3_SIM"]);
    assert_eq!(parent_of(3), vec!["a000_19900101_fc0_3_SIM"]);
    Ok(())
}

#[test]
fn test_splits_depend_on_matching_split() -> TestResult {
    let cfg = ConfigFileBuilder::new("a000")
        .dates(&["19900101"])
        .members(&["fc0"])
        .job("SIM", JobSectionBuilder::new().running(Running::Chunk).splits(2))
        .job(
            "POST",
            JobSectionBuilder::new()
                .running(Running::Chunk)
                .splits(2)
                .after("SIM"),
        )
        .build();
    let graph = build_job_graph(&cfg, None)?;

    assert_eq!(graph.len(), 4);
    let post = graph.job("a000_19900101_fc0_1_2_POST").expect("split job exists");
    assert_eq!(post.split, Some(2));
    assert_eq!(names(&post.parents), vec!["a000_19900101_fc0_1_2_SIM"]);

    let params = post.parameters("a000");
    assert_eq!(params.get("SPLIT").map(String::as_str), Some("2"));
    assert_eq!(params.get("CHUNK").map(String::as_str), Some("1"));
    assert_eq!(params.get("SDATE").map(String::as_str), Some("19900101"));
    Ok(())
}

#[test]
fn test_duplicate_start_dates_are_rejected() {
    let cfg = ConfigFileBuilder::new("a000")
        .dates(&["19900101", "19900101"])
        .job("INI", JobSectionBuilder::new().running(Running::Date))
        .build();

    match build_job_graph(&cfg, None) {
        Err(ExpflowError::DuplicateParameter { kind, value }) => {
            assert_eq!(kind, "start date");
            assert_eq!(value, "19900101");
        }
        other => panic!("expected DuplicateParameter, got {other:?}"),
    }
}

#[test]
fn test_cycles_and_dangling_parents_are_rejected() {
    let cyclic = JobGraph::from_jobs(
        "a000",
        "local",
        vec![
            job("a000_A", "A", Status::Waiting, &["a000_B"]),
            job("a000_B", "B", Status::Waiting, &["a000_A"]),
        ],
        false,
    );
    assert!(matches!(cyclic, Err(ExpflowError::DagCycle(_))));

    let dangling = JobGraph::from_jobs(
        "a000",
        "local",
        vec![job("a000_A", "A", Status::Waiting, &["a000_GHOST"])],
        false,
    );
    assert!(matches!(dangling, Err(ExpflowError::JobNotFound(_))));
}

#[test]
fn test_ready_requires_completed_parents() -> TestResult {
    let graph = JobGraph::from_jobs(
        "a000",
        "local",
        vec![
            job("a000_A", "A", Status::Completed, &[]),
            job("a000_B", "B", Status::Waiting, &["a000_A"]),
            job("a000_X", "X", Status::Running, &[]),
            job("a000_C", "C", Status::Waiting, &["a000_X"]),
        ],
        false,
    )?;

    let ready: Vec<&str> = graph
        .ready(&Capacity::unlimited())
        .into_iter()
        .map(|j| j.name.as_str())
        .collect();
    assert_eq!(ready, vec!["a000_B"]);
    Ok(())
}

#[test]
fn test_exhausted_failure_blocks_descendants_unless_skippable() -> TestResult {
    let mut failed = job("a000_X", "X", Status::Failed, &[]);
    failed.fail_count = 1;
    failed.max_retrials = 1;
    let jobs = vec![
        failed.clone(),
        job("a000_C", "C", Status::Waiting, &["a000_X"]),
        job("a000_D", "D", Status::Waiting, &["a000_C"]),
    ];

    let graph = JobGraph::from_jobs("a000", "local", jobs.clone(), false)?;
    assert_eq!(names(&graph.blocked()), vec!["a000_C", "a000_D"]);
    assert!(graph.active().is_empty());
    assert_eq!(graph.failed().len(), 1);
    assert!(graph.ready(&Capacity::unlimited()).is_empty());

    let mut skippable = jobs;
    skippable[0].skippable = true;
    let graph = JobGraph::from_jobs("a000", "local", skippable, false)?;
    assert!(graph.blocked().is_empty());
    let ready: Vec<&str> = graph
        .ready(&Capacity::unlimited())
        .into_iter()
        .map(|j| j.name.as_str())
        .collect();
    assert_eq!(ready, vec!["a000_C"]);
    Ok(())
}

#[test]
fn test_ready_orders_by_readiness_and_respects_capacity() -> TestResult {
    let mut early = job("a000_Z", "Z", Status::Ready, &[]);
    early.ready_since = Some(1);
    let mut late = job("a000_A", "A", Status::Ready, &[]);
    late.ready_since = Some(5);
    let fresh = job("a000_M", "M", Status::Waiting, &[]);
    let mut elsewhere = job("a000_H", "H", Status::Ready, &[]);
    elsewhere.platform = Some("hpc".to_string());
    elsewhere.ready_since = Some(9);

    let graph = JobGraph::from_jobs("a000", "local", vec![early, late, fresh, elsewhere], false)?;

    let capacity = Capacity::unlimited().with("local", 2);
    let ready: Vec<&str> = graph
        .ready(&capacity)
        .into_iter()
        .map(|j| j.name.as_str())
        .collect();
    assert_eq!(ready, vec!["a000_Z", "a000_A", "a000_H"]);
    Ok(())
}

#[test]
fn test_promote_runnable_delays_over_capacity() -> TestResult {
    let mut graph = JobGraph::from_jobs(
        "a000",
        "local",
        vec![
            job("a000_A", "A", Status::Waiting, &[]),
            job("a000_B", "B", Status::Waiting, &[]),
        ],
        false,
    )?;

    let transitions = graph.promote_runnable(&Capacity::unlimited().with("local", 1), 4);
    assert_eq!(transitions.len(), 2);
    assert_eq!(graph.status_of("a000_A"), Some(Status::Ready));
    assert_eq!(graph.job("a000_A").and_then(|j| j.ready_since), Some(4));
    assert_eq!(graph.status_of("a000_B"), Some(Status::Delayed));

    graph.promote_runnable(&Capacity::unlimited(), 5);
    assert_eq!(graph.status_of("a000_B"), Some(Status::Ready));
    Ok(())
}

#[test]
fn test_retry_failed_consumes_budget() -> TestResult {
    let mut root = job("a000_A", "A", Status::Failed, &[]);
    root.max_retrials = 1;
    root.remote_id = Some("local-1".to_string());
    let mut child = job("a000_B", "B", Status::Failed, &["a000_A"]);
    child.max_retrials = 3;

    let mut graph = JobGraph::from_jobs("a000", "local", vec![root, child], false)?;
    let transitions = graph.retry_failed(2);
    assert_eq!(transitions.len(), 2);

    let a = graph.job("a000_A").expect("A exists");
    assert_eq!((a.status, a.fail_count, a.remote_id.clone()), (Status::Ready, 1, None));
    let b = graph.job("a000_B").expect("B exists");
    assert_eq!((b.status, b.fail_count), (Status::Waiting, 1));

    graph.set_status("a000_A", Status::Submitted)?;
    graph.set_status("a000_A", Status::Failed)?;
    assert!(graph.retry_failed(3).is_empty());
    assert!(graph.job("a000_A").is_some_and(|j| j.is_exhausted()));
    Ok(())
}

#[test]
fn test_failure_fails_in_queue_descendants() -> TestResult {
    let mut graph = JobGraph::from_jobs(
        "a000",
        "local",
        vec![
            job("a000_A", "A", Status::Failed, &[]),
            job("a000_B", "B", Status::Queuing, &["a000_A"]),
            job("a000_C", "C", Status::Submitted, &["a000_B"]),
            job("a000_D", "D", Status::Waiting, &["a000_B"]),
        ],
        false,
    )?;

    let failed: BTreeSet<String> = graph
        .fail_in_queue_descendants("a000_A")
        .into_iter()
        .map(|t| t.job)
        .collect();
    assert_eq!(names(&failed), vec!["a000_B", "a000_C"]);
    assert_eq!(graph.status_of("a000_D"), Some(Status::Waiting));
    Ok(())
}

#[test]
fn test_in_queue_grouping_collapses_wrappers() -> TestResult {
    let mut remote = job("a000_R", "R", Status::Running, &[]);
    remote.platform = Some("hpc".to_string());
    let graph = JobGraph::from_jobs(
        "a000",
        "local",
        vec![
            job("a000_1_SIM", "SIM", Status::Submitted, &[]),
            job("a000_2_SIM", "SIM", Status::Submitted, &["a000_1_SIM"]),
            job("a000_P", "P", Status::Queuing, &[]),
            job("a000_W", "W", Status::Waiting, &[]),
            remote,
        ],
        false,
    )?;

    let package = Package {
        name: "a000_vertical_1".to_string(),
        platform: "local".to_string(),
        section: "SIM".to_string(),
        wrapper_type: WrapperType::Vertical,
        jobs: vec!["a000_1_SIM".to_string(), "a000_2_SIM".to_string()],
        wallclock: Wallclock::from_minutes(60),
        processors: 1,
        remote_dependency: None,
    };
    let mut table = PackageTable::new();
    table.insert(WrapperJob::from_package(&package, "local-7".to_string()));

    let grouped = graph.in_queue_grouped_by_platform(&table);
    assert_eq!(
        grouped.get("local"),
        Some(&vec![
            PollUnit::Composite("a000_vertical_1".to_string()),
            PollUnit::Single("a000_P".to_string()),
        ])
    );
    assert_eq!(
        grouped.get("hpc"),
        Some(&vec![PollUnit::Single("a000_R".to_string())])
    );
    Ok(())
}

/// Three SIM jobs wrapped horizontally, with the given member statuses.
fn wrapped_trio(statuses: [Status; 3]) -> Result<(JobGraph, WrapperJob), Box<dyn std::error::Error>> {
    let jobs = statuses
        .iter()
        .enumerate()
        .map(|(i, status)| job(&format!("a000_{}_SIM", i + 1), "SIM", *status, &[]))
        .collect();
    let graph = JobGraph::from_jobs("a000", "local", jobs, false)?;
    let package = Package {
        name: "a000_horizontal_1".to_string(),
        platform: "local".to_string(),
        section: "SIM".to_string(),
        wrapper_type: WrapperType::Horizontal,
        jobs: (1..=3).map(|i| format!("a000_{i}_SIM")).collect(),
        wallclock: Wallclock::from_minutes(30),
        processors: 3,
        remote_dependency: None,
    };
    Ok((graph, WrapperJob::from_package(&package, "local-3".to_string())))
}

#[test]
fn test_wrapper_status_is_projected_from_members() -> TestResult {
    use Status::*;

    let (graph, wrapper) = wrapped_trio([Completed, Completed, Completed])?;
    assert_eq!(wrapper.status(&graph), Completed);

    let (graph, wrapper) = wrapped_trio([Completed, Failed, Running])?;
    assert_eq!(wrapper.status(&graph), Failed);

    let (graph, wrapper) = wrapped_trio([Running, Queuing, Completed])?;
    assert_eq!(wrapper.status(&graph), Running);

    let (graph, mut wrapper) = wrapped_trio([Queuing, Queuing, Completed])?;
    assert_eq!(wrapper.status(&graph), Queuing);
    wrapper.remote_status = Running;
    assert_eq!(wrapper.status(&graph), Running);
    Ok(())
}

#[test]
fn test_retired_wrappers_report_final_status() -> TestResult {
    let (graph, wrapper) = wrapped_trio([Status::Completed, Status::Failed, Status::Completed])?;
    let mut table = PackageTable::new();
    table.insert(wrapper);

    assert_eq!(
        PollUnit::Composite("a000_horizontal_1".to_string()).status(&graph, &table),
        Some(Status::Failed)
    );
    assert_eq!(
        table.retire_finished(&graph),
        vec![("a000_horizontal_1".to_string(), Status::Failed)]
    );
    assert!(table.wrapper_of("a000_1_SIM").is_none());

    let (graph, wrapper) = wrapped_trio([Status::Completed, Status::Running, Status::Queuing])?;
    let mut table = PackageTable::new();
    table.insert(wrapper);
    assert!(table.retire_finished(&graph).is_empty());
    assert!(table.wrapper_of("a000_2_SIM").is_some());
    Ok(())
}
