// tests/property/graph.rs

use proptest::prelude::*;

use expflow::dag::{Capacity, Job, JobGraph, Status};

use crate::common::job;

/// A random DAG: job `i` may only depend on jobs `0..i`, each with a
/// random status.
fn graph_strategy(max_jobs: usize) -> impl Strategy<Value = JobGraph> {
    (1..=max_jobs).prop_flat_map(|n| {
        (
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), n),
            proptest::collection::vec(prop::sample::select(Status::ALL.to_vec()), n),
        )
            .prop_map(move |(raw_parents, statuses)| {
                let jobs: Vec<Job> = (0..n)
                    .map(|i| {
                        let parents: Vec<String> = if i == 0 {
                            Vec::new()
                        } else {
                            raw_parents[i].iter().map(|p| format!("a000_{}_SIM", p % i)).collect()
                        };
                        let parents: Vec<&str> = parents.iter().map(String::as_str).collect();
                        job(&format!("a000_{i}_SIM"), "SIM", statuses[i], &parents)
                    })
                    .collect();
                JobGraph::from_jobs("a000", "local", jobs, false).expect("generated graph is acyclic")
            })
    })
}

proptest! {
    #[test]
    fn prop_ready_jobs_are_pending_with_satisfied_parents(graph in graph_strategy(12)) {
        for ready in graph.ready(&Capacity::unlimited()) {
            prop_assert!(ready.status.is_pending(), "{} is {}", ready.name, ready.status);
            for parent in ready.parents.iter() {
                let parent = graph.job(parent).expect("parent exists");
                prop_assert!(JobGraph::parent_satisfied(parent));
            }
        }
    }

    #[test]
    fn prop_ready_respects_capacity(graph in graph_strategy(12), free in 0usize..5) {
        let capacity = Capacity::unlimited().with("local", free);
        prop_assert!(graph.ready(&capacity).len() <= free);
    }

    #[test]
    fn prop_set_status_only_applies_legal_transitions(
        graph in graph_strategy(6),
        moves in proptest::collection::vec((0usize..6, prop::sample::select(Status::ALL.to_vec())), 1..30),
    ) {
        let mut graph = graph;
        let names: Vec<String> = graph.jobs().map(|j| j.name.clone()).collect();
        for (idx, to) in moves {
            let name = &names[idx % names.len()];
            let before = graph.status_of(name).expect("job exists");
            match graph.set_status(name, to) {
                Ok(Some(t)) => {
                    prop_assert_eq!(t.from, before);
                    prop_assert_eq!(t.to, to);
                    prop_assert!(before.can_transition(to));
                    prop_assert_eq!(graph.status_of(name), Some(to));
                }
                Ok(None) => prop_assert_eq!(before, to),
                Err(_) => prop_assert_eq!(graph.status_of(name), Some(before)),
            }
        }
    }

    #[test]
    fn prop_blocked_jobs_are_never_active(graph in graph_strategy(12)) {
        let blocked = graph.blocked();
        for job in graph.active() {
            prop_assert!(!blocked.contains(&job.name));
        }
        for name in blocked.iter() {
            let job = graph.job(name).expect("blocked job exists");
            prop_assert!(job.status.is_pending());
        }
    }
}
