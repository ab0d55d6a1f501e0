// tests/property/packager.rs

use std::collections::BTreeSet;

use proptest::prelude::*;

use expflow::dag::{Job, JobGraph, Status};
use expflow::packager::{Packager, WrappingPolicy};
use expflow::types::{JobName, Wallclock};
use expflow::wrapper::PackageTable;

use crate::common::job;

#[derive(Debug, Clone)]
struct Case {
    graph: JobGraph,
    ready: Vec<JobName>,
    policy: WrappingPolicy,
    capacity: usize,
}

fn policy_strategy() -> impl Strategy<Value = WrappingPolicy> {
    (
        0u8..3,
        1usize..5,
        prop::option::of(1u32..16),
        prop::option::of(30u32..300),
    )
        .prop_map(|(kind, max_wrapped, processors, minutes)| {
            let mut policy = match kind {
                0 => WrappingPolicy::none(),
                1 => WrappingPolicy::vertical(max_wrapped),
                _ => WrappingPolicy::horizontal(max_wrapped),
            };
            if let Some(p) = processors {
                policy = policy.with_max_processors(p);
            }
            if let Some(m) = minutes {
                policy = policy.with_max_wallclock(Wallclock::from_minutes(m));
            }
            policy
        })
}

/// Independent READY jobs across two sections, each with random resources.
fn case_strategy() -> impl Strategy<Value = Case> {
    (
        proptest::collection::vec((any::<bool>(), 1u32..8, 10u32..120), 1..12),
        policy_strategy(),
        0usize..15,
    )
        .prop_map(|(specs, policy, capacity)| {
            let jobs: Vec<Job> = specs
                .iter()
                .enumerate()
                .map(|(i, (post, processors, minutes))| {
                    let section = if *post { "POST" } else { "SIM" };
                    let mut j = job(&format!("a000_{i}_{section}"), section, Status::Ready, &[]);
                    j.id = i as u64 + 1;
                    j.processors = *processors;
                    j.wallclock = Wallclock::from_minutes(*minutes);
                    j
                })
                .collect();
            let ready = jobs.iter().map(|j| j.name.clone()).collect();
            let graph = JobGraph::from_jobs("a000", "local", jobs, false).expect("no edges");
            Case {
                graph,
                ready,
                policy,
                capacity,
            }
        })
}

proptest! {
    #[test]
    fn prop_packages_respect_capacity_and_limits(case in case_strategy()) {
        let packages = Packager::new(&case.graph, &case.policy).package(
            "local",
            &case.ready,
            case.capacity,
            &PackageTable::new(),
        );

        let total: usize = packages.iter().map(|p| p.len()).sum();
        prop_assert!(total <= case.capacity);
        prop_assert_eq!(total, case.capacity.min(case.ready.len()));

        let mut seen = BTreeSet::new();
        for package in packages.iter() {
            prop_assert!(!package.is_empty());
            for member in package.jobs.iter() {
                prop_assert!(seen.insert(member.clone()), "{} packaged twice", member);
                prop_assert!(case.ready.contains(member));
                let section = &case.graph.job(member).expect("member exists").section;
                prop_assert_eq!(section, &package.section);
            }
            if package.is_wrapped() {
                prop_assert!(case.policy.wraps(&package.section));
                prop_assert!(case
                    .policy
                    .within_limits(package.len(), (package.wallclock, package.processors)));
            } else {
                prop_assert_eq!(&package.name, &package.jobs[0]);
            }
        }
    }
}
