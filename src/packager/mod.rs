// src/packager/mod.rs

//! Groups runnable jobs of one platform into submission packages.
//!
//! Packaging runs in three passes:
//!
//! 1. Candidates. Each runnable job becomes a candidate. Under a vertical
//!    policy the candidate grows into a chain: the job followed by its
//!    wrappable children (same section, every other parent already done or
//!    earlier in the chain), so the chain's order is a topological order.
//! 2. Bin-packing. Candidates are taken earliest-ready first and packed
//!    greedily, per section, into packages bounded by the policy's size,
//!    wallclock and processor limits. A candidate that alone breaks a limit
//!    gets a package of its own.
//! 3. Remote dependencies. With `remote_dependencies`, a vertical chain cut
//!    short by the limits continues in a new package that waits on the first
//!    one at the platform level. A horizontal package gets layers stacked
//!    behind it instead: each layer holds the same-section children of the
//!    previous one and waits on it. Both also happen behind wrappers already
//!    in flight.
//!
//! The total number of jobs handed out never exceeds the platform's spare
//! capacity.

pub mod package;
pub mod policy;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::dag::{Job, JobGraph};
use crate::types::{JobName, Wallclock, WrapperType};
use crate::wrapper::PackageTable;

pub use package::Package;
pub use policy::WrappingPolicy;

/// A dependency-closed run of jobs that must stay together, in order.
#[derive(Debug)]
struct Candidate {
    jobs: Vec<JobName>,
    section: String,
    wrappable: bool,
    resources: (Wallclock, u32),
    /// Next chain member that did not fit.
    cut_child: Option<JobName>,
}

/// Packs runnable jobs of a single platform.
#[derive(Debug)]
pub struct Packager<'a> {
    graph: &'a JobGraph,
    policy: &'a WrappingPolicy,
}

impl<'a> Packager<'a> {
    pub fn new(graph: &'a JobGraph, policy: &'a WrappingPolicy) -> Self {
        Self { graph, policy }
    }

    /// Build the packages for `platform`.
    ///
    /// `ready` is the platform's runnable jobs, earliest-ready first.
    /// `capacity` bounds the number of jobs across all returned packages.
    /// `in_flight` holds wrappers already submitted, for chaining.
    pub fn package(
        &self,
        platform: &str,
        ready: &[JobName],
        capacity: usize,
        in_flight: &PackageTable,
    ) -> Vec<Package> {
        let mut packed: BTreeSet<JobName> = BTreeSet::new();
        let mut remaining = capacity;

        let candidates = self.candidates(platform, ready, &mut packed, &mut remaining);
        let (mut packages, cuts) = self.bin_pack(platform, candidates);

        if self.chains_remotely() {
            for (package_idx, cut) in cuts {
                let upstream_name = packages[package_idx].name.clone();
                let upstream: BTreeSet<JobName> =
                    packages[package_idx].jobs.iter().cloned().collect();
                self.continue_chain(
                    platform,
                    cut,
                    upstream_name,
                    upstream,
                    &mut packed,
                    &mut remaining,
                    &mut packages,
                );
            }
            if self.policy.wrapper_type == WrapperType::Horizontal {
                let heads: Vec<(String, Vec<JobName>)> = packages
                    .iter()
                    .filter(|p| p.is_wrapped())
                    .map(|p| (p.name.clone(), p.jobs.clone()))
                    .collect();
                for (name, members) in heads {
                    self.stack_layers(platform, name, members, &mut packed, &mut remaining, &mut packages);
                }
            }
            self.chain_behind_in_flight(platform, in_flight, &mut packed, &mut remaining, &mut packages);
        }

        debug!(
            platform,
            packages = packages.len(),
            jobs = packed.len(),
            "packaging done"
        );
        packages
    }

    fn chains_remotely(&self) -> bool {
        self.policy.remote_dependencies && self.policy.wrapper_type != WrapperType::None
    }

    fn job(&self, name: &str) -> Option<&'a Job> {
        self.graph.job(name)
    }

    fn resources(job: &Job) -> (Wallclock, u32) {
        (job.wallclock, job.processors)
    }

    fn candidates(
        &self,
        platform: &str,
        ready: &[JobName],
        packed: &mut BTreeSet<JobName>,
        remaining: &mut usize,
    ) -> Vec<Candidate> {
        let mut out = Vec::new();
        for name in ready {
            if *remaining == 0 {
                break;
            }
            if packed.contains(name) {
                continue;
            }
            let Some(job) = self.job(name) else {
                warn!(job = %name, "ready job missing from graph; skipped");
                continue;
            };
            if self.graph.platform_of(job) != platform {
                warn!(job = %name, platform, "ready job belongs to another platform; skipped");
                continue;
            }

            let wrappable = self.policy.wraps(&job.section);
            let candidate = if wrappable && self.policy.wrapper_type == WrapperType::Vertical {
                let limit = self.policy.max_wrapped.min(*remaining);
                let (jobs, cut_child) = self.chain_from(job, &BTreeSet::new(), packed, limit);
                let resources = self.chain_resources(&jobs);
                Candidate {
                    jobs,
                    section: job.section.clone(),
                    wrappable,
                    resources,
                    cut_child,
                }
            } else {
                Candidate {
                    jobs: vec![job.name.clone()],
                    section: job.section.clone(),
                    wrappable,
                    resources: Self::resources(job),
                    cut_child: None,
                }
            };

            *remaining -= candidate.jobs.len();
            packed.extend(candidate.jobs.iter().cloned());
            out.push(candidate);
        }
        out
    }

    fn chain_resources(&self, jobs: &[JobName]) -> (Wallclock, u32) {
        jobs.iter()
            .filter_map(|n| self.job(n))
            .map(Self::resources)
            .fold((Wallclock::ZERO, 0), |acc, r| self.policy.combine(acc, r))
    }

    /// Grow a vertical chain from `start`.
    ///
    /// A child may join when it shares the section, is still pending, is not
    /// packed yet, and each of its other parents is satisfied, earlier in the
    /// chain, or in `upstream`. Returns the chain and the first eligible
    /// child that did not fit.
    fn chain_from(
        &self,
        start: &Job,
        upstream: &BTreeSet<JobName>,
        packed: &BTreeSet<JobName>,
        limit: usize,
    ) -> (Vec<JobName>, Option<JobName>) {
        let mut chain = vec![start.name.clone()];
        let mut in_chain: BTreeSet<JobName> = BTreeSet::from([start.name.clone()]);
        let mut resources = Self::resources(start);
        let mut last = start;

        loop {
            let Some(child) = self.wrappable_child(last, &in_chain, upstream, packed) else {
                return (chain, None);
            };
            let combined = self.policy.combine(resources, Self::resources(child));
            if chain.len() >= limit || !self.policy.within_limits(chain.len() + 1, combined) {
                return (chain, Some(child.name.clone()));
            }
            chain.push(child.name.clone());
            in_chain.insert(child.name.clone());
            resources = combined;
            last = child;
        }
    }

    fn wrappable_child(
        &self,
        job: &Job,
        in_chain: &BTreeSet<JobName>,
        upstream: &BTreeSet<JobName>,
        packed: &BTreeSet<JobName>,
    ) -> Option<&'a Job> {
        job.children
            .iter()
            .filter_map(|c| self.job(c))
            .filter(|c| c.section == job.section)
            .filter(|c| c.status.is_pending())
            .filter(|c| !packed.contains(&c.name) && !in_chain.contains(&c.name))
            .find(|c| self.parents_covered(c, in_chain, upstream))
    }

    fn parents_covered(&self, job: &Job, in_chain: &BTreeSet<JobName>, upstream: &BTreeSet<JobName>) -> bool {
        job.parents.iter().all(|p| {
            in_chain.contains(p)
                || upstream.contains(p)
                || self.job(p).is_some_and(JobGraph::parent_satisfied)
        })
    }

    /// Greedy per-section packing. Returns the packages plus, for every
    /// candidate cut short, the package holding it and the child that was cut.
    fn bin_pack(
        &self,
        platform: &str,
        candidates: Vec<Candidate>,
    ) -> (Vec<Package>, Vec<(usize, JobName)>) {
        let mut packages: Vec<Package> = Vec::new();
        let mut open: BTreeMap<String, usize> = BTreeMap::new();
        let mut cuts: Vec<(usize, JobName)> = Vec::new();

        for candidate in candidates {
            let target = if candidate.wrappable {
                open.get(&candidate.section).copied().filter(|idx| {
                    let pkg = &packages[*idx];
                    let combined = self.policy.combine((pkg.wallclock, pkg.processors), candidate.resources);
                    self.policy
                        .within_limits(pkg.len() + candidate.jobs.len(), combined)
                })
            } else {
                None
            };

            let idx = match target {
                Some(idx) => {
                    let pkg = &mut packages[idx];
                    let (wallclock, processors) =
                        self.policy.combine((pkg.wallclock, pkg.processors), candidate.resources);
                    pkg.wallclock = wallclock;
                    pkg.processors = processors;
                    pkg.jobs.extend(candidate.jobs.iter().cloned());
                    idx
                }
                None => {
                    packages.push(Package {
                        name: String::new(),
                        platform: platform.to_string(),
                        section: candidate.section.clone(),
                        wrapper_type: self.policy.wrapper_type,
                        jobs: candidate.jobs.clone(),
                        wallclock: candidate.resources.0,
                        processors: candidate.resources.1,
                        remote_dependency: None,
                    });
                    let idx = packages.len() - 1;
                    if candidate.wrappable {
                        open.insert(candidate.section.clone(), idx);
                    }
                    idx
                }
            };

            if let Some(cut) = candidate.cut_child {
                cuts.push((idx, cut));
            }
        }

        for package in packages.iter_mut() {
            self.finalize(package);
        }
        (packages, cuts)
    }

    fn finalize(&self, package: &mut Package) {
        if !package.is_wrapped() {
            package.wrapper_type = WrapperType::None;
        }
        package.name = match (package.is_wrapped(), package.jobs.first().and_then(|j| self.job(j))) {
            (true, Some(first)) => format!(
                "{}_{}_{}",
                self.graph.expid(),
                package.wrapper_type,
                first.id
            ),
            (_, Some(first)) => first.name.clone(),
            (_, None) => String::new(),
        };
    }

    #[allow(clippy::too_many_arguments)]
    fn continue_chain(
        &self,
        platform: &str,
        mut cut: JobName,
        mut upstream_name: String,
        mut upstream: BTreeSet<JobName>,
        packed: &mut BTreeSet<JobName>,
        remaining: &mut usize,
        packages: &mut Vec<Package>,
    ) {
        while *remaining > 0 {
            let Some(start) = self.job(&cut) else {
                return;
            };
            if packed.contains(&start.name) || !self.parents_covered(start, &BTreeSet::new(), &upstream) {
                return;
            }
            let limit = self.policy.max_wrapped.min(*remaining);
            let (jobs, next_cut) = self.chain_from(start, &upstream, packed, limit);
            let package = self.remote_package(platform, &start.section, jobs, upstream_name);

            *remaining -= package.len();
            packed.extend(package.jobs.iter().cloned());
            debug!(
                package = %package.name,
                depends_on = ?package.remote_dependency,
                size = package.len(),
                "chained package behind remote dependency"
            );

            upstream_name = package.name.clone();
            upstream = package.jobs.iter().cloned().collect();
            packages.push(package);

            match next_cut {
                Some(next) => cut = next,
                None => return,
            }
        }
    }

    fn chain_behind_in_flight(
        &self,
        platform: &str,
        in_flight: &PackageTable,
        packed: &mut BTreeSet<JobName>,
        remaining: &mut usize,
        packages: &mut Vec<Package>,
    ) {
        for wrapper in in_flight.iter() {
            if wrapper.platform != platform || wrapper.wrapper_type != self.policy.wrapper_type {
                continue;
            }
            let queued: Vec<JobName> = wrapper
                .members
                .iter()
                .filter(|m| self.job(m).is_some_and(|j| j.status.is_in_queue()))
                .cloned()
                .collect();
            let Some(section) = queued.first().and_then(|m| self.job(m)).map(|j| j.section.as_str()) else {
                continue;
            };
            if !self.policy.wraps(section) {
                continue;
            }

            match wrapper.wrapper_type {
                WrapperType::Vertical => {
                    let Some(tail) = wrapper.members.last().and_then(|m| self.job(m)) else {
                        continue;
                    };
                    if !tail.status.is_in_queue() {
                        continue;
                    }
                    let upstream: BTreeSet<JobName> = queued.into_iter().collect();
                    let Some(child) = self.wrappable_child(tail, &BTreeSet::new(), &upstream, packed) else {
                        continue;
                    };
                    self.continue_chain(
                        platform,
                        child.name.clone(),
                        wrapper.name.clone(),
                        upstream,
                        packed,
                        remaining,
                        packages,
                    );
                }
                WrapperType::Horizontal => {
                    self.stack_layers(platform, wrapper.name.clone(), queued, packed, remaining, packages);
                }
                WrapperType::None => {}
            }
        }
    }

    /// Stack horizontal layers behind `upstream_name`, whose members are
    /// `previous`. Each layer waits on the one before it.
    fn stack_layers(
        &self,
        platform: &str,
        mut upstream_name: String,
        mut previous: Vec<JobName>,
        packed: &mut BTreeSet<JobName>,
        remaining: &mut usize,
        packages: &mut Vec<Package>,
    ) {
        let mut upstream: BTreeSet<JobName> = previous.iter().cloned().collect();
        while *remaining > 0 {
            let layer = self.next_layer(&previous, &upstream, packed, *remaining);
            let Some(section) = layer.first().and_then(|j| self.job(j)).map(|j| j.section.clone()) else {
                return;
            };
            let package = self.remote_package(platform, &section, layer, upstream_name);

            *remaining -= package.len();
            packed.extend(package.jobs.iter().cloned());
            upstream.extend(package.jobs.iter().cloned());
            debug!(
                package = %package.name,
                depends_on = ?package.remote_dependency,
                size = package.len(),
                "stacked horizontal layer behind remote dependency"
            );

            upstream_name = package.name.clone();
            previous = package.jobs.clone();
            packages.push(package);
        }
    }

    /// Pending same-section children of `previous` whose other parents are
    /// satisfied or in `upstream`, in id order, cut to the policy limits.
    fn next_layer(
        &self,
        previous: &[JobName],
        upstream: &BTreeSet<JobName>,
        packed: &BTreeSet<JobName>,
        remaining: usize,
    ) -> Vec<JobName> {
        let mut children: Vec<&'a Job> = Vec::new();
        for parent in previous.iter().filter_map(|n| self.job(n)) {
            for child in parent.children.iter().filter_map(|c| self.job(c)) {
                if child.section == parent.section
                    && child.status.is_pending()
                    && !packed.contains(&child.name)
                    && !children.iter().any(|c| c.name == child.name)
                    && self.parents_covered(child, &BTreeSet::new(), upstream)
                {
                    children.push(child);
                }
            }
        }
        children.sort_by_key(|c| c.id);

        let limit = self.policy.max_wrapped.min(remaining);
        let mut layer = Vec::new();
        let mut resources = (Wallclock::ZERO, 0);
        for child in children {
            if layer.len() >= limit {
                break;
            }
            let combined = self.policy.combine(resources, Self::resources(child));
            if !self.policy.within_limits(layer.len() + 1, combined) {
                continue;
            }
            layer.push(child.name.clone());
            resources = combined;
        }
        layer
    }

    fn remote_package(&self, platform: &str, section: &str, jobs: Vec<JobName>, upstream: String) -> Package {
        let resources = self.chain_resources(&jobs);
        let mut package = Package {
            name: String::new(),
            platform: platform.to_string(),
            section: section.to_string(),
            wrapper_type: self.policy.wrapper_type,
            jobs,
            wallclock: resources.0,
            processors: resources.1,
            remote_dependency: Some(upstream),
        };
        self.finalize(&mut package);
        package
    }
}
