// src/dag/builder.rs

//! Expands a validated configuration into the experiment's job graph.
//!
//! Every `[job.<SECTION>]` is instantiated over the cross product of the
//! sweep dimensions its `running` granularity asks for (dates, members,
//! chunks, then splits). Dependency keys are then resolved against those
//! coordinates:
//!
//! - `SECTION` picks the parent jobs sharing the child's coordinates at the
//!   parent's granularity, fanning in over dimensions the child lacks.
//! - `SECTION-N` / `SECTION+N` shift along the parent's finest dimension.
//!   Backward shifts out of range drop the dependency; forward chunk shifts
//!   clamp to the last chunk.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::config::model::{ConfigFile, DependencyKey, JobSectionConfig};
use crate::dag::{Job, JobGraph, Status};
use crate::errors::{ExpflowError, Result};
use crate::types::{JobName, Running, Wallclock};

/// Build the job graph described by `cfg`.
///
/// `transitive_reduction` overrides `[experiment].transitive_reduction`
/// when given (the CLI's `--notransitive`).
pub fn build_job_graph(cfg: &ConfigFile, transitive_reduction: Option<bool>) -> Result<JobGraph> {
    ensure_unique("start date", &cfg.experiment.dates)?;
    ensure_unique("member", &cfg.experiment.members)?;

    let mut jobs: Vec<Job> = Vec::new();
    let mut by_section: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

    for (section, section_cfg) in cfg.job.iter() {
        for coord in coordinates(cfg, section_cfg) {
            let mut job = new_job(cfg, section, section_cfg, coord);
            job.id = jobs.len() as u64 + 1;
            by_section.entry(section.as_str()).or_default().push(jobs.len());
            jobs.push(job);
        }
    }

    let resolver = Resolver {
        cfg,
        jobs: &jobs,
        by_section: &by_section,
    };
    let mut parents: Vec<BTreeSet<JobName>> = Vec::with_capacity(jobs.len());
    for job in jobs.iter() {
        let section_cfg = cfg
            .job
            .get(&job.section)
            .ok_or_else(|| ExpflowError::ConfigError(format!("unknown section '{}'", job.section)))?;
        let keys = section_cfg
            .dependency_keys()
            .map_err(ExpflowError::ConfigError)?;
        let mut set = BTreeSet::new();
        for key in keys.iter() {
            set.extend(resolver.parents_for(job, key));
        }
        parents.push(set);
    }

    for (job, set) in jobs.iter_mut().zip(parents) {
        job.parents = set;
        job.status = if job.has_parents() {
            Status::Waiting
        } else {
            job.ready_since = Some(0);
            Status::Ready
        };
    }

    let reduce = transitive_reduction.unwrap_or(cfg.experiment.transitive_reduction);
    let graph = JobGraph::from_jobs(
        cfg.expid(),
        cfg.experiment.default_platform.clone(),
        jobs,
        reduce,
    )?;
    info!(
        expid = %graph.expid(),
        jobs = graph.len(),
        transitive_reduction = reduce,
        "job graph built"
    );
    Ok(graph)
}

fn ensure_unique(kind: &'static str, values: &[String]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for value in values {
        if !seen.insert(value.as_str()) {
            return Err(ExpflowError::DuplicateParameter {
                kind,
                value: value.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct Coord {
    date: Option<String>,
    member: Option<String>,
    chunk: Option<u32>,
    split: Option<u32>,
}

fn coordinates(cfg: &ConfigFile, section: &JobSectionConfig) -> Vec<Coord> {
    let exp = &cfg.experiment;
    let mut base: Vec<Coord> = vec![Coord::default()];

    if section.running >= Running::Date {
        base = base
            .into_iter()
            .flat_map(|c| {
                exp.dates.iter().map(move |d| Coord {
                    date: Some(d.clone()),
                    ..c.clone()
                })
            })
            .collect();
    }
    if section.running >= Running::Member {
        base = base
            .into_iter()
            .flat_map(|c| {
                exp.members.iter().map(move |m| Coord {
                    member: Some(m.clone()),
                    ..c.clone()
                })
            })
            .collect();
    }
    if section.running >= Running::Chunk {
        let chunks = cfg.chunks();
        base = base
            .into_iter()
            .flat_map(|c| {
                chunks.iter().map(move |n| Coord {
                    chunk: Some(*n),
                    ..c.clone()
                })
            })
            .collect();
    }
    if let Some(splits) = section.split_count() {
        base = base
            .into_iter()
            .flat_map(|c| {
                (1..=splits).map(move |s| Coord {
                    split: Some(s),
                    ..c.clone()
                })
            })
            .collect();
    }
    base
}

fn job_name(expid: &str, section: &str, coord: &Coord) -> JobName {
    let mut parts: Vec<String> = vec![expid.to_string()];
    if let Some(d) = &coord.date {
        parts.push(d.clone());
    }
    if let Some(m) = &coord.member {
        parts.push(m.clone());
    }
    if let Some(c) = coord.chunk {
        parts.push(c.to_string());
    }
    if let Some(s) = coord.split {
        parts.push(s.to_string());
    }
    parts.push(section.to_string());
    parts.join("_")
}

fn new_job(cfg: &ConfigFile, section: &str, section_cfg: &JobSectionConfig, coord: Coord) -> Job {
    let (max_retrials, explicit_retrials) = cfg.retrials_for(section);
    let mut job = Job::new(job_name(cfg.expid(), section, &coord), section);
    job.date = coord.date;
    job.member = coord.member;
    job.chunk = coord.chunk;
    job.split = coord.split;
    job.platform = section_cfg.platform.clone();
    job.max_retrials = max_retrials;
    job.explicit_retrials = explicit_retrials;
    job.wallclock = section_cfg.wallclock.unwrap_or(Wallclock::ZERO);
    job.processors = section_cfg.processors.unwrap_or(1);
    job.notify_on = section_cfg.notify_on.iter().copied().collect();
    job.skippable = section_cfg.skippable;
    job.script = section_cfg.script.clone();
    job
}

struct Resolver<'a> {
    cfg: &'a ConfigFile,
    jobs: &'a [Job],
    by_section: &'a BTreeMap<&'a str, Vec<usize>>,
}

impl Resolver<'_> {
    /// Parent job names of `job` for one dependency key.
    fn parents_for(&self, job: &Job, key: &DependencyKey) -> Vec<JobName> {
        let Some(parent_cfg) = self.cfg.job.get(&key.section) else {
            return Vec::new();
        };
        let Some(want) = self.wanted_coordinates(job, parent_cfg, key.offset) else {
            debug!(job = %job.name, dependency = %key, "dependency out of range; skipped");
            return Vec::new();
        };

        self.by_section
            .get(key.section.as_str())
            .into_iter()
            .flatten()
            .map(|idx| &self.jobs[*idx])
            .filter(|candidate| candidate.name != job.name)
            .filter(|candidate| matches(&want.date, &candidate.date))
            .filter(|candidate| matches(&want.member, &candidate.member))
            .filter(|candidate| matches(&want.chunk, &candidate.chunk))
            .filter(|candidate| matches(&want.split, &candidate.split))
            .map(|candidate| candidate.name.clone())
            .collect()
    }

    /// Coordinates a parent must have; `None` fields match anything.
    /// Returns `None` when the shifted coordinate falls outside the sweep.
    fn wanted_coordinates(&self, job: &Job, parent: &JobSectionConfig, offset: i64) -> Option<Coord> {
        let exp = &self.cfg.experiment;
        let mut want = Coord::default();

        if parent.running >= Running::Date {
            if let Some(date) = &job.date {
                want.date = Some(if parent.running == Running::Date {
                    shift_in(&exp.dates, date, offset)?
                } else {
                    date.clone()
                });
            }
        }
        if parent.running >= Running::Member {
            if let Some(member) = &job.member {
                want.member = Some(if parent.running == Running::Member {
                    shift_in(&exp.members, member, offset)?
                } else {
                    member.clone()
                });
            }
        }
        if parent.running == Running::Chunk {
            if let Some(chunk) = job.chunk {
                want.chunk = Some(shift_chunk(chunk, offset, exp.chunk_ini, exp.num_chunks)?);
            }
        }
        if parent.split_count().is_some() {
            want.split = job.split;
        }
        Some(want)
    }
}

fn matches<T: PartialEq>(want: &Option<T>, have: &Option<T>) -> bool {
    match want {
        Some(w) => have.as_ref() == Some(w),
        None => true,
    }
}

fn shift_in(values: &[String], current: &str, offset: i64) -> Option<String> {
    let idx = values.iter().position(|v| v == current)? as i64;
    let target = idx + offset;
    if target < 0 || target >= values.len() as i64 {
        return None;
    }
    values.get(target as usize).cloned()
}

fn shift_chunk(chunk: u32, offset: i64, first: u32, last: u32) -> Option<u32> {
    let target = chunk as i64 + offset;
    if target < first as i64 {
        return None;
    }
    Some(target.min(last as i64) as u32)
}
