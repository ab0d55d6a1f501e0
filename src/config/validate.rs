// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{ExpflowError, Result};
use crate::platform::registry::SUPPORTED_PLATFORM_TYPES;
use crate::types::Running;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::ExpflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let raw = canonicalize_platforms(raw)?;
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// Platform names are case-insensitive; store them lower-cased.
fn canonicalize_platforms(mut raw: RawConfigFile) -> Result<RawConfigFile> {
    let mut platforms = BTreeMap::new();
    for (name, platform) in std::mem::take(&mut raw.platform) {
        let canonical = name.to_lowercase();
        if platforms.insert(canonical.clone(), platform).is_some() {
            return Err(ExpflowError::ConfigError(format!(
                "platform '{canonical}' is declared more than once"
            )));
        }
    }
    raw.platform = platforms;
    raw.experiment.default_platform = raw.experiment.default_platform.to_lowercase();
    for section in raw.job.values_mut() {
        if let Some(p) = section.platform.as_mut() {
            *p = p.to_lowercase();
        }
    }
    Ok(raw)
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_jobs(cfg)?;
    validate_experiment(cfg)?;
    validate_platforms(cfg)?;
    validate_wrapper(cfg)?;
    validate_job_dependencies(cfg)?;
    validate_section_dag(cfg)?;
    Ok(())
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(ExpflowError::ConfigError(
            "config must contain at least one [job.<SECTION>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_experiment(cfg: &RawConfigFile) -> Result<()> {
    let exp = &cfg.experiment;
    if exp.expid.trim().is_empty() {
        return Err(ExpflowError::ConfigError(
            "[experiment].expid must not be empty".to_string(),
        ));
    }

    let finest = cfg.job.values().map(|s| s.running).max().unwrap_or(Running::Once);
    if finest >= Running::Date && exp.dates.is_empty() {
        return Err(ExpflowError::ConfigError(
            "[experiment].dates must list at least one start date".to_string(),
        ));
    }
    if finest >= Running::Member && exp.members.is_empty() {
        return Err(ExpflowError::ConfigError(
            "[experiment].members must list at least one member".to_string(),
        ));
    }
    if finest >= Running::Chunk && (exp.chunk_ini == 0 || exp.chunk_ini > exp.num_chunks) {
        return Err(ExpflowError::ConfigError(format!(
            "[experiment].chunk_ini must be within 1..={} (got {})",
            exp.num_chunks, exp.chunk_ini
        )));
    }
    Ok(())
}

fn validate_platforms(cfg: &RawConfigFile) -> Result<()> {
    if !cfg.platform.contains_key(&cfg.experiment.default_platform) {
        return Err(ExpflowError::ConfigError(format!(
            "default platform '{}' has no [platform.{}] section",
            cfg.experiment.default_platform, cfg.experiment.default_platform
        )));
    }

    for (name, platform) in cfg.platform.iter() {
        let kind = platform.platform_type.to_lowercase();
        if !SUPPORTED_PLATFORM_TYPES.contains(&kind.as_str()) {
            return Err(ExpflowError::ConfigError(format!(
                "platform '{name}' has unsupported type '{}'",
                platform.platform_type
            )));
        }
        if platform.max_waiting_jobs == 0 || platform.total_jobs == 0 {
            return Err(ExpflowError::ConfigError(format!(
                "platform '{name}': max_waiting_jobs and total_jobs must be >= 1"
            )));
        }
    }

    for (section, job) in cfg.job.iter() {
        if let Some(platform) = &job.platform {
            if !cfg.platform.contains_key(platform) {
                return Err(ExpflowError::ConfigError(format!(
                    "job section '{section}' uses unknown platform '{platform}'"
                )));
            }
        }
    }
    Ok(())
}

fn validate_wrapper(cfg: &RawConfigFile) -> Result<()> {
    if cfg.wrapper.max_wrapped == Some(0) {
        return Err(ExpflowError::ConfigError(
            "[wrapper].max_wrapped must be >= 1".to_string(),
        ));
    }
    for section in cfg.wrapper.sections.iter() {
        if !cfg.job.contains_key(section) {
            return Err(ExpflowError::ConfigError(format!(
                "[wrapper].sections names unknown job section '{section}'"
            )));
        }
    }
    Ok(())
}

fn validate_job_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, section) in cfg.job.iter() {
        let keys = section.dependency_keys().map_err(|e| {
            ExpflowError::ConfigError(format!("job section '{name}': {e}"))
        })?;
        for key in keys {
            if !cfg.job.contains_key(&key.section) {
                return Err(ExpflowError::ConfigError(format!(
                    "job section '{}' has unknown dependency '{}'",
                    name, key
                )));
            }
            if key.section == *name && key.offset == 0 {
                return Err(ExpflowError::ConfigError(format!(
                    "job section '{}' cannot depend on itself without a distance",
                    name
                )));
            }
        }
    }
    Ok(())
}

/// Distance-free dependencies between sections must form a DAG. Keys with a
/// distance (`SIM-1`) point at other coordinates and are checked per job when
/// the graph is built.
fn validate_section_dag(cfg: &RawConfigFile) -> Result<()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    let mut edges: BTreeSet<(String, &str)> = BTreeSet::new();

    for name in cfg.job.keys() {
        graph.add_node(name.as_str());
    }
    for (name, section) in cfg.job.iter() {
        for key in section.dependency_keys().unwrap_or_default() {
            if key.offset == 0 {
                edges.insert((key.section, name.as_str()));
            }
        }
    }
    for (dep, name) in edges.iter() {
        if let Some((dep_node, _)) = cfg.job.get_key_value(dep) {
            graph.add_edge(dep_node.as_str(), *name, ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(ExpflowError::DagCycle(format!(
                "cycle detected in job sections involving section '{}'",
                node
            )))
        }
    }
}
