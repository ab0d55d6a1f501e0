// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::dag::Status;

#[derive(Error, Debug)]
pub enum ExpflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Cycle detected in job graph: {0}")]
    DagCycle(String),

    #[error("Duplicate {kind} '{value}' in experiment parameters")]
    DuplicateParameter { kind: &'static str, value: String },

    #[error("Illegal status transition for job {job}: {from} -> {to}")]
    IllegalTransition {
        job: String,
        from: Status,
        to: Status,
    },

    #[error("Experiment {0} is already running (lock held by another process)")]
    AlreadyLocked(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("State serialization error: {0}")]
    StateError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ExpflowError>;
