// src/config/mod.rs

//! Configuration loading and validation for expflow.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate sweep parameters, platforms and section dependencies (`validate.rs`).
//! - Re-read the configuration between loop iterations (`source.rs`).

pub mod loader;
pub mod model;
pub mod source;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{
    ConfigFile, DependencyKey, ExperimentSection, JobSectionConfig, NotificationSection,
    PlatformConfig, RawConfigFile, WrapperSection,
};
pub use source::{ConfigSource, FileConfigSource, StaticConfigSource};
