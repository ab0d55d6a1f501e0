// src/config/source.rs

//! Where the scheduler loop re-reads its configuration from each iteration.

use std::path::PathBuf;

use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::errors::Result;

/// Supplies the current experiment configuration.
///
/// Operators may edit the experiment's config while it runs; the loop calls
/// [`ConfigSource::reload`] at the top of every iteration.
pub trait ConfigSource: Send {
    fn reload(&mut self) -> Result<ConfigFile>;
}

/// Re-reads and validates a TOML file on every call.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileConfigSource {
    fn reload(&mut self) -> Result<ConfigFile> {
        load_and_validate(&self.path)
    }
}

/// Always hands back the same configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigSource {
    config: ConfigFile,
}

impl StaticConfigSource {
    pub fn new(config: ConfigFile) -> Self {
        Self { config }
    }
}

impl ConfigSource for StaticConfigSource {
    fn reload(&mut self) -> Result<ConfigFile> {
        Ok(self.config.clone())
    }
}
