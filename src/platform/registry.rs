// src/platform/registry.rs

use std::collections::BTreeMap;
use std::fmt;

use tracing::info;

use crate::config::model::ConfigFile;
use crate::errors::{ExpflowError, Result};
use crate::platform::{LocalPlatform, PlatformAdapter};

/// Platform types `from_config` knows how to build.
pub const SUPPORTED_PLATFORM_TYPES: &[&str] = &["local"];

/// Adapters keyed by canonical (lower-case) platform name.
///
/// Populated once at startup and handed to the scheduler loop.
#[derive(Default)]
pub struct PlatformRegistry {
    adapters: BTreeMap<String, Box<dyn PlatformAdapter>>,
}

impl fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformRegistry")
            .field("platforms", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one adapter per `[platform.<name>]` section.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut registry = Self::new();
        for (name, platform) in cfg.platform.iter() {
            match platform.platform_type.to_lowercase().as_str() {
                "local" => {
                    let root = platform.root_dir.clone().unwrap_or_else(|| {
                        cfg.experiment
                            .state_dir
                            .join(cfg.expid())
                            .join("platforms")
                            .join(name)
                    });
                    registry.register(name, Box::new(LocalPlatform::new(name, root)));
                }
                other => {
                    return Err(ExpflowError::ConfigError(format!(
                        "no adapter available for platform '{name}' of type '{other}'"
                    )));
                }
            }
        }
        info!(platforms = ?registry.names().collect::<Vec<_>>(), "platform registry ready");
        Ok(registry)
    }

    pub fn register(&mut self, name: &str, adapter: Box<dyn PlatformAdapter>) {
        self.adapters.insert(name.to_lowercase(), adapter);
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn PlatformAdapter + 'static)> {
        self.adapters.get_mut(&name.to_lowercase()).map(|b| b.as_mut())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}
