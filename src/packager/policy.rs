// src/packager/policy.rs

use crate::config::model::{PlatformConfig, WrapperSection};
use crate::types::{Wallclock, WrapperType};

/// Wrapping rules in force for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappingPolicy {
    pub wrapper_type: WrapperType,
    /// Maximum jobs per package.
    pub max_wrapped: usize,
    pub max_wallclock: Option<Wallclock>,
    pub max_processors: Option<u32>,
    pub remote_dependencies: bool,
    /// Sections eligible for wrapping; empty means all.
    pub sections: Vec<String>,
}

impl Default for WrappingPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl WrappingPolicy {
    /// Every job goes out on its own.
    pub fn none() -> Self {
        Self {
            wrapper_type: WrapperType::None,
            max_wrapped: 1,
            max_wallclock: None,
            max_processors: None,
            remote_dependencies: false,
            sections: Vec::new(),
        }
    }

    pub fn vertical(max_wrapped: usize) -> Self {
        Self {
            wrapper_type: WrapperType::Vertical,
            max_wrapped,
            ..Self::none()
        }
    }

    pub fn horizontal(max_wrapped: usize) -> Self {
        Self {
            wrapper_type: WrapperType::Horizontal,
            max_wrapped,
            ..Self::none()
        }
    }

    pub fn with_max_wallclock(mut self, wallclock: Wallclock) -> Self {
        self.max_wallclock = Some(wallclock);
        self
    }

    pub fn with_max_processors(mut self, processors: u32) -> Self {
        self.max_processors = Some(processors);
        self
    }

    pub fn with_remote_dependencies(mut self, enabled: bool) -> Self {
        self.remote_dependencies = enabled;
        self
    }

    pub fn with_sections<I, S>(mut self, sections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sections = sections.into_iter().map(Into::into).collect();
        self
    }

    /// Combine the experiment's `[wrapper]` section with a platform's limits.
    pub fn from_config(wrapper: &WrapperSection, platform: &PlatformConfig) -> Self {
        let wrapper_type = if platform.allow_wrappers {
            wrapper.wrapper_type
        } else {
            WrapperType::None
        };
        Self {
            wrapper_type,
            max_wrapped: wrapper.max_wrapped.unwrap_or(usize::MAX),
            max_wallclock: platform.max_wallclock,
            max_processors: platform.max_processors,
            remote_dependencies: wrapper.remote_dependencies,
            sections: wrapper.sections.clone(),
        }
    }

    pub fn wraps(&self, section: &str) -> bool {
        self.wrapper_type != WrapperType::None
            && self.max_wrapped > 1
            && (self.sections.is_empty() || self.sections.iter().any(|s| s == section))
    }

    /// Aggregate resources of a package after adding one more block of work.
    ///
    /// Vertical packages run members back to back (wallclock adds, processors
    /// peak); horizontal ones run them side by side (the reverse).
    pub fn combine(&self, acc: (Wallclock, u32), next: (Wallclock, u32)) -> (Wallclock, u32) {
        match self.wrapper_type {
            WrapperType::Horizontal => (acc.0.max(next.0), acc.1.saturating_add(next.1)),
            WrapperType::Vertical | WrapperType::None => (acc.0 + next.0, acc.1.max(next.1)),
        }
    }

    pub fn within_limits(&self, size: usize, resources: (Wallclock, u32)) -> bool {
        size <= self.max_wrapped
            && self.max_wallclock.is_none_or(|max| resources.0 <= max)
            && self.max_processors.is_none_or(|max| resources.1 <= max)
    }
}
