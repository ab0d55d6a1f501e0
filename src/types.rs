// src/types.rs

use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical job name type used throughout the crate.
pub type JobName = String;

/// Identifier handed back by a platform when a submission is accepted.
pub type RemoteId = String;

/// How runnable jobs of one section are bundled into a single submission.
///
/// - `None`: every job is submitted on its own (default).
/// - `Vertical`: dependent jobs of a section run one after another inside a
///   single allocation; wallclocks add up.
/// - `Horizontal`: independent jobs run side by side inside a single
///   allocation; processors add up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WrapperType {
    #[default]
    None,
    Vertical,
    Horizontal,
}

impl FromStr for WrapperType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(WrapperType::None),
            "vertical" => Ok(WrapperType::Vertical),
            "horizontal" => Ok(WrapperType::Horizontal),
            other => Err(format!(
                "invalid wrapper type: {other} (expected \"none\", \"vertical\" or \"horizontal\")"
            )),
        }
    }
}

impl fmt::Display for WrapperType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WrapperType::None => "none",
            WrapperType::Vertical => "vertical",
            WrapperType::Horizontal => "horizontal",
        };
        f.write_str(s)
    }
}

/// Granularity at which a job section is instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Running {
    /// One job for the whole experiment.
    #[default]
    Once,
    /// One job per start date.
    Date,
    /// One job per (date, member).
    Member,
    /// One job per (date, member, chunk).
    Chunk,
}

/// Estimated wall-clock limit, stored in whole minutes and written as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Wallclock(u32);

impl Wallclock {
    pub const ZERO: Wallclock = Wallclock(0);

    pub fn from_minutes(minutes: u32) -> Self {
        Wallclock(minutes)
    }

    pub fn minutes(self) -> u32 {
        self.0
    }
}

impl Add for Wallclock {
    type Output = Wallclock;

    fn add(self, rhs: Wallclock) -> Wallclock {
        Wallclock(self.0.saturating_add(rhs.0))
    }
}

impl FromStr for Wallclock {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (hours, minutes) = trimmed
            .split_once(':')
            .ok_or_else(|| format!("invalid wallclock '{trimmed}' (expected HH:MM)"))?;
        let hours: u32 = hours
            .parse()
            .map_err(|_| format!("invalid wallclock hours in '{trimmed}'"))?;
        let minutes: u32 = minutes
            .parse()
            .map_err(|_| format!("invalid wallclock minutes in '{trimmed}'"))?;
        if minutes >= 60 {
            return Err(format!("invalid wallclock '{trimmed}': minutes must be < 60"));
        }
        hours
            .checked_mul(60)
            .and_then(|m| m.checked_add(minutes))
            .map(Wallclock)
            .ok_or_else(|| format!("wallclock '{trimmed}' out of range"))
    }
}

impl TryFrom<String> for Wallclock {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Wallclock> for String {
    fn from(value: Wallclock) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Wallclock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}
