// src/dag/status.rs

//! Job lifecycle vocabulary and the legal moves between states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
///
/// The declaration order is the total order used for sorting and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Status {
    Waiting,
    Delayed,
    Ready,
    Submitted,
    Queuing,
    Running,
    Completed,
    Failed,
    Suspended,
    Unknown,
}

impl Status {
    pub const ALL: [Status; 10] = [
        Status::Waiting,
        Status::Delayed,
        Status::Ready,
        Status::Submitted,
        Status::Queuing,
        Status::Running,
        Status::Completed,
        Status::Failed,
        Status::Suspended,
        Status::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Waiting => "WAITING",
            Status::Delayed => "DELAYED",
            Status::Ready => "READY",
            Status::Submitted => "SUBMITTED",
            Status::Queuing => "QUEUING",
            Status::Running => "RUNNING",
            Status::Completed => "COMPLETED",
            Status::Failed => "FAILED",
            Status::Suspended => "SUSPENDED",
            Status::Unknown => "UNKNOWN",
        }
    }

    /// Handed to a platform and not yet finished.
    pub fn is_in_queue(self) -> bool {
        matches!(
            self,
            Status::Submitted | Status::Queuing | Status::Running | Status::Unknown
        )
    }

    /// Still waiting on dependencies or capacity.
    pub fn is_pending(self) -> bool {
        matches!(self, Status::Waiting | Status::Delayed | Status::Ready)
    }

    /// Position along the submitted -> queuing -> running path.
    fn queue_rank(self) -> Option<u8> {
        match self {
            Status::Submitted => Some(0),
            Status::Queuing => Some(1),
            Status::Running => Some(2),
            _ => None,
        }
    }

    /// Whether `self -> next` is an edge of the status machine.
    ///
    /// Remote states are sampled, so in-queue states may skip forward
    /// (`SUBMITTED -> RUNNING`, `QUEUING -> COMPLETED`) but never move back.
    /// Staying in the same state is always allowed.
    ///
    /// The retry edge `FAILED -> READY` is structurally legal here; the
    /// retrial budget is enforced by the job graph.
    pub fn can_transition(self, next: Status) -> bool {
        use Status::*;

        if self == next || next == Suspended {
            return true;
        }

        match (self, next) {
            (Waiting, Ready | Delayed) => true,
            (Delayed, Ready) => true,
            (Ready, Submitted) => true,
            (Suspended, Waiting) => true,
            (Failed, Ready | Waiting) => true,
            (Unknown, Submitted | Queuing | Running | Completed | Failed) => true,
            (from, Unknown) if from.is_in_queue() => true,
            (from, Completed | Failed) if from.is_in_queue() => true,
            (from, to) => match (from.queue_rank(), to.queue_rank()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| format!("unknown status '{}'", s.trim()))
    }
}

impl TryFrom<String> for Status {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Status> for &'static str {
    fn from(value: Status) -> Self {
        value.as_str()
    }
}

/// One applied status change, recorded for notifications and reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub job: String,
    pub from: Status,
    pub to: Status,
}
