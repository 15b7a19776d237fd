use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states for a single job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Run has been created but not yet handed to the dispatch queue
    NotStarted,
    /// Run is waiting in the dispatch queue
    Scheduled,
    /// Concurrency slot acquired, execution context being built
    Initializing,
    /// Handler is executing
    Running,
    /// Handler returned successfully, cleanup in progress
    Completing,
    /// Run finished successfully
    Completed,
    /// Run faulted and is waiting for its next attempt
    Retrying,
    /// Run faulted; terminal once the retry policy gives up
    Faulted,
    /// Run was cancelled before or during execution
    Cancelled,
    /// Run waited past its grace period and was abandoned without executing
    Expired,
    /// Run was skipped because its definition was disabled at dispatch time
    Skipped,
}

impl RunState {
    /// Check if this is an unconditionally terminal state.
    ///
    /// `Faulted` is deliberately absent: it is terminal only after the retry
    /// policy has given up, which the run record tracks separately.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Expired | Self::Skipped
        )
    }

    /// Check if a run in this state currently occupies a concurrency slot.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Initializing | Self::Running | Self::Completing)
    }

    /// Check if a run in this state may still be cancelled wholesale when the
    /// engine shuts down (it has not started executing, or is between
    /// attempts).
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::NotStarted | Self::Scheduled | Self::Retrying)
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Completing => write!(f, "completing"),
            Self::Completed => write!(f, "completed"),
            Self::Retrying => write!(f, "retrying"),
            Self::Faulted => write!(f, "faulted"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Expired => write!(f, "expired"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "scheduled" => Ok(Self::Scheduled),
            "initializing" => Ok(Self::Initializing),
            "running" => Ok(Self::Running),
            "completing" => Ok(Self::Completing),
            "completed" => Ok(Self::Completed),
            "retrying" => Ok(Self::Retrying),
            "faulted" => Ok(Self::Faulted),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid run state: {s}")),
        }
    }
}
