//! Command and entity status types.
//!
//! [`CommandStatus`] is the lifecycle of a single scheduled unit of work.
//! [`EntityExecutionStatus`] is the terminal status reported for an
//! iteration once every signal (cancellation, termination, failure and the
//! statuses of all its commands) has been folded together.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an execution command.
///
/// # State Machine
///
/// ```text
/// NotStarted -> Scheduled, Cancelled
/// Scheduled  -> Ongoing, Failed, Cancelled
/// Ongoing    -> Completed, Failed, Cancelled, Terminated
/// Completed | Failed | Cancelled | Terminated -> (terminal)
/// ```
///
/// # Examples
///
/// ```
/// use stresslab::domain::CommandStatus;
///
/// assert!(CommandStatus::Scheduled.can_transition_to(&CommandStatus::Ongoing));
/// assert!(!CommandStatus::Completed.can_transition_to(&CommandStatus::Ongoing));
/// assert!(CommandStatus::Ongoing.is_active());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Created but not yet handed to the scheduler.
    NotStarted,
    /// Registered and waiting for its start time.
    Scheduled,
    /// Currently sending requests.
    Ongoing,
    /// Ran to the end of its mode (terminal).
    Completed,
    /// Aborted by an execution fault (terminal).
    Failed,
    /// Stopped by cancellation (terminal).
    Cancelled,
    /// Stopped because a termination rule tripped (terminal).
    Terminated,
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Scheduled => "scheduled",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

impl CommandStatus {
    /// Returns `true` if no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Terminated
        )
    }

    /// Returns `true` while the command still has work ahead of it
    /// (`Scheduled` or `Ongoing`).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Ongoing)
    }

    /// Returns `true` if moving from this status to `next` is valid.
    ///
    /// Self-transitions are rejected.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        if self == next {
            return false;
        }

        match self {
            Self::NotStarted => matches!(next, Self::Scheduled | Self::Cancelled),
            Self::Scheduled => matches!(next, Self::Ongoing | Self::Failed | Self::Cancelled),
            Self::Ongoing => matches!(
                next,
                Self::Completed | Self::Failed | Self::Cancelled | Self::Terminated
            ),
            Self::Completed | Self::Failed | Self::Cancelled | Self::Terminated => false,
        }
    }
}

/// Terminal status reported for an iteration.
///
/// Produced by [`IterationStatusMonitor`](crate::monitor::IterationStatusMonitor)
/// and serialized as-is on the operator API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityExecutionStatus {
    Scheduled,
    Ongoing,
    Success,
    Failed,
    Terminated,
    Cancelled,
}

impl fmt::Display for EntityExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::Ongoing => "ongoing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl EntityExecutionStatus {
    /// Returns `true` once no command can change the outcome anymore.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Scheduled | Self::Ongoing)
    }
}
