//! Execution commands.
//!
//! An [`ExecutionCommand`] is one scheduled attempt to run an iteration:
//! a status plus request counters. Many commands can target the same
//! iteration (one per client wave), and all of them are registered with
//! the [`CommandStatusMonitor`](crate::monitor::CommandStatusMonitor).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::domain::CommandStatus;
use crate::error::ExecutionError;

#[derive(Debug)]
pub struct ExecutionCommand {
    id: Uuid,
    iteration_id: Uuid,
    created_at: DateTime<Utc>,
    status: RwLock<CommandStatus>,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl ExecutionCommand {
    /// Creates a command for `iteration_id` in the `NotStarted` state.
    pub fn new(iteration_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            iteration_id,
            created_at: Utc::now(),
            status: RwLock::new(CommandStatus::NotStarted),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
        }
    }

    /// Creates a command that is already `Scheduled`.
    pub fn scheduled(iteration_id: Uuid) -> Self {
        let command = Self::new(iteration_id);
        *command.status.write() = CommandStatus::Scheduled;
        command
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn iteration_id(&self) -> Uuid {
        self.iteration_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> CommandStatus {
        *self.status.read()
    }

    /// Moves the command to `next`, enforcing the [`CommandStatus`] state machine.
    pub fn transition(&self, next: CommandStatus) -> Result<(), ExecutionError> {
        let mut status = self.status.write();
        if !status.can_transition_to(&next) {
            return Err(ExecutionError::InvalidTransition {
                command_id: self.id,
                from: *status,
                to: next,
            });
        }
        *status = next;
        Ok(())
    }

    /// Moves the command to `next` if the transition is valid; otherwise
    /// leaves it untouched. Returns whether the status changed.
    pub fn try_transition(&self, next: CommandStatus) -> bool {
        self.transition(next).is_ok()
    }

    pub fn record_success(&self) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.successful_requests() + self.failed_requests()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_command_not_started() {
        let cmd = ExecutionCommand::new(Uuid::new_v4());
        assert_eq!(cmd.status(), CommandStatus::NotStarted);
        assert_eq!(cmd.total_requests(), 0);
    }

    #[test]
    fn test_scheduled_constructor() {
        let cmd = ExecutionCommand::scheduled(Uuid::new_v4());
        assert_eq!(cmd.status(), CommandStatus::Scheduled);
    }

    #[test]
    fn test_transition_enforces_state_machine() {
        let cmd = ExecutionCommand::scheduled(Uuid::new_v4());
        cmd.transition(CommandStatus::Ongoing).unwrap();
        cmd.transition(CommandStatus::Completed).unwrap();

        let err = cmd.transition(CommandStatus::Ongoing).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::InvalidTransition {
                from: CommandStatus::Completed,
                to: CommandStatus::Ongoing,
                ..
            }
        ));
        assert_eq!(cmd.status(), CommandStatus::Completed);
    }

    #[test]
    fn test_try_transition_reports_change() {
        let cmd = ExecutionCommand::scheduled(Uuid::new_v4());
        assert!(cmd.try_transition(CommandStatus::Cancelled));
        assert!(!cmd.try_transition(CommandStatus::Ongoing));
    }

    #[test]
    fn test_counters() {
        let cmd = ExecutionCommand::new(Uuid::new_v4());
        cmd.record_success();
        cmd.record_success();
        cmd.record_failure();
        assert_eq!(cmd.successful_requests(), 2);
        assert_eq!(cmd.failed_requests(), 1);
        assert_eq!(cmd.total_requests(), 3);
    }
}
