//! Installation stages, leaf-first.
//!
//! Each stage borrows the run's `InstallerSettings`, owns a `CommandExecutor`
//! built from the settings' execution mode, and writes every side effect to the
//! run's `OperationLog`. A stage never decides whether the run continues: it
//! returns a `StageFailure` tagged with the phase it failed in and the
//! orchestrator classifies it.

pub mod cleanup;
pub mod config_stage;
pub mod disk;
pub mod preflight;
pub mod system;

use thiserror::Error;

use crate::command_executor::CommandResult;
use crate::operation_log::{Operation, OperationAction, OperationLog};
use crate::types::Phase;

/// A stage stopped the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{phase}: {message}")]
pub struct StageFailure {
    pub phase: Phase,
    pub message: String,
    /// Loggable command line, when a tool failed.
    pub command: Option<String>,
}

impl StageFailure {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            command: None,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

pub type StageResult<T> = std::result::Result<T, StageFailure>;

/// Record the outcome of a tool run, output tail included.
pub(crate) fn record_command(
    log: &mut OperationLog<'_>,
    action: OperationAction,
    display: &str,
    purpose: &str,
    result: &CommandResult,
) {
    let purpose = if result.simulated {
        format!("[SIMULATED] {}", purpose)
    } else {
        purpose.to_string()
    };
    let op = if result.success {
        Operation::succeeded(action, display, purpose)
    } else {
        Operation::failed(action, display, purpose, result.error_message())
    };
    log.record(op.with_output(&result.output));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_display() {
        let failure = StageFailure::new(Phase::Partitioning, "exit code: 1").with_command("disko --mode disko x");
        assert_eq!(failure.to_string(), "partitioning: exit code: 1");
        assert_eq!(failure.command.as_deref(), Some("disko --mode disko x"));
    }

    #[test]
    fn test_record_command_marks_simulated() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut log = OperationLog::detached(dir.path().join("install.log"));
        record_command(&mut log, OperationAction::Execute, "true", "Noop", &CommandResult::simulated());
        let op = &log.operations()[0];
        assert_eq!(op.purpose, "[SIMULATED] Noop");
        assert!(op.success);
        assert!(op.output.is_none());
    }
}
