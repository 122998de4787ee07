//! Install State Machine
//!
//! Rust-side source of truth for which phase a run is in. The orchestrator
//! moves through phases only via `InstallerContext`, so an out-of-order stage
//! call is an error instead of a silent skip backwards.
//!
//! # Rules
//!
//! - **Forward only**: a target must come strictly later in `Phase` order.
//!   Skipping forward is allowed (disko partitions and formats in one step,
//!   and a resumed run starts past the phases it does not repeat).
//! - **Error from anywhere**: `fail()` works from every non-terminal phase.
//! - **Complete from Cleanup only**.
//! - **Terminal is terminal**: nothing leaves `Complete` or `Error`.
//! - **Destructive needs confirmation**: entering `Partitioning` or
//!   `Formatting` requires `confirm_destructive_operations()` first.
//!
//! ```text
//! Idle → ConfigGeneration → Partitioning → (Formatting) → Mounting
//!      → NixosInstall → ConfigCopy → Cleanup → Complete
//!
//! (any non-terminal phase can transition to Error)
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::Phase;

/// Errors that can occur during phase transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallTransitionError {
    /// Attempted to go backwards or to stay put
    #[error("Cannot go backwards from {from} to {to} (installation is forward-only)")]
    BackwardTransition { from: Phase, to: Phase },

    /// Attempted to transition from a terminal phase
    #[error("Cannot transition from terminal phase {from}")]
    FromTerminalPhase { from: Phase },

    /// `Complete` entered from anywhere but `Cleanup`
    #[error("Cannot complete from {from} (cleanup must run first)")]
    CompleteBeforeCleanup { from: Phase },

    /// `Error` requested through `transition_to` instead of `fail`
    #[error("Use fail() to enter the error phase")]
    ErrorIsNotATarget,

    /// Entered a destructive phase without confirmation
    #[error("Phase {phase} requires explicit confirmation (destructive operation)")]
    MissingConfirmation { phase: Phase },
}

/// Owns the current phase and validates every transition.
///
/// # Example
///
/// ```
/// use keystone_installer::install_state::InstallerContext;
/// use keystone_installer::types::Phase;
///
/// let mut ctx = InstallerContext::new();
/// ctx.transition_to(Phase::ConfigGeneration).unwrap();
///
/// // Disk phases need confirmation
/// assert!(ctx.transition_to(Phase::Partitioning).is_err());
/// ctx.confirm_destructive_operations();
/// ctx.transition_to(Phase::Partitioning).unwrap();
///
/// // No going back
/// assert!(ctx.transition_to(Phase::ConfigGeneration).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct InstallerContext {
    current: Phase,
    failed_at: Option<Phase>,
    history: Vec<(Phase, DateTime<Utc>)>,
    destructive_confirmed: bool,
}

impl Default for InstallerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallerContext {
    pub fn new() -> Self {
        Self {
            current: Phase::Idle,
            failed_at: None,
            history: Vec::with_capacity(Phase::all().len()),
            destructive_confirmed: false,
        }
    }

    #[inline]
    pub fn current_phase(&self) -> Phase {
        self.current
    }

    /// Phase that was current when `fail()` was called.
    #[inline]
    pub fn failed_at(&self) -> Option<Phase> {
        self.failed_at
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current == Phase::Complete
    }

    pub fn history(&self) -> &[(Phase, DateTime<Utc>)] {
        &self.history
    }

    /// Authorise destructive phases. One-way.
    pub fn confirm_destructive_operations(&mut self) {
        self.destructive_confirmed = true;
    }

    #[inline]
    pub fn is_destructive_confirmed(&self) -> bool {
        self.destructive_confirmed
    }

    /// Move to `target`, enforcing the rules in the module docs.
    pub fn transition_to(&mut self, target: Phase) -> Result<Phase, InstallTransitionError> {
        if self.current.is_terminal() {
            return Err(InstallTransitionError::FromTerminalPhase { from: self.current });
        }
        if target == Phase::Error {
            return Err(InstallTransitionError::ErrorIsNotATarget);
        }
        if target <= self.current {
            return Err(InstallTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }
        if target == Phase::Complete && self.current != Phase::Cleanup {
            return Err(InstallTransitionError::CompleteBeforeCleanup { from: self.current });
        }
        if target.is_destructive() && !self.destructive_confirmed {
            return Err(InstallTransitionError::MissingConfirmation { phase: target });
        }

        log::debug!("Phase transition: {} -> {}", self.current, target);
        self.record(target);
        self.current = target;
        Ok(target)
    }

    /// Enter `Error`, remembering the phase that failed.
    pub fn fail(&mut self) -> Result<Phase, InstallTransitionError> {
        if self.current.is_terminal() {
            return Err(InstallTransitionError::FromTerminalPhase { from: self.current });
        }
        let failed = self.current;
        self.failed_at = Some(failed);
        self.record(Phase::Error);
        self.current = Phase::Error;
        Ok(failed)
    }

    fn record(&mut self, phase: Phase) {
        self.history.push((phase, Utc::now()));
    }
}

impl From<InstallTransitionError> for crate::error::InstallerError {
    fn from(err: InstallTransitionError) -> Self {
        Self::InstallTransition(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed() -> InstallerContext {
        let mut ctx = InstallerContext::new();
        ctx.confirm_destructive_operations();
        ctx
    }

    #[test]
    fn test_full_run_sequence() {
        let mut ctx = confirmed();
        for phase in [
            Phase::ConfigGeneration,
            Phase::Partitioning,
            Phase::Mounting,
            Phase::NixosInstall,
            Phase::ConfigCopy,
            Phase::Cleanup,
            Phase::Complete,
        ] {
            assert_eq!(ctx.transition_to(phase), Ok(phase));
        }
        assert!(ctx.is_complete());
        assert_eq!(ctx.history().len(), 7);
    }

    #[test]
    fn test_backward_and_same_phase_rejected() {
        let mut ctx = confirmed();
        ctx.transition_to(Phase::Mounting).unwrap();
        assert_eq!(
            ctx.transition_to(Phase::Partitioning),
            Err(InstallTransitionError::BackwardTransition {
                from: Phase::Mounting,
                to: Phase::Partitioning
            })
        );
        assert!(ctx.transition_to(Phase::Mounting).is_err());
    }

    #[test]
    fn test_destructive_requires_confirmation() {
        let mut ctx = InstallerContext::new();
        ctx.transition_to(Phase::ConfigGeneration).unwrap();
        assert_eq!(
            ctx.transition_to(Phase::Formatting),
            Err(InstallTransitionError::MissingConfirmation {
                phase: Phase::Formatting
            })
        );
        // Non-destructive phases past the disk phases stay reachable.
        assert_eq!(ctx.transition_to(Phase::Mounting), Ok(Phase::Mounting));
    }

    #[test]
    fn test_complete_only_from_cleanup() {
        let mut ctx = confirmed();
        ctx.transition_to(Phase::NixosInstall).unwrap();
        assert_eq!(
            ctx.transition_to(Phase::Complete),
            Err(InstallTransitionError::CompleteBeforeCleanup {
                from: Phase::NixosInstall
            })
        );
    }

    #[test]
    fn test_fail_from_any_working_phase() {
        for &phase in Phase::all() {
            if phase.is_terminal() || phase == Phase::Idle {
                continue;
            }
            let mut ctx = confirmed();
            ctx.transition_to(phase).unwrap();
            assert_eq!(ctx.fail(), Ok(phase));
            assert_eq!(ctx.current_phase(), Phase::Error);
            assert_eq!(ctx.failed_at(), Some(phase));
        }
    }

    #[test]
    fn test_terminal_phases_are_final() {
        let mut ctx = confirmed();
        ctx.transition_to(Phase::Cleanup).unwrap();
        ctx.transition_to(Phase::Complete).unwrap();
        assert!(ctx.fail().is_err());

        let mut ctx = confirmed();
        ctx.fail().unwrap();
        assert_eq!(
            ctx.transition_to(Phase::Cleanup),
            Err(InstallTransitionError::FromTerminalPhase { from: Phase::Error })
        );
    }

    #[test]
    fn test_error_is_not_a_transition_target() {
        let mut ctx = confirmed();
        assert_eq!(
            ctx.transition_to(Phase::Error),
            Err(InstallTransitionError::ErrorIsNotATarget)
        );
    }
}
