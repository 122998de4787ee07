//! Classification of a stage failure into the payload handed to the operator.
//!
//! The suggestion is keyed by phase and by substrings of the message. The retry
//! phase never points past the failing phase; disk failures restart from
//! partitioning because a half-formatted disk cannot be mounted reliably.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::Phase;

/// Terminal failure of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationError {
    pub phase: Phase,
    pub message: String,
    /// Command line that failed, when a tool was involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub suggestion: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_phase: Option<Phase>,
}

impl InstallationError {
    /// Build the classified payload for a failure in `phase`.
    pub fn classify(phase: Phase, message: impl Into<String>, command: Option<String>, log_path: &Path) -> Self {
        let message = message.into();
        Self {
            suggestion: suggestion_for(phase, &message, log_path),
            recoverable: is_recoverable(phase),
            retry_phase: retry_phase_for(phase),
            phase,
            message,
            command,
        }
    }

    /// A failure that retrying cannot fix, such as invalid input.
    pub fn fatal(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            phase: Phase::Error,
            message: message.into(),
            command: None,
            suggestion: suggestion.into(),
            recoverable: false,
            retry_phase: None,
        }
    }
}

impl std::fmt::Display for InstallationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.phase, self.message)
    }
}

pub fn suggestion_for(phase: Phase, message: &str, log_path: &Path) -> String {
    let lower = message.to_lowercase();
    match phase {
        Phase::Partitioning if lower.contains("busy") => {
            "Ensure no partitions are mounted. Try: umount /dev/disk*".to_string()
        }
        Phase::Partitioning => "Check disk is not in use and try again.".to_string(),
        Phase::Formatting if lower.contains("pool") => {
            "A ZFS pool may already exist. Try: zpool destroy rpool".to_string()
        }
        Phase::Formatting => "Check disk health and try again.".to_string(),
        Phase::Mounting => "Ensure filesystems were created correctly.".to_string(),
        Phase::ConfigGeneration => "Check disk space and permissions.".to_string(),
        Phase::NixosInstall if lower.contains("network") || lower.contains("fetch") => {
            "Check your network connection. Installation requires downloading packages.".to_string()
        }
        Phase::NixosInstall => format!("Check the installation log at {}", log_path.display()),
        Phase::ConfigCopy => "Ensure the target directory exists and has sufficient space.".to_string(),
        _ => "Check the installation log for details.".to_string(),
    }
}

pub fn is_recoverable(phase: Phase) -> bool {
    !phase.is_terminal()
}

/// Where a retry after a failure in `phase` should resume.
pub fn retry_phase_for(phase: Phase) -> Option<Phase> {
    match phase {
        Phase::Partitioning | Phase::Formatting => Some(Phase::Partitioning),
        Phase::Idle | Phase::Complete | Phase::Error => None,
        other => Some(other),
    }
}

/// Resuming at `phase` rewrites the disk and needs operator confirmation.
pub fn requires_confirmation(phase: Phase) -> bool {
    phase.is_destructive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(phase: Phase, message: &str) -> InstallationError {
        InstallationError::classify(phase, message, None, Path::new("/tmp/keystone-install.log"))
    }

    #[test]
    fn test_busy_partitioning_suggests_unmount() {
        let err = classify(Phase::Partitioning, "Device or resource BUSY");
        assert_eq!(err.suggestion, "Ensure no partitions are mounted. Try: umount /dev/disk*");
        assert_eq!(err.retry_phase, Some(Phase::Partitioning));
        assert!(err.recoverable);
    }

    #[test]
    fn test_formatting_retries_from_partitioning() {
        let err = classify(Phase::Formatting, "pool rpool already exists");
        assert!(err.suggestion.contains("zpool destroy rpool"));
        assert_eq!(err.retry_phase, Some(Phase::Partitioning));
    }

    #[test]
    fn test_installer_suggestions() {
        let err = classify(Phase::NixosInstall, "unable to fetch https://cache.nixos.org");
        assert!(err.suggestion.starts_with("Check your network connection."));

        let err = classify(Phase::NixosInstall, "exit code: 1");
        assert_eq!(err.suggestion, "Check the installation log at /tmp/keystone-install.log");
        assert_eq!(err.retry_phase, Some(Phase::NixosInstall));
    }

    #[test]
    fn test_mounting_retries_from_mounting() {
        let err = classify(Phase::Mounting, "Boot mount point /mnt/boot does not exist");
        assert_eq!(err.retry_phase, Some(Phase::Mounting));
        assert_eq!(err.suggestion, "Ensure filesystems were created correctly.");
    }

    #[test]
    fn test_terminal_phases_are_not_recoverable() {
        for phase in [Phase::Complete, Phase::Error] {
            let err = classify(phase, "x");
            assert!(!err.recoverable);
            assert_eq!(err.retry_phase, None);
            assert_eq!(err.suggestion, "Check the installation log for details.");
        }
    }

    #[test]
    fn test_retry_never_ahead_of_failure() {
        for &phase in Phase::all() {
            if let Some(retry) = retry_phase_for(phase) {
                assert!(retry <= phase, "{:?} retries from {:?}", phase, retry);
            }
        }
    }

    #[test]
    fn test_only_disk_phases_require_confirmation() {
        assert!(requires_confirmation(Phase::Partitioning));
        assert!(requires_confirmation(Phase::Formatting));
        assert!(!requires_confirmation(Phase::Mounting));
    }

    #[test]
    fn test_serializes_retry_phase_camel_case() {
        let json = serde_json::to_value(classify(Phase::Partitioning, "x")).unwrap();
        assert_eq!(json["retryPhase"], "partitioning");
        assert_eq!(json["phase"], "partitioning");
    }
}
