//! Installation orchestrator.
//!
//! Sequences the stages as a linear phase machine:
//!
//! ```text
//! config-generation (scratch) → partitioning (disko + verify)
//!   → mounting (ensure mounts, relocate config) → nixos-install (+ password)
//!   → config-copy (ownership) → cleanup → complete
//! ```
//!
//! One stage runs at a time and at most one external command is in flight.
//! The first stage failure halts the run and is classified into an
//! `InstallationError`. Nothing is unmounted on failure, so a retry can pick
//! up from the classified retry phase with the target still in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::InstallerSettings;
use crate::config_file::InstallationConfig;
use crate::failure::{InstallationError, requires_confirmation};
use crate::generator::ConfigGenerator;
use crate::install_state::InstallerContext;
use crate::operation_log::{Operation, OperationAction, OperationLog};
use crate::progress::{Progress, ProgressReporter};
use crate::stages::cleanup::{CleanupReport, CleanupStage};
use crate::stages::config_stage::ConfigStage;
use crate::stages::disk::DiskStage;
use crate::stages::system::SystemStage;
use crate::stages::{StageFailure, StageResult};
use crate::types::{Phase, SystemType};

/// Outcome of one run. Built once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationResult {
    pub success: bool,
    /// `complete` on success, otherwise the phase that failed.
    pub phase: Phase,
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<InstallationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl InstallationResult {
    fn failed(error: InstallationError, operations: Vec<Operation>) -> Self {
        Self {
            success: false,
            phase: error.phase,
            operations,
            error: Some(error),
            completed_at: None,
        }
    }
}

/// Post-install summary for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationSummary {
    pub hostname: String,
    pub username: String,
    pub system_type: SystemType,
    pub disk_device: String,
    pub encrypted: bool,
    /// Successful `create` operations.
    pub files_created: usize,
    pub config_path: PathBuf,
}

impl InstallationSummary {
    pub fn new(config: &InstallationConfig, operations: &[Operation], settings: &InstallerSettings) -> Self {
        Self {
            hostname: config.hostname.clone(),
            username: config.username.clone(),
            system_type: config.system_type,
            disk_device: config.disk_device.clone(),
            encrypted: config.encrypted,
            files_created: operations
                .iter()
                .filter(|op| op.action == OperationAction::Create && op.success)
                .count(),
            config_path: settings.final_config_path(&config.username),
        }
    }
}

/// Per-run mutable state, owned by the orchestrator's single flow.
struct RunState<'a> {
    ctx: InstallerContext,
    log: OperationLog<'a>,
    progress: ProgressReporter<'a>,
}

impl RunState<'_> {
    fn enter(&mut self, phase: Phase, operation: &str) -> StageResult<()> {
        self.ctx
            .transition_to(phase)
            .map_err(|e| StageFailure::new(phase, e.to_string()))?;
        log::info!("==> {}", phase.description());
        self.progress.enter(phase, operation);
        Ok(())
    }
}

pub struct Installer {
    settings: InstallerSettings,
    generator: Box<dyn ConfigGenerator>,
}

impl Installer {
    pub fn new(settings: InstallerSettings, generator: impl ConfigGenerator + 'static) -> Self {
        Self {
            settings,
            generator: Box::new(generator),
        }
    }

    pub fn settings(&self) -> &InstallerSettings {
        &self.settings
    }

    /// Run a full installation.
    ///
    /// Both callbacks run synchronously on the calling thread and must not
    /// block for long.
    pub fn run_installation(
        &self,
        config: &InstallationConfig,
        on_progress: impl FnMut(&Progress),
        on_operation: impl FnMut(&Operation),
    ) -> InstallationResult {
        self.execute(config, Phase::ConfigGeneration, true, on_progress, on_operation)
    }

    /// Re-run starting at `from`, typically an earlier error's retry phase.
    ///
    /// Configuration generation, mounting and relocation always run again;
    /// phases before `from` that touch the disk or install the system are
    /// skipped. Starting at a destructive phase requires `confirm_destructive`.
    pub fn resume_installation(
        &self,
        config: &InstallationConfig,
        from: Phase,
        confirm_destructive: bool,
        on_progress: impl FnMut(&Progress),
        on_operation: impl FnMut(&Operation),
    ) -> InstallationResult {
        let start = match from {
            Phase::Idle => Phase::ConfigGeneration,
            Phase::Formatting => Phase::Partitioning,
            Phase::Complete | Phase::Error => {
                return InstallationResult::failed(
                    InstallationError::fatal(
                        format!("Cannot resume from {}", from),
                        "Start a new installation instead.",
                    ),
                    Vec::new(),
                );
            }
            other => other,
        };

        if requires_confirmation(start) && !confirm_destructive {
            log::warn!("Refusing to resume at {} without confirmation", start);
            return InstallationResult::failed(
                InstallationError {
                    phase: start,
                    message: format!(
                        "Resuming at {} repartitions {} and requires explicit confirmation",
                        start, config.disk_device
                    ),
                    command: None,
                    suggestion: "Check the target disk, then resume with destructive confirmation.".to_string(),
                    recoverable: true,
                    retry_phase: Some(Phase::Partitioning),
                },
                Vec::new(),
            );
        }

        log::info!("Resuming installation at {}", start);
        self.execute(config, start, confirm_destructive, on_progress, on_operation)
    }

    /// Unmount the target and release the pool. Safe to call repeatedly.
    pub fn cleanup(&self, encrypted: bool) -> CleanupReport {
        let mut log = OperationLog::detached(&self.settings.log_path);
        CleanupStage::new(&self.settings).run(encrypted, &mut log)
    }

    fn execute(
        &self,
        config: &InstallationConfig,
        start: Phase,
        confirm_destructive: bool,
        on_progress: impl FnMut(&Progress),
        on_operation: impl FnMut(&Operation),
    ) -> InstallationResult {
        let mut state = RunState {
            ctx: InstallerContext::new(),
            log: OperationLog::new(&self.settings.log_path, on_operation),
            progress: ProgressReporter::new(on_progress),
        };

        if let Err(e) = config.validate() {
            log::error!("Invalid installation configuration: {:#}", e);
            return InstallationResult::failed(
                InstallationError::fatal(
                    format!("Invalid configuration: {:#}", e),
                    "Correct the installation configuration and start again.",
                ),
                state.log.into_operations(),
            );
        }
        if confirm_destructive {
            state.ctx.confirm_destructive_operations();
        }
        if self.settings.mode.is_simulated() {
            log::info!("[SIMULATED] No external tools will run; target is {}", self.settings.mount_root.display());
        }

        match self.drive(config, start, &mut state) {
            Ok(()) => {
                log::info!("Installation of {} complete", config.hostname);
                InstallationResult {
                    success: true,
                    phase: Phase::Complete,
                    operations: state.log.into_operations(),
                    error: None,
                    completed_at: Some(Utc::now()),
                }
            }
            Err(failure) => {
                let _ = state.ctx.fail();
                log::error!("Installation failed in {}: {}", failure.phase, failure.message);
                let error = InstallationError::classify(
                    failure.phase,
                    failure.message,
                    failure.command,
                    &self.settings.log_path,
                );
                InstallationResult::failed(error, state.log.into_operations())
            }
        }
    }

    fn drive(&self, config: &InstallationConfig, start: Phase, state: &mut RunState<'_>) -> StageResult<()> {
        let config_stage = ConfigStage::new(&self.settings, self.generator.as_ref());
        let disk = DiskStage::new(&self.settings);
        let system = SystemStage::new(&self.settings);

        state.enter(Phase::ConfigGeneration, "Generating NixOS configuration...")?;
        let generated = config_stage.stage(config, &mut state.log)?;

        if start <= Phase::Partitioning {
            state.enter(Phase::Partitioning, "Partitioning and formatting disk with disko...")?;
            disk.provision(&generated.disko_config, &config.disk_device, config.encrypted, &mut state.log)?;
        }

        state.enter(Phase::Mounting, "Setting up configuration on target...")?;
        disk.ensure_mounted(&config.disk_device, config.encrypted, &mut state.log)?;
        let final_path = config_stage.relocate(&generated.root, &config.username, &mut state.log)?;

        if start <= Phase::NixosInstall {
            state.enter(Phase::NixosInstall, "Running nixos-install (this may take several minutes)...")?;
            system.install(config, &final_path, &mut state.progress, &mut state.log)?;
        }

        state.enter(Phase::ConfigCopy, "Handing configuration to primary user...")?;
        system.hand_over(&final_path, &mut state.log)?;

        state.enter(Phase::Cleanup, "Cleaning up...")?;
        CleanupStage::new(&self.settings).run(config.encrypted, &mut state.log);

        state.enter(Phase::Complete, "Installation complete!")?;
        Ok(())
    }
}
