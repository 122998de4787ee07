//! System installation and hand-over to the primary user.
//!
//! `install` runs `nixos-install` and then sets the primary account's
//! password. A password failure after a successful install is still a
//! failure, reported with its own message so it cannot be mistaken for an
//! installer failure.

use std::path::Path;

use super::{StageFailure, StageResult, record_command};
use crate::command_executor::CommandExecutor;
use crate::config::InstallerSettings;
use crate::config_file::InstallationConfig;
use crate::operation_log::{Operation, OperationAction, OperationLog};
use crate::progress::ProgressReporter;
use crate::tool_traits::ToolInvocation;
use crate::tools::system::{ChownArgs, NixosInstallArgs, SetPasswordArgs};
use crate::types::Phase;

/// Synthetic installer steps shown in simulated mode.
const SIMULATED_STEPS: [(u8, &str); 4] = [
    (55, "Building system configuration..."),
    (63, "Installing bootloader..."),
    (70, "Setting up users..."),
    (78, "Finalizing installation..."),
];

pub struct SystemStage<'s> {
    settings: &'s InstallerSettings,
    executor: CommandExecutor,
}

impl<'s> SystemStage<'s> {
    pub fn new(settings: &'s InstallerSettings) -> Self {
        Self {
            settings,
            executor: CommandExecutor::new(settings.mode),
        }
    }

    /// Install the system from `flake_path`, then set the user's password.
    pub fn install(
        &self,
        config: &InstallationConfig,
        flake_path: &Path,
        progress: &mut ProgressReporter<'_>,
        log: &mut OperationLog<'_>,
    ) -> StageResult<()> {
        let args = NixosInstallArgs {
            program: self.settings.tools.nixos_install.clone(),
            root: self.settings.mount_root.clone(),
            flake_path: flake_path.to_path_buf(),
            hostname: config.hostname.clone(),
        };
        let display = args.display();

        if self.executor.mode().is_simulated() {
            for (percent, step) in SIMULATED_STEPS {
                progress.report(Phase::NixosInstall, percent, format!("[SIMULATED] {}", step));
                std::thread::sleep(self.settings.simulated_step_delay());
            }
        } else {
            log.record(Operation::succeeded(
                OperationAction::Execute,
                display.clone(),
                "Starting nixos-install",
            ));
        }

        let result = self.executor.run_tool(&args, self.settings.timeouts.installer());
        let purpose = if result.success { "nixos-install completed" } else { "nixos-install failed" };
        record_command(log, OperationAction::Execute, &display, purpose, &result);
        if !result.success {
            return Err(StageFailure::new(
                Phase::NixosInstall,
                format!("nixos-install failed: {}", result.error_message()),
            )
            .with_command(display));
        }

        self.set_password(config, log)
    }

    /// The password is non-empty here; `InstallationConfig::validate` runs first.
    fn set_password(&self, config: &InstallationConfig, log: &mut OperationLog<'_>) -> StageResult<()> {
        let args = SetPasswordArgs {
            program: self.settings.tools.nixos_enter.clone(),
            root: self.settings.mount_root.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        };
        let display = args.display();
        let result = self.executor.run_tool(&args, self.settings.timeouts.credential());
        record_command(
            log,
            OperationAction::Execute,
            &display,
            &format!("Set password for {}", config.username),
            &result,
        );
        if result.success {
            Ok(())
        } else {
            Err(StageFailure::new(
                Phase::NixosInstall,
                format!("Failed to set user password: {}", result.error_message()),
            )
            .with_command(display))
        }
    }

    /// Give the relocated configuration to the primary user.
    pub fn hand_over(&self, config_path: &Path, log: &mut OperationLog<'_>) -> StageResult<()> {
        let args = ChownArgs {
            program: self.settings.tools.chown.clone(),
            owner: self.settings.primary_owner.clone(),
            path: config_path.to_path_buf(),
        };
        let display = args.display();
        let result = self.executor.run_tool(&args, self.settings.timeouts.ownership());
        record_command(
            log,
            OperationAction::Modify,
            &display,
            "Hand configuration to primary user",
            &result,
        );
        if result.success {
            Ok(())
        } else {
            Err(StageFailure::new(
                Phase::ConfigCopy,
                format!(
                    "Failed to set ownership of {}: {}",
                    config_path.display(),
                    result.error_message()
                ),
            )
            .with_command(display))
        }
    }
}
