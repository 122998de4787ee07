//! Cleanup: unmount the target and release the storage pool.
//!
//! Every step is attempted regardless of the ones before it, and the stage as
//! a whole never fails. Running it twice is harmless: targets that are no
//! longer mounted are skipped.

use std::path::PathBuf;

use super::record_command;
use crate::command_executor::CommandExecutor;
use crate::config::InstallerSettings;
use crate::operation_log::{Operation, OperationAction, OperationLog};
use crate::tool_traits::ToolInvocation;
use crate::tools::disk::{UmountArgs, ZpoolExportArgs};

use super::disk::is_mount_point;

/// What cleanup did. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub attempted: usize,
    pub failed: Vec<String>,
}

impl CleanupReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct CleanupStage<'s> {
    settings: &'s InstallerSettings,
    executor: CommandExecutor,
}

impl<'s> CleanupStage<'s> {
    pub fn new(settings: &'s InstallerSettings) -> Self {
        Self {
            settings,
            executor: CommandExecutor::new(settings.mode),
        }
    }

    /// Unmount boot then root; export the pool for encrypted layouts.
    pub fn run(&self, encrypted: bool, log: &mut OperationLog<'_>) -> CleanupReport {
        let mut report = CleanupReport::default();

        for target in [self.settings.boot_mount(), self.settings.mount_root.clone()] {
            self.unmount(target, log, &mut report);
        }

        if encrypted {
            let args = ZpoolExportArgs {
                program: self.settings.tools.zpool.clone(),
                pool: self.settings.pool_name.clone(),
            };
            let display = args.display();
            let result = self.executor.run_tool(&args, self.settings.timeouts.mount());
            record_command(log, OperationAction::Execute, &display, "Export storage pool", &result);
            report.attempted += 1;
            if !result.success {
                log::warn!("{} failed: {}", display, result.error_message());
                report.failed.push(display);
            }
        }

        if report.all_succeeded() {
            log::info!("Cleanup finished");
        } else {
            log::warn!("Cleanup finished with {} failed step(s)", report.failed.len());
        }
        report
    }

    fn unmount(&self, target: PathBuf, log: &mut OperationLog<'_>, report: &mut CleanupReport) {
        let display_target = target.display().to_string();
        if !self.executor.mode().is_simulated() && !is_mount_point(&target) {
            log.record(Operation::succeeded(
                OperationAction::Unmount,
                display_target,
                "Not mounted, nothing to unmount",
            ));
            return;
        }

        let args = UmountArgs {
            program: self.settings.tools.umount.clone(),
            target,
        };
        let result = self.executor.run_tool(&args, self.settings.timeouts.mount());
        record_command(log, OperationAction::Unmount, &display_target, "Unmount target filesystem", &result);
        report.attempted += 1;
        if !result.success {
            log::warn!("Unmounting {} failed: {}", display_target, result.error_message());
            report.failed.push(args.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionMode;
    use tempfile::TempDir;

    fn settings(dir: &std::path::Path, mode: ExecutionMode) -> InstallerSettings {
        InstallerSettings {
            mode,
            mount_root: dir.join("mnt"),
            log_path: dir.join("install.log"),
            ..InstallerSettings::default()
        }
    }

    #[test]
    fn test_unmounted_targets_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(dir.path(), ExecutionMode::Live);
        settings.tools.umount = "false".to_string();
        let stage = CleanupStage::new(&settings);
        let mut log = OperationLog::detached(&settings.log_path);

        let report = stage.run(false, &mut log);
        assert!(report.all_succeeded());
        assert_eq!(report.attempted, 0);
        assert_eq!(log.operations().len(), 2);
        assert!(log.operations().iter().all(|op| op.success && op.action == OperationAction::Unmount));
    }

    #[test]
    fn test_pool_export_failure_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(dir.path(), ExecutionMode::Live);
        settings.tools.zpool = "false".to_string();
        let stage = CleanupStage::new(&settings);
        let mut log = OperationLog::detached(&settings.log_path);

        let report = stage.run(true, &mut log);
        assert_eq!(report.failed, vec!["false export rpool".to_string()]);
        assert!(!log.operations().last().unwrap().success);
    }

    #[test]
    fn test_simulated_cleanup_logs_every_step() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path(), ExecutionMode::Simulated);
        let stage = CleanupStage::new(&settings);
        let mut log = OperationLog::detached(&settings.log_path);

        let report = stage.run(true, &mut log);
        assert!(report.all_succeeded());
        assert_eq!(report.attempted, 3);
        let paths: Vec<&str> = log.operations().iter().map(|op| op.path.as_str()).collect();
        assert!(paths[0].ends_with("mnt/boot"));
        assert!(paths[1].ends_with("mnt"));
        assert_eq!(paths[2], "zpool export rpool");
    }

    #[test]
    fn test_cleanup_twice_never_fails() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path(), ExecutionMode::Live);
        let stage = CleanupStage::new(&settings);
        let mut log = OperationLog::detached(&settings.log_path);

        assert!(stage.run(false, &mut log).all_succeeded());
        assert!(stage.run(false, &mut log).all_succeeded());
    }
}
