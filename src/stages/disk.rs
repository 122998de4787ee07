//! Disk preparation.
//!
//! Live runs inspect the target first (see `preflight`) and refuse to wipe a
//! device that is busy, too small or not a disk.
//!
//! Partitioning, formatting and mounting are delegated to `disko`. Its own
//! success report is not trusted: the mount points are checked afterwards and,
//! for unencrypted layouts, a manual mount by partition label or index is
//! attempted when they are missing or not mounted.
//!
//! Encrypted layouts (ZFS pool import) are left entirely to `disko`; there is
//! no manual fallback for them.

use std::fs;
use std::path::{Path, PathBuf};

use super::preflight::{check_target, parse_lsblk};
use super::{StageFailure, StageResult, record_command};
use crate::command_executor::CommandExecutor;
use crate::config::InstallerSettings;
use crate::operation_log::{Operation, OperationAction, OperationLog};
use crate::tool_traits::ToolInvocation;
use crate::tools::disk::{DiskoArgs, LsblkArgs, MountArgs};
use crate::types::Phase;

const ROOT_PARTLABEL: &str = "/dev/disk/by-partlabel/root";
const BOOT_PARTLABEL: &str = "/dev/disk/by-partlabel/ESP";
/// Partition indices in the generated layout: ESP, swap, root.
const BOOT_PARTITION: u32 = 1;
const ROOT_PARTITION: u32 = 3;

pub struct DiskStage<'s> {
    settings: &'s InstallerSettings,
    executor: CommandExecutor,
}

impl<'s> DiskStage<'s> {
    pub fn new(settings: &'s InstallerSettings) -> Self {
        Self {
            settings,
            executor: CommandExecutor::new(settings.mode),
        }
    }

    /// Run disko against the generated disk description, then verify mounts.
    pub fn provision(
        &self,
        disko_config: &Path,
        disk_device: &str,
        encrypted: bool,
        log: &mut OperationLog<'_>,
    ) -> StageResult<()> {
        let args = DiskoArgs {
            program: self.settings.tools.disko.clone(),
            config_path: disko_config.to_path_buf(),
        };
        let display = args.display();

        if self.executor.mode().is_simulated() {
            self.create_sandbox()?;
        } else {
            self.inspect_target(disk_device, log)?;
            log.record(Operation::succeeded(
                OperationAction::Execute,
                display.clone(),
                format!("Running disko to partition, format, and mount {}", disk_device),
            ));
        }

        let result = self.executor.run_tool(&args, self.settings.timeouts.provisioning());
        let purpose = if result.success { "Disko completed" } else { "Disko failed" };
        record_command(log, OperationAction::Execute, &display, purpose, &result);
        if !result.success {
            return Err(StageFailure::new(Phase::Partitioning, result.error_message()).with_command(display));
        }

        match self.verify_mount_points() {
            Ok(()) => Ok(()),
            Err(message) if encrypted => Err(StageFailure::new(Phase::Partitioning, message)),
            Err(message) => {
                log::warn!("{}; trying manual mount", message);
                self.fallback_mount(disk_device, log);
                self.verify_mount_points()
                    .map_err(|_| StageFailure::new(Phase::Partitioning, message))
            }
        }
    }

    /// Refuse a target that is not an idle whole disk of usable size.
    fn inspect_target(&self, disk_device: &str, log: &mut OperationLog<'_>) -> StageResult<()> {
        let args = LsblkArgs {
            program: self.settings.tools.lsblk.clone(),
            device: disk_device.to_string(),
        };
        let display = args.display();
        let result = self.executor.run_tool(&args, self.settings.timeouts.probe());
        record_command(log, OperationAction::Execute, &display, "Inspect target disk", &result);
        if !result.success {
            return Err(StageFailure::new(
                Phase::Partitioning,
                format!("Failed to inspect {}: {}", disk_device, result.error_message()),
            )
            .with_command(display));
        }

        let device = parse_lsblk(&result.output).map_err(|e| StageFailure::new(Phase::Partitioning, e))?;
        check_target(&device).map_err(|e| StageFailure::new(Phase::Partitioning, e))?;
        if device.has_existing_data() {
            log::warn!("{} holds partitions or a filesystem that disko will destroy", disk_device);
        }
        Ok(())
    }

    /// Make sure the target is really mounted before anything is written to it.
    ///
    /// Only acts for unencrypted live runs whose root or boot is not a mount
    /// point. Fallback failures are logged, never returned; a missing mount
    /// surfaces when the configuration is relocated.
    pub fn ensure_mounted(&self, disk_device: &str, encrypted: bool, log: &mut OperationLog<'_>) -> StageResult<()> {
        if !encrypted && !self.executor.mode().is_simulated() {
            let root = &self.settings.mount_root;
            let boot = self.settings.boot_mount();
            if !(is_mount_point(root) && is_mount_point(&boot)) {
                log::warn!("{} is not fully mounted after disko", root.display());
                self.fallback_mount(disk_device, log);
            }
        }
        self.verify_mount_points()
            .map_err(|message| StageFailure::new(Phase::Mounting, message))
    }

    fn verify_mount_points(&self) -> Result<(), String> {
        let root = &self.settings.mount_root;
        if !root.is_dir() {
            return Err(format!("Disko did not create mount point at {}", root.display()));
        }
        let boot = self.settings.boot_mount();
        if !boot.is_dir() {
            return Err(format!("Disko did not create boot mount point at {}", boot.display()));
        }
        Ok(())
    }

    /// Sandbox mount points so relocation has somewhere real to write.
    fn create_sandbox(&self) -> StageResult<()> {
        let root = &self.settings.mount_root;
        for dir in [root.clone(), self.settings.boot_mount(), root.join("home")] {
            fs::create_dir_all(&dir).map_err(|e| {
                StageFailure::new(
                    Phase::Partitioning,
                    format!("Failed to create sandbox mount point {}: {}", dir.display(), e),
                )
            })?;
        }
        Ok(())
    }

    /// Mount root then boot by partition label, falling back to partition index.
    fn fallback_mount(&self, disk_device: &str, log: &mut OperationLog<'_>) {
        let root_device = pick_device(ROOT_PARTLABEL, disk_device, ROOT_PARTITION);
        let boot_device = pick_device(BOOT_PARTLABEL, disk_device, BOOT_PARTITION);
        let root = self.settings.mount_root.clone();
        let boot = self.settings.boot_mount();
        let target = format!("{} ({}, {})", root.display(), root_device.display(), boot_device.display());

        let outcome = self
            .mount_one(&root_device, &root)
            .and_then(|()| self.mount_one(&boot_device, &boot));

        match outcome {
            Ok(()) => log.record(Operation::succeeded(
                OperationAction::Mount,
                target,
                "Ensure target partitions are mounted",
            )),
            Err(e) => {
                log::warn!("Manual mount failed: {}", e);
                log.record(Operation::failed(
                    OperationAction::Mount,
                    target,
                    "Ensure target partitions are mounted",
                    format!("Failed to mount target partitions: {}", e),
                ));
            }
        }
    }

    fn mount_one(&self, device: &Path, target: &Path) -> Result<(), String> {
        if is_mount_point(target) {
            return Ok(());
        }
        fs::create_dir_all(target).map_err(|e| format!("{}: {}", target.display(), e))?;
        let args = MountArgs {
            program: self.settings.tools.mount.clone(),
            device: device.to_path_buf(),
            target: target.to_path_buf(),
        };
        let result = self.executor.run_tool(&args, self.settings.timeouts.mount());
        if result.success {
            Ok(())
        } else {
            Err(format!("{}: {}", args.display(), result.error_message()))
        }
    }
}

fn pick_device(label: &str, disk_device: &str, index: u32) -> PathBuf {
    let label = Path::new(label);
    if label.exists() {
        label.to_path_buf()
    } else {
        PathBuf::from(partition_path(disk_device, index))
    }
}

/// Device path of partition `index` on `disk_device`.
///
/// Stable `/dev/disk/...` links take a `-partN` suffix, NVMe and MMC devices a
/// `pN` suffix, everything else a bare `N`. Bare names get `/dev/` prefixed.
pub fn partition_path(disk_device: &str, index: u32) -> String {
    let base = if disk_device.starts_with("/dev/") {
        disk_device.to_string()
    } else {
        format!("/dev/{}", disk_device)
    };
    if base.starts_with("/dev/disk/") {
        format!("{}-part{}", base, index)
    } else if base.contains("nvme") || base.contains("mmcblk") {
        format!("{}p{}", base, index)
    } else {
        format!("{}{}", base, index)
    }
}

/// Whether `path` is currently a mount point of this process's namespace.
pub fn is_mount_point(path: &Path) -> bool {
    let Ok(content) = fs::read_to_string("/proc/self/mountinfo") else {
        return false;
    };
    let wanted = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    mount_points(&content).any(|mp| mp == wanted)
}

/// Mount points listed in `/proc/self/mountinfo` content (field 5, unescaped).
pub fn mount_points(mountinfo: &str) -> impl Iterator<Item = PathBuf> + '_ {
    mountinfo
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(|field| PathBuf::from(unescape_mount_field(field)))
}

/// Undo the kernel's octal escaping (`\040` for space and friends).
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                out.push(value as u8);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
