//! Runtime settings for the orchestrator.
//!
//! Everything a stage needs besides the operator's `InstallationConfig`:
//! execution mode, well-known paths, tool programs and per-command timeouts.
//! Settings are handed to each stage explicitly; nothing here is global.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::ExecutionMode;

/// Mount root used for real installs.
pub const MOUNT_ROOT: &str = "/mnt";
/// Sandbox mount root used in simulated mode.
pub const SIMULATED_MOUNT_ROOT: &str = "/tmp/keystone-dev/mnt";
/// Scratch location the configuration is generated into before disks exist.
pub const SCRATCH_DIR: &str = "/tmp/keystone-install";
/// Durable operation log.
pub const INSTALL_LOG_PATH: &str = "/tmp/keystone-install.log";
/// Smallest target disk an install is attempted on (8 GiB).
pub const MIN_DISK_SIZE_BYTES: u64 = 8 * 1024 * 1024 * 1024;
/// Template location on the installer image.
pub const DEFAULT_TEMPLATE_DIR: &str = "/usr/share/keystone/templates/default";
/// Directory name of the generated flake.
pub const CONFIG_DIR_NAME: &str = "nixos-config";
/// ZFS pool created by the encrypted disk layout.
pub const ZFS_POOL_NAME: &str = "rpool";

/// External programs the stages invoke. Overridable for non-standard images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPrograms {
    pub lsblk: String,
    pub git: String,
    pub disko: String,
    pub nixos_install: String,
    pub nixos_enter: String,
    pub mount: String,
    pub umount: String,
    pub zpool: String,
    pub chown: String,
}

impl Default for ToolPrograms {
    fn default() -> Self {
        Self {
            lsblk: "lsblk".to_string(),
            git: "git".to_string(),
            disko: "disko".to_string(),
            nixos_install: "nixos-install".to_string(),
            nixos_enter: "nixos-enter".to_string(),
            mount: "mount".to_string(),
            umount: "umount".to_string(),
            zpool: "zpool".to_string(),
            chown: "chown".to_string(),
        }
    }
}

/// Per-command timeouts in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub probe_secs: u64,
    pub clone_secs: u64,
    pub provisioning_secs: u64,
    pub installer_secs: u64,
    pub credential_secs: u64,
    pub mount_secs: u64,
    pub ownership_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe_secs: 10,
            clone_secs: 120,
            provisioning_secs: 5 * 60,
            installer_secs: 10 * 60,
            credential_secs: 30,
            mount_secs: 30,
            ownership_secs: 60,
        }
    }
}

impl Timeouts {
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn git_clone(&self) -> Duration {
        Duration::from_secs(self.clone_secs)
    }

    pub fn provisioning(&self) -> Duration {
        Duration::from_secs(self.provisioning_secs)
    }

    pub fn installer(&self) -> Duration {
        Duration::from_secs(self.installer_secs)
    }

    pub fn credential(&self) -> Duration {
        Duration::from_secs(self.credential_secs)
    }

    pub fn mount(&self) -> Duration {
        Duration::from_secs(self.mount_secs)
    }

    pub fn ownership(&self) -> Duration {
        Duration::from_secs(self.ownership_secs)
    }
}

/// Settings shared by every stage of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerSettings {
    pub mode: ExecutionMode,
    pub mount_root: PathBuf,
    pub scratch_dir: PathBuf,
    pub log_path: PathBuf,
    pub tools: ToolPrograms,
    pub timeouts: Timeouts,
    /// Pause between synthetic installer progress steps in simulated mode.
    pub simulated_step_delay_ms: u64,
    /// `uid:gid` the relocated configuration is handed to.
    pub primary_owner: String,
    pub pool_name: String,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Live,
            mount_root: PathBuf::from(MOUNT_ROOT),
            scratch_dir: PathBuf::from(SCRATCH_DIR),
            log_path: PathBuf::from(INSTALL_LOG_PATH),
            tools: ToolPrograms::default(),
            timeouts: Timeouts::default(),
            simulated_step_delay_ms: 500,
            primary_owner: "1000:100".to_string(),
            pool_name: ZFS_POOL_NAME.to_string(),
        }
    }
}

impl InstallerSettings {
    /// Defaults for a simulated run: no external tools, sandboxed mount root.
    pub fn simulated() -> Self {
        Self {
            mode: ExecutionMode::Simulated,
            mount_root: PathBuf::from(SIMULATED_MOUNT_ROOT),
            ..Self::default()
        }
    }

    /// Switch to simulated mode, moving the mount root into the sandbox
    /// unless it was already customised.
    pub fn into_simulated(mut self) -> Self {
        self.mode = ExecutionMode::Simulated;
        if self.mount_root == Path::new(MOUNT_ROOT) {
            self.mount_root = PathBuf::from(SIMULATED_MOUNT_ROOT);
        }
        self
    }

    /// Load settings from a JSON file; missing fields take defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {:?}", path.as_ref()))?;
        serde_json::from_str(&content).context("Failed to parse settings JSON")
    }

    pub fn boot_mount(&self) -> PathBuf {
        self.mount_root.join("boot")
    }

    pub fn scratch_config_path(&self) -> PathBuf {
        self.scratch_dir.join(CONFIG_DIR_NAME)
    }

    /// Where the configuration lives on the installed system (under the mount root).
    pub fn final_config_path(&self, username: &str) -> PathBuf {
        self.mount_root
            .join("home")
            .join(username)
            .join(CONFIG_DIR_NAME)
    }

    pub fn simulated_step_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_step_delay_ms)
    }
}
