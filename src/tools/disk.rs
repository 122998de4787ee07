//! Typed invocations for storage tools.
//!
//! - `LsblkArgs` for inspecting the target disk before it is wiped
//! - `DiskoArgs` for `disko --mode disko <config>`
//! - `MountArgs` / `UmountArgs` for the manual mount fallback and cleanup
//! - `ZpoolExportArgs` for releasing the encrypted layout's pool

use std::path::PathBuf;

use crate::tool_traits::ToolInvocation;

/// `lsblk -J -b -o NAME,SIZE,TYPE,FSTYPE,MOUNTPOINT <device>`
///
/// JSON output with sizes in bytes; children are the device's partitions.
#[derive(Debug, Clone)]
pub struct LsblkArgs {
    pub program: String,
    pub device: String,
}

impl ToolInvocation for LsblkArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-J".to_string(),
            "-b".to_string(),
            "-o".to_string(),
            "NAME,SIZE,TYPE,FSTYPE,MOUNTPOINT".to_string(),
            self.device.clone(),
        ]
    }
}

/// Partition, format and mount the target from a declarative disk description.
///
/// # Field Mapping
///
/// | Rust Field    | Argv / Env                     |
/// |---------------|--------------------------------|
/// | `config_path` | `--mode disko <config_path>`   |
/// | (fixed)       | `NIX_PATH=nixpkgs=flake:nixpkgs` |
///
/// The target device is baked into the disk description by the generator;
/// disko does not take it on the command line.
#[derive(Debug, Clone)]
pub struct DiskoArgs {
    pub program: String,
    pub config_path: PathBuf,
}

impl ToolInvocation for DiskoArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--mode".to_string(),
            "disko".to_string(),
            self.config_path.display().to_string(),
        ]
    }

    /// disko resolves `<nixpkgs>` through NIX_PATH; point it at the flake registry.
    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![("NIX_PATH".to_string(), "nixpkgs=flake:nixpkgs".to_string())]
    }
}

/// `mount <device> <target>`
#[derive(Debug, Clone)]
pub struct MountArgs {
    pub program: String,
    pub device: PathBuf,
    pub target: PathBuf,
}

impl ToolInvocation for MountArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            self.device.display().to_string(),
            self.target.display().to_string(),
        ]
    }
}

/// `umount <target>`
#[derive(Debug, Clone)]
pub struct UmountArgs {
    pub program: String,
    pub target: PathBuf,
}

impl ToolInvocation for UmountArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.target.display().to_string()]
    }
}

/// `zpool export <pool>`
#[derive(Debug, Clone)]
pub struct ZpoolExportArgs {
    pub program: String,
    pub pool: String,
}

impl ToolInvocation for ZpoolExportArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["export".to_string(), self.pool.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disko_args_mode_and_config() {
        let args = DiskoArgs {
            program: "disko".to_string(),
            config_path: PathBuf::from("/tmp/keystone-install/nixos-config/hosts/srv1/disko-standalone.nix"),
        };
        assert_eq!(
            args.to_cli_args(),
            vec![
                "--mode",
                "disko",
                "/tmp/keystone-install/nixos-config/hosts/srv1/disko-standalone.nix"
            ]
        );
        assert!(args.display().starts_with("NIX_PATH=nixpkgs=flake:nixpkgs disko --mode disko "));
        assert!(args.stdin_payload().is_none());
    }

    #[test]
    fn test_lsblk_args_json_bytes_single_device() {
        let args = LsblkArgs {
            program: "lsblk".to_string(),
            device: "/dev/disk/by-id/nvme-x".to_string(),
        };
        assert_eq!(
            args.display(),
            "lsblk -J -b -o NAME,SIZE,TYPE,FSTYPE,MOUNTPOINT /dev/disk/by-id/nvme-x"
        );
    }

    #[test]
    fn test_mount_args_device_then_target() {
        let args = MountArgs {
            program: "mount".to_string(),
            device: PathBuf::from("/dev/nvme0n1p3"),
            target: PathBuf::from("/mnt"),
        };
        assert_eq!(args.to_cli_args(), vec!["/dev/nvme0n1p3", "/mnt"]);
        assert_eq!(args.display(), "mount /dev/nvme0n1p3 /mnt");
    }

    #[test]
    fn test_zpool_export_args() {
        let args = ZpoolExportArgs {
            program: "zpool".to_string(),
            pool: "rpool".to_string(),
        };
        assert_eq!(args.to_cli_args(), vec!["export", "rpool"]);
        assert!(args.get_env_vars().is_empty());
    }
}
