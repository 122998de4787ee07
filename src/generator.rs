//! Configuration generator collaborator.
//!
//! The orchestrator only needs two things from a generator: a directory holding
//! the generated flake, and the path of the standalone disk description that
//! `disko` consumes. `TemplateDirGenerator` produces both by instantiating a
//! template tree.
//!
//! # Placeholders
//!
//! | Placeholder          | Value                                        |
//! |----------------------|----------------------------------------------|
//! | `@HOSTNAME@`         | `hostname`                                   |
//! | `@USERNAME@`         | `username`                                   |
//! | `@DISK_DEVICE@`      | `diskDevice`                                 |
//! | `@SWAP_SIZE@`        | `swapSize`                                   |
//! | `@SYSTEM_TYPE@`      | `server` or `client`                         |
//! | `@STORAGE_TYPE@`     | `zfs` when encrypted, `ext4` otherwise       |
//! | `@HOST_ID@`          | 8 hex digits derived from the hostname       |
//! | `@KEYSTONE_MODULES@` | module list for the system type              |
//!
//! Placeholders are replaced in file contents and in path components, so a
//! template directory named `hosts/@HOSTNAME@` lands at `hosts/srv1`.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::CONFIG_DIR_NAME;
use crate::config_file::InstallationConfig;
use crate::error::{InstallerError, Result};
use crate::operation_log::{Operation, OperationAction, OperationLog};
use crate::types::SystemType;

/// A file the generator wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
}

/// Result of a successful generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedConfig {
    /// Flake root (`<base>/nixos-config`).
    pub root: PathBuf,
    /// Standalone disk description handed to the provisioning tool.
    pub disko_config: PathBuf,
    pub files: Vec<GeneratedFile>,
}

/// Produces the configuration file set for a run.
pub trait ConfigGenerator {
    /// Write the configuration under `base_dir`, recording each write in `log`.
    fn generate(
        &self,
        config: &InstallationConfig,
        base_dir: &Path,
        log: &mut OperationLog<'_>,
    ) -> Result<GeneratedConfig>;
}

/// Path of the standalone disk description inside a flake root.
pub fn disko_config_path(root: &Path, hostname: &str) -> PathBuf {
    root.join("hosts").join(hostname).join("disko-standalone.nix")
}

/// Instantiates a template directory tree.
#[derive(Debug, Clone)]
pub struct TemplateDirGenerator {
    template_dir: PathBuf,
}

impl TemplateDirGenerator {
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_dir: template_dir.into(),
        }
    }

    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }
}

impl ConfigGenerator for TemplateDirGenerator {
    fn generate(
        &self,
        config: &InstallationConfig,
        base_dir: &Path,
        log: &mut OperationLog<'_>,
    ) -> Result<GeneratedConfig> {
        if !self.template_dir.is_dir() {
            return Err(InstallerError::generation(format!(
                "Template directory {} does not exist",
                self.template_dir.display()
            )));
        }

        let root = prepare_root(base_dir, log)?;

        let vars = template_vars(config);
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.template_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| InstallerError::generation(format!("Failed to read template: {}", e)))?;
            let relative = match entry.path().strip_prefix(&self.template_dir) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel,
                _ => continue,
            };
            let relative = PathBuf::from(substitute(&relative.to_string_lossy(), &vars));
            let target = root.join(&relative);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
                continue;
            }

            let purpose = format!("Generate {}", relative.display());
            if let Err(e) = instantiate(entry.path(), &target, &vars) {
                record_failure(log, OperationAction::Create, &target, &purpose, &e);
                return Err(InstallerError::generation(format!(
                    "Configuration generation failed: {}: {}",
                    target.display(),
                    e
                )));
            }
            log.record(Operation::succeeded(
                OperationAction::Create,
                target.display().to_string(),
                purpose,
            ));
            files.push(GeneratedFile {
                relative_path: relative,
                absolute_path: target,
            });
        }

        let disko_config = disko_config_path(&root, &config.hostname);
        if !disko_config.is_file() {
            return Err(InstallerError::generation(format!(
                "Template did not produce {}",
                disko_config.display()
            )));
        }

        Ok(GeneratedConfig {
            root,
            disko_config,
            files,
        })
    }
}

/// Fresh, empty `<base>/nixos-config`; a leftover tree is removed first.
pub(crate) fn prepare_root(base_dir: &Path, log: &mut OperationLog<'_>) -> Result<PathBuf> {
    let root = base_dir.join(CONFIG_DIR_NAME);
    if root.exists() {
        fs::remove_dir_all(&root).map_err(|e| {
            record_failure(log, OperationAction::Delete, &root, "Remove stale configuration", &e);
            InstallerError::generation(format!("Failed to remove {}: {}", root.display(), e))
        })?;
        log.record(Operation::succeeded(
            OperationAction::Delete,
            root.display().to_string(),
            "Remove stale configuration",
        ));
    }
    fs::create_dir_all(&root).map_err(|e| {
        record_failure(log, OperationAction::Create, &root, "Create configuration directory", &e);
        InstallerError::generation(format!("Failed to create {}: {}", root.display(), e))
    })?;
    Ok(root)
}

fn instantiate(source: &Path, target: &Path, vars: &[(&'static str, String)]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = fs::read(source)?;
    match String::from_utf8(bytes) {
        Ok(text) => fs::write(target, substitute(&text, vars)),
        Err(raw) => fs::write(target, raw.into_bytes()),
    }
}

fn record_failure(log: &mut OperationLog<'_>, action: OperationAction, path: &Path, purpose: &str, err: &std::io::Error) {
    log.record(Operation::failed(
        action,
        path.display().to_string(),
        purpose,
        err.to_string(),
    ));
}

fn template_vars(config: &InstallationConfig) -> Vec<(&'static str, String)> {
    let modules = match config.system_type {
        SystemType::Server => "keystone.nixosModules.operating-system",
        SystemType::Client => "keystone.nixosModules.operating-system\n        keystone.nixosModules.desktop",
    };
    vec![
        ("@HOSTNAME@", config.hostname.clone()),
        ("@USERNAME@", config.username.clone()),
        ("@DISK_DEVICE@", config.disk_device.clone()),
        ("@SWAP_SIZE@", config.swap_size.clone()),
        ("@SYSTEM_TYPE@", config.system_type.to_string()),
        ("@STORAGE_TYPE@", if config.encrypted { "zfs" } else { "ext4" }.to_string()),
        ("@HOST_ID@", host_id(&config.hostname)),
        ("@KEYSTONE_MODULES@", modules.to_string()),
    ]
}

fn substitute(text: &str, vars: &[(&'static str, String)]) -> String {
    vars.iter()
        .fold(text.to_string(), |acc, (key, value)| acc.replace(key, value))
}

/// Deterministic ZFS host id: a 31-multiplier string hash, printed as 8 hex digits.
pub fn host_id(hostname: &str) -> String {
    let hash = hostname.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(unit as i32)
    });
    let mut hex = format!("{:08x}", hash.unsigned_abs());
    hex.truncate(8);
    hex
}
