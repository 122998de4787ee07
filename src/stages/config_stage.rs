//! Configuration staging.
//!
//! The configuration is generated into a scratch directory before the target
//! disk exists, then copied (not moved, the two may be on different
//! filesystems) into the primary user's home on the mounted target.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{StageFailure, StageResult};
use crate::config::InstallerSettings;
use crate::config_file::InstallationConfig;
use crate::generator::{ConfigGenerator, GeneratedConfig};
use crate::operation_log::{Operation, OperationAction, OperationLog};
use crate::types::Phase;

pub struct ConfigStage<'s> {
    settings: &'s InstallerSettings,
    generator: &'s dyn ConfigGenerator,
}

impl<'s> ConfigStage<'s> {
    pub fn new(settings: &'s InstallerSettings, generator: &'s dyn ConfigGenerator) -> Self {
        Self { settings, generator }
    }

    /// Generate the configuration into the scratch directory.
    pub fn stage(&self, config: &InstallationConfig, log: &mut OperationLog<'_>) -> StageResult<GeneratedConfig> {
        let scratch = &self.settings.scratch_dir;
        if let Err(e) = fs::create_dir_all(scratch) {
            log.record(Operation::failed(
                OperationAction::Create,
                scratch.display().to_string(),
                "Create scratch directory",
                e.to_string(),
            ));
            return Err(StageFailure::new(
                Phase::ConfigGeneration,
                format!("Failed to create {}: {}", scratch.display(), e),
            ));
        }

        log::info!("Generating configuration under {}", scratch.display());
        self.generator
            .generate(config, scratch, log)
            .map_err(|e| StageFailure::new(Phase::ConfigGeneration, e.to_string()))
    }

    /// Copy the staged configuration to its final path on the target.
    ///
    /// Fails under `Mounting`: an unwritable destination almost always means
    /// the target was never actually mounted.
    pub fn relocate(&self, staged: &Path, username: &str, log: &mut OperationLog<'_>) -> StageResult<PathBuf> {
        let destination = self.settings.final_config_path(username);
        let display = destination.display().to_string();

        match copy_fresh(staged, &destination) {
            Ok(count) => {
                log::info!("Relocated {} entries to {}", count, display);
                log.record(Operation::succeeded(
                    OperationAction::Copy,
                    display,
                    format!("Relocate configuration from {}", staged.display()),
                ));
                Ok(destination)
            }
            Err(e) => {
                log.record(Operation::failed(
                    OperationAction::Copy,
                    display.clone(),
                    format!("Relocate configuration from {}", staged.display()),
                    e.to_string(),
                ));
                Err(StageFailure::new(
                    Phase::Mounting,
                    format!("Failed to relocate configuration to {}: {}", display, e),
                ))
            }
        }
    }
}

/// Replace `destination` with a copy of the `source` tree. Returns the entry count.
fn copy_fresh(source: &Path, destination: &Path) -> io::Result<usize> {
    if destination.exists() {
        fs::remove_dir_all(destination)?;
    }
    let mut count = 0;
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
        count += 1;
    }
    Ok(count)
}
