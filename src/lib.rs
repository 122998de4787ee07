//! Keystone Installer Library
//!
//! Orchestrates an unattended NixOS installation: configuration generation,
//! disk provisioning, system installation and cleanup, as a forward-only
//! phase machine with a durable operation log and classified failures.

pub mod cli;
pub mod command_executor;
pub mod config;
pub mod config_file;
pub mod error;
pub mod failure;
pub mod generator;
pub mod install_state;
pub mod installer;
pub mod operation_log;
pub mod process_guard;
pub mod progress;
pub mod repository;
pub mod stages;
pub mod tool_traits;
pub mod tools;
pub mod types;

// Re-export main types for convenience
pub use command_executor::{CommandExecutor, CommandResult, CommandSpec, run_with_capture};
pub use config::InstallerSettings;
pub use config_file::InstallationConfig;
pub use error::{InstallerError, Result};
pub use failure::InstallationError;
pub use generator::{ConfigGenerator, GeneratedConfig, TemplateDirGenerator};
pub use install_state::{InstallTransitionError, InstallerContext};
pub use installer::{InstallationResult, InstallationSummary, Installer};
pub use operation_log::{Operation, OperationAction, OperationLog};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use progress::{Progress, ProgressReporter};
pub use repository::RepositoryGenerator;
pub use tool_traits::ToolInvocation;
pub use types::{ExecutionMode, Phase, SystemType};
