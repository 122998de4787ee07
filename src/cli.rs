use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_TEMPLATE_DIR;
use crate::types::Phase;

/// Keystone installer - unattended NixOS installation orchestrator
#[derive(Parser, Debug)]
#[command(name = "keystone-install")]
#[command(about = "Partition, install and hand over a Keystone NixOS host")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an installation from a configuration file
    Install {
        /// Installation configuration (JSON, camelCase fields)
        #[arg(short, long)]
        config: PathBuf,

        /// Runtime settings (JSON); every field is optional
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Template directory the configuration is generated from
        /// [default: next to the executable, else /usr/share/keystone/templates/default]
        #[arg(short, long, env = "KEYSTONE_TEMPLATE_DIR")]
        template: Option<PathBuf>,

        /// Clone an existing configuration repository (https:// or git@) instead of using a template
        #[arg(short, long, conflicts_with = "template")]
        repository: Option<String>,

        /// Simulation mode: skip every external tool and report synthetic success.
        ///
        /// The target is a sandbox directory, so nothing on the host changes.
        #[arg(long, env = "DEV_MODE")]
        simulate: bool,

        /// Operation log path (overrides settings)
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Print the installation result as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Resume at this phase instead of starting from scratch
        #[arg(long)]
        resume_from: Option<Phase>,

        /// Allow resuming into partitioning, which rewrites the disk
        #[arg(long, requires = "resume_from")]
        confirm_destructive: bool,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
    /// List installation phases in order
    Phases,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Template directory to use when none was given on the command line.
///
/// Looks beside the running executable (`<prefix>/bin` with
/// `<prefix>/share/keystone/templates/default`, or a `templates/default`
/// directory next to it), then falls back to the image-wide location.
pub fn resolve_template_dir(explicit: Option<PathBuf>, exe: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    exe.and_then(Path::parent)
        .into_iter()
        .flat_map(|bin| {
            [
                bin.join("../share/keystone/templates/default"),
                bin.join("templates/default"),
            ]
        })
        .find(|candidate| candidate.is_dir())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_DIR))
}
