//! Core enums shared by the installer stages and the orchestrator.
//!
//! `Phase` is the single ordered enumeration used both to validate state
//! transitions and to check that retry phases never point ahead of a failure.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Installation phases in their fixed total order.
///
/// The discriminant is the position in the order. `Error` sits last so that
/// it compares greater than every working phase, but it is never a valid
/// forward target through `install_state`; it is reached only by failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    ConfigGeneration = 1,
    Partitioning = 2,
    Formatting = 3,
    Mounting = 4,
    NixosInstall = 5,
    ConfigCopy = 6,
    Cleanup = 7,
    Complete = 8,
    Error = 9,
}

impl Phase {
    /// Position in the total order.
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// `Complete` and `Error` end a run.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Phases that rewrite the partition table or filesystems.
    #[inline]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Partitioning | Self::Formatting)
    }

    /// Human-readable label for progress displays.
    pub const fn description(self) -> &'static str {
        match self {
            Self::Idle => "Waiting to start",
            Self::ConfigGeneration => "Generating configuration",
            Self::Partitioning => "Partitioning disk",
            Self::Formatting => "Formatting filesystems",
            Self::Mounting => "Mounting target filesystems",
            Self::NixosInstall => "Installing NixOS",
            Self::ConfigCopy => "Handing configuration to primary user",
            Self::Cleanup => "Cleaning up",
            Self::Complete => "Installation complete",
            Self::Error => "Installation failed",
        }
    }

    /// Nominal progress percentage when the phase is entered.
    pub const fn progress_percent(self) -> u8 {
        match self {
            Self::Idle | Self::ConfigGeneration => 0,
            Self::Partitioning => 15,
            Self::Formatting => 25,
            Self::Mounting => 35,
            Self::NixosInstall => 45,
            Self::ConfigCopy => 90,
            Self::Cleanup => 95,
            Self::Complete => 100,
            Self::Error => 0,
        }
    }

    /// Every phase in order, `Error` included.
    pub const fn all() -> &'static [Self] {
        &[
            Self::Idle,
            Self::ConfigGeneration,
            Self::Partitioning,
            Self::Formatting,
            Self::Mounting,
            Self::NixosInstall,
            Self::ConfigCopy,
            Self::Cleanup,
            Self::Complete,
            Self::Error,
        ]
    }
}

/// Which Keystone module the generated host configuration imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SystemType {
    #[default]
    Server,
    Client,
}

/// Whether stages really invoke external tools.
///
/// Threaded explicitly into every stage; there is no process-wide switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Live,
    /// Every external invocation becomes a logged no-op reporting success.
    Simulated,
}

impl ExecutionMode {
    #[inline]
    pub const fn is_simulated(self) -> bool {
        matches!(self, Self::Simulated)
    }
}
