//! Installation configuration: what the operator chose for this run.
//!
//! The config is immutable once a run starts. It is loaded from JSON with the
//! same camelCase field names the wizard front end produces.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::types::SystemType;

/// Default swap partition size.
pub const DEFAULT_SWAP_SIZE: &str = "8G";

/// Names that collide with accounts the base system already owns.
const RESERVED_USERNAMES: &[&str] = &[
    "root", "bin", "daemon", "adm", "lp", "sync", "shutdown", "halt", "mail", "news", "uucp",
    "operator", "games", "ftp", "nobody", "systemd-network", "systemd-resolve", "messagebus",
    "sshd", "nixbld",
];

/// Values collected from the operator for a single installation run.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstallationConfig {
    pub hostname: String,
    pub username: String,
    /// Plaintext; only ever handed to the credential tool on stdin.
    pub password: String,
    /// Target disk, preferably a stable `/dev/disk/by-id/...` path.
    pub disk_device: String,
    pub encrypted: bool,
    pub system_type: SystemType,
    #[serde(default = "default_swap_size")]
    pub swap_size: String,
}

fn default_swap_size() -> String {
    DEFAULT_SWAP_SIZE.to_string()
}

impl fmt::Debug for InstallationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationConfig")
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("disk_device", &self.disk_device)
            .field("encrypted", &self.encrypted)
            .field("system_type", &self.system_type)
            .field("swap_size", &self.swap_size)
            .finish()
    }
}

impl InstallationConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate every field. The first problem found is returned.
    pub fn validate(&self) -> Result<()> {
        validate_hostname(&self.hostname)?;
        validate_username(&self.username)?;

        if self.password.is_empty() {
            anyhow::bail!("Password is required");
        }

        if self.disk_device.trim().is_empty() {
            anyhow::bail!("Target disk must be specified");
        }

        validate_swap_size(&self.swap_size)?;

        Ok(())
    }
}

/// RFC 1123 hostname: 1-63 chars, letters/digits/hyphens, no edge hyphen.
pub fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname.is_empty() {
        anyhow::bail!("Hostname is required");
    }
    if hostname.len() > 63 {
        anyhow::bail!("Hostname must be 63 characters or less");
    }
    let valid_chars = hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !valid_chars || hostname.starts_with('-') || hostname.ends_with('-') {
        anyhow::bail!(
            "Hostname must contain only letters, numbers, and hyphens, and cannot start/end with hyphen"
        );
    }
    Ok(())
}

/// POSIX-style login name, lowercase, not reserved by the system.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        anyhow::bail!("Username is required");
    }
    if username.len() > 32 {
        anyhow::bail!("Username must be 32 characters or less");
    }
    let starts_with_letter = username
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase());
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !starts_with_letter || !valid_chars {
        anyhow::bail!(
            "Username must start with a letter and contain only lowercase letters, numbers, underscore, or hyphen"
        );
    }
    if RESERVED_USERNAMES.contains(&username) {
        anyhow::bail!("Username \"{}\" is reserved by the system", username);
    }
    Ok(())
}

/// Size with a unit suffix, e.g. `8G`, `512M`.
pub fn validate_swap_size(size: &str) -> Result<()> {
    let Some(unit) = size.chars().last() else {
        anyhow::bail!("Swap size is required");
    };
    let digits = &size[..size.len() - unit.len_utf8()];
    if !matches!(unit, 'K' | 'M' | 'G' | 'T')
        || digits.is_empty()
        || !digits.chars().all(|c| c.is_ascii_digit())
    {
        anyhow::bail!("Swap size must look like 8G, 512M, or 1T (got \"{}\")", size);
    }
    Ok(())
}
