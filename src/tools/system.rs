//! Typed invocations for system installation tools.
//!
//! # Security Model
//!
//! The primary user's password is NEVER placed in argv or in a shell string.
//! `SetPasswordArgs` hands `chpasswd` its `user:password` line on stdin, and
//! its `display()` shows only the non-secret part of the command.

use std::fmt;
use std::path::PathBuf;

use crate::tool_traits::ToolInvocation;

/// `nixos-install --root <root> --no-root-passwd --flake <flake>#<hostname>`
#[derive(Debug, Clone)]
pub struct NixosInstallArgs {
    pub program: String,
    pub root: PathBuf,
    pub flake_path: PathBuf,
    pub hostname: String,
}

impl NixosInstallArgs {
    /// Flake reference selecting the host's `nixosConfigurations` entry.
    pub fn flake_ref(&self) -> String {
        format!("{}#{}", self.flake_path.display(), self.hostname)
    }
}

impl ToolInvocation for NixosInstallArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--root".to_string(),
            self.root.display().to_string(),
            "--no-root-passwd".to_string(),
            "--flake".to_string(),
            self.flake_ref(),
        ]
    }
}

/// Set the primary account's password inside the installed system.
///
/// Runs `nixos-enter --root <root> -- chpasswd` and feeds
/// `<username>:<password>\n` on stdin.
#[derive(Clone)]
pub struct SetPasswordArgs {
    pub program: String,
    pub root: PathBuf,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SetPasswordArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetPasswordArgs")
            .field("program", &self.program)
            .field("root", &self.root)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ToolInvocation for SetPasswordArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--root".to_string(),
            self.root.display().to_string(),
            "--".to_string(),
            "chpasswd".to_string(),
        ]
    }

    fn stdin_payload(&self) -> Option<String> {
        Some(format!("{}:{}\n", self.username, self.password))
    }
}

/// `chown -R <owner> <path>`
#[derive(Debug, Clone)]
pub struct ChownArgs {
    pub program: String,
    pub owner: String,
    pub path: PathBuf,
}

impl ToolInvocation for ChownArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-R".to_string(),
            self.owner.clone(),
            self.path.display().to_string(),
        ]
    }
}
