//! Configuration from an existing flake repository.
//!
//! Instead of instantiating a template, the operator's own configuration is
//! cloned into the scratch area. The repository must contain
//! `hosts/<hostname>/default.nix` and `hosts/<hostname>/disko-standalone.nix`
//! for the configured hostname.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command_executor::{CommandExecutor, CommandResult};
use crate::config::InstallerSettings;
use crate::config_file::InstallationConfig;
use crate::error::{InstallerError, Result};
use crate::generator::{ConfigGenerator, GeneratedConfig, disko_config_path, prepare_root};
use crate::operation_log::{Operation, OperationAction, OperationLog};
use crate::tool_traits::ToolInvocation;
use crate::tools::repo::GitCloneArgs;

/// Clones a configuration repository and selects the configured host.
#[derive(Debug, Clone)]
pub struct RepositoryGenerator {
    url: String,
    git: String,
    executor: CommandExecutor,
    timeout: Duration,
}

impl RepositoryGenerator {
    pub fn new(url: impl Into<String>, settings: &InstallerSettings) -> Self {
        Self {
            url: url.into(),
            git: settings.tools.git.clone(),
            executor: CommandExecutor::new(settings.mode),
            timeout: settings.timeouts.git_clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ConfigGenerator for RepositoryGenerator {
    fn generate(
        &self,
        config: &InstallationConfig,
        base_dir: &Path,
        log: &mut OperationLog<'_>,
    ) -> Result<GeneratedConfig> {
        validate_git_url(&self.url).map_err(InstallerError::validation)?;
        let root = prepare_root(base_dir, log)?;

        let args = GitCloneArgs {
            program: self.git.clone(),
            url: self.url.clone(),
            dest: root.clone(),
        };
        let display = args.display();
        let purpose = format!("Clone repository from {}", self.url);
        let result = self.executor.run_tool(&args, self.timeout);

        if result.simulated {
            log.record(Operation::succeeded(
                OperationAction::Execute,
                display,
                format!("[SIMULATED] {}", purpose),
            ));
            write_placeholder_host(&root, &config.hostname, log)?;
        } else if result.success {
            log.record(Operation::succeeded(OperationAction::Execute, display, purpose).with_output(&result.output));
        } else {
            let message = clone_error_message(&result);
            log.record(
                Operation::failed(OperationAction::Execute, display, purpose, message.clone())
                    .with_output(&result.output),
            );
            return Err(InstallerError::generation(message));
        }

        let hosts = scan_for_hosts(&root);
        if !hosts.iter().any(|h| *h == config.hostname) {
            let available = if hosts.is_empty() {
                "none".to_string()
            } else {
                hosts.join(", ")
            };
            return Err(InstallerError::generation(format!(
                "Host {} not found in repository (available: {})",
                config.hostname, available
            )));
        }

        let disko_config = disko_config_path(&root, &config.hostname);
        if !disko_config.is_file() {
            return Err(InstallerError::generation(format!(
                "Repository has no disk description at {}",
                disko_config.display()
            )));
        }

        Ok(GeneratedConfig {
            root,
            disko_config,
            files: Vec::new(),
        })
    }
}

/// Accept `https://host/path` and `git@host:path` only.
pub fn validate_git_url(url: &str) -> std::result::Result<(), String> {
    if url.is_empty() {
        return Err("Repository URL is required".to_string());
    }

    let host_ok = |host: &str| !host.is_empty() && host.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'));
    let path_ok = |path: &str| {
        !path.is_empty() && path.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-'))
    };

    let valid = if let Some(rest) = url.strip_prefix("https://") {
        rest.split_once('/')
            .is_some_and(|(host, path)| host_ok(host) && path_ok(path))
    } else if let Some(rest) = url.strip_prefix("git@") {
        rest.split_once(':')
            .is_some_and(|(host, path)| host_ok(host) && path_ok(path))
    } else {
        false
    };

    if valid {
        Ok(())
    } else {
        Err("URL must be HTTPS (https://...) or SSH (git@...) format".to_string())
    }
}

/// Hosts defined in a flake tree: `hosts/<name>/default.nix`, sorted.
pub fn scan_for_hosts(root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root.join("hosts")) else {
        return Vec::new();
    };
    let mut hosts: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().join("default.nix").is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    hosts.sort();
    hosts
}

/// Operator-facing reason for a failed clone.
fn clone_error_message(result: &CommandResult) -> String {
    let detail = format!("{}\n{}", result.error_message(), result.output);
    if detail.contains("Permission denied") {
        "SSH key authentication failed. Check your SSH keys or use HTTPS URL.".to_string()
    } else if detail.contains("not found") {
        "Repository not found. Check the URL and your access permissions.".to_string()
    } else if detail.contains("timed out") {
        "Clone timed out. Check your network connection and try again.".to_string()
    } else {
        format!("git clone failed: {}", result.error_message())
    }
}

/// Stand-in host so a simulated run can continue past generation.
fn write_placeholder_host(root: &Path, hostname: &str, log: &mut OperationLog<'_>) -> Result<()> {
    let host_dir: PathBuf = root.join("hosts").join(hostname);
    fs::create_dir_all(&host_dir)?;
    for name in ["default.nix", "disko-standalone.nix"] {
        let path = host_dir.join(name);
        fs::write(&path, "{ }\n")?;
        log.record(Operation::succeeded(
            OperationAction::Create,
            path.display().to_string(),
            "[SIMULATED] Placeholder for cloned host",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionMode, SystemType};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn config() -> InstallationConfig {
        InstallationConfig {
            hostname: "srv1".to_string(),
            username: "alice".to_string(),
            password: "pw".to_string(),
            disk_device: "/dev/sda".to_string(),
            encrypted: false,
            system_type: SystemType::Server,
            swap_size: "8G".to_string(),
        }
    }

    /// Executable standing in for `git`; `body` runs with the clone
    /// destination in `$dest`.
    fn fake_git(dir: &Path, body: &str) -> String {
        let path = dir.join("git");
        // argv: clone --depth 1 -- <url> <dest>
        fs::write(&path, format!("#!/bin/sh\ndest=\"$6\"\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn settings(dir: &Path, mode: ExecutionMode) -> InstallerSettings {
        InstallerSettings {
            mode,
            log_path: dir.join("install.log"),
            ..InstallerSettings::default()
        }
    }

    #[test]
    fn test_git_url_validation() {
        assert!(validate_git_url("https://github.com/acme/infra").is_ok());
        assert!(validate_git_url("https://git.example.org/team/nix-config.git").is_ok());
        assert!(validate_git_url("git@github.com:acme/infra.git").is_ok());

        assert_eq!(validate_git_url("").unwrap_err(), "Repository URL is required");
        assert!(validate_git_url("http://github.com/acme/infra").is_err());
        assert!(validate_git_url("https://github.com").is_err());
        assert!(validate_git_url("https://github.com/acme/infra;rm -rf /").is_err());
        assert!(validate_git_url("--upload-pack=evil").is_err());
    }

    #[test]
    fn test_scan_for_hosts_requires_default_nix() {
        let dir = TempDir::new().unwrap();
        for host in ["srv1", "laptop"] {
            fs::create_dir_all(dir.path().join("hosts").join(host)).unwrap();
            fs::write(dir.path().join("hosts").join(host).join("default.nix"), "{ }").unwrap();
        }
        fs::create_dir_all(dir.path().join("hosts/incomplete")).unwrap();

        assert_eq!(scan_for_hosts(dir.path()), vec!["laptop", "srv1"]);
        assert!(scan_for_hosts(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn test_clone_selects_configured_host() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(dir.path(), ExecutionMode::Live);
        settings.tools.git = fake_git(
            dir.path(),
            "mkdir -p \"$dest/hosts/srv1\"\necho '{ }' > \"$dest/hosts/srv1/default.nix\"\necho '{ }' > \"$dest/hosts/srv1/disko-standalone.nix\"",
        );
        let generator = RepositoryGenerator::new("https://github.com/acme/infra", &settings);
        let mut log = OperationLog::detached(&settings.log_path);

        let generated = generator.generate(&config(), &dir.path().join("scratch"), &mut log).unwrap();

        assert_eq!(generated.root, dir.path().join("scratch/nixos-config"));
        assert!(generated.disko_config.ends_with("hosts/srv1/disko-standalone.nix"));
        let clone = log.operations().last().unwrap();
        assert!(clone.success);
        assert_eq!(clone.purpose, "Clone repository from https://github.com/acme/infra");
    }

    #[test]
    fn test_missing_host_lists_available() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(dir.path(), ExecutionMode::Live);
        settings.tools.git = fake_git(
            dir.path(),
            "mkdir -p \"$dest/hosts/other\"\necho '{ }' > \"$dest/hosts/other/default.nix\"",
        );
        let generator = RepositoryGenerator::new("git@github.com:acme/infra.git", &settings);
        let mut log = OperationLog::detached(&settings.log_path);

        let err = generator.generate(&config(), dir.path(), &mut log).unwrap_err();
        assert!(err.to_string().contains("Host srv1 not found in repository (available: other)"));
    }

    #[test]
    fn test_auth_failure_is_explained() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(dir.path(), ExecutionMode::Live);
        settings.tools.git = fake_git(dir.path(), "echo 'git@github.com: Permission denied (publickey).' >&2\nexit 128");
        let generator = RepositoryGenerator::new("git@github.com:acme/infra.git", &settings);
        let mut log = OperationLog::detached(&settings.log_path);

        let err = generator.generate(&config(), dir.path(), &mut log).unwrap_err();
        assert!(err.to_string().contains("SSH key authentication failed"));
        let clone = log.operations().last().unwrap();
        assert!(!clone.success);
        assert!(clone.output.as_deref().unwrap_or_default().contains("publickey"));
    }

    #[test]
    fn test_invalid_url_rejected_before_clone() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path(), ExecutionMode::Live);
        let generator = RepositoryGenerator::new("ftp://example.org/x", &settings);
        let mut log = OperationLog::detached(&settings.log_path);

        let err = generator.generate(&config(), dir.path(), &mut log).unwrap_err();
        assert!(matches!(err, InstallerError::Validation(_)));
        assert!(log.operations().is_empty());
    }

    #[test]
    fn test_simulated_clone_writes_placeholder_host() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path(), ExecutionMode::Simulated);
        let generator = RepositoryGenerator::new("https://github.com/acme/infra", &settings);
        let mut log = OperationLog::detached(&settings.log_path);

        let generated = generator.generate(&config(), dir.path(), &mut log).unwrap();

        assert!(generated.disko_config.is_file());
        assert!(log.operations()[0].purpose.starts_with("[SIMULATED] Clone repository"));
    }
}
