//! Tests for Installation Orchestration
//!
//! These tests drive `Installer` through its public API:
//! - Simulated end-to-end runs against a sandbox mount root
//! - Live runs where each external tool is replaced by `true` or `false`
//! - Operation stream and log file consistency
//! - Cleanup idempotence and executor timeouts

use keystone_installer::command_executor::{CommandSpec, run_with_capture};
use keystone_installer::config::InstallerSettings;
use keystone_installer::config_file::InstallationConfig;
use keystone_installer::generator::TemplateDirGenerator;
use keystone_installer::installer::{InstallationResult, Installer};
use keystone_installer::operation_log::{Operation, OperationAction};
use keystone_installer::progress::Progress;
use keystone_installer::types::{ExecutionMode, Phase, SystemType};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// =============================================================================
// Fixtures
// =============================================================================

fn srv1() -> InstallationConfig {
    InstallationConfig {
        hostname: "srv1".to_string(),
        username: "alice".to_string(),
        password: "correct horse".to_string(),
        disk_device: "/dev/disk/by-id/x".to_string(),
        encrypted: false,
        system_type: SystemType::Server,
        swap_size: "8G".to_string(),
    }
}

fn write_template(dir: &Path) {
    let host = dir.join("hosts/@HOSTNAME@");
    fs::create_dir_all(&host).unwrap();
    fs::write(dir.join("flake.nix"), "{ nixosConfigurations.@HOSTNAME@ = { }; }").unwrap();
    fs::write(host.join("default.nix"), "{ networking.hostName = \"@HOSTNAME@\"; }").unwrap();
    fs::write(host.join("disko-standalone.nix"), "{ device = \"@DISK_DEVICE@\"; }").unwrap();
}

fn base_settings(dir: &Path, mode: ExecutionMode) -> InstallerSettings {
    InstallerSettings {
        mode,
        mount_root: dir.join("mnt"),
        scratch_dir: dir.join("scratch"),
        log_path: dir.join("logs/install.log"),
        simulated_step_delay_ms: 0,
        ..InstallerSettings::default()
    }
}

/// Executable standing in for `lsblk`, reporting an idle 512 GB disk.
fn fake_lsblk(dir: &Path) -> String {
    let path = dir.join("lsblk");
    let json = r#"{"blockdevices":[{"name":"x","size":549755813888,"type":"disk","fstype":null,"mountpoint":null}]}"#;
    fs::write(&path, format!("#!/bin/sh\ncat <<'EOF'\n{}\nEOF\n", json)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

/// Live settings with every tool stubbed to succeed and mount points in place.
fn stubbed_live_settings(dir: &Path) -> InstallerSettings {
    let mut settings = base_settings(dir, ExecutionMode::Live);
    settings.tools.lsblk = fake_lsblk(dir);
    for tool in [
        &mut settings.tools.disko,
        &mut settings.tools.nixos_install,
        &mut settings.tools.nixos_enter,
        &mut settings.tools.mount,
        &mut settings.tools.umount,
        &mut settings.tools.zpool,
        &mut settings.tools.chown,
    ] {
        *tool = "true".to_string();
    }
    fs::create_dir_all(settings.boot_mount()).unwrap();
    settings
}

fn installer(dir: &Path, settings: InstallerSettings) -> Installer {
    let template = dir.join("template");
    write_template(&template);
    Installer::new(settings, TemplateDirGenerator::new(template))
}

fn run(installer: &Installer, config: &InstallationConfig) -> (InstallationResult, Vec<Progress>, Vec<Operation>) {
    let mut progress = Vec::new();
    let mut operations = Vec::new();
    let result = installer.run_installation(
        config,
        |p| progress.push(p.clone()),
        |op| operations.push(op.clone()),
    );
    (result, progress, operations)
}

// =============================================================================
// Simulated Runs
// =============================================================================

#[test]
fn test_simulated_srv1_reaches_complete() {
    let dir = TempDir::new().unwrap();
    let installer = installer(dir.path(), base_settings(dir.path(), ExecutionMode::Simulated));

    let (result, progress, _) = run(&installer, &srv1());

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.phase, Phase::Complete);
    assert!(result.error.is_none());

    let installer_op = result
        .operations
        .iter()
        .find(|op| op.action == OperationAction::Execute && op.path.contains("nixos-install") && op.path.contains("srv1"));
    assert!(installer_op.is_some(), "no installer execute entry referencing srv1");

    let percentages: Vec<u8> = progress.iter().map(|p| p.percentage).collect();
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]), "{:?}", percentages);
    assert_eq!(percentages.last(), Some(&100));
}

#[test]
fn test_simulated_run_relocates_generated_configuration() {
    let dir = TempDir::new().unwrap();
    let installer = installer(dir.path(), base_settings(dir.path(), ExecutionMode::Simulated));

    let (result, _, _) = run(&installer, &srv1());
    assert!(result.success);

    let final_root = dir.path().join("mnt/home/alice/nixos-config");
    let disko = fs::read_to_string(final_root.join("hosts/srv1/disko-standalone.nix")).unwrap();
    assert_eq!(disko, "{ device = \"/dev/disk/by-id/x\"; }");
    assert!(dir.path().join("scratch/nixos-config/flake.nix").is_file());
}

#[test]
fn test_password_never_reaches_operation_log() {
    let dir = TempDir::new().unwrap();
    let installer = installer(dir.path(), base_settings(dir.path(), ExecutionMode::Simulated));

    let (result, _, _) = run(&installer, &srv1());
    assert!(result.success);

    let log = fs::read_to_string(dir.path().join("logs/install.log")).unwrap();
    assert!(!log.contains("correct horse"));
    assert!(log.contains("nixos-enter"));
}

// =============================================================================
// Operation Stream
// =============================================================================

#[test]
fn test_result_operations_match_callback_stream() {
    let dir = TempDir::new().unwrap();
    let installer = installer(dir.path(), base_settings(dir.path(), ExecutionMode::Simulated));

    let (result, _, streamed) = run(&installer, &srv1());

    assert!(!streamed.is_empty());
    assert_eq!(result.operations, streamed);
}

#[test]
fn test_log_file_has_one_entry_per_operation() {
    let dir = TempDir::new().unwrap();
    let installer = installer(dir.path(), base_settings(dir.path(), ExecutionMode::Simulated));

    let (result, _, _) = run(&installer, &srv1());

    let log = fs::read_to_string(dir.path().join("logs/install.log")).unwrap();
    let entries = log.lines().filter(|line| line.starts_with('[')).count();
    assert_eq!(entries, result.operations.len());
}

// =============================================================================
// Failure Classification
// =============================================================================

#[test]
fn test_failing_disko_stops_in_partitioning() {
    let dir = TempDir::new().unwrap();
    let mut settings = stubbed_live_settings(dir.path());
    settings.tools.disko = "false".to_string();
    let installer = installer(dir.path(), settings);

    let (result, _, _) = run(&installer, &srv1());

    assert!(!result.success);
    assert_eq!(result.phase, Phase::Partitioning);
    let error = result.error.unwrap();
    assert_eq!(error.retry_phase, Some(Phase::Partitioning));
    assert!(error.recoverable);
    assert!(!error.suggestion.is_empty());
    assert!(
        result.operations.iter().all(|op| !op.path.contains("nixos-install")),
        "installer must not run after a disk failure"
    );
}

#[test]
fn test_undersized_disk_stops_in_partitioning() {
    let dir = TempDir::new().unwrap();
    let mut settings = stubbed_live_settings(dir.path());
    let small = dir.path().join("small-lsblk");
    fs::write(
        &small,
        "#!/bin/sh\necho '{\"blockdevices\":[{\"name\":\"x\",\"size\":1073741824,\"type\":\"disk\"}]}'\n",
    )
    .unwrap();
    fs::set_permissions(&small, fs::Permissions::from_mode(0o755)).unwrap();
    settings.tools.lsblk = small.display().to_string();

    let (result, _, _) = run(&installer(dir.path(), settings), &srv1());

    assert_eq!(result.phase, Phase::Partitioning);
    let error = result.error.unwrap();
    assert!(error.message.starts_with("Disk must be at least 8GB"));
    assert_eq!(error.retry_phase, Some(Phase::Partitioning));
    assert!(result.operations.iter().all(|op| !op.path.contains("--mode disko")));
}

#[test]
fn test_password_failure_distinct_from_installer_failure() {
    let dir = TempDir::new().unwrap();
    let mut settings = stubbed_live_settings(dir.path());
    settings.tools.nixos_enter = "false".to_string();
    let (credential, _, _) = run(&installer(dir.path(), settings), &srv1());

    let other = TempDir::new().unwrap();
    let mut settings = stubbed_live_settings(other.path());
    settings.tools.nixos_install = "false".to_string();
    let (install, _, _) = run(&installer(other.path(), settings), &srv1());

    assert_eq!(credential.phase, Phase::NixosInstall);
    assert_eq!(install.phase, Phase::NixosInstall);
    let credential_msg = credential.error.unwrap().message;
    let install_msg = install.error.unwrap().message;
    assert!(credential_msg.starts_with("Failed to set user password"));
    assert!(install_msg.starts_with("nixos-install failed"));
    assert_ne!(credential_msg, install_msg);
}

#[test]
fn test_stubbed_live_run_completes() {
    let dir = TempDir::new().unwrap();
    let installer = installer(dir.path(), stubbed_live_settings(dir.path()));

    let (result, _, _) = run(&installer, &srv1());

    assert!(result.success, "{:?}", result.error);
    assert!(result.operations.iter().any(|op| op.path.starts_with("true -R 1000:100")));
}

#[test]
fn test_retry_phase_never_ahead_of_failure() {
    let cases: [(&str, fn(&mut InstallerSettings)); 3] = [
        ("disko", |s| s.tools.disko = "false".to_string()),
        ("install", |s| s.tools.nixos_install = "false".to_string()),
        ("chown", |s| s.tools.chown = "false".to_string()),
    ];
    for (name, break_tool) in cases {
        let dir = TempDir::new().unwrap();
        let mut settings = stubbed_live_settings(dir.path());
        break_tool(&mut settings);
        let (result, _, _) = run(&installer(dir.path(), settings), &srv1());

        let error = result.error.unwrap_or_else(|| panic!("{} should fail", name));
        let retry = error.retry_phase.unwrap();
        assert!(retry <= error.phase, "{}: retry {} after {}", name, retry, error.phase);
    }
}

// =============================================================================
// Resume
// =============================================================================

#[test]
fn test_resume_after_install_failure() {
    let dir = TempDir::new().unwrap();
    let mut settings = stubbed_live_settings(dir.path());
    settings.tools.nixos_install = "false".to_string();
    let (failed, _, _) = run(&installer(dir.path(), settings), &srv1());
    let retry = failed.error.unwrap().retry_phase.unwrap();

    let fixed = installer(dir.path(), stubbed_live_settings(dir.path()));
    let result = fixed.resume_installation(&srv1(), retry, false, |_| {}, |_| {});

    assert!(result.success, "{:?}", result.error);
    assert!(result.operations.iter().all(|op| !op.path.contains("disko")));
}

#[test]
fn test_resume_into_partitioning_needs_confirmation() {
    let dir = TempDir::new().unwrap();
    let installer = installer(dir.path(), stubbed_live_settings(dir.path()));

    let refused = installer.resume_installation(&srv1(), Phase::Partitioning, false, |_| {}, |_| {});
    assert!(!refused.success);
    assert!(refused.operations.is_empty());

    let confirmed = installer.resume_installation(&srv1(), Phase::Partitioning, true, |_| {}, |_| {});
    assert!(confirmed.success, "{:?}", confirmed.error);
}

// =============================================================================
// Cleanup and Executor
// =============================================================================

#[test]
fn test_cleanup_twice_never_fails() {
    let dir = TempDir::new().unwrap();
    let installer = installer(dir.path(), base_settings(dir.path(), ExecutionMode::Live));

    assert!(installer.cleanup(false).all_succeeded());
    assert!(installer.cleanup(false).all_succeeded());
}

#[test]
fn test_executor_timeout_is_bounded() {
    let start = Instant::now();
    let result = run_with_capture(&CommandSpec::new("sh", &["-c", "sleep 60"]), Duration::from_secs(1));

    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(!result.success);
    assert_eq!(result.exit_code, None);
    assert!(result.error.unwrap().contains("timed out"));
}
