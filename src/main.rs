//! keystone-install - headless entry point for the installation orchestrator.

use anyhow::{Context, Result};
use log::{debug, error, info};
use std::io::Write;
use std::path::{Path, PathBuf};

use keystone_installer::cli::{Cli, Commands, resolve_template_dir};
use keystone_installer::config::InstallerSettings;
use keystone_installer::config_file::InstallationConfig;
use keystone_installer::generator::TemplateDirGenerator;
use keystone_installer::repository::RepositoryGenerator;
use keystone_installer::installer::{InstallationResult, InstallationSummary, Installer};
use keystone_installer::operation_log::Operation;
use keystone_installer::process_guard::{self, ProcessGuard};
use keystone_installer::progress::Progress;
use keystone_installer::types::Phase;

/// Initialize the logger with appropriate settings
fn init_logger() {
    use env_logger::Builder;

    Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env() // RUST_LOG overrides
        .init();
}

struct InstallOptions {
    config: PathBuf,
    settings: Option<PathBuf>,
    template: Option<PathBuf>,
    repository: Option<String>,
    simulate: bool,
    log_file: Option<PathBuf>,
    json: bool,
    resume_from: Option<Phase>,
    confirm_destructive: bool,
}

fn main() {
    init_logger();
    info!("keystone-install starting up");

    if let Err(e) = process_guard::init_signal_handlers() {
        log::warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    let cli = Cli::parse_args();
    let outcome = match cli.command {
        Commands::Validate { config } => validate(&config),
        Commands::Phases => {
            print_phases();
            Ok(true)
        }
        Commands::Install {
            config,
            settings,
            template,
            repository,
            simulate,
            log_file,
            json,
            resume_from,
            confirm_destructive,
        } => install(InstallOptions {
            config,
            settings,
            template,
            repository,
            simulate,
            log_file,
            json,
            resume_from,
            confirm_destructive,
        }),
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            std::process::exit(1);
        }
    }
}

fn validate(path: &Path) -> Result<bool> {
    info!("Validating configuration file: {:?}", path);
    let config = InstallationConfig::load_from_file(path)?;
    match config.validate() {
        Ok(()) => {
            println!("✓ Configuration file is valid: {:?}", config);
            Ok(true)
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed: {:#}", e);
            Ok(false)
        }
    }
}

fn print_phases() {
    for phase in Phase::all() {
        let marker = if phase.is_destructive() { " (destructive)" } else { "" };
        println!("{:>2}  {:<18} {}{}", phase.order(), phase.to_string(), phase.description(), marker);
    }
}

fn install(opts: InstallOptions) -> Result<bool> {
    let config = InstallationConfig::load_from_file(&opts.config)?;

    let mut settings = match &opts.settings {
        Some(path) => InstallerSettings::load_from_file(path)
            .with_context(|| format!("Failed to load settings from {:?}", path))?,
        None => InstallerSettings::default(),
    };
    if opts.simulate {
        settings = settings.into_simulated();
    }
    if let Some(log_file) = opts.log_file {
        settings.log_path = log_file;
    }

    info!(
        "Installing {} onto {} ({} mode, log at {:?})",
        config.hostname,
        config.disk_device,
        settings.mode,
        settings.log_path
    );

    // Children must not outlive this function, whatever path it takes.
    let _guard = ProcessGuard::new();
    let installer = match opts.repository {
        Some(url) => {
            info!("Configuration comes from repository {}", url);
            let generator = RepositoryGenerator::new(url, &settings);
            Installer::new(settings, generator)
        }
        None => {
            let exe = std::env::current_exe().ok();
            let template = resolve_template_dir(opts.template, exe.as_deref());
            debug!("Using template directory {:?}", template);
            Installer::new(settings, TemplateDirGenerator::new(template))
        }
    };

    let json = opts.json;
    let on_progress = |p: &Progress| {
        if !json {
            println!("[{:>3}%] {}: {}", p.percentage, p.phase, p.current_operation);
        }
    };
    let on_operation = |op: &Operation| {
        debug!("{}", op.format_log_entry().trim_end());
    };

    let result = match opts.resume_from {
        Some(phase) => installer.resume_installation(&config, phase, opts.confirm_destructive, on_progress, on_operation),
        None => installer.run_installation(&config, on_progress, on_operation),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result).context("Failed to serialize result")?);
    } else {
        report(&config, &result, installer.settings());
    }
    Ok(result.success)
}

fn report(config: &InstallationConfig, result: &InstallationResult, settings: &InstallerSettings) {
    if result.success {
        let summary = InstallationSummary::new(config, &result.operations, settings);
        println!("\n✓ Installation complete");
        println!("  Host:        {} ({})", summary.hostname, summary.system_type);
        println!("  User:        {}", summary.username);
        println!("  Disk:        {}{}", summary.disk_device, if summary.encrypted { " (encrypted)" } else { "" });
        println!("  Files:       {} generated", summary.files_created);
        println!("  Config:      {}", summary.config_path.display());
        return;
    }

    eprintln!("\n✗ Installation failed in phase {}", result.phase);
    if let Some(err) = &result.error {
        eprintln!("  Error:       {}", err.message);
        if let Some(command) = &err.command {
            eprintln!("  Command:     {}", command);
        }
        eprintln!("  Suggestion:  {}", err.suggestion);
        if let Some(retry) = err.retry_phase {
            eprintln!("  Retry with:  --resume-from {}", retry);
        }
    }
    eprintln!("  Log:         {}", settings.log_path.display());
}
