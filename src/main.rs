//! ApprovalFlow - human-in-the-loop approval workflow engine
//!
//! Main entry point for the ApprovalFlow CLI.

mod app;
mod cli;

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use approvalflow_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};
use approvalflow_core::validation::validate_with_directory;
use approvalflow_store::StaticUserDirectory;

use cli::{Cli, Commands};

/// Initialize tracing with console and daily-rolling file output.
fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = PathBuf::from(ConfigLoader::expand_path(&logging.directory.to_string_lossy()));
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("approvalflow")
        .filename_suffix("log")
        .max_log_files(30)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes the file writer when dropped.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

/// Directory that relative definition paths resolve against.
fn base_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let found = cli.config.exists();
    let config = if found {
        ConfigLoader::load(&cli.config)?
    } else {
        Config::default()
    };

    init_tracing(&config.logging)?;
    if !found {
        warn!("Config file {} not found, using defaults", cli.config.display());
    }
    let base_dir = base_dir(&cli.config);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => app::run(config, &base_dir).await?,
        Commands::Validate => validate(&config, &base_dir).await?,
        Commands::Status { instance_id } => app::status(config, &base_dir, instance_id).await?,
    }
    Ok(())
}

/// Validate configuration and definitions, printing every finding.
async fn validate(config: &Config, base_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let result = ConfigValidator::validate(config)?;
    let mut errors = result.errors.len();

    for error in &result.errors {
        println!("error: {}: {}", error.path, error.message);
    }
    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }

    let definitions = ConfigLoader::load_definitions(config, base_dir)?;
    let directory = StaticUserDirectory::from_config(&config.users);
    for definition in &definitions {
        match validate_with_directory(definition, &directory).await {
            Ok(report) => {
                for warning in &report.warnings {
                    println!("warning: {}", warning);
                }
            }
            Err(e) => {
                println!("error: {}", e);
                errors += 1;
            }
        }
    }

    info!("Validated {} workflow definitions", definitions.len());
    if errors > 0 {
        return Err(format!("{} validation errors", errors).into());
    }
    println!("ok: {} workflows", definitions.len());
    Ok(())
}
