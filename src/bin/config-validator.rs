//! # Batched Migrations Configuration Validator
//!
//! Loads the layered configuration exactly as the engine does and reports
//! whether it is valid. Run it in CI or before a deploy.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use batched_migrations::config::{ConfigManager, MigrationsConfig};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate batched migration configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment whose override file is layered on top (development, test, production)
    #[arg(short, long, env = "BBM_ENV", default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration
    Validate,

    /// Print the resolved configuration as JSON
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::Show) => show_config(&cli),
        Some(Commands::Validate) | None => validate_config(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<MigrationsConfig, Box<dyn std::error::Error>> {
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)?;
    Ok(manager.config().clone())
}

fn validate_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating batched migration configuration");
    println!("Environment: {}", cli.environment);
    if let Some(config_dir) = &cli.config_dir {
        println!("Config Directory: {}", config_dir.display());
    }
    println!();

    let config = match load(cli) {
        Ok(config) => config,
        Err(e) => {
            println!("FAILED: {e}");
            return Err(e);
        }
    };

    println!("database:");
    println!(
        "  url: {}",
        if config.database.database_url().is_ok() { "set" } else { "missing" }
    );
    println!("  max_connections: {}", config.database.max_connections);
    println!("engine:");
    println!("  minimum_interval_seconds: {}", config.engine.minimum_interval_seconds);
    println!("  default_batch_size: {}", config.engine.default_batch_size);
    println!("  default_sub_batch_size: {}", config.engine.default_sub_batch_size);
    println!("  max_batch_attempts: {}", config.engine.max_batch_attempts);
    println!("  strict_mode: {}", config.engine.strict_mode);
    println!("backoff:");
    println!("  backoff_multiplier: {}", config.backoff.backoff_multiplier);
    println!("  max_backoff_seconds: {}", config.backoff.max_backoff_seconds);

    println!("\nConfiguration is valid");
    Ok(())
}

fn show_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(cli)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
