//! # Dispatch Configuration Validator
//!
//! Command-line tool for checking a dispatch configuration before the
//! service is started with it. Loads the same layers the service does
//! (defaults, TOML file, `DISPATCH__*` environment) and reports the result.

use clap::{Parser, Subcommand};
use dispatch_core::config::{ConfigLoader, DispatchConfig};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate dispatch configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (default: DISPATCH_CONFIG_PATH or config/dispatch.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Prefix for environment overrides
    #[arg(long, default_value = "DISPATCH")]
    env_prefix: String,

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

    /// Print the effective configuration
    Show {
        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },
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

    let result = load(&cli).and_then(|config| match &cli.command {
        Some(Commands::Show { format }) => show(&config, format),
        Some(Commands::Validate) | None => {
            summarize(&config);
            Ok(())
        }
    });

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<DispatchConfig> {
    let mut loader = ConfigLoader::new().with_env_prefix(&cli.env_prefix);
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;
    println!(
        "✅ Configuration valid (environment: {})",
        ConfigLoader::detect_environment()
    );
    Ok(config)
}

fn summarize(config: &DispatchConfig) {
    println!();
    println!(
        "  scheduling      buffer {}m, min lead {}s",
        config.scheduling.buffer_minutes, config.scheduling.min_lead_seconds
    );
    println!(
        "  post_acceptance {} ({}-{}m)",
        enabled(config.post_acceptance.enabled),
        config.post_acceptance.min_delay_minutes,
        config.post_acceptance.max_delay_minutes
    );
    println!(
        "  reconciliation  {} (every {}s, first after {}s, batch {})",
        enabled(config.reconciliation.enabled),
        config.reconciliation.interval_seconds,
        config.reconciliation.initial_delay_seconds,
        config.reconciliation.batch_size
    );
    println!(
        "  restore         {} (backlog {})",
        enabled(config.restore.enabled),
        config.restore.backlog_limit
    );
}

fn show(config: &DispatchConfig, format: &str) -> anyhow::Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(config)?),
        "table" => summarize(config),
        other => anyhow::bail!("unknown output format '{other}' (expected table or json)"),
    }
    Ok(())
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}
