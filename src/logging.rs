//! # Structured Logging Module
//!
//! Environment-aware structured logging. Console output always; JSON lines to
//! a per-process file when enabled, for following a single order through the
//! timer, courier and reconciliation paths.

use crate::config::LoggingConfig;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Initialize structured logging once per process
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = config
            .level
            .clone()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .unwrap_or_else(|| get_log_level(&environment).to_string());

        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(log_level.clone()));

        let mut guard = None;
        let mut log_path = None;
        let file_layer = if config.json_file {
            let log_dir = PathBuf::from(&config.directory);
            match fs::create_dir_all(&log_dir) {
                Ok(()) => {
                    let pid = process::id();
                    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
                    let filename = format!("{environment}.{pid}.{timestamp}.log");
                    log_path = Some(log_dir.join(&filename));

                    let appender = tracing_appender::rolling::never(&log_dir, filename);
                    let (writer, worker_guard) = tracing_appender::non_blocking(appender);
                    guard = Some(worker_guard);
                    Some(
                        fmt::layer()
                            .with_writer(writer)
                            .with_target(true)
                            .with_thread_ids(true)
                            .with_ansi(false)
                            .json()
                            .with_filter(EnvFilter::new(log_level.clone())),
                    )
                }
                Err(e) => {
                    eprintln!("Failed to create log directory {}: {e}", log_dir.display());
                    None
                }
            }
        } else {
            None
        };

        let subscriber = tracing_subscriber::registry().with(console).with(file_layer);

        // Embedding applications may already own the global subscriber
        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            level = %log_level,
            log_file = log_path.as_ref().map(|p| p.display().to_string()),
            "Structured logging initialized"
        );

        guard
    });
}

fn get_environment() -> String {
    std::env::var("DISPATCH_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init_structured_logging(&config);
        init_structured_logging(&config);
        assert!(LOGGER_INITIALIZED.get().is_some());
    }
}
