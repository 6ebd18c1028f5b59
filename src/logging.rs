use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::path::Path;
use std::str::FromStr;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Initialize logging system based on configuration.
///
/// The returned guard flushes the file writer on drop and must be held
/// for the lifetime of the process.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let mut guard = None;

    let file_layer = match &config.file {
        Some(log_file) => {
            let (writer, file_guard) = file_writer(log_file, config.rotation)?;
            guard = Some(file_guard);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(ChronoUtc::rfc_3339());
            Some(if config.json {
                layer.json().with_filter(build_filter(config)).boxed()
            } else {
                layer.with_filter(build_filter(config)).boxed()
            })
        }
        None => None,
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());

    // With a log file, JSON goes to the file only and the console stays readable
    let console_layer = if config.json && config.file.is_none() {
        console_layer.json().with_filter(build_filter(config)).boxed()
    } else {
        console_layer.with_filter(build_filter(config)).boxed()
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(guard)
}

/// `RUST_LOG` wins over the configured level; unknown levels fall back to info
fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::from_str(&config.level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

fn file_writer(log_file: &str, rotation: bool) -> Result<(NonBlocking, WorkerGuard)> {
    let path = Path::new(log_file);
    if rotation {
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("ssp.log");
        let appender = tracing_appender::rolling::daily(directory, file_name);
        return Ok(tracing_appender::non_blocking(appender));
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", log_file))?;
    Ok(tracing_appender::non_blocking(file))
}
