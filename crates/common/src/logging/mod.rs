//! Logging subsystem.

pub mod types;

#[cfg(test)]
mod tests;

pub use types::{FileLoggingConfig, LoggerConfig, StdoutConfig};

// Re-export tracing-appender types for convenience
pub use tracing_appender::rolling::Rotation;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Initializes the logging subsystem with the provided config.
pub fn init(config: LoggerConfig) {
    let filter = tracing_subscriber::EnvFilter::from_default_env();

    // Configure stdout logging with JSON or compact format
    let stdout_layer = if config.stdout_config.json_format {
        tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(config.stdout_config.fmt_span.clone())
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_span_events(config.stdout_config.fmt_span.clone())
            .with_filter(filter)
            .boxed()
    };

    // Build optional file logging layer
    let file_layer = config.file_logging_config.as_ref().map(|file_config| {
        let file_appender = tracing_appender::rolling::RollingFileAppender::new(
            file_config.rotation.clone(),
            &file_config.directory,
            &file_config.file_name_prefix,
        );

        let filter = tracing_subscriber::EnvFilter::from_default_env();
        if file_config.json_format {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_ansi(false) // No color codes in files
                .with_filter(filter)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(file_appender)
                .with_ansi(false) // No color codes in files
                .with_filter(filter)
                .boxed()
        }
    });

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!(
        service_name = %config.service_name,
        "logging initialized"
    );
}

/// Formats a service name with an optional label suffix.
pub fn format_service_name(base: &str, label: Option<&str>) -> String {
    match label {
        Some(label) => format!("{base}%{label}"),
        None => base.to_owned(),
    }
}
