//! Structured logging setup for the KMS services

use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize JSON logging (for production)
///
/// Level filtering comes from `RUST_LOG`, falling back to `default_level`.
/// Returns an error if a global subscriber is already installed.
pub fn try_init_logging(service_name: &str, default_level: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_current_span(false)
                .with_span_list(false),
        )
        .try_init()?;

    tracing::info!(service = service_name, "Logging initialized");
    Ok(())
}

/// Initialize human-readable console logging (for development)
pub fn try_init_console_logging(
    service_name: &str,
    default_level: &str,
) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(fmt::layer().with_target(true).with_line_number(true))
        .try_init()?;

    tracing::info!(service = service_name, "Console logging initialized");
    Ok(())
}

/// Initialize logging in the requested format, ignoring a subscriber that is
/// already installed (tests and embedded use install their own).
pub fn init_logging(service_name: &str, default_level: &str, json: bool) {
    let result = if json {
        try_init_logging(service_name, default_level)
    } else {
        try_init_console_logging(service_name, default_level)
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Global subscriber already set, keeping it");
    }
}
