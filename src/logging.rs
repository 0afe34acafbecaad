//! Tracing-subscriber initialization, grounded on the `init_tracing` helper
//! used across the control-plane services, extended with a JSON format
//! option for deployments that ship logs to a collector.

use crate::config::LogFormat;

/// Initializes the global tracing subscriber from `format` and `level`.
pub fn init_tracing(format: LogFormat, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
    }
}
