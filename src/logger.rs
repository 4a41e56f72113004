use std::env;

use tracing_subscriber::EnvFilter;

/// Diagnostics go to stderr through tracing; the report itself is
/// plain stdout. RUST_LOG wins over LOG_LEVEL, default info.
pub fn init_logging() {
    let level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let filter = match env::var("RUST_LOG") {
        Ok(rust_log) => EnvFilter::new(rust_log),
        Err(_) => EnvFilter::new(level.to_lowercase()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
