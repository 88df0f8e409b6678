//! Logging setup
//!
//! Structured logs go to stderr through `tracing-subscriber`. `RUST_LOG`
//! overrides the default level per target.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogFormat;

/// Install the global subscriber; call once, before anything logs
pub fn init_logging(debug: bool, format: LogFormat) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}
