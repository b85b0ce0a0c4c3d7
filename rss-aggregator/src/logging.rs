use crate::types::{AggregatorError, Result};
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::filter::FilterFn;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,sqlx=warn,html5ever=error";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber: stdout always, plus a daily rolling
/// `epistle.log` under `log_dir` when one is configured.
pub fn init(log_dir: Option<&Path>) -> Result<()> {
    // html5ever complains about every odd tag it serializes for the sanitizer
    let quiet_serializer = FilterFn::new(|metadata| {
        !(metadata.level() == &Level::WARN && metadata.target() == "html5ever::serialize")
    });

    let stdout_log = fmt::layer()
        .with_writer(io::stdout)
        .with_target(false)
        .with_filter(env_filter())
        .with_filter(quiet_serializer);

    let file_log = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = rolling::daily(dir, "epistle.log");
            Some(
                fmt::layer()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_filter(env_filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stdout_log)
        .with(file_log)
        .try_init()
        .map_err(|e| AggregatorError::Config(format!("failed to initialise logging: {}", e)))
}
