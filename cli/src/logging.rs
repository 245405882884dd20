// Logging module, powered by tracing-subscriber
//
// The link library logs through the `log` facade; `tracing_log::LogTracer`
// routes those records into the same subscriber as the CLI's own events.
// Everything goes to stderr so stdout only carries rendered output.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::{CLIError, Result};

/// Log format type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Compact text format: timestamp LEVEL target - message
    #[default]
    Compact,
    /// JSON Lines format for structured logging
    Json,
}

/// Build the `EnvFilter`: `RUST_LOG` when set, otherwise `level`, with
/// transport crates held at `warn`.
fn build_env_filter(level: &str, rust_log: Option<&str>) -> Result<EnvFilter> {
    let base = rust_log
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(level);
    let mut directives = vec![base.to_string()];

    let noisy: &[(&str, &str)] = &[
        ("tungstenite", "warn"),
        ("tokio_tungstenite", "warn"),
        ("hyper", "warn"),
        ("hyper_util", "warn"),
        ("reqwest", "warn"),
        ("rustls", "warn"),
    ];
    for (target, lvl) in noisy {
        if !base.contains(target) {
            directives.push(format!("{}={}", target, lvl));
        }
    }

    let filter_str = directives.join(",");
    EnvFilter::try_new(&filter_str).map_err(|e| {
        CLIError::ConfigurationError(format!("Invalid log filter '{}': {}", filter_str, e))
    })
}

/// Install the global subscriber.
///
/// `verbose` lowers the default level from `info` to `debug`; an explicit
/// `RUST_LOG` always wins.
pub fn init_logging(verbose: bool, format: LogFormat) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_env_filter(level, rust_log.as_deref())?;

    let layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| CLIError::ConfigurationError(format!("Failed to init logging: {}", e)))?;

    // Bridge `log` records into tracing (detector-link logs through `log`)
    tracing_log::LogTracer::init().ok(); // ok() in case already initialized

    tracing::trace!("Logging initialized: level={}, format={:?}", level, format);
    Ok(())
}
