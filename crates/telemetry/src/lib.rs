//! Run summaries and tracing setup for Stepwise.
//!
//! Every finished run produces one [`RunSummary`]. A [`TelemetrySink`]
//! receives it on a best-effort basis; the agent loop never lets a sink
//! influence the run outcome.

pub mod sink;
pub mod summary;

pub use sink::{MemorySink, TelemetrySink, TracingSink};
pub use summary::RunSummary;

/// Env var that switches prompt telemetry off when set to a false value.
pub const PROMPT_TELEMETRY_ENV: &str = "STEPWISE_PROMPT_TELEMETRY";

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Decide whether run summaries are emitted.
///
/// An explicit setting wins. Otherwise `STEPWISE_PROMPT_TELEMETRY` is read;
/// absent or blank means enabled.
pub fn prompt_telemetry_enabled(setting: Option<bool>) -> bool {
    prompt_telemetry_enabled_from(setting, |key| std::env::var(key).ok())
}

/// Same as [`prompt_telemetry_enabled`] with an injectable env lookup.
pub fn prompt_telemetry_enabled_from<F>(setting: Option<bool>, lookup: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(enabled) = setting {
        return enabled;
    }
    match lookup(PROMPT_TELEMETRY_ENV) {
        None => true,
        Some(raw) => {
            let raw = raw.trim().to_ascii_lowercase();
            !matches!(raw.as_str(), "0" | "false" | "no" | "off")
        }
    }
}

/// Install a global fmt subscriber. `RUST_LOG` wins; otherwise `info`,
/// or `debug` when verbose.
pub fn init_tracing(verbose: bool) -> Result<(), TelemetryError> {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))
}
