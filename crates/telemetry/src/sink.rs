//! Telemetry sinks.

use std::sync::RwLock;

use crate::RunSummary;

/// Receives one summary per finished run.
///
/// Implementations must not block for long; the runner calls `record` on
/// its own task right before returning the result.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, summary: &RunSummary);
}

/// Emits each summary as a structured `info!` event with target
/// `prompt_telemetry`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, summary: &RunSummary) {
        tracing::info!(
            target: "prompt_telemetry",
            profile = %summary.profile,
            state = %summary.state,
            steps = summary.steps,
            tool_calls = summary.tool_calls,
            elapsed_ms = summary.elapsed_ms,
            system_chars = summary.system_chars,
            user_chars = summary.user_chars,
            error = %summary.error_kind,
            "run finished"
        );
    }
}

/// Keeps every summary in memory, most recent last.
#[derive(Debug, Default)]
pub struct MemorySink {
    summaries: RwLock<Vec<RunSummary>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summaries(&self) -> Vec<RunSummary> {
        self.summaries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<RunSummary> {
        self.summaries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.summaries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, summary: &RunSummary) {
        self.summaries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(summary.clone());
    }
}
