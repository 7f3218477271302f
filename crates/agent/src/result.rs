//! The result descriptor returned by every finished run.

use serde::{Deserialize, Serialize};
use stepwise_core::{Message, Role, RunState};

/// Outcome of one run.
///
/// Produced on every terminal path, including cancellation, timeout and
/// provider failure. `transcript` is a copy taken at completion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Unique id of this run
    pub run_id: String,

    /// `Completed`, `Cancelled` or `Error`
    pub state: RunState,

    /// Text of the last assistant response, for successful runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_text: Option<String>,

    pub transcript: Vec<Message>,

    /// Model round-trips performed
    pub steps_executed: u32,

    /// Tools actually executed (synthetic results are not counted)
    pub tool_calls_executed: u32,

    pub elapsed_ms: u64,

    /// Explanation for non-successful or step-limited runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Error class for `Error` runs (`timeout`, `provider`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl RunResult {
    /// Completed with a final answer from the model.
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed && self.final_text.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == RunState::Cancelled
    }

    /// Tool-result messages in transcript order.
    pub fn tool_messages(&self) -> Vec<&Message> {
        self.transcript
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect()
    }
}
