//! The per-run summary record.

use serde::{Deserialize, Serialize};
use stepwise_core::RunState;

/// One line of prompt telemetry, produced on every terminal transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Agent profile, `"default"` when none was configured
    pub profile: String,
    /// Terminal state of the run
    pub state: RunState,
    pub steps: u32,
    pub tool_calls: u32,
    pub elapsed_ms: u64,
    /// Characters in the applied system prompt
    pub system_chars: usize,
    /// Characters in the user prompt
    pub user_chars: usize,
    /// Error class, `"-"` when the run did not fail
    pub error_kind: String,
}

impl RunSummary {
    pub fn new(state: RunState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn with_profile(mut self, profile: Option<&str>) -> Self {
        self.profile = profile
            .filter(|p| !p.trim().is_empty())
            .unwrap_or("default")
            .to_string();
        self
    }

    pub fn with_error_kind(mut self, kind: Option<&str>) -> Self {
        self.error_kind = kind.unwrap_or("-").to_string();
        self
    }

    pub fn failed(&self) -> bool {
        self.error_kind != "-"
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            profile: "default".into(),
            state: RunState::Idle,
            steps: 0,
            tool_calls: 0,
            elapsed_ms: 0,
            system_chars: 0,
            user_chars: 0,
            error_kind: "-".into(),
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "profile={} state={} steps={} tool_calls={} elapsed_ms={} system_chars={} user_chars={} error={}",
            self.profile,
            self.state,
            self.steps,
            self.tool_calls,
            self.elapsed_ms,
            self.system_chars,
            self.user_chars,
            self.error_kind,
        )
    }
}
