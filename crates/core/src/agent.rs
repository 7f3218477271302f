//! Agent run state and autonomy types.

use serde::{Deserialize, Serialize};

/// Lifecycle state of an orchestrator.
///
/// `Idle → Running ⇄ WaitingTool ⇄ WaitingConfirmation → Completed | Cancelled | Error → Idle`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RunState {
    #[default]
    Idle = 0,
    Running = 1,
    WaitingTool = 2,
    WaitingConfirmation = 3,
    Completed = 4,
    Cancelled = 5,
    Error = 6,
}

impl RunState {
    /// A run is in progress (model call, tool execution, or confirmation wait).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Running | Self::WaitingTool | Self::WaitingConfirmation
        )
    }

    /// The run has ended; the orchestrator returns to `Idle` right after.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::WaitingTool => "WAITING_TOOL",
            Self::WaitingConfirmation => "WAITING_CONFIRMATION",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Error => "ERROR",
        }
    }

    /// Inverse of `state as u8`; unknown values map to `Idle`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::WaitingTool,
            3 => Self::WaitingConfirmation,
            4 => Self::Completed,
            5 => Self::Cancelled,
            6 => Self::Error,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much freedom the agent has to act without a human.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Every confirmation-gated call is denied
    ReadOnly,
    /// Must ask permission for destructive actions (default)
    #[default]
    Supervised,
    /// Approve everything
    Full,
}
