//! Confirmation handshake for tools that need human approval.
//!
//! When the loop reaches such a tool it publishes a [`PendingConfirmation`]
//! and awaits its one-shot resolver. The first `resolve` wins; later calls
//! return `false`. Cancelling the run resolves it with a cancellation.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use stepwise_core::{AutonomyLevel, MessageToolCall, ToolArguments};
use tokio::sync::oneshot;
use tracing::debug;

use crate::event::{AgentEvent, AgentEventListener};

/// A decision taken by the user (or a policy) on a pending confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationDecision {
    /// Run the tool
    Confirmed,
    /// Don't run it, but tell the model the skip was intentional
    Skipped,
    /// Don't run it and report a failure
    Denied,
}

/// What the loop receives from the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Decided(ConfirmationDecision),
    Cancelled,
}

type Resolver = Arc<Mutex<Option<oneshot::Sender<Resolution>>>>;

/// A tool call waiting for approval.
#[derive(Clone)]
pub struct PendingConfirmation {
    pub step: u32,
    pub call: MessageToolCall,
    /// Description of the tool, for display
    pub tool_description: String,
    pub arguments: ToolArguments,
    pub destructive: bool,
    resolver: Resolver,
}

impl PendingConfirmation {
    pub(crate) fn new(
        step: u32,
        call: MessageToolCall,
        tool_description: impl Into<String>,
        arguments: ToolArguments,
        destructive: bool,
    ) -> (Self, oneshot::Receiver<Resolution>) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            step,
            call,
            tool_description: tool_description.into(),
            arguments,
            destructive,
            resolver: Arc::new(Mutex::new(Some(tx))),
        };
        (pending, rx)
    }

    pub fn tool_name(&self) -> &str {
        &self.call.name
    }

    /// Resolve with a decision. Returns false if already resolved.
    pub fn resolve(&self, decision: ConfirmationDecision) -> bool {
        self.send(Resolution::Decided(decision))
    }

    pub fn is_resolved(&self) -> bool {
        self.resolver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    pub(crate) fn cancel(&self) -> bool {
        self.send(Resolution::Cancelled)
    }

    fn send(&self, resolution: Resolution) -> bool {
        let sender = self
            .resolver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match sender {
            // The loop may have stopped waiting (timeout); the slot is still consumed
            Some(tx) => {
                let _ = tx.send(resolution);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for PendingConfirmation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingConfirmation")
            .field("step", &self.step)
            .field("tool", &self.call.name)
            .field("call_id", &self.call.id)
            .field("destructive", &self.destructive)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Resolves confirmations from an [`AutonomyLevel`] without a human.
///
/// - `Full` confirms everything.
/// - `ReadOnly` denies everything.
/// - `Supervised` confirms non-destructive tools and leaves destructive ones
///   pending for another listener (typically a UI) to decide.
#[derive(Debug, Clone, Copy)]
pub struct AutonomyConfirmer {
    level: AutonomyLevel,
}

impl AutonomyConfirmer {
    pub fn new(level: AutonomyLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> AutonomyLevel {
        self.level
    }

    /// The decision this policy takes for a call, `None` to defer.
    pub fn decide(&self, pending: &PendingConfirmation) -> Option<ConfirmationDecision> {
        match self.level {
            AutonomyLevel::Full => Some(ConfirmationDecision::Confirmed),
            AutonomyLevel::ReadOnly => Some(ConfirmationDecision::Denied),
            AutonomyLevel::Supervised if pending.destructive => None,
            AutonomyLevel::Supervised => Some(ConfirmationDecision::Confirmed),
        }
    }
}

impl AgentEventListener for AutonomyConfirmer {
    fn on_event(&self, event: &AgentEvent) {
        let AgentEvent::ConfirmationRequested(pending) = event else {
            return;
        };
        match self.decide(pending) {
            Some(decision) => {
                debug!(tool = %pending.tool_name(), ?decision, level = ?self.level, "Auto-resolving confirmation");
                pending.resolve(decision);
            }
            None => debug!(tool = %pending.tool_name(), "Leaving destructive call for manual confirmation"),
        }
    }
}
