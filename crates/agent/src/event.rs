//! Events emitted by the agent loop and the listener plumbing around them.
//!
//! Listeners are called synchronously on the loop's task, in emission order.
//! A panicking listener is logged and skipped; it never reaches the loop or
//! the other listeners. Consumers that need to do slow work should subscribe
//! through an [`EventBus`] instead.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use stepwise_core::{MessageToolCall, ToolArguments, ToolResult};
use tokio::sync::broadcast;
use tracing::warn;

use crate::confirmation::PendingConfirmation;
use crate::result::RunResult;

/// Everything the loop reports while it runs.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A run began.
    Started {
        prompt: String,
        max_steps: u32,
        profile: Option<String>,
    },

    /// A new model round-trip is about to start.
    StepStarted {
        step: u32,
        max_steps: u32,
        description: String,
    },

    /// The model requested a tool that exists and is allowed.
    ToolCallRequested {
        step: u32,
        call: MessageToolCall,
        arguments: ToolArguments,
        requires_confirmation: bool,
    },

    /// A tool result (real or synthetic) was appended to the transcript.
    ToolResultReady {
        step: u32,
        call_id: String,
        tool_name: String,
        result: ToolResult,
        duration_ms: u64,
    },

    /// Streaming text. The final chunk of a step has `complete = true`.
    StreamChunk {
        step: u32,
        delta: String,
        complete: bool,
        finish_reason: Option<String>,
    },

    /// The loop is suspended until this confirmation is resolved.
    ConfirmationRequested(PendingConfirmation),

    /// The run reached a terminal state.
    Completed(Box<RunResult>),
}

impl AgentEvent {
    /// Stable name of the event kind.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::StepStarted { .. } => "step_started",
            Self::ToolCallRequested { .. } => "tool_call_requested",
            Self::ToolResultReady { .. } => "tool_result_ready",
            Self::StreamChunk { .. } => "stream_chunk",
            Self::ConfirmationRequested(_) => "confirmation_requested",
            Self::Completed(_) => "completed",
        }
    }

    /// Step the event belongs to, if any.
    pub fn step(&self) -> Option<u32> {
        match self {
            Self::StepStarted { step, .. }
            | Self::ToolCallRequested { step, .. }
            | Self::ToolResultReady { step, .. }
            | Self::StreamChunk { step, .. } => Some(*step),
            Self::ConfirmationRequested(pending) => Some(pending.step),
            Self::Started { .. } | Self::Completed(_) => None,
        }
    }
}

/// Receives agent events.
pub trait AgentEventListener: Send + Sync {
    fn on_event(&self, event: &AgentEvent);
}

impl<F> AgentEventListener for F
where
    F: Fn(&AgentEvent) + Send + Sync,
{
    fn on_event(&self, event: &AgentEvent) {
        self(event)
    }
}

/// Handle returned by `add_listener`, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Thread-safe listener list with per-listener fault isolation.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: RwLock<Vec<(ListenerId, Arc<dyn AgentEventListener>)>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Arc<dyn AgentEventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() < before
    }

    pub(crate) fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Deliver to every listener registered at the time of the call.
    pub(crate) fn emit(&self, event: &AgentEvent) {
        let snapshot: Vec<Arc<dyn AgentEventListener>> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                warn!(event = event.event_type(), "Event listener panicked");
            }
        }
    }
}

/// Fans agent events out to async subscribers over a broadcast channel.
///
/// Register it with `AgentRunner::add_listener`; lagging subscribers lose
/// the oldest events instead of slowing the loop.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl AgentEventListener for EventBus {
    fn on_event(&self, event: &AgentEvent) {
        self.publish(event.clone());
    }
}
