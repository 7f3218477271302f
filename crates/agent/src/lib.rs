//! The Stepwise agent loop.
//!
//! The loop follows a **model → tools → model** cycle:
//!
//! 1. **Seed** the transcript (system prompt + prior history + user prompt)
//! 2. **Call the model** with the transcript and the allowed tool schemas
//! 3. **If tool calls**: run them one by one (asking for confirmation where
//!    a tool requires it), append results, loop back to step 2
//! 4. **If text response**: finish with that text
//!
//! The loop also stops on the step budget, the run deadline, cancellation
//! and model failures. Every stop produces a [`RunResult`].

pub mod confirmation;
pub mod event;
pub mod loop_runner;
pub mod result;
mod state;
mod stream;
mod transcript;

pub use confirmation::{AutonomyConfirmer, ConfirmationDecision, PendingConfirmation};
pub use event::{AgentEvent, AgentEventListener, EventBus, ListenerId};
pub use loop_runner::AgentRunner;
pub use result::RunResult;
