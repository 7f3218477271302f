//! # Stepwise Core
//!
//! Domain types, collaborator traits, and error definitions for the Stepwise
//! agent loop. This crate has **no runtime logic**; it defines the model the
//! orchestration loop and its collaborators agree on.
//!
//! ## Design Philosophy
//!
//! Every external collaborator of the loop (the model transport, the tools)
//! is a trait here. Implementations live elsewhere. This enables:
//! - Swapping model backends and tool sets without touching the loop
//! - Easy testing with scripted mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AutonomyLevel, RunState};
pub use error::{Error, ProviderError, ToolError, TranscriptError};
pub use message::{Message, MessageToolCall, Role, validate_transcript};
pub use provider::{
    ChunkReceiver, ModelProvider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition,
    Usage,
};
pub use tool::{Tool, ToolArguments, ToolCall, ToolRegistry, ToolResult, ToolResultKind};
