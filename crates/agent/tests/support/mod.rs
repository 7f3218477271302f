//! Scripted providers, tools and listeners shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use stepwise_agent::{AgentEvent, AgentEventListener};
use stepwise_core::{
    ChunkReceiver, Message, MessageToolCall, ModelProvider, ProviderError, ProviderRequest,
    ProviderResponse, StreamChunk, Tool, ToolArguments, ToolError, ToolResult,
};
use tokio::sync::mpsc;

// ── Providers ────────────────────────────────────────────────────────────

/// Returns queued responses in order and records every request.
///
/// Running out of responses is reported as a provider error.
pub struct ScriptedProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn tool_then_text(calls: Vec<MessageToolCall>, answer: &str) -> Self {
        Self::new(vec![tool_response(calls), text_response(answer)])
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };
        self.responses
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .ok_or_else(|| ProviderError::NotConfigured(format!("script exhausted at call #{index}")))
    }
}

/// Asks for one `echo` call on every turn, forever.
#[derive(Default)]
pub struct AlwaysToolProvider {
    calls: AtomicUsize,
}

impl AlwaysToolProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for AlwaysToolProvider {
    fn name(&self) -> &str {
        "always_tool"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(tool_response(vec![tool_call(
            &format!("call_{n}"),
            "echo",
            r#"{"text":"again"}"#,
        )]))
    }
}

/// A model call that never resolves.
#[derive(Default)]
pub struct HangingProvider {
    cancels: AtomicUsize,
}

impl HangingProvider {
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        std::future::pending().await
    }

    fn cancel(&self) -> Result<(), ProviderError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Always fails with an API error.
pub struct FailingProvider;

#[async_trait]
impl ModelProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::ApiError {
            status_code: 500,
            message: "upstream exploded".into(),
        })
    }
}

/// Replays one chunk script per call over a channel.
///
/// A script without a `done` chunk closes the channel early.
pub struct StreamingProvider {
    scripts: Mutex<Vec<Vec<Result<StreamChunk, ProviderError>>>>,
    stream_calls: AtomicUsize,
    complete_calls: AtomicUsize,
}

impl StreamingProvider {
    pub fn new(scripts: Vec<Vec<Result<StreamChunk, ProviderError>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            stream_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
        }
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for StreamingProvider {
    fn name(&self) -> &str {
        "streaming"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(text_response("non-streamed"))
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let index = self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .ok_or_else(|| ProviderError::NotConfigured("no stream script".into()))?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for chunk in script {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// Streams one delta, then keeps the stream open until the reader goes away.
#[derive(Default)]
pub struct StallingStreamProvider {
    cancels: AtomicUsize,
    readers_gone: std::sync::Arc<AtomicUsize>,
}

impl StallingStreamProvider {
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// How many opened streams saw their receiver dropped.
    pub fn readers_gone(&self) -> usize {
        self.readers_gone.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for StallingStreamProvider {
    fn name(&self) -> &str {
        "stalling_stream"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        std::future::pending().await
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let (tx, rx) = mpsc::channel(4);
        let readers_gone = self.readers_gone.clone();
        tokio::spawn(async move {
            if tx.send(Ok(StreamChunk::delta("thinking"))).await.is_ok() {
                tx.closed().await;
            }
            readers_gone.fetch_add(1, Ordering::SeqCst);
        });
        Ok(rx)
    }

    fn cancel(&self) -> Result<(), ProviderError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Tools ────────────────────────────────────────────────────────────────

/// Echoes `text`, optionally after `delay_ms`.
#[derive(Default)]
pub struct EchoTool {
    runs: AtomicUsize,
}

impl EchoTool {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the input"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "delay_ms": { "type": "integer" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = arguments.get("delay_ms").and_then(|v| v.as_u64()) {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let text = arguments
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        Ok(ToolResult::success(text))
    }
}

/// Lists a fixed set of files.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files in a directory"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } }
        })
    }

    async fn execute(&self, _arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::success("Cargo.toml\nsrc/"))
    }
}

/// Destructive tool that needs confirmation.
#[derive(Default)]
pub struct DeleteFileTool {
    runs: AtomicUsize,
}

impl DeleteFileTool {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn is_destructive(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let path = arguments.get("path").and_then(|v| v.as_str()).unwrap_or("?");
        Ok(ToolResult::success(format!("deleted {path}")))
    }
}

/// Panics on every call.
pub struct PanicTool;

#[async_trait]
impl Tool for PanicTool {
    fn name(&self) -> &str {
        "boom"
    }

    fn description(&self) -> &str {
        "Always panics"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        panic!("tool bug");
    }
}

/// Fails with a `ToolError`.
pub struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "broken".into(),
            reason: "disk full".into(),
        })
    }
}

/// Produces `size` bytes of output.
pub struct BigOutputTool {
    pub size: usize,
}

#[async_trait]
impl Tool for BigOutputTool {
    fn name(&self) -> &str {
        "dump"
    }

    fn description(&self) -> &str {
        "Dumps a large blob"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _arguments: ToolArguments) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::success("x".repeat(self.size)))
    }
}

// ── Listeners ────────────────────────────────────────────────────────────

/// Records every event it sees.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<AgentEvent>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type())
            .collect()
    }
}

impl AgentEventListener for EventLog {
    fn on_event(&self, event: &AgentEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ── Builders ─────────────────────────────────────────────────────────────

pub fn tool_call(id: &str, name: &str, arguments: &str) -> MessageToolCall {
    MessageToolCall::new(id, name, arguments)
}

pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse::text(text)
}

pub fn tool_response(calls: Vec<MessageToolCall>) -> ProviderResponse {
    ProviderResponse::tool_calls("", calls)
}

pub fn contents(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.content.clone()).collect()
}

/// Poll `condition` every few milliseconds for up to two seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}
