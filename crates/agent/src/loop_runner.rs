//! The agent reasoning loop implementation.
//!
//! One [`AgentRunner`] drives at most one run at a time. Each step makes a
//! single model round-trip; tool calls requested by the model are executed
//! strictly in order before the next step. A run ends when the model stops
//! asking for tools, the step budget is spent, the deadline passes, the run
//! is cancelled, or the model call fails.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use stepwise_config::RunConfig;
use stepwise_core::{
    AutonomyLevel, Error, Message, MessageToolCall, ModelProvider, ProviderError,
    ProviderRequest, ProviderResponse, RunState, Tool, ToolArguments, ToolCall, ToolDefinition,
    ToolRegistry, ToolResult, validate_transcript,
};
use stepwise_telemetry::{RunSummary, TelemetrySink, TracingSink, prompt_telemetry_enabled};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::confirmation::{AutonomyConfirmer, ConfirmationDecision, PendingConfirmation, Resolution};
use crate::event::{AgentEvent, AgentEventListener, ListenerId, Listeners};
use crate::result::RunResult;
use crate::state::StateCell;
use crate::stream::StreamAccumulator;
use crate::transcript::Transcript;

/// Orchestrates model calls and tool execution for one agent.
pub struct AgentRunner {
    /// The model transport
    provider: Arc<dyn ModelProvider>,

    /// Tools the model may call
    tools: Arc<ToolRegistry>,

    /// Base system prompt, extended per run by `system_prompt_addition`
    system_prompt: String,

    state: StateCell,

    /// Replaced at the start of every run
    cancel_token: Mutex<CancellationToken>,

    current_step: AtomicU32,
    tool_calls: AtomicU32,
    transcript: Transcript,
    pending: Mutex<Option<PendingConfirmation>>,
    listeners: Listeners,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

/// How a run ended, before the result descriptor is assembled.
struct Outcome {
    state: RunState,
    final_text: Option<String>,
    message: Option<String>,
    error_kind: Option<&'static str>,
}

impl Outcome {
    fn completed(text: String) -> Self {
        Self {
            state: RunState::Completed,
            final_text: Some(text),
            message: None,
            error_kind: None,
        }
    }

    fn step_limit(max_steps: u32) -> Self {
        Self {
            state: RunState::Completed,
            final_text: None,
            message: Some(format!("Step limit reached: {max_steps}")),
            error_kind: None,
        }
    }

    fn cancelled() -> Self {
        Self {
            state: RunState::Cancelled,
            final_text: None,
            message: Some("Run cancelled".into()),
            error_kind: None,
        }
    }

    fn provider_failure(err: &ProviderError) -> Self {
        Self {
            state: RunState::Error,
            final_text: None,
            message: Some(format!("Model call failed: {err}")),
            error_kind: Some(err.kind()),
        }
    }

    fn timeout(timeout_ms: u64) -> Self {
        Self {
            state: RunState::Error,
            final_text: None,
            message: Some(format!("Execution timed out after {timeout_ms} ms")),
            error_kind: Some("timeout"),
        }
    }
}

enum ModelFailure {
    Cancelled,
    Provider(ProviderError),
}

enum ToolFlow {
    Continue,
    Cancelled,
}

/// Returns the runner to `Idle` however the run future ends, including
/// when the caller drops it mid-run.
struct ActiveRun<'a> {
    runner: &'a AgentRunner,
    token: CancellationToken,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(pending) = self.runner.take_pending() {
            pending.cancel();
        }
        self.runner.state.set(RunState::Idle);
    }
}

impl AgentRunner {
    /// Create a runner. Prompt telemetry goes to `tracing` unless
    /// `STEPWISE_PROMPT_TELEMETRY` turns it off.
    pub fn new(provider: Arc<dyn ModelProvider>, tools: Arc<ToolRegistry>) -> Self {
        let telemetry: Option<Arc<dyn TelemetrySink>> = if prompt_telemetry_enabled(None) {
            Some(Arc::new(TracingSink))
        } else {
            None
        };

        Self {
            provider,
            tools,
            system_prompt: String::new(),
            state: StateCell::default(),
            cancel_token: Mutex::new(CancellationToken::new()),
            current_step: AtomicU32::new(0),
            tool_calls: AtomicU32::new(0),
            transcript: Transcript::default(),
            pending: Mutex::new(None),
            listeners: Listeners::default(),
            telemetry,
        }
    }

    /// Set the base system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Send run summaries to a specific sink.
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Disable run summaries.
    pub fn without_telemetry(mut self) -> Self {
        self.telemetry = None;
        self
    }

    /// Apply the `prompt_telemetry` setting.
    pub fn with_prompt_telemetry(self, enabled: bool) -> Self {
        match (enabled, self.telemetry.is_some()) {
            (false, _) => self.without_telemetry(),
            (true, false) => self.with_telemetry(Arc::new(TracingSink)),
            (true, true) => self,
        }
    }

    /// Register an [`AutonomyConfirmer`] for the given level.
    pub fn with_autonomy(self, level: AutonomyLevel) -> Self {
        self.add_listener(Arc::new(AutonomyConfirmer::new(level)));
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    // ── Listeners ─────────────────────────────────────────────────────

    /// Register a listener. Listeners are called synchronously on the loop
    /// task, in registration order, with panics caught and logged.
    ///
    /// A listener that does slow work (I/O, UI rendering, awaiting) should
    /// not do it in `on_event`; register an [`EventBus`](crate::EventBus)
    /// instead and consume its broadcast receiver from another task.
    pub fn add_listener(&self, listener: Arc<dyn AgentEventListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // ── State queries (safe from any task) ───────────────────────────

    pub fn state(&self) -> RunState {
        self.state.get()
    }

    /// Step of the current or last run.
    pub fn current_step(&self) -> u32 {
        self.current_step.load(Ordering::Acquire)
    }

    pub fn tool_calls_executed(&self) -> u32 {
        self.tool_calls.load(Ordering::Acquire)
    }

    /// Copy of the transcript as it stands now.
    pub fn conversation_history(&self) -> Vec<Message> {
        self.transcript.snapshot()
    }

    pub fn pending_confirmation(&self) -> Option<PendingConfirmation> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Resolve the pending confirmation, if any. Returns false when there
    /// is nothing to resolve or it was already resolved.
    pub fn resolve_confirmation(&self, decision: ConfirmationDecision) -> bool {
        self.pending_confirmation()
            .is_some_and(|pending| pending.resolve(decision))
    }

    // ── Control ───────────────────────────────────────────────────────

    /// Cancel the active run. Idempotent; a no-op when idle.
    pub fn cancel(&self) {
        if !self.state.mark_cancelled() {
            return;
        }
        info!(step = self.current_step(), "Cancelling agent run");

        self.cancel_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();

        if let Err(err) = self.provider.cancel() {
            warn!(provider = self.provider.name(), error = %err, "Provider cancel failed");
        }
        if let Some(pending) = self.take_pending() {
            pending.cancel();
        }
    }

    /// Cancel any run, drop all listeners and clear the transcript.
    pub fn dispose(&self) {
        self.cancel();
        self.listeners.clear();
        self.transcript.clear();
    }

    /// Run the loop for one prompt.
    ///
    /// `history` seeds the transcript ahead of the prompt. Every terminal
    /// path (success, step limit, cancellation, timeout, provider failure)
    /// yields `Ok(RunResult)`; the only error is [`Error::AlreadyRunning`].
    pub async fn run(
        &self,
        prompt: impl Into<String>,
        history: Vec<Message>,
        config: &RunConfig,
    ) -> Result<RunResult, Error> {
        let prompt = prompt.into();
        if !self.state.try_start() {
            warn!(state = %self.state.get(), "Rejected run: agent is not idle");
            return Err(Error::AlreadyRunning);
        }

        let token = self.begin_run();
        let _active = ActiveRun {
            runner: self,
            token: token.clone(),
        };

        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let system_prompt = self.seed_transcript(&prompt, history, config);

        info!(
            run_id = %run_id,
            max_steps = config.max_steps(),
            timeout_ms = config.timeout_ms(),
            streaming = config.streaming_enabled(),
            profile = config.profile_name().unwrap_or("default"),
            tool_graph = config.tool_graph_enabled(),
            tool_graph_policy = ?config.tool_graph_policy(),
            "Agent run started"
        );
        self.emit(AgentEvent::Started {
            prompt: prompt.clone(),
            max_steps: config.max_steps(),
            profile: config.profile_name().map(str::to_string),
        });

        let outcome = tokio::select! {
            outcome = self.execute_loop(config, &token) => outcome,
            _ = tokio::time::sleep(config.timeout()) => {
                warn!(run_id = %run_id, timeout_ms = config.timeout_ms(), "Agent run timed out");
                Outcome::timeout(config.timeout_ms())
            }
        };

        Ok(self.finish(run_id, outcome, started, config, &system_prompt, &prompt))
    }

    fn begin_run(&self) -> CancellationToken {
        self.current_step.store(0, Ordering::Release);
        self.tool_calls.store(0, Ordering::Release);
        self.take_pending();

        let mut slot = self.cancel_token.lock().unwrap_or_else(|e| e.into_inner());
        *slot = CancellationToken::new();
        // cancel() may have landed between try_start and the token swap
        if self.state.get() == RunState::Cancelled {
            slot.cancel();
        }
        slot.clone()
    }

    /// Reset the transcript to `history + prompt`, adding the system prompt
    /// when the history has none. Returns the applied system prompt.
    fn seed_transcript(&self, prompt: &str, mut history: Vec<Message>, config: &RunConfig) -> String {
        if let Err(err) = validate_transcript(&history) {
            warn!(error = %err, "Seeded history breaks transcript ordering");
        }

        let system_prompt = match history.first() {
            Some(first) if first.is_system() => first.content.clone(),
            _ => {
                let assembled =
                    assemble_system_prompt(&self.system_prompt, config.system_prompt_addition());
                if !assembled.is_empty() {
                    history.insert(0, Message::system(assembled.clone()));
                }
                assembled
            }
        };

        history.push(Message::user(prompt));
        self.transcript.reset(history);
        system_prompt
    }

    fn tool_definitions(&self, config: &RunConfig) -> Vec<ToolDefinition> {
        self.tools
            .all()
            .into_iter()
            .filter(|tool| config.is_tool_allowed(tool.name()))
            .map(|tool| tool.to_definition())
            .collect()
    }

    async fn execute_loop(&self, config: &RunConfig, token: &CancellationToken) -> Outcome {
        let tools = self.tool_definitions(config);
        let streaming = config.streaming_enabled() && self.provider.supports_streaming();
        let max_steps = config.max_steps();
        let mut step = 0;

        loop {
            if token.is_cancelled() {
                return Outcome::cancelled();
            }

            step += 1;
            // Guard only: the check after each tool-calling response ends the run first
            if step > max_steps {
                return Outcome::step_limit(max_steps);
            }
            self.current_step.store(step, Ordering::Release);
            self.state.advance(RunState::Running);

            debug!(step, max_steps, streaming, "Agent loop step");
            self.emit(AgentEvent::StepStarted {
                step,
                max_steps,
                description: format!("Step {step}/{max_steps}"),
            });

            let request = ProviderRequest {
                messages: self.transcript.snapshot(),
                tools: tools.clone(),
                stream: streaming,
            };

            let response = match self.call_model(step, request, streaming, token).await {
                Ok(response) => response,
                Err(ModelFailure::Cancelled) => return Outcome::cancelled(),
                Err(ModelFailure::Provider(err)) => {
                    error!(step, provider = self.provider.name(), error = %err, "Model call failed");
                    return Outcome::provider_failure(&err);
                }
            };
            if token.is_cancelled() {
                return Outcome::cancelled();
            }

            let calls = response.message.tool_calls.clone();
            let text = response.message.content.clone();
            self.transcript.push(response.message);

            if calls.is_empty() {
                debug!(step, "Model returned a final answer");
                return Outcome::completed(text);
            }

            if step >= max_steps {
                info!(step, max_steps, requested = calls.len(), "Step limit reached, requested tools not executed");
                return Outcome::step_limit(max_steps);
            }

            self.state.advance(RunState::WaitingTool);
            debug!(step, count = calls.len(), "Executing tool calls");

            for call in &calls {
                if let ToolFlow::Cancelled = self.process_tool_call(step, call, config, token).await {
                    return Outcome::cancelled();
                }
                if token.is_cancelled() {
                    return Outcome::cancelled();
                }
            }
        }
    }

    async fn call_model(
        &self,
        step: u32,
        request: ProviderRequest,
        streaming: bool,
        token: &CancellationToken,
    ) -> Result<ProviderResponse, ModelFailure> {
        let result = if streaming {
            self.stream_model(step, request, token).await
        } else {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(ModelFailure::Cancelled),
                result = self.provider.complete(request) => result.map_err(ModelFailure::Provider),
            }
        };

        match result {
            // Transports often fail the in-flight call when asked to cancel
            Err(ModelFailure::Provider(_)) if token.is_cancelled() => Err(ModelFailure::Cancelled),
            other => other,
        }
    }

    async fn stream_model(
        &self,
        step: u32,
        request: ProviderRequest,
        token: &CancellationToken,
    ) -> Result<ProviderResponse, ModelFailure> {
        let mut chunks = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ModelFailure::Cancelled),
            opened = self.provider.stream(request) => opened.map_err(ModelFailure::Provider)?,
        };

        let mut accumulator = StreamAccumulator::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(ModelFailure::Cancelled),
                next = chunks.recv() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    if let Some(delta) = accumulator.push(&chunk) {
                        self.emit(AgentEvent::StreamChunk {
                            step,
                            delta,
                            complete: false,
                            finish_reason: None,
                        });
                    }
                    if chunk.done {
                        self.emit(AgentEvent::StreamChunk {
                            step,
                            delta: String::new(),
                            complete: true,
                            finish_reason: chunk.finish_reason.clone(),
                        });
                        break;
                    }
                }
                Some(Err(err)) => return Err(ModelFailure::Provider(err)),
                None => {
                    debug!(step, "Stream closed without a completion chunk");
                    break;
                }
            }
        }

        Ok(accumulator.finish())
    }

    async fn process_tool_call(
        &self,
        step: u32,
        call: &MessageToolCall,
        config: &RunConfig,
        token: &CancellationToken,
    ) -> ToolFlow {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(step, tool = %call.name, "Model requested an unknown tool");
            let result = ToolResult::failure(format!("Unknown tool: {}", call.name));
            self.append_tool_result(step, call, result, 0, config);
            return ToolFlow::Continue;
        };

        if !config.is_tool_allowed(&call.name) {
            warn!(step, tool = %call.name, "Model requested a disabled tool");
            let result = ToolResult::failure(format!("Tool disabled: {}", call.name));
            self.append_tool_result(step, call, result, 0, config);
            return ToolFlow::Continue;
        }

        let arguments = parse_arguments(call);
        let requires_confirmation = tool.requires_confirmation();
        self.emit(AgentEvent::ToolCallRequested {
            step,
            call: call.clone(),
            arguments: arguments.clone(),
            requires_confirmation,
        });

        if requires_confirmation {
            let synthetic = match self.await_confirmation(step, call, tool.as_ref(), &arguments, token).await {
                Resolution::Decided(ConfirmationDecision::Confirmed) => None,
                Resolution::Decided(ConfirmationDecision::Skipped) => {
                    Some(ToolResult::confirmation("Operation skipped by user"))
                }
                Resolution::Decided(ConfirmationDecision::Denied) => {
                    Some(ToolResult::failure("Operation denied by user"))
                }
                Resolution::Cancelled => {
                    let result = ToolResult::failure("Operation cancelled");
                    self.append_tool_result(step, call, result, 0, config);
                    return ToolFlow::Cancelled;
                }
            };
            if let Some(result) = synthetic {
                self.append_tool_result(step, call, result, 0, config);
                return ToolFlow::Continue;
            }
        }

        self.execute_tool(step, call, arguments, config, token).await
    }

    async fn await_confirmation(
        &self,
        step: u32,
        call: &MessageToolCall,
        tool: &dyn Tool,
        arguments: &ToolArguments,
        token: &CancellationToken,
    ) -> Resolution {
        self.state.advance(RunState::WaitingConfirmation);

        let (pending, receiver) = PendingConfirmation::new(
            step,
            call.clone(),
            tool.description(),
            arguments.clone(),
            tool.is_destructive(),
        );
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(pending.clone());

        info!(step, tool = %call.name, destructive = pending.destructive, "Waiting for confirmation");
        self.emit(AgentEvent::ConfirmationRequested(pending));

        let resolution = tokio::select! {
            biased;
            _ = token.cancelled() => Resolution::Cancelled,
            received = receiver => received.unwrap_or(Resolution::Cancelled),
        };

        self.take_pending();
        self.state.advance(RunState::WaitingTool);
        debug!(step, tool = %call.name, ?resolution, "Confirmation resolved");
        resolution
    }

    async fn execute_tool(
        &self,
        step: u32,
        call: &MessageToolCall,
        arguments: ToolArguments,
        config: &RunConfig,
        token: &CancellationToken,
    ) -> ToolFlow {
        self.state.advance(RunState::WaitingTool);
        debug!(step, tool = %call.name, call_id = %call.id, "Executing tool");

        let started = Instant::now();
        let tools = Arc::clone(&self.tools);
        let request = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        };
        let handle = tokio::spawn(async move { tools.execute(&request).await });

        let joined = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(step, tool = %call.name, "Stopped waiting for tool after cancellation");
                return ToolFlow::Cancelled;
            }
            joined = handle => joined,
        };

        let duration_ms = elapsed_ms(started);
        self.tool_calls.fetch_add(1, Ordering::AcqRel);

        let result = match joined {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(step, tool = %call.name, error = %err, "Tool execution failed");
                ToolResult::failure(err.to_string())
            }
            Err(err) => {
                error!(step, tool = %call.name, error = %err, "Tool panicked");
                ToolResult::failure(format!("Tool panicked: {}", call.name))
            }
        };

        self.append_tool_result(step, call, result, duration_ms, config);
        ToolFlow::Continue
    }

    fn append_tool_result(
        &self,
        step: u32,
        call: &MessageToolCall,
        result: ToolResult,
        duration_ms: u64,
        config: &RunConfig,
    ) {
        let result = result.truncated(config.max_tool_output_size());
        self.transcript
            .push(Message::tool_result(&call.id, result.transcript_text()));
        self.emit(AgentEvent::ToolResultReady {
            step,
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result,
            duration_ms,
        });
    }

    fn finish(
        &self,
        run_id: String,
        outcome: Outcome,
        started: Instant,
        config: &RunConfig,
        system_prompt: &str,
        prompt: &str,
    ) -> RunResult {
        if let Some(pending) = self.take_pending() {
            pending.cancel();
        }
        self.state.set(outcome.state);

        let result = RunResult {
            run_id,
            state: outcome.state,
            final_text: outcome.final_text,
            transcript: self.transcript.snapshot(),
            steps_executed: self.current_step(),
            tool_calls_executed: self.tool_calls_executed(),
            elapsed_ms: elapsed_ms(started),
            message: outcome.message,
            error_kind: outcome.error_kind.map(str::to_string),
        };

        info!(
            run_id = %result.run_id,
            state = %result.state,
            steps = result.steps_executed,
            tool_calls = result.tool_calls_executed,
            elapsed_ms = result.elapsed_ms,
            "Agent run finished"
        );

        self.emit(AgentEvent::Completed(Box::new(result.clone())));
        self.record_telemetry(&result, config, system_prompt, prompt);
        result
    }

    fn record_telemetry(&self, result: &RunResult, config: &RunConfig, system_prompt: &str, prompt: &str) {
        let Some(sink) = &self.telemetry else {
            return;
        };

        let summary = RunSummary {
            steps: result.steps_executed,
            tool_calls: result.tool_calls_executed,
            elapsed_ms: result.elapsed_ms,
            system_chars: system_prompt.chars().count(),
            user_chars: prompt.chars().count(),
            ..RunSummary::new(result.state)
        }
        .with_profile(config.profile_name())
        .with_error_kind(result.error_kind.as_deref());

        if catch_unwind(AssertUnwindSafe(|| sink.record(&summary))).is_err() {
            warn!(run_id = %result.run_id, "Telemetry sink panicked");
        }
    }

    fn take_pending(&self) -> Option<PendingConfirmation> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn emit(&self, event: AgentEvent) {
        self.listeners.emit(&event);
    }
}

/// `base + "\n\n" + addition`, skipping blank parts.
fn assemble_system_prompt(base: &str, addition: Option<&str>) -> String {
    [Some(base), addition]
        .into_iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Parse serialized tool arguments. Anything but a JSON object yields an
/// empty map.
fn parse_arguments(call: &MessageToolCall) -> ToolArguments {
    let raw = call.arguments.trim();
    if raw.is_empty() || raw == "{}" {
        return ToolArguments::new();
    }

    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(other) => {
            warn!(tool = %call.name, kind = json_kind(&other), "Tool arguments are not a JSON object");
            ToolArguments::new()
        }
        Err(err) => {
            warn!(tool = %call.name, error = %err, "Failed to parse tool arguments");
            ToolArguments::new()
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
