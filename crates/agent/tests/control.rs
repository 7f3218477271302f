//! Cancellation, deadlines, re-entrancy and confirmation handling.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use stepwise_agent::{AgentEvent, AgentRunner, ConfirmationDecision, RunResult};
use stepwise_config::RunConfig;
use stepwise_core::{AutonomyLevel, Error, ModelProvider, RunState, ToolRegistry, ToolResultKind};
use support::*;
use tokio::task::JoinHandle;

fn spawn_run(agent: &Arc<AgentRunner>, prompt: &'static str, config: RunConfig) -> JoinHandle<RunResult> {
    let agent = agent.clone();
    tokio::spawn(async move { agent.run(prompt, Vec::new(), &config).await.unwrap() })
}

fn shared(provider: Arc<dyn ModelProvider>, tools: ToolRegistry) -> Arc<AgentRunner> {
    Arc::new(AgentRunner::new(provider, Arc::new(tools)).without_telemetry())
}

// ── Cancellation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_while_waiting_on_the_model() {
    let provider = Arc::new(HangingProvider::default());
    let agent = shared(provider.clone(), ToolRegistry::new());

    let handle = spawn_run(&agent, "go", RunConfig::default());
    wait_until(|| agent.current_step() == 1).await;
    agent.cancel();
    let result = handle.await.unwrap();

    assert_eq!(result.state, RunState::Cancelled);
    assert!(result.is_cancelled());
    assert!(result.final_text.is_none());
    assert_eq!(contents(&result.transcript), vec!["go"]);
    assert_eq!(provider.cancels(), 1);
    assert_eq!(agent.state(), RunState::Idle);

    // idle again, so a second cancel does nothing
    agent.cancel();
    assert_eq!(provider.cancels(), 1);
    assert_eq!(agent.state(), RunState::Idle);
}

#[tokio::test]
async fn cancel_during_a_slow_tool_keeps_a_consistent_transcript() {
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        vec![
            tool_call("c1", "echo", r#"{"text":"quick"}"#),
            tool_call("c2", "echo", r#"{"text":"slow","delay_ms":5000}"#),
        ],
        "never",
    ));
    let echo = Arc::new(EchoTool::default());
    let agent = shared(provider.clone(), ToolRegistry::new().with(echo.clone()));

    let handle = spawn_run(&agent, "go", RunConfig::default());
    wait_until(|| echo.runs() == 2).await;
    let during = agent.conversation_history();
    agent.cancel();
    let result = handle.await.unwrap();

    assert_eq!(result.state, RunState::Cancelled);
    assert_eq!(&result.transcript[..during.len()], &during[..]);
    let tool_messages = result.tool_messages();
    assert_eq!(tool_messages.len(), 1);
    assert_eq!(tool_messages[0].content, "quick");
    assert_eq!(provider.calls(), 1);
    assert_eq!(agent.state(), RunState::Idle);
}

#[tokio::test]
async fn cancel_during_pending_confirmation() {
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        vec![tool_call("c1", "delete_file", r#"{"path":"a.txt"}"#)],
        "never",
    ));
    let delete = Arc::new(DeleteFileTool::default());
    let agent = shared(provider, ToolRegistry::new().with(delete.clone()));

    let handle = spawn_run(&agent, "clean up", RunConfig::default());
    wait_until(|| agent.pending_confirmation().is_some()).await;
    assert_eq!(agent.state(), RunState::WaitingConfirmation);
    agent.cancel();
    let result = handle.await.unwrap();

    assert_eq!(result.state, RunState::Cancelled);
    assert_eq!(
        result.transcript.last().unwrap().content,
        "Error: Operation cancelled"
    );
    assert_eq!(delete.runs(), 0);
    assert!(agent.pending_confirmation().is_none());
    assert!(!agent.resolve_confirmation(ConfirmationDecision::Confirmed));
    assert_eq!(agent.state(), RunState::Idle);
}

#[tokio::test]
async fn cancel_when_idle_does_not_poison_the_next_run() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("fine")]));
    let agent = shared(provider, ToolRegistry::new());

    agent.cancel();
    let result = agent.run("go", Vec::new(), &RunConfig::default()).await.unwrap();

    assert!(result.is_success());
}

// ── Deadlines ────────────────────────────────────────────────────────────

#[tokio::test]
async fn timeout_returns_an_error_result() {
    let provider = Arc::new(HangingProvider::default());
    let agent = shared(provider, ToolRegistry::new());
    let config = RunConfig::builder().timeout_ms(50).build().unwrap();

    let started = Instant::now();
    let result = agent.run("go", Vec::new(), &config).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.state, RunState::Error);
    assert_eq!(result.error_kind.as_deref(), Some("timeout"));
    assert_eq!(
        result.message.as_deref(),
        Some("Execution timed out after 50 ms")
    );
    assert_eq!(contents(&result.transcript), vec!["go"]);
    assert_eq!(agent.state(), RunState::Idle);
}

#[tokio::test]
async fn timeout_during_a_tool_drops_its_result() {
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        vec![tool_call("c1", "echo", r#"{"text":"late","delay_ms":5000}"#)],
        "never",
    ));
    let agent = shared(provider, ToolRegistry::new().with(Arc::new(EchoTool::default())));
    let config = RunConfig::builder().timeout_ms(100).build().unwrap();

    let result = agent.run("go", Vec::new(), &config).await.unwrap();

    assert_eq!(result.error_kind.as_deref(), Some("timeout"));
    assert!(result.tool_messages().is_empty());
}

#[tokio::test]
async fn timeout_while_awaiting_confirmation_clears_it() {
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        vec![tool_call("c1", "delete_file", r#"{"path":"a.txt"}"#)],
        "never",
    ));
    let delete = Arc::new(DeleteFileTool::default());
    let agent = shared(provider, ToolRegistry::new().with(delete.clone()));
    let log = Arc::new(EventLog::default());
    agent.add_listener(log.clone());
    let config = RunConfig::builder().timeout_ms(100).build().unwrap();

    let result = agent.run("clean up", Vec::new(), &config).await.unwrap();

    assert_eq!(result.state, RunState::Error);
    assert_eq!(result.error_kind.as_deref(), Some("timeout"));
    assert!(result.tool_messages().is_empty());
    assert_eq!(delete.runs(), 0);
    assert!(agent.pending_confirmation().is_none());
    assert_eq!(agent.state(), RunState::Idle);

    let pending = log
        .events()
        .into_iter()
        .find_map(|event| match event {
            AgentEvent::ConfirmationRequested(pending) => Some(pending),
            _ => None,
        })
        .unwrap();
    assert!(pending.is_resolved());
    assert!(!pending.resolve(ConfirmationDecision::Confirmed));
    assert_eq!(delete.runs(), 0);
}

#[tokio::test]
async fn dropping_the_run_future_returns_to_idle() {
    let agent = shared(Arc::new(HangingProvider::default()), ToolRegistry::new());

    let outcome = tokio::time::timeout(
        Duration::from_millis(30),
        agent.run("go", Vec::new(), &RunConfig::default()),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(agent.state(), RunState::Idle);
}

// ── Re-entrancy ──────────────────────────────────────────────────────────

#[tokio::test]
async fn second_run_is_rejected_while_active() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![tool_call("c1", "echo", r#"{"text":"x","delay_ms":200}"#)]),
        text_response("first"),
        text_response("second"),
    ]));
    let echo = Arc::new(EchoTool::default());
    let agent = shared(provider, ToolRegistry::new().with(echo.clone()));

    let handle = spawn_run(&agent, "one", RunConfig::default());
    wait_until(|| echo.runs() == 1).await;

    let rejected = agent.run("two", Vec::new(), &RunConfig::default()).await;
    assert!(matches!(rejected, Err(Error::AlreadyRunning)));

    let first = handle.await.unwrap();
    assert_eq!(first.final_text.as_deref(), Some("first"));
    assert_eq!(contents(&first.transcript)[0], "one");

    let second = agent.run("two", Vec::new(), &RunConfig::default()).await.unwrap();
    assert_eq!(second.final_text.as_deref(), Some("second"));
    assert_eq!(second.steps_executed, 1);
}

// ── Confirmation ─────────────────────────────────────────────────────────

async fn confirm_with(decision: ConfirmationDecision) -> (RunResult, Arc<DeleteFileTool>, Arc<EventLog>) {
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        vec![tool_call("c1", "delete_file", r#"{"path":"a.txt"}"#)],
        "after",
    ));
    let delete = Arc::new(DeleteFileTool::default());
    let agent = shared(provider, ToolRegistry::new().with(delete.clone()));
    let log = Arc::new(EventLog::default());
    agent.add_listener(log.clone());

    let handle = spawn_run(&agent, "clean up", RunConfig::default());
    wait_until(|| agent.pending_confirmation().is_some()).await;

    let pending = agent.pending_confirmation().unwrap();
    assert_eq!(pending.tool_name(), "delete_file");
    assert_eq!(pending.step, 1);
    assert!(pending.destructive);
    assert_eq!(pending.arguments["path"], "a.txt");
    assert_eq!(pending.tool_description, "Delete a file");

    assert!(agent.resolve_confirmation(decision));
    let result = handle.await.unwrap();
    (result, delete, log)
}

#[tokio::test]
async fn confirmed_call_executes() {
    let (result, delete, _) = confirm_with(ConfirmationDecision::Confirmed).await;

    assert_eq!(delete.runs(), 1);
    assert_eq!(result.tool_messages()[0].content, "deleted a.txt");
    assert_eq!(result.tool_calls_executed, 1);
    assert_eq!(result.final_text.as_deref(), Some("after"));
}

#[tokio::test]
async fn skipped_call_is_a_successful_confirmation_result() {
    let (result, delete, log) = confirm_with(ConfirmationDecision::Skipped).await;

    assert_eq!(delete.runs(), 0);
    assert_eq!(result.tool_messages()[0].content, "Operation skipped by user");
    assert_eq!(result.tool_calls_executed, 0);
    assert_eq!(result.final_text.as_deref(), Some("after"));

    let ready = log
        .events()
        .into_iter()
        .find_map(|event| match event {
            AgentEvent::ToolResultReady { result, .. } => Some(result),
            _ => None,
        })
        .unwrap();
    assert!(ready.success);
    assert_eq!(ready.kind, ToolResultKind::Confirmation);
}

#[tokio::test]
async fn denied_call_is_a_failure_and_the_run_continues() {
    let (result, delete, log) = confirm_with(ConfirmationDecision::Denied).await;

    assert_eq!(delete.runs(), 0);
    assert_eq!(
        result.tool_messages()[0].content,
        "Error: Operation denied by user"
    );
    assert_eq!(result.state, RunState::Completed);
    assert!(log.types().contains(&"confirmation_requested"));
}

#[tokio::test]
async fn full_autonomy_approves_without_asking() {
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        vec![tool_call("c1", "delete_file", r#"{"path":"b.txt"}"#)],
        "done",
    ));
    let delete = Arc::new(DeleteFileTool::default());
    let agent = AgentRunner::new(provider, Arc::new(ToolRegistry::new().with(delete.clone())))
        .without_telemetry()
        .with_autonomy(AutonomyLevel::Full);

    let result = agent.run("go", Vec::new(), &RunConfig::default()).await.unwrap();

    assert_eq!(delete.runs(), 1);
    assert_eq!(result.tool_messages()[0].content, "deleted b.txt");
}

#[tokio::test]
async fn read_only_autonomy_denies() {
    let provider = Arc::new(ScriptedProvider::tool_then_text(
        vec![tool_call("c1", "delete_file", r#"{"path":"b.txt"}"#)],
        "done",
    ));
    let delete = Arc::new(DeleteFileTool::default());
    let agent = AgentRunner::new(provider, Arc::new(ToolRegistry::new().with(delete.clone())))
        .without_telemetry()
        .with_autonomy(AutonomyLevel::ReadOnly);

    let result = agent.run("go", Vec::new(), &RunConfig::default()).await.unwrap();

    assert_eq!(delete.runs(), 0);
    assert_eq!(
        result.tool_messages()[0].content,
        "Error: Operation denied by user"
    );
}
