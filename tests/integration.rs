//! Integration tests for Femtocode
//!
//! These tests verify that the components work together: the agent loop
//! driving the dispatcher, approval and undo wiring, plan-mode enforcement,
//! batch ordering, and background task supervision.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tempfile::tempdir;

use femtocode::agent::AgentLoop;
use femtocode::approval::ApprovalGate;
use femtocode::bridge::BridgeRegistry;
use femtocode::config::Config;
use femtocode::error::Result;
use femtocode::exec::CommandExecutor;
use femtocode::providers::{
    ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition,
};
use femtocode::session::{Message, Role};
use femtocode::supervisor::{Supervisor, TaskStatus};
use femtocode::tools::{standard_registry, CompletionStatus, Mode, ToolContext, ToolRegistry};
use femtocode::undo::{OperationKind, UndoJournal};

/// Scripted provider: pops one response per chat call, empty text afterwards.
struct ScriptedProvider {
    responses: Mutex<VecDeque<LLMResponse>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<LLMResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
        })
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        _model: Option<&str>,
        _options: ChatOptions,
    ) -> Result<LLMResponse> {
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| LLMResponse::text("nothing left to do")))
    }

    fn default_model(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn call(id: &str, name: &str, args: serde_json::Value) -> LLMToolCall {
    LLMToolCall::new(id, name, &args.to_string())
}

fn completion(id: &str, summary: &str) -> LLMResponse {
    LLMResponse::with_tools(
        "",
        vec![call(id, "task_complete", json!({"summary": summary}))],
    )
}

struct Stack {
    registry: Arc<ToolRegistry>,
    supervisor: Arc<Supervisor>,
    journal: Arc<UndoJournal>,
    workspace: PathBuf,
    config: Config,
}

/// Build the full tool stack against a scripted provider and a temp
/// workspace. Commands auto-approve; timeouts come from `config.commands`.
fn stack(provider: Arc<dyn LLMProvider>, config: Config) -> Stack {
    // Leak the TempDir so the workspace survives the whole test
    let dir = Box::leak(Box::new(tempdir().unwrap()));
    let workspace = dir.path().to_path_buf();
    let tasks_dir = workspace.join(".tasks");
    let supervisor = Arc::new(Supervisor::with_output_dir(tasks_dir));
    let executor = Arc::new(
        CommandExecutor::from_config(&config.commands, Arc::clone(&supervisor)).unwrap(),
    );
    let bridge = Arc::new(BridgeRegistry::new());
    let registry = standard_registry(
        &config,
        Arc::clone(&provider),
        Arc::clone(&supervisor),
        executor,
        bridge,
    );
    let journal = Arc::new(UndoJournal::in_memory());
    Stack {
        registry,
        supervisor,
        journal,
        workspace,
        config,
    }
}

fn context(stack: &Stack) -> ToolContext {
    ToolContext::new(stack.workspace.clone())
        .with_approval(Arc::new(ApprovalGate::new(true)))
        .with_undo(Arc::clone(&stack.journal))
}

fn agent_for(provider: Arc<ScriptedProvider>, stack: &Stack, ctx: ToolContext) -> AgentLoop {
    AgentLoop::new(
        stack.config.clone(),
        provider,
        Arc::clone(&stack.registry),
        ctx,
    )
}

#[tokio::test]
async fn agent_writes_file_and_undo_reverses_it() {
    let provider = ScriptedProvider::new(vec![
        LLMResponse::with_tools(
            "Writing the file",
            vec![call(
                "c1",
                "write_file",
                json!({"path": "hello.txt", "content": "hi there"}),
            )],
        ),
        completion("c2", "Created hello.txt"),
    ]);
    let stack = stack(provider.clone(), Config::default());
    let ctx = context(&stack);
    let agent = agent_for(provider, &stack, ctx);

    let outcome = agent.run("create hello.txt").await;
    assert!(outcome.success, "{}", outcome.final_text);
    assert_eq!(outcome.final_text, "Created hello.txt");

    let target = stack.workspace.join("hello.txt");
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "hi there");

    // The mutation was journaled and reverses cleanly
    let ops = stack.journal.list(10);
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].kind, OperationKind::Write);
    stack.journal.undo_last().unwrap();
    assert!(!target.exists());
}

#[tokio::test]
async fn plan_mode_blocks_mutation_end_to_end() {
    let provider = ScriptedProvider::new(vec![
        LLMResponse::with_tools(
            "",
            vec![call(
                "c1",
                "write_file",
                json!({"path": "blocked.txt", "content": "nope"}),
            )],
        ),
        completion("c2", "Stopped: write is blocked in plan mode"),
    ]);
    let stack = stack(provider.clone(), Config::default());
    let ctx = context(&stack).with_mode(Mode::Plan);
    let agent = agent_for(provider, &stack, ctx);

    let outcome = agent.run("write a file").await;
    assert!(outcome.success);

    // The blocked result was fed back to the model...
    let blocked_result = outcome
        .transcript
        .iter()
        .find(|m| m.role == Role::Tool && m.content.contains("Plan-only mode"))
        .expect("blocked tool result in transcript");
    assert!(blocked_result.content.starts_with("Error:"));

    // ...and the side effect never occurred
    assert!(!stack.workspace.join("blocked.txt").exists());
    assert!(stack.journal.is_empty());
}

#[tokio::test]
async fn batch_mixed_results_preserve_order() {
    let provider = ScriptedProvider::new(vec![]);
    let stack = stack(provider, Config::default());
    let ctx = context(&stack);

    // A succeeds, B hits an unknown tool, C succeeds
    let out = stack
        .registry
        .dispatch(
            "batch_tool",
            json!({
                "mode": "parallel",
                "invocations": [
                    {"tool": "run_command", "input": {"command": "echo A"}},
                    {"tool": "no_such_tool", "input": {}},
                    {"tool": "run_command", "input": {"command": "echo C"}}
                ]
            }),
            &ctx,
        )
        .await;

    // The batch mechanism itself succeeded
    assert!(!out.is_error);
    let results: Vec<serde_json::Value> = serde_json::from_str(&out.for_llm).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["success"], true);
    assert!(results[0]["output"].as_str().unwrap().contains('A'));
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[2]["success"], true);
    assert!(results[2]["output"].as_str().unwrap().contains('C'));
}

#[tokio::test]
async fn background_yes_task_is_listed_and_killed() {
    let provider = ScriptedProvider::new(vec![]);
    let stack = stack(provider, Config::default());
    let ctx = context(&stack);

    let started = Instant::now();
    let out = stack
        .registry
        .dispatch(
            "run_command",
            json!({"command": "yes", "background": true}),
            &ctx,
        )
        .await;
    assert!(!out.is_error, "{}", out.for_llm);

    let running = stack.supervisor.list_running();
    assert_eq!(running.len(), 1);
    let task_id = running[0].task_id.clone();

    let out = stack
        .registry
        .dispatch("kill_task", json!({"task_id": task_id}), &ctx)
        .await;
    assert!(!out.is_error);
    assert!(started.elapsed() < Duration::from_secs(5));

    let task = stack.supervisor.get(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Killed);

    // Killing again is idempotent and does not re-transition
    stack.supervisor.kill(&task_id, libc::SIGTERM).unwrap();
    assert_eq!(
        stack.supervisor.get(&task_id).unwrap().status,
        TaskStatus::Killed
    );
}

#[tokio::test]
async fn idle_timeout_reported_distinctly_from_absolute() {
    let provider = ScriptedProvider::new(vec![]);
    let mut config = Config::default();
    config.commands.idle_timeout_secs = 1;
    config.commands.max_timeout_secs = 30;
    let stack = stack(provider, config);
    let ctx = context(&stack);

    let out = stack
        .registry
        .dispatch("run_command", json!({"command": "sleep 10"}), &ctx)
        .await;
    assert!(out.is_error);
    assert!(out.for_llm.contains("no output"), "{}", out.for_llm);

    // Steady output survives past the idle window
    let out = stack
        .registry
        .dispatch(
            "run_command",
            json!({"command": "for i in 1 2 3 4; do echo beat; sleep 0.4; done"}),
            &ctx,
        )
        .await;
    assert!(!out.is_error, "{}", out.for_llm);
}

#[tokio::test]
async fn absolute_ceiling_reported_despite_activity() {
    let provider = ScriptedProvider::new(vec![]);
    let mut config = Config::default();
    config.commands.idle_timeout_secs = 30;
    config.commands.max_timeout_secs = 1;
    let stack = stack(provider, config);
    let ctx = context(&stack);

    let out = stack
        .registry
        .dispatch(
            "run_command",
            json!({"command": "while true; do echo spin; sleep 0.2; done"}),
            &ctx,
        )
        .await;
    assert!(out.is_error);
    assert!(out.for_llm.contains("maximum runtime"), "{}", out.for_llm);
}

#[tokio::test]
async fn subagent_trace_attached_to_parent_transcript() {
    // Turn 1 (parent): spawn a code-explorer subagent.
    // Turn 2 (subagent): list files. Turn 3 (subagent): complete.
    // Turn 4 (parent): complete.
    let provider = ScriptedProvider::new(vec![
        LLMResponse::with_tools(
            "Delegating",
            vec![call(
                "parent1",
                "spawn_agent",
                json!({
                    "description": "explore workspace",
                    "prompt": "List the files in the workspace and summarize",
                    "agent_type": "code-explorer"
                }),
            )],
        ),
        LLMResponse::with_tools(
            "",
            vec![call("inner1", "list_files", json!({}))],
        ),
        completion("inner2", "Workspace is empty"),
        completion("parent2", "Delegation finished"),
    ]);
    let stack = stack(provider.clone(), Config::default());
    let ctx = context(&stack);
    let agent = agent_for(provider, &stack, ctx);

    let outcome = agent.run("explore via subagent").await;
    assert!(outcome.success, "{}", outcome.final_text);

    // The folded summary came back as the tool result
    let spawn_result = outcome
        .transcript
        .iter()
        .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some("parent1"))
        .unwrap();
    assert!(spawn_result.content.contains("[code-explorer]"));
    assert!(spawn_result.content.contains("Workspace is empty"));

    // The nested trace survives on the originating call for audit
    let assistant = outcome
        .transcript
        .iter()
        .find(|m| {
            m.role == Role::Assistant
                && m.tool_calls
                    .as_ref()
                    .is_some_and(|calls| calls.iter().any(|c| c.id == "parent1"))
        })
        .unwrap();
    let spawn_call = assistant
        .tool_calls
        .as_ref()
        .unwrap()
        .iter()
        .find(|c| c.id == "parent1")
        .unwrap();
    assert_eq!(spawn_call.nested_calls.len(), 1);
    assert_eq!(spawn_call.nested_calls[0].name, "list_files");
}

#[tokio::test]
async fn consecutive_failures_give_up_after_ceiling() {
    let provider = ScriptedProvider::new(vec![
        LLMResponse::with_tools(
            "",
            vec![call("c1", "read_file", json!({"path": "does-not-exist.txt"}))],
        ),
        LLMResponse::text("That didn't work."),
        LLMResponse::text("Still nothing."),
        LLMResponse::text("I give up."),
    ]);
    let stack = stack(provider.clone(), Config::default());
    let ctx = context(&stack);
    let agent = agent_for(provider, &stack, ctx);

    let outcome = agent.run("read a missing file").await;
    assert!(!outcome.success);
    assert_eq!(outcome.completion_status, CompletionStatus::Failed);

    let nudges = outcome
        .transcript
        .iter()
        .filter(|m| m.role == Role::User && m.content.contains("previous operation failed"))
        .count();
    assert_eq!(nudges, 2);
}

#[tokio::test]
async fn streamed_task_output_readable_through_tools() {
    let provider = ScriptedProvider::new(vec![]);
    let stack = stack(provider, Config::default());
    let ctx = context(&stack);

    let task = stack
        .supervisor
        .spawn("printf 'line-1\\nline-2\\n'", Path::new("/tmp"))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let out = stack
            .registry
            .dispatch("task_output", json!({"task_id": task.task_id}), &ctx)
            .await;
        if !out.is_error && out.for_llm.contains("line-2") {
            break;
        }
        assert!(Instant::now() < deadline, "task output never arrived");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
