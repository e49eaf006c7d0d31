//! CLI module — command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`. This is the
//! rendering collaborator of the core: it implements `UiCallback` for the
//! terminal and drives the approval gate from stdin.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use femtocode::agent::AgentLoop;
use femtocode::approval::{ApprovalChoice, ApprovalGate};
use femtocode::bridge::BridgeRegistry;
use femtocode::config::Config;
use femtocode::exec::CommandExecutor;
use femtocode::providers::provider_from_config;
use femtocode::session::SessionManager;
use femtocode::supervisor::{Supervisor, TaskStatus};
use femtocode::tools::{standard_registry, CompletionStatus, Mode, ToolContext};
use femtocode::ui::UiCallback;
use femtocode::undo::UndoJournal;
use femtocode::utils::init_logging;

#[derive(Parser)]
#[command(name = "femtocode")]
#[command(version)]
#[command(about = "Ultra-lightweight interactive coding agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent on a task
    Run {
        /// The task to accomplish
        task: String,
        /// Workspace directory (defaults to the configured workspace)
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Plan mode: read-only exploration, mutating tools blocked
        #[arg(long)]
        plan: bool,
        /// Skip approval prompts (commands run without asking)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Show the effective configuration
    Config,
}

/// Terminal renderer for agent activity.
struct ConsoleUi;

/// Char-boundary-safe preview of potentially long text.
fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}

impl UiCallback for ConsoleUi {
    fn on_assistant_message(&self, content: &str) {
        println!("\n{}", content);
    }

    fn on_tool_call(&self, name: &str, args: &str, _call_id: &str) {
        println!("  ⏺ {}({})", name, preview(args, 120));
    }

    fn on_tool_result(&self, _name: &str, summary: &str, success: bool, _call_id: &str) {
        let bullet = if success { "⎿" } else { "⎿ ✗" };
        let first_line = summary.lines().next().unwrap_or("");
        println!("    {} {}", bullet, preview(first_line, 160));
    }

    fn on_nested_tool_call(&self, depth: u32, _parent_id: &str, name: &str, _call_id: &str) {
        println!("  {}↳ {}", "  ".repeat(depth as usize), name);
    }

    fn on_command_output(&self, line: &str, is_stderr: bool) {
        if is_stderr {
            eprintln!("    │ {}", line);
        } else {
            println!("    │ {}", line);
        }
    }

    fn on_task_status(&self, task_id: &str, status: TaskStatus) {
        println!("  [task {}] {}", task_id, status);
    }

    fn on_interrupt(&self) {
        println!("\nInterrupted.");
    }
}

/// Watch the approval gate and drive it from stdin.
async fn approval_prompt_loop(gate: Arc<ApprovalGate>) {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if let Some(pending) = gate.pending() {
            println!("\nApproval required");
            println!("  Command   · {}", pending.command);
            println!("  Directory · {}", pending.working_dir);
            for (i, option) in pending.options.iter().enumerate() {
                println!("  {}. {} — {}", i + 1, option.label, option.description);
            }
            print!("Choose [1-3]: ");
            use std::io::Write;
            let _ = std::io::stdout().flush();

            let choice = match stdin.next_line().await {
                Ok(Some(line)) => match line.trim() {
                    "2" => ApprovalChoice::ApproveAndRemember,
                    "3" => ApprovalChoice::Decline,
                    _ => ApprovalChoice::ApproveOnce,
                },
                _ => ApprovalChoice::Decline,
            };
            let _ = gate.resolve(choice);
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}

/// Parse arguments and run the chosen command.
pub async fn run() -> Result<()> {
    // Load .env before config so key env vars are visible
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load()?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run {
            task,
            workspace,
            plan,
            auto_approve,
        } => run_task(config, task, workspace, plan, auto_approve).await,
    }
}

async fn run_task(
    config: Config,
    task: String,
    workspace: Option<PathBuf>,
    plan: bool,
    auto_approve: bool,
) -> Result<()> {
    let workspace = workspace.unwrap_or_else(|| config.workspace_path());
    std::fs::create_dir_all(&workspace)?;

    let supervisor = Arc::new(Supervisor::new(&workspace));
    let executor = Arc::new(CommandExecutor::from_config(
        &config.commands,
        Arc::clone(&supervisor),
    )?);
    let provider = provider_from_config(&config)?;
    let bridge = Arc::new(BridgeRegistry::new());
    let registry = standard_registry(
        &config,
        Arc::clone(&provider),
        Arc::clone(&supervisor),
        executor,
        bridge,
    );

    let journal_path = config
        .undo
        .journal_file
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| Config::dir().join("journal.jsonl"));
    if let Some(parent) = journal_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let journal = Arc::new(UndoJournal::new(config.undo.max_history, Some(journal_path)));

    let gate = Arc::new(ApprovalGate::new(auto_approve || config.approval.auto_approve));
    let mode = if plan { Mode::Plan } else { Mode::Normal };

    let ctx = ToolContext::new(workspace)
        .with_mode(mode)
        .with_approval(Arc::clone(&gate))
        .with_undo(journal)
        .with_ui(Arc::new(ConsoleUi));

    // Ctrl-C flips the cooperative interrupt flag; the loop and executors
    // notice it at their checkpoints.
    let interrupt = Arc::clone(&ctx.interrupt);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    let prompt_task = tokio::spawn(approval_prompt_loop(gate));

    // Transcript continuity for embedders and a future REPL: seed from the
    // stored session and write the final transcript back.
    let sessions = SessionManager::new();
    let mut session = sessions.get_or_create("cli:default").await;

    let agent = AgentLoop::new(config, provider, registry, ctx);
    let outcome = agent
        .run_with_history(&task, session.messages.clone())
        .await;

    session.messages = outcome.transcript.clone();
    sessions.save(&session).await;

    prompt_task.abort();
    supervisor.cleanup();

    match outcome.completion_status {
        CompletionStatus::Success => Ok(()),
        CompletionStatus::Interrupted => Ok(()),
        _ => {
            eprintln!("\nTask ended with status: {}", outcome.completion_status);
            std::process::exit(1);
        }
    }
}
