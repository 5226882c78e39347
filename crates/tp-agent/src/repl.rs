//! Line-oriented chat loop.
//!
//! Ctrl-C while a query is running cancels that query: the step in
//! progress (a Terraform command included) finishes, nothing after it runs
//! and the turn is never committed. Ctrl-C at the prompt or EOF ends the
//! session with a summary.

use std::fmt::Write as _;
use std::future::Future;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tp_protocol::{ApprovalSummary, Task, UsageStats};

use crate::agent::{AgentStatus, TerraformAgent};
use crate::command::TerraformCommand;
use crate::console::Console;
use crate::provider::StreamingProvider;
use crate::session::DEFAULT_EXPORT_PATH;
use crate::tracker::TaskTracker;

const HELP: &str = "\
Commands:
  help             show this help
  status           project and session status
  tokens           token usage and estimated cost
  tasks            tasks run this session
  approvals        approval decisions so far
  clear            forget the conversation and usage
  refresh          re-scan the project files
  export [path]    save the conversation (default conversation_export.json)
  import <path>    replace the conversation from a file
  approve [text]   approve deferred operations (matching text, if given)
  terraform <cmd>  run init, validate, plan, apply, destroy, show, output,
                   state list|show, workspace list|select|new, import or
                   version directly
  exit | quit | q  leave
Anything else is sent to the assistant.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Help,
    Status,
    Tokens,
    Tasks,
    Approvals,
    Clear,
    Refresh,
    Export(PathBuf),
    Import(PathBuf),
    Exit,
    /// Approve deferred requests, optionally only those matching a pattern.
    Approve(Option<String>),
    Terraform(TerraformCommand),
    /// Malformed command; the message explains the expected form.
    Usage(&'static str),
    Query(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        match (head.to_lowercase().as_str(), rest) {
            ("", _) => Self::Empty,
            ("help", "") => Self::Help,
            ("status", "") => Self::Status,
            ("tokens", "") => Self::Tokens,
            ("tasks", "") => Self::Tasks,
            ("approvals", "") => Self::Approvals,
            ("clear", "") => Self::Clear,
            ("refresh", "") => Self::Refresh,
            ("exit" | "quit" | "q", "") => Self::Exit,
            ("export", "") => Self::Export(PathBuf::from(DEFAULT_EXPORT_PATH)),
            ("export", path) => Self::Export(PathBuf::from(path)),
            ("import", "") => Self::Usage("usage: import <path>"),
            ("import", path) => Self::Import(PathBuf::from(path)),
            ("approve", "") => Self::Approve(None),
            ("approve", pattern) => Self::Approve(Some(pattern.to_string())),
            _ => match TerraformCommand::detect(line) {
                Some(command) => Self::Terraform(command),
                None => Self::Query(line.to_string()),
            },
        }
    }
}

/// Run the chat loop until exit, EOF or Ctrl-C at the prompt.
pub async fn run<P: StreamingProvider>(
    agent: &mut TerraformAgent<P>,
    console: Arc<Console>,
    streaming: bool,
) -> anyhow::Result<()> {
    let streamed = Arc::new(Mutex::new(String::new()));
    if streaming {
        let sink = streamed.clone();
        agent.set_subscriber(move |text| {
            sink.lock().unwrap_or_else(|e| e.into_inner()).push_str(text);
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(text.as_bytes());
            let _ = stdout.flush();
        });
    }
    let tracker = agent.tracker().clone();

    println!("TerraPilot ready. Type 'help' for commands.");
    loop {
        let line = tokio::select! {
            line = console.read_line("\nYou: ") => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            println!();
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Status => println!("{}", render_status(&agent.status().await)),
            ReplCommand::Tokens => println!("{}", render_usage(&agent.usage_stats())),
            ReplCommand::Tasks => println!("{}", render_tasks(&agent.tasks())),
            ReplCommand::Approvals => println!("{}", render_approvals(&agent.approvals())),
            ReplCommand::Clear => {
                agent.clear();
                println!("Conversation cleared.");
            }
            ReplCommand::Refresh => match agent.refresh() {
                Ok(snapshot) => println!(
                    "Project re-scanned: {} resources.",
                    snapshot.resource_count()
                ),
                Err(e) => println!("Refresh failed: {e}"),
            },
            ReplCommand::Export(path) => match agent.export(&path).await {
                Ok(()) => println!("Conversation exported to {}", path.display()),
                Err(e) => println!("Export failed: {e}"),
            },
            ReplCommand::Import(path) => match agent.import(&path).await {
                Ok(()) => println!("Conversation imported from {}", path.display()),
                Err(e) => println!("Import failed: {e}"),
            },
            ReplCommand::Approve(pattern) => {
                let count = agent.approve_pending(pattern.as_deref());
                println!("Approved {count} pending operation(s).");
            }
            ReplCommand::Terraform(command) => {
                let outcome = drive(agent.run_command(&command), &tracker, interrupt).await;
                match outcome {
                    Ok(text) => println!("{text}"),
                    Err(e) => println!("{e}"),
                }
            }
            ReplCommand::Usage(message) => println!("{message}"),
            ReplCommand::Exit => break,
            ReplCommand::Query(query) => {
                streamed.lock().unwrap_or_else(|e| e.into_inner()).clear();
                print!("\nAssistant: ");
                let _ = std::io::stdout().flush();

                let outcome = drive(ask(agent, &query, streaming), &tracker, interrupt).await;
                let printed = std::mem::take(&mut *streamed.lock().unwrap_or_else(|e| e.into_inner()));
                match outcome {
                    Ok(answer) => println!("{}", unprinted(&printed, &answer)),
                    Err(e) => println!("{e}"),
                }
            }
        }
    }

    println!("{}", render_summary(agent));
    Ok(())
}

/// Await `work` to completion. Each time `interrupt` resolves the running
/// tasks are cancelled and waiting continues: `work` is never dropped, so
/// a Terraform process in flight is not killed halfway.
pub async fn drive<W, I, F>(work: W, tracker: &TaskTracker, mut interrupt: I) -> W::Output
where
    W: Future,
    I: FnMut() -> F,
    F: Future<Output = ()>,
{
    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => return output,
            () = interrupt() => {
                let cancelled = tracker.cancel_running();
                tracing::info!(cancelled, "interrupted; waiting for the current step");
                println!("\n[interrupting after the current step...]");
            }
        }
    }
}

/// Resolves on Ctrl-C; never, if the handler cannot be installed.
async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn ask<P: StreamingProvider>(
    agent: &mut TerraformAgent<P>,
    query: &str,
    streaming: bool,
) -> crate::error::AgentResult<String> {
    if streaming {
        agent.ask_streaming(query).await
    } else {
        agent.ask(query).await
    }
}

/// The part of `answer` not already shown by the stream.
fn unprinted<'a>(printed: &str, answer: &'a str) -> std::borrow::Cow<'a, str> {
    if printed.is_empty() {
        answer.into()
    } else if let Some(rest) = answer.strip_prefix(printed) {
        rest.into()
    } else {
        format!("\n\n{answer}").into()
    }
}

// ── Rendering ─────────────────────────────────────────────────

pub fn render_status(status: &AgentStatus) -> String {
    let mut out = String::from("Status:");
    let _ = write!(out, "\n  Provider:          {}", status.provider);
    let _ = write!(out, "\n  Working directory: {}", status.working_dir.display());
    let _ = write!(
        out,
        "\n  Terraform:         {}",
        status.terraform_version.as_deref().unwrap_or("not available")
    );
    let _ = write!(
        out,
        "\n  Initialized:       {}",
        if status.initialized { "yes" } else { "no" }
    );
    match status.resource_count {
        Some(count) => {
            let _ = write!(out, "\n  Resources:         {count}");
        }
        None => out.push_str("\n  Resources:         project could not be parsed"),
    }
    let _ = write!(
        out,
        "\n  Human approval:    {}",
        if status.human_in_the_loop { "on" } else { "off" }
    );
    let _ = write!(out, "\n  Conversation:      {} turns", status.conversation_turns);
    if let Some(age) = status.snapshot_age {
        let _ = write!(out, "\n  Snapshot age:      {}s", age.as_secs());
    }
    out
}

pub fn render_usage(stats: &UsageStats) -> String {
    format!(
        "Token usage:\n  Input:          {}\n  Output:         {}\n  Cache read:     {}\n  Cache creation: {}\n  Total:          {}\n  Estimated cost: ${:.4}",
        stats.total_input_tokens,
        stats.total_output_tokens,
        stats.cache_read_tokens,
        stats.cache_creation_tokens,
        stats.total_tokens,
        stats.estimated_cost_usd,
    )
}

pub fn render_tasks(tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return "No tasks yet.".to_string();
    }
    let mut out = String::from("Tasks:");
    for task in tasks {
        let _ = write!(
            out,
            "\n  [{}] {} ({:.0}%)",
            task.status,
            task.description,
            task.progress * 100.0
        );
        if let Some(error) = &task.error {
            let _ = write!(out, " error: {error}");
        }
    }
    out
}

pub fn render_approvals(summary: &ApprovalSummary) -> String {
    format!(
        "Approvals:\n  Pending:   {}\n  Approved:  {}\n  Rejected:  {}\n  Modified:  {}\n  High risk: {}",
        summary.pending_count,
        summary.total_approved,
        summary.total_rejected,
        summary.total_modified,
        summary.high_risk_operations,
    )
}

fn render_summary<P: StreamingProvider>(agent: &TerraformAgent<P>) -> String {
    let stats = agent.usage_stats();
    format!(
        "Session summary: {} tasks, {} tokens, estimated cost ${:.4}. Goodbye!",
        agent.tasks().len(),
        stats.total_tokens,
        stats.estimated_cost_usd
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tp_protocol::{TaskStatus, TokenUsage};

    #[test]
    fn parses_commands_case_insensitively() {
        assert_eq!(ReplCommand::parse("  "), ReplCommand::Empty);
        assert_eq!(ReplCommand::parse("HELP"), ReplCommand::Help);
        assert_eq!(ReplCommand::parse("q"), ReplCommand::Exit);
        assert_eq!(ReplCommand::parse("Quit"), ReplCommand::Exit);
        assert_eq!(ReplCommand::parse("tokens"), ReplCommand::Tokens);
    }

    #[test]
    fn export_and_import_paths() {
        assert_eq!(
            ReplCommand::parse("export"),
            ReplCommand::Export(PathBuf::from("conversation_export.json"))
        );
        assert_eq!(
            ReplCommand::parse("export  /tmp/chat.json "),
            ReplCommand::Export(PathBuf::from("/tmp/chat.json"))
        );
        assert_eq!(
            ReplCommand::parse("import chat.json"),
            ReplCommand::Import(PathBuf::from("chat.json"))
        );
        assert!(matches!(ReplCommand::parse("import"), ReplCommand::Usage(_)));
    }

    #[test]
    fn anything_else_is_a_query() {
        assert_eq!(
            ReplCommand::parse("status of my vpc?"),
            ReplCommand::Query("status of my vpc?".into())
        );
        assert_eq!(
            ReplCommand::parse("what does main.tf define"),
            ReplCommand::Query("what does main.tf define".into())
        );
    }

    #[test]
    fn terraform_lines_and_approvals() {
        assert_eq!(
            ReplCommand::parse("terraform plan"),
            ReplCommand::Terraform(TerraformCommand::Plan)
        );
        assert_eq!(
            ReplCommand::parse("run terraform workspace new dev"),
            ReplCommand::Terraform(TerraformCommand::WorkspaceNew("dev".into()))
        );
        assert_eq!(
            ReplCommand::parse("terraform plan shows a replace, is that bad?"),
            ReplCommand::Query("terraform plan shows a replace, is that bad?".into())
        );
        assert_eq!(ReplCommand::parse("approve"), ReplCommand::Approve(None));
        assert_eq!(
            ReplCommand::parse("approve destroy"),
            ReplCommand::Approve(Some("destroy".into()))
        );
    }

    #[tokio::test]
    async fn drive_cancels_but_keeps_waiting() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let tracker = TaskTracker::new();
        let task = tracker.create("Process query: slow");
        let flag = AtomicBool::new(false);
        let finished = &flag;
        let mut interrupts = 0;
        let done = drive(
            tracker.dispatch(task.id, |ctx| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                finished.store(true, Ordering::SeqCst);
                assert!(ctx.is_cancelled());
                Ok(serde_json::Value::Null)
            }),
            &tracker,
            || {
                interrupts += 1;
                let first = interrupts == 1;
                async move {
                    if first {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                }
            },
        )
        .await
        .unwrap();

        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(done.status, TaskStatus::Cancelled);
        assert_eq!(interrupts, 2);
    }

    #[test]
    fn unprinted_returns_only_the_tail() {
        assert_eq!(unprinted("", "full answer"), "full answer");
        assert_eq!(unprinted("Hello", "Hello\n\n> note"), "\n\n> note");
        assert_eq!(unprinted("Checking.", "Done."), "\n\nDone.");
    }

    #[test]
    fn renders_usage_and_tasks() {
        let usage = render_usage(&TokenUsage::new(1_000_000, 0, 0, 0).stats());
        assert!(usage.contains("Estimated cost: $3.0000"));

        let mut task = Task::new("Process query: hi");
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Completed).unwrap();
        let rendered = render_tasks(&[task]);
        assert!(rendered.contains("Process query: hi (100%)"));
        assert_eq!(render_tasks(&[]), "No tasks yet.");
    }
}
