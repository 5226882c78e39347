//! TerraPilot agent: chat with a Terraform project from the terminal.
//!
//! Loads configuration (TOML file, then environment, then flags), checks
//! the Terraform binary and model credentials, and runs the REPL.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tp_agent::agent::TerraformAgent;
use tp_agent::approval::TerminalApprover;
use tp_agent::config::AgentConfig;
use tp_agent::console::Console;
use tp_agent::repl;
use tp_protocol::Task;

#[derive(Debug, Parser)]
#[command(name = "tp-agent", version, about = "Chat with your Terraform project")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Wait for whole responses instead of streaming text.
    #[arg(long)]
    no_stream: bool,
    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
    /// Terraform project directory.
    #[arg(long)]
    terraform_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // ── Load config ─────────────────────────────────────────────
    let mut config = AgentConfig::load(args.config.as_deref())?;
    if let Some(dir) = args.terraform_dir {
        config.terraform.dir = dir;
    }
    if args.no_stream {
        config.streaming = false;
    }
    if args.log_json {
        config.log_json = true;
    }

    init_tracing(&config);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = config.provider.as_str(),
        terraform_dir = %config.terraform.dir.display(),
        "tp-agent starting"
    );

    config.validate()?;

    // ── Build agent ─────────────────────────────────────────────
    let console = Arc::new(Console::stdin());
    let decider = Arc::new(TerminalApprover::new(console.clone()));
    let mut agent = TerraformAgent::from_config(&config, decider)?;
    agent.add_task_observer(Arc::new(|task: &Task| {
        tracing::debug!(
            task_id = %task.id,
            status = %task.status,
            progress = task.progress,
            "task transition"
        );
        Ok(())
    }));

    if let Some(workspace) = &config.terraform.workspace {
        agent.select_workspace(workspace).await?;
    }

    // ── Chat ────────────────────────────────────────────────────
    repl::run(&mut agent, console, config.streaming).await?;

    tracing::info!("tp-agent stopped");
    Ok(())
}

/// Logs go to stderr so the conversation on stdout stays readable.
fn init_tracing(config: &AgentConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}
