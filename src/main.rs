//! esaa CLI - deterministic event-sourced orchestrator core

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use esaa_core::adapter::MockAgentAdapter;
use esaa_core::error::{FixSuggestion, OrchestratorError};
use esaa_core::service::OrchestratorService;

#[derive(Parser)]
#[command(name = "esaa")]
#[command(about = "Deterministic, event-sourced orchestrator core for agent task roadmaps")]
#[command(version)]
struct Cli {
    /// Repository root containing .roadmap/
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold .roadmap/ and seed the baseline tasks
    Init {
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        master_correlation_id: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Autonomously drive dispatch cycles with the mock adapter
    Run {
        #[arg(long, default_value_t = 10)]
        steps: u32,
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate and apply a single agent output
    Submit {
        /// Path to a JSON agent output file, or "-" for stdin
        file: String,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Process queued agent outputs under .roadmap/inbox/
    Process {
        #[arg(long)]
        dry_run: bool,
    },
    /// Recompute and persist the roadmap/issues/lessons views
    Project,
    /// Compare the computed projection hash against the stored roadmap
    Verify,
    /// Materialize the roadmap as of an earlier event_seq or event_id
    Replay {
        #[arg(long)]
        until: String,
        #[arg(long)]
        no_write: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let service = OrchestratorService::new(cli.root);

    let result = match cli.command {
        Commands::Init { run_id, master_correlation_id, force } => {
            service.init(&run_id, master_correlation_id.as_deref(), force)
        }
        Commands::Run { steps, dry_run } => {
            let adapter = MockAgentAdapter::new("mock-agent");
            service.run(&adapter, steps, dry_run)
        }
        Commands::Submit { file, actor, dry_run } => read_agent_output(&file)
            .and_then(|output| service.submit(&output, &actor, dry_run)),
        Commands::Process { dry_run } => service.process(dry_run),
        Commands::Project => service.project(),
        Commands::Verify => service.verify(),
        Commands::Replay { until, no_write } => service.replay(&until, !no_write),
    };

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
            if value.get("verify_status").and_then(|v| v.as_str()).map(|s| s == "mismatch" || s == "corrupted").unwrap_or(false) {
                return ExitCode::from(2);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            print_cli_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn print_cli_error(error: &OrchestratorError) {
    eprintln!(
        "{} {}",
        "Error:".red().bold(),
        serde_json::json!({"error_code": error.code(), "error_message": error.to_string()})
    );
    if let Some(suggestion) = error.fix_suggestion() {
        eprintln!("  {} {}", "Fix:".yellow(), suggestion);
    }
}

fn read_agent_output(file: &str) -> Result<serde_json::Value, OrchestratorError> {
    let text = if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file)?
    };
    Ok(serde_json::from_str(&text)?)
}
