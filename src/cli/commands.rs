//! CLI command definitions for agent-replay.
//!
//! Three commands: `run` replays merged changes against the agent, `stats`
//! prints aggregate statistics for a stored run, and `analyze` exports a
//! full JSON report including per-session divergence.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::discovery::{is_url, DiscoveryClient, DiscoveryConfig, RepoIdentity};
use crate::llm::OpenRouterClient;
use crate::replay::ReplayController;
use crate::runner::{AgentConfig, TaskRunner};
use crate::stats::{AggregateStats, StatsReport};
use crate::storage::{Database, RecordStore};
use crate::workspace::WorkspaceManager;

/// Default collaborator model for selection and prompt generation.
const DEFAULT_MODEL: &str = "openai/gpt-5.2-codex:nitro";

/// Default model handed to the agent executable.
const DEFAULT_AGENT_MODEL: &str = "sonnet";

/// Default run database path.
const DEFAULT_DB_PATH: &str = "./replay-db.json";

/// Default working directory for clones, worktrees and archives.
const DEFAULT_WORK_DIR: &str = "./.agent-replay";

/// Replay merged GitHub changes against an autonomous coding agent.
#[derive(Parser)]
#[command(name = "agent-replay")]
#[command(about = "Replay merged GitHub changes against an autonomous coding agent")]
#[command(version)]
#[command(
    long_about = "agent-replay selects merged PRs from a repository's recent history, reverse-engineers the prompt a human might have written for each, and replays it against an autonomous agent in an isolated checkout at the PR's base commit.\n\nEvery session is recorded in a JSON database for later analysis.\n\nExample usage:\n  agent-replay run https://github.com/owner/repo --count 5 --days 30\n  agent-replay stats ./replay-db.json --top 20"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Discover, select and replay merged changes against the agent.
    Run(RunArgs),

    /// Print aggregate statistics for a run database.
    Stats(StatsArgs),

    /// Export a full analysis report for a run database.
    Analyze(AnalyzeArgs),
}

/// Arguments for `agent-replay run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// GitHub repository URL or path to a local clone.
    pub target: String,

    /// How many days of merge history to search.
    #[arg(short = 'd', long, default_value = "30")]
    pub days: u32,

    /// Number of tasks to select and replay.
    #[arg(short = 'n', long, default_value = "5")]
    pub count: usize,

    /// Extra natural-language selection criteria for the collaborator.
    #[arg(long)]
    pub instructions: Option<String>,

    /// Run database output path.
    #[arg(short = 'o', long, default_value = DEFAULT_DB_PATH)]
    pub output: String,

    /// Working directory for the canonical clone, worktrees and archives.
    #[arg(long, default_value = DEFAULT_WORK_DIR)]
    pub work_dir: String,

    /// Select and print tasks without executing the agent.
    #[arg(long)]
    pub dry_run: bool,

    /// Collaborator model for selection and prompt generation.
    #[arg(short = 'm', long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Model passed to the agent executable.
    #[arg(long, default_value = DEFAULT_AGENT_MODEL)]
    pub agent_model: String,

    /// Agent executable name or path.
    #[arg(long, default_value = "claude")]
    pub agent: String,

    /// Per-task agent timeout in seconds.
    #[arg(long, default_value = "600")]
    pub timeout_secs: u64,

    /// OpenRouter API key (can also be set via OPENROUTER_API_KEY or LITELLM_API_KEY env var).
    #[arg(long, env = "OPENROUTER_API_KEY")]
    pub api_key: Option<String>,

    /// GitHub API token for discovery (raises rate limits).
    #[arg(long, env = "GITHUB_TOKEN")]
    pub github_token: Option<String>,
}

/// Arguments for `agent-replay stats`.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Run database to read.
    #[arg(default_value = DEFAULT_DB_PATH)]
    pub database: String,

    /// How many entries to show per ranking.
    #[arg(short = 't', long, default_value = "10")]
    pub top: usize,

    /// Emit the report as JSON instead of text.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `agent-replay analyze`.
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// Run database to read.
    #[arg(default_value = DEFAULT_DB_PATH)]
    pub database: String,

    /// Report output path.
    #[arg(short = 'o', long, default_value = "./replay-report.json")]
    pub output: String,

    /// How many entries to keep per ranking.
    #[arg(short = 't', long, default_value = "25")]
    pub top: usize,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// This is the main entry point for the agent-replay CLI. Per-task
/// failures inside a run never propagate here; only setup failures do.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_replay_command(args).await?,
        Commands::Stats(args) => run_stats_command(args)?,
        Commands::Analyze(args) => run_analyze_command(args)?,
    }
    Ok(())
}

async fn run_replay_command(args: RunArgs) -> anyhow::Result<()> {
    let work_base = PathBuf::from(&args.work_dir);
    let repo = resolve_identity(&args.target)?;
    info!(repo = %repo.full_name(), days = args.days, "discovering merged changes");

    let workspaces = WorkspaceManager::from_target(&args.target, &work_base)?;
    let reclaimed = workspaces.cleanup_orphans()?;
    if reclaimed > 0 {
        info!(reclaimed, "removed orphaned workspaces from a previous run");
    }

    let discovery = DiscoveryClient::new(args.github_token.clone());
    let config = DiscoveryConfig {
        days_back: args.days,
        ..DiscoveryConfig::default()
    };
    let candidates = discovery.find_merged_tasks(&repo, &config).await?;
    if candidates.is_empty() {
        info!("no merged changes found in the window, nothing to do");
        return Ok(());
    }
    info!(candidates = candidates.len(), "discovery finished");

    let collaborator = match args.api_key {
        Some(key) => OpenRouterClient::new(key),
        None => OpenRouterClient::from_env()?,
    };

    let mut agent_config = AgentConfig::new(&args.agent_model, args.timeout_secs);
    agent_config.executable = args.agent.clone();
    let controller = ReplayController::new(
        collaborator,
        workspaces,
        TaskRunner::new(agent_config),
        &args.model,
    );

    let selected = controller
        .select(&candidates, args.count, args.instructions.as_deref())
        .await;
    info!(selected = selected.len(), "task selection finished");

    if args.dry_run {
        println!("Selected {} task(s):", selected.len());
        for task in &selected {
            println!("  {}", task.summary());
        }
        return Ok(());
    }

    let database = Database::new(&repo.owner, &repo.name, &repo.clone_url(), args.days);
    let mut store = RecordStore::create(PathBuf::from(&args.output), database)?;

    let (cancel_tx, mut cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the current task then stopping");
            let _ = cancel_tx.send(true);
        }
    });

    let mut summary = controller.run(&selected, &mut store, &mut cancel_rx).await;
    summary.skipped += candidates.len().saturating_sub(selected.len()) as u64;
    info!(
        executed = summary.executed,
        completed = summary.completed,
        failed = summary.failed,
        timed_out = summary.timed_out,
        skipped = summary.skipped,
        cancelled = summary.cancelled,
        "run finished"
    );

    let report = AggregateStats::compute(store.database()).report(10);
    println!("{}", report.render_text());
    println!("Database written to {}", store.path().display());

    Ok(())
}

fn run_stats_command(args: StatsArgs) -> anyhow::Result<()> {
    let database = Database::load(Path::new(&args.database))?;
    let report = AggregateStats::compute(&database).report(args.top);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Run of {}/{} at {}\n",
            database.repo_owner, database.repo_name, database.run_timestamp
        );
        println!("{}", report.render_text());
    }
    Ok(())
}

/// Per-session entry in the analysis report.
#[derive(Debug, Clone, Serialize)]
struct SessionAnalysis {
    task_id: u64,
    task_title: String,
    task_url: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    overlap_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    divergence: Option<crate::compare::Divergence>,
    files_read: usize,
    files_edited: usize,
    commands_run: usize,
}

#[derive(Debug, Clone, Serialize)]
struct AnalysisReport {
    repo: String,
    run_timestamp: chrono::DateTime<chrono::Utc>,
    days_analyzed: u32,
    stats: StatsReport,
    sessions: Vec<SessionAnalysis>,
}

fn run_analyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    let database = Database::load(Path::new(&args.database))?;
    let stats = AggregateStats::compute(&database).report(args.top);

    let sessions: Vec<SessionAnalysis> = database
        .sessions
        .iter()
        .map(|record| SessionAnalysis {
            task_id: record.task_id,
            task_title: record.task_title.clone(),
            task_url: record.task_url.clone(),
            status: record.status.as_str().to_string(),
            session_id: record.session_id.clone(),
            error: record.error.clone(),
            overlap_ratio: record.comparison.as_ref().map(|c| c.overlap_ratio),
            divergence: record.comparison.as_ref().map(|c| c.divergence),
            files_read: record.summary.as_ref().map_or(0, |s| s.files_read.len()),
            files_edited: record.summary.as_ref().map_or(0, |s| s.files_edited.len()),
            commands_run: record.summary.as_ref().map_or(0, |s| s.commands.len()),
        })
        .collect();

    let report = AnalysisReport {
        repo: format!("{}/{}", database.repo_owner, database.repo_name),
        run_timestamp: database.run_timestamp,
        days_analyzed: database.days_analyzed,
        stats,
        sessions,
    };

    let output = Path::new(&args.output);
    std::fs::write(output, serde_json::to_string_pretty(&report)?)?;
    info!(path = %output.display(), sessions = report.sessions.len(), "analysis report written");
    println!("Report written to {}", output.display());
    Ok(())
}

/// Resolve the repository identity behind a target.
///
/// URL targets parse directly. Local targets resolve through their origin
/// remote, since discovery still needs the GitHub coordinates.
fn resolve_identity(target: &str) -> anyhow::Result<RepoIdentity> {
    if is_url(target) {
        return Ok(RepoIdentity::parse(target)?);
    }

    let origin = crate::workspace::git(
        Path::new(target),
        &["config", "--get", "remote.origin.url"],
    )
    .map_err(|_| crate::error::SetupError::InvalidTarget(target.to_string()))?;
    Ok(RepoIdentity::parse(origin.trim())?)
}
