//! smartrun CLI — incremental pipeline runs, artifact status, run history.
//!
//! Commands:
//! - `run <profile>` — run the pipeline, skipping stages whose outputs are fresh
//! - `status <profile>` — show the state of every declared output
//! - `history` — list recent runs from a JSONL history file
//!
//! Exit codes: 0 on success, 2 for configuration or usage errors, and
//! 10 + stage ordinal for the first failing stage.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use smartrun_core::fingerprint::short;
use smartrun_core::{ArtifactState, Pipeline, StageId};
use smartrun_runner::{
    artifact_status, write_manifest, ConfigError, HistoryEntry, Orchestrator, PipelineConfig,
    ProcessRunner, RunContext, RunHistory, RunMode, RunOptions, EXIT_CONFIG, EXIT_OK,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit code for failures outside the pipeline itself (I/O on report files).
const EXIT_INTERNAL: i32 = 1;

#[derive(Parser)]
#[command(
    name = "smartrun",
    version,
    about = "smartrun — incremental runner for staged data/model pipelines"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for a profile, recomputing only what is stale.
    Run(RunArgs),
    /// Show the state of every declared output for a profile.
    Status {
        /// Profile name from the configuration file.
        profile: String,

        /// Pipeline configuration file.
        #[arg(short, long, default_value = "pipeline.toml")]
        config: PathBuf,
    },
    /// List recent runs from a history file.
    History {
        /// JSONL history file.
        #[arg(long, default_value = "smartrun-history.jsonl")]
        path: PathBuf,

        /// Number of most recent entries to show.
        #[arg(long, default_value_t = 10)]
        last: usize,
    },
}

#[derive(Args)]
#[command(group = clap::ArgGroup::new("mode").multiple(false))]
struct RunArgs {
    /// Profile name from the configuration file.
    profile: String,

    /// Pipeline configuration file.
    #[arg(short, long, default_value = "pipeline.toml")]
    config: PathBuf,

    /// Run every stage (default).
    #[arg(long, group = "mode")]
    full: bool,

    /// Run the quick subset (settings.quick_stages, default merge..signals).
    #[arg(long, group = "mode")]
    quick: bool,

    /// Run only these stages, comma separated.
    #[arg(long, group = "mode", value_delimiter = ',')]
    stages: Vec<StageId>,

    /// Force recomputation from this stage onward.
    #[arg(long, value_name = "STAGE")]
    from: Option<StageId>,

    /// Decide without executing, checking inputs, or moving files.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Write the run report as JSON to this path.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Append a summary of this run to a JSONL history file.
    #[arg(long)]
    history: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    let result = match cli.command {
        Commands::Run(args) => run_pipeline(args),
        Commands::Status { profile, config } => run_status(&profile, &config),
        Commands::History { path, last } => run_history(&path, last),
    };

    let code = match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            if err.downcast_ref::<ConfigError>().is_some() {
                EXIT_CONFIG
            } else {
                EXIT_INTERNAL
            }
        }
    };
    std::process::exit(code);
}

/// Load the configuration and resolve `profile` against the config's directory.
fn load(config_path: &Path, profile: &str) -> Result<(PipelineConfig, RunContext, Pipeline)> {
    let config = PipelineConfig::from_file(config_path)?;
    let base_dir = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let (ctx, pipeline) = config.resolve(profile, &base_dir)?;
    tracing::debug!(
        config = %config_path.display(),
        workdir = %ctx.workdir.display(),
        stages = pipeline.len(),
        "configuration loaded"
    );
    Ok((config, ctx, pipeline))
}

fn run_pipeline(args: RunArgs) -> Result<i32> {
    let (config, ctx, pipeline) = load(&args.config, &args.profile)?;

    // clap's "mode" group guarantees at most one of these is set.
    let mode = match (args.full, args.quick, args.stages.is_empty()) {
        (false, true, _) => RunMode::Quick,
        (false, false, false) => RunMode::Stages(args.stages),
        _ => RunMode::Full,
    };

    let mut options = RunOptions::for_mode(mode, &config.settings).with_dry_run(args.dry_run);
    if let Some(from) = args.from {
        options = options.with_force_from(from);
    }
    options.validate(&pipeline)?;

    let outcome = Orchestrator::new(&pipeline, &ctx, ProcessRunner).run(&options);
    let (text, code) = outcome.report.render();
    print!("{text}");

    if let Some(path) = &args.report {
        write_manifest(path, &outcome.report)
            .with_context(|| format!("writing report to {}", path.display()))?;
        println!("Report written to: {}", path.display());
    }

    if let Some(path) = &args.history {
        let entry = HistoryEntry::from_report(&outcome.report, chrono::Utc::now());
        RunHistory::new(path)
            .append(&entry)
            .with_context(|| format!("appending history to {}", path.display()))?;
    }

    Ok(code)
}

fn run_status(profile: &str, config_path: &Path) -> Result<i32> {
    let (_, ctx, pipeline) = load(config_path, profile)?;
    let status = artifact_status(&pipeline);

    println!("Profile: {profile}");
    println!("Workdir: {}", ctx.workdir.display());
    println!();
    println!("{:<10} {:<8} {}", "Stage", "State", "Path");
    println!("{}", "-".repeat(72));
    for entry in &status {
        let path = entry
            .artifact
            .path
            .strip_prefix(&ctx.workdir)
            .unwrap_or(&entry.artifact.path);
        match &entry.artifact.state {
            ArtifactState::PresentStale { reason } => println!(
                "{:<10} {:<8} {} ({reason})",
                entry.stage.name(),
                entry.artifact.state.label(),
                path.display()
            ),
            state => println!(
                "{:<10} {:<8} {}",
                entry.stage.name(),
                state.label(),
                path.display()
            ),
        }
    }

    let fresh = status.iter().filter(|s| s.artifact.state.is_fresh()).count();
    println!();
    println!("{fresh}/{} outputs fresh", status.len());
    Ok(EXIT_OK)
}

fn run_history(path: &Path, last: usize) -> Result<i32> {
    let entries = RunHistory::new(path)
        .last(last)
        .with_context(|| format!("reading history from {}", path.display()))?;

    if entries.is_empty() {
        println!("No runs recorded in {}", path.display());
        return Ok(EXIT_OK);
    }

    println!(
        "{:<20} {:<10} {:<22} {:>5} {:>8}  {}",
        "Recorded", "Profile", "Mode", "Exit", "Executed", "Pipeline"
    );
    println!("{}", "-".repeat(84));
    for entry in &entries {
        let mode = if entry.dry_run {
            format!("{} (dry)", entry.mode)
        } else {
            entry.mode.clone()
        };
        println!(
            "{:<20} {:<10} {:<22} {:>5} {:>8}  {}",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            entry.profile,
            mode,
            entry.exit_code,
            entry.executed().count(),
            short(&entry.pipeline_fingerprint)
        );
    }
    Ok(EXIT_OK)
}
