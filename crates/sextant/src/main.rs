//! Sextant - knowledge and checkpoint hooks for AI coding sessions
//!
//! Main entry point for the Sextant CLI. Editor integrations call
//! `session-start` and `session-end`; the remaining commands are for humans.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod commands;

use commands::{knowledge, session, workflow};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Sextant - knowledge and checkpoint hooks for AI coding sessions
#[derive(Parser)]
#[command(name = "sextant")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Gather context for a new session and print it
    SessionStart(session::StartArgs),

    /// Capture learnings and metrics when a session ends (JSON on stdin)
    SessionEnd(session::EndArgs),

    /// Inspect and maintain workflow checkpoints
    Workflow(workflow::WorkflowArgs),

    /// Knowledge graph operations
    Knowledge(knowledge::KnowledgeArgs),
}

/// Sextant crates, for log filters.
const CRATES: &[&str] = &[
    "sextant",
    "sextant_config",
    "sextant_embed",
    "sextant_knowledge",
    "sextant_checkpoint",
    "sextant_hooks",
];

/// Environment variable overriding the console log filter.
const LOG_ENV: &str = "SEXTANT_LOG";

fn crate_filter(level: &str, fallback: &str) -> String {
    let mut directives: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
    directives.push(fallback.to_string());
    directives.join(",")
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir()?;
    let loaded = sextant_config::load_config(Some(&cwd))?;
    let config = loaded.config.clone();
    let logging = config.logging();

    // Console on stderr (stdout carries hook output) + rolling JSON file
    let console_filter = std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| {
            if cli.verbose {
                EnvFilter::new(crate_filter("debug", "warn"))
            } else {
                EnvFilter::new(&logging.level)
            }
        });

    let (file_layer, _guard) = if logging.file {
        let file_appender = tracing_appender::rolling::daily(config.log_dir(), "sextant.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new(crate_filter("debug", "info")));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_layer)
        .init();

    for warning in &loaded.warnings {
        tracing::warn!(%warning, "Config layer skipped");
    }
    tracing::debug!(sources = ?loaded.loaded_from(), "Configuration loaded");

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
        config,
        project_dir: cwd,
    };

    match cli.command {
        Commands::SessionStart(args) => session::run_start(args, &ctx).await,
        Commands::SessionEnd(args) => session::run_end(args, &ctx).await,
        Commands::Workflow(args) => workflow::run(args, &ctx).await,
        Commands::Knowledge(args) => knowledge::run(args, &ctx).await,
    }
}
