//! Knowledge command - knowledge graph operations.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};

use super::Context;

/// Arguments for the knowledge command.
#[derive(Args, Debug)]
pub struct KnowledgeArgs {
    #[command(subcommand)]
    pub command: KnowledgeCommand,
}

#[derive(Subcommand, Debug)]
pub enum KnowledgeCommand {
    /// Show knowledge graph statistics
    Stats,
}

/// Run the knowledge command.
pub async fn run(args: KnowledgeArgs, ctx: &Context) -> Result<()> {
    match args.command {
        KnowledgeCommand::Stats => cmd_stats(ctx),
    }
}

fn cmd_stats(ctx: &Context) -> Result<()> {
    let store = ctx.open_knowledge_store()?;
    let stats = store.stats()?;
    let embedding = ctx.config.embedding();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Knowledge Statistics").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    println!("  Learnings:      {}", style(stats.learnings).cyan());
    println!("  Patterns:       {}", style(stats.patterns).cyan());
    println!("  Mistakes:       {}", style(stats.mistakes).cyan());
    println!("  Topics:         {}", style(stats.topics).cyan());
    println!("  Code areas:     {}", style(stats.code_areas).cyan());
    println!("  Files:          {}", style(stats.files).cyan());
    println!("  Relationships:  {}", style(stats.relationships).cyan());
    println!("  Embedded:       {}", style(stats.embedded).cyan());
    println!();
    println!(
        "  Embedder:       {}",
        dim.apply_to(format!("{:?}", embedding.provider).to_lowercase())
    );
    if ctx.verbose {
        println!(
            "  Database:       {}",
            dim.apply_to(ctx.config.knowledge_db_path().display())
        );
    }
    println!();
    Ok(())
}
