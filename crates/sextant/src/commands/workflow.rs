//! Workflow command - inspect and maintain checkpoints.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};

use super::Context;

/// Arguments for the workflow command.
#[derive(Args, Debug)]
pub struct WorkflowArgs {
    #[command(subcommand)]
    pub command: WorkflowCommand,
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommand {
    /// List running and paused workflows
    List,

    /// Mark running workflows idle for too long as failed
    Cleanup {
        /// Idle threshold in hours (default from config)
        #[arg(long)]
        hours: Option<u64>,
    },
}

/// Run the workflow command.
pub async fn run(args: WorkflowArgs, ctx: &Context) -> Result<()> {
    match args.command {
        WorkflowCommand::List => cmd_list(ctx),
        WorkflowCommand::Cleanup { hours } => cmd_cleanup(hours, ctx),
    }
}

fn cmd_list(ctx: &Context) -> Result<()> {
    let store = ctx.open_checkpoints()?;
    let workflows = store.list_active()?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Active Workflows").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();

    if workflows.is_empty() {
        println!("{}", dim.apply_to("No active workflows"));
        return Ok(());
    }

    for wf in &workflows {
        println!(
            "  #{:<6} {:<10} {:<8} {}",
            style(wf.issue_number).cyan(),
            wf.phase.as_str(),
            wf.status.as_str(),
            wf.branch
        );
        let mut detail = format!("updated {}", wf.updated_at.format("%Y-%m-%d %H:%M"));
        if wf.retry_count > 0 {
            detail.push_str(&format!(", {} retries", wf.retry_count));
        }
        if ctx.verbose {
            detail.push_str(&format!(", id {}", wf.id));
        }
        println!("          {}", dim.apply_to(detail));
    }
    println!();
    Ok(())
}

fn cmd_cleanup(hours: Option<u64>, ctx: &Context) -> Result<()> {
    let threshold = hours.unwrap_or_else(|| u64::from(ctx.config.checkpoint().stale_after_hours));
    let store = ctx.open_checkpoints()?;
    let cleaned = store.cleanup_stale_workflows(threshold)?;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::json!({ "cleaned": cleaned, "threshold_hours": threshold })
        );
    } else if cleaned == 0 {
        println!("{}", Style::new().dim().apply_to("No stale workflows"));
    } else {
        println!(
            "{} Marked {} stale workflow(s) as failed (idle > {}h)",
            style("✓").green(),
            style(cleaned).cyan(),
            threshold
        );
    }
    Ok(())
}
