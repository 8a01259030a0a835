//! Session commands - called by editor hooks at session start and end.
//!
//! Both commands exit zero when the session is degraded (stores unavailable,
//! git missing, bad embedder config): the editor session must never fail
//! because context could not be gathered.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use sextant_config::ContextFormat;
use sextant_hooks::{SessionEndSummary, SessionStartContext};
use tracing::error;

use super::{Context, read_stdin_json};

/// Arguments for the session-start command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Issue number (otherwise parsed from the branch name)
    #[arg(long)]
    pub issue: Option<u64>,

    /// Session identifier used to pair with session-end
    #[arg(long, env = "SEXTANT_SESSION_ID")]
    pub session_id: Option<String>,

    /// Branch name (otherwise read from git)
    #[arg(long)]
    pub branch: Option<String>,

    /// Token budget for the rendered context
    #[arg(long)]
    pub max_tokens: Option<usize>,

    /// Output shape: markdown, bullets or tagged
    #[arg(long)]
    pub format: Option<ContextFormat>,
}

impl StartArgs {
    /// Flags win over the JSON context.
    fn apply(self, mut input: SessionStartContext) -> SessionStartContext {
        input.issue_number = self.issue.or(input.issue_number);
        input.session_id = self.session_id.or(input.session_id);
        input.branch = self.branch.or(input.branch);
        input.max_tokens = self.max_tokens.or(input.max_tokens);
        input.format = self.format.or(input.format);
        input
    }
}

/// Arguments for the session-end command.
#[derive(Args, Debug)]
pub struct EndArgs {
    /// Session identifier (otherwise taken from stdin or the handoff file)
    #[arg(long, env = "SEXTANT_SESSION_ID")]
    pub session_id: Option<String>,
}

/// Run session-start.
pub async fn run_start(args: StartArgs, ctx: &Context) -> Result<()> {
    let input = args.apply(read_stdin_json::<SessionStartContext>()?);

    let hooks = match ctx.build_hooks() {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "Session start degraded: stores unavailable");
            if ctx.json_output {
                println!("{}", serde_json::json!({ "summary": "", "error": e.to_string() }));
            }
            return Ok(());
        }
    };

    let result = hooks.on_session_start(input).await;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if !result.summary.is_empty() {
        println!("{}", result.summary);
    }
    if ctx.verbose {
        let dim = Style::new().dim();
        eprintln!(
            "{}",
            dim.apply_to(format!(
                "session {}: {} learnings, {} patterns, {} mistakes, {} topics, ~{} tokens",
                result.session_metadata.session_id,
                result.learnings.len(),
                result.patterns.len(),
                result.mistakes.len(),
                result.topics.len(),
                result.token_count
            ))
        );
    }
    Ok(())
}

/// Run session-end.
pub async fn run_end(args: EndArgs, ctx: &Context) -> Result<()> {
    let mut summary = read_stdin_json::<SessionEndSummary>()?;
    summary.session_id = args.session_id.or(summary.session_id);

    let hooks = match ctx.build_hooks() {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "Session end degraded: stores unavailable");
            return Ok(());
        }
    };

    let result = hooks.on_session_end(summary).await;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "{} {} learnings stored, {} commits logged",
            style("✓").green(),
            style(result.learnings_stored).cyan(),
            style(result.commits_logged).cyan()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_stdin() {
        let args = StartArgs {
            issue: Some(9),
            session_id: None,
            branch: None,
            max_tokens: Some(500),
            format: None,
        };
        let input = SessionStartContext {
            issue_number: Some(1),
            session_id: Some("from-stdin".into()),
            format: Some(ContextFormat::Bullets),
            ..Default::default()
        };
        let merged = args.apply(input);
        assert_eq!(merged.issue_number, Some(9));
        assert_eq!(merged.session_id.as_deref(), Some("from-stdin"));
        assert_eq!(merged.max_tokens, Some(500));
        assert_eq!(merged.format, Some(ContextFormat::Bullets));
    }
}
