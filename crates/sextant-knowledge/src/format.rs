//! Context formatting under a token budget.
//!
//! Query results are grouped into sections (one per code area, plus
//! patterns and mistakes), each section is scored, and whole sections are
//! included greedily by descending priority until the next one would not
//! fit. Sections are never cut mid-way.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::error::KnowledgeError;
use crate::types::{Metadata, Mistake, Pattern, QueryResult};

/// Approximate characters per token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Default token budget for rendered context.
pub const DEFAULT_MAX_TOKENS: usize = 2000;

/// Bucket for learnings without a code area.
pub const GENERAL_AREA: &str = "General";

const ISSUE_BOOST: f32 = 0.3;
const MODIFIED_FILE_BOOST: f32 = 0.2;
const RECENCY_BOOST: f32 = 0.1;
const RECENCY_WINDOW_DAYS: i64 = 30;

const PATTERNS_PRIORITY: f32 = 0.7;
const MODIFIED_MISTAKES_PRIORITY: f32 = 1.0;
const OTHER_MISTAKES_PRIORITY: f32 = 0.6;

/// Estimate tokens as characters / 4, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

// ─────────────────────────────────────────────────────────────────────────────
// Options & Results
// ─────────────────────────────────────────────────────────────────────────────

/// Output shape of rendered context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Headed markdown sections.
    #[default]
    Markdown,
    /// One flat bullet list.
    Bullets,
    /// XML-like tags.
    Tagged,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Bullets => "bullets",
            Self::Tagged => "tagged",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "bullets" | "bullet" => Ok(Self::Bullets),
            "tagged" | "xml" => Ok(Self::Tagged),
            other => Err(KnowledgeError::InvalidData(format!(
                "Unknown output format: {other}"
            ))),
        }
    }
}

/// What the current session is working on, for priority boosts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorityContext {
    pub issue_number: Option<u64>,
    pub modified_files: Vec<String>,
}

/// Options for [`format_context`].
#[derive(Debug, Clone, PartialEq)]
pub struct FormatOptions {
    pub max_tokens: usize,
    pub format: OutputFormat,
    pub context: Option<PriorityContext>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            format: OutputFormat::default(),
            context: None,
        }
    }
}

impl FormatOptions {
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_context(mut self, context: PriorityContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Everything that may be rendered.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatInput<'a> {
    pub results: &'a [QueryResult],
    /// Patterns beyond those attached to `results`.
    pub patterns: &'a [Pattern],
    /// Mistakes beyond those attached to `results`.
    pub mistakes: &'a [Mistake],
}

impl<'a> FormatInput<'a> {
    pub fn results(results: &'a [QueryResult]) -> Self {
        Self {
            results,
            ..Self::default()
        }
    }
}

/// Rendered context.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct FormattedContext {
    pub content: String,
    /// Estimated tokens of `content`; never above the budget.
    pub token_count: usize,
    /// Learnings, patterns and mistakes rendered.
    pub result_count: usize,
    /// Whether any section was dropped for budget.
    pub was_filtered: bool,
    pub sections_included: usize,
    pub sections_total: usize,
}

impl FormattedContext {
    pub fn empty() -> Self {
        Self::default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Priority
// ─────────────────────────────────────────────────────────────────────────────

/// Score a result: confidence plus additive boosts.
///
/// +0.3 when it came from the session's issue, +0.2 when its file is being
/// modified, +0.1 when its metadata timestamp is under 30 days old. The sum
/// may exceed 1.0.
pub fn calculate_priority(result: &QueryResult, context: Option<&PriorityContext>) -> f32 {
    priority_at(result, context, Utc::now())
}

fn priority_at(result: &QueryResult, context: Option<&PriorityContext>, now: DateTime<Utc>) -> f32 {
    let learning = &result.learning;
    let mut priority = learning.effective_confidence();

    if let Some(ctx) = context {
        if ctx.issue_number.is_some() && ctx.issue_number == learning.source_issue {
            priority += ISSUE_BOOST;
        }
        if let Some(path) = &learning.file_path
            && ctx.modified_files.iter().any(|f| f == path)
        {
            priority += MODIFIED_FILE_BOOST;
        }
    }

    if metadata_timestamp(&learning.metadata)
        .is_some_and(|ts| now - ts <= Duration::days(RECENCY_WINDOW_DAYS))
    {
        priority += RECENCY_BOOST;
    }

    priority
}

/// `timestamp` as an RFC 3339 string or epoch milliseconds.
fn metadata_timestamp(metadata: &Metadata) -> Option<DateTime<Utc>> {
    match metadata.get("timestamp")? {
        serde_json::Value::String(s) => sextant_types::parse_ts(s),
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// Results ordered by descending priority; equal priorities keep input order.
pub fn sort_by_relevance(
    results: &[QueryResult],
    context: Option<&PriorityContext>,
) -> Vec<QueryResult> {
    let now = Utc::now();
    let mut scored: Vec<(f32, &QueryResult)> = results
        .iter()
        .map(|r| (priority_at(r, context, now), r))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, r)| r.clone()).collect()
}

/// Bucket results by code area, largest bucket first.
///
/// Learnings without an area land in [`GENERAL_AREA`]. Buckets of equal size
/// keep first-seen order.
pub fn group_by_code_area(results: &[QueryResult]) -> Vec<(String, Vec<QueryResult>)> {
    let mut groups: Vec<(String, Vec<QueryResult>)> = Vec::new();
    for result in results {
        let area = result
            .learning
            .code_area
            .clone()
            .unwrap_or_else(|| GENERAL_AREA.to_string());
        match groups.iter_mut().find(|(name, _)| *name == area) {
            Some((_, members)) => members.push(result.clone()),
            None => groups.push((area, vec![result.clone()])),
        }
    }
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    groups
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

struct Section {
    priority: f32,
    body: String,
    items: usize,
}

impl Section {
    fn tokens(&self) -> usize {
        estimate_tokens(&self.body)
    }
}

fn escape_tag(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn learning_suffix(result: &QueryResult) -> String {
    let l = &result.learning;
    let mut parts = vec![format!("confidence {:.2}", l.effective_confidence())];
    if let Some(issue) = l.source_issue {
        parts.push(format!("issue #{issue}"));
    }
    if let Some(path) = &l.file_path {
        parts.push(path.clone());
    }
    format!(" [{}]", parts.join(", "))
}

fn area_section(area: &str, members: &[QueryResult], format: OutputFormat) -> String {
    let mut out = String::new();
    match format {
        OutputFormat::Markdown => {
            let _ = writeln!(out, "## {area}\n");
            for r in members {
                let _ = writeln!(out, "- {}{}", r.learning.content, learning_suffix(r));
            }
            out.push('\n');
        }
        OutputFormat::Bullets => {
            for r in members {
                let _ = writeln!(out, "- [{area}] {}{}", r.learning.content, learning_suffix(r));
            }
        }
        OutputFormat::Tagged => {
            let _ = writeln!(out, "<area name=\"{}\">", escape_tag(area));
            for r in members {
                let _ = writeln!(
                    out,
                    "<learning confidence=\"{:.2}\">{}</learning>",
                    r.learning.effective_confidence(),
                    escape_tag(&r.learning.content)
                );
            }
            out.push_str("</area>\n");
        }
    }
    out
}

fn patterns_section(patterns: &[Pattern], format: OutputFormat) -> String {
    let mut out = String::new();
    match format {
        OutputFormat::Markdown => {
            out.push_str("## Patterns\n\n");
            for p in patterns {
                let _ = writeln!(out, "- **{}**: {}", p.name, p.description);
            }
            out.push('\n');
        }
        OutputFormat::Bullets => {
            for p in patterns {
                let _ = writeln!(out, "- Pattern {}: {}", p.name, p.description);
            }
        }
        OutputFormat::Tagged => {
            out.push_str("<patterns>\n");
            for p in patterns {
                let _ = writeln!(
                    out,
                    "<pattern name=\"{}\">{}</pattern>",
                    escape_tag(&p.name),
                    escape_tag(&p.description)
                );
            }
            out.push_str("</patterns>\n");
        }
    }
    out
}

fn mistakes_section(mistakes: &[Mistake], modified: bool, format: OutputFormat) -> String {
    let mut out = String::new();
    match format {
        OutputFormat::Markdown => {
            out.push_str(if modified {
                "## Mistakes in Modified Files\n\n"
            } else {
                "## Past Mistakes\n\n"
            });
            for m in mistakes {
                let file = m
                    .file_path
                    .as_deref()
                    .map(|f| format!(" (`{f}`)"))
                    .unwrap_or_default();
                let _ = writeln!(out, "- {}{file}: fixed by {}", m.description, m.how_fixed);
            }
            out.push('\n');
        }
        OutputFormat::Bullets => {
            for m in mistakes {
                match &m.file_path {
                    Some(f) => {
                        let _ = writeln!(
                            out,
                            "- Mistake in {f}: {}; fix: {}",
                            m.description, m.how_fixed
                        );
                    }
                    None => {
                        let _ = writeln!(out, "- Mistake: {}; fix: {}", m.description, m.how_fixed);
                    }
                }
            }
        }
        OutputFormat::Tagged => {
            let scope = if modified { "modified" } else { "other" };
            let _ = writeln!(out, "<mistakes scope=\"{scope}\">");
            for m in mistakes {
                let file = m
                    .file_path
                    .as_deref()
                    .map(|f| format!(" file=\"{}\"", escape_tag(f)))
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "<mistake{file}>{}<fix>{}</fix></mistake>",
                    escape_tag(&m.description),
                    escape_tag(&m.how_fixed)
                );
            }
            out.push_str("</mistakes>\n");
        }
    }
    out
}

fn wrapper(format: OutputFormat) -> (&'static str, &'static str) {
    match format {
        OutputFormat::Markdown => ("# Relevant Knowledge\n\n", ""),
        OutputFormat::Bullets => ("", ""),
        OutputFormat::Tagged => ("<knowledge>\n", "</knowledge>\n"),
    }
}

fn footer(shown: usize, total: usize, format: OutputFormat) -> String {
    match format {
        OutputFormat::Markdown => format!("_{shown} of {total} sections shown (token budget)_\n"),
        OutputFormat::Bullets => format!("- ({shown} of {total} sections shown)\n"),
        OutputFormat::Tagged => format!("<truncated>{shown} of {total} sections shown</truncated>\n"),
    }
}

fn dedup_by_id<T: Clone>(items: impl IntoIterator<Item = T>, id: impl Fn(&T) -> &str) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(id(&item).to_string()) {
            out.push(item);
        }
    }
    out
}

fn build_sections(input: FormatInput<'_>, options: &FormatOptions) -> Vec<Section> {
    let context = options.context.as_ref();
    let now = Utc::now();
    let mut sections = Vec::new();

    for (area, members) in group_by_code_area(input.results) {
        let sorted = sort_by_relevance(&members, context);
        let priority = sorted
            .iter()
            .map(|r| priority_at(r, context, now))
            .fold(f32::MIN, f32::max);
        sections.push(Section {
            priority,
            body: area_section(&area, &sorted, options.format),
            items: sorted.len(),
        });
    }

    let patterns = dedup_by_id(
        input
            .results
            .iter()
            .flat_map(|r| r.related_patterns.iter())
            .chain(input.patterns)
            .cloned(),
        |p: &Pattern| p.id.as_str(),
    );
    let mistakes = dedup_by_id(
        input
            .results
            .iter()
            .flat_map(|r| r.related_mistakes.iter())
            .chain(input.mistakes)
            .cloned(),
        |m: &Mistake| m.id.as_str(),
    );

    let modified_files: &[String] = context.map(|c| c.modified_files.as_slice()).unwrap_or(&[]);
    let (in_modified, other): (Vec<Mistake>, Vec<Mistake>) = mistakes.into_iter().partition(|m| {
        m.file_path
            .as_ref()
            .is_some_and(|f| modified_files.contains(f))
    });

    if !in_modified.is_empty() {
        sections.push(Section {
            priority: MODIFIED_MISTAKES_PRIORITY,
            body: mistakes_section(&in_modified, true, options.format),
            items: in_modified.len(),
        });
    }
    if !patterns.is_empty() {
        sections.push(Section {
            priority: PATTERNS_PRIORITY,
            body: patterns_section(&patterns, options.format),
            items: patterns.len(),
        });
    }
    if !other.is_empty() {
        sections.push(Section {
            priority: OTHER_MISTAKES_PRIORITY,
            body: mistakes_section(&other, false, options.format),
            items: other.len(),
        });
    }

    sections.sort_by(|a, b| b.priority.total_cmp(&a.priority));
    sections
}

/// Number of leading sections whose costs fit in `budget`.
fn fitting_prefix(costs: &[usize], budget: usize) -> usize {
    let mut used = 0;
    for (i, cost) in costs.iter().enumerate() {
        if used + cost > budget {
            return i;
        }
        used += cost;
    }
    costs.len()
}

/// Render results under `options.max_tokens`.
///
/// When any section is dropped a footer reports how many were shown; its
/// cost is reserved before choosing sections.
pub fn format_context(input: FormatInput<'_>, options: &FormatOptions) -> FormattedContext {
    let sections = build_sections(input, options);
    let total = sections.len();
    if total == 0 {
        return FormattedContext::empty();
    }

    let (open, close) = wrapper(options.format);
    let wrapper_cost = estimate_tokens(open) + estimate_tokens(close);
    let costs: Vec<usize> = sections.iter().map(Section::tokens).collect();

    let Some(budget) = options.max_tokens.checked_sub(wrapper_cost) else {
        return FormattedContext {
            was_filtered: true,
            sections_total: total,
            ..FormattedContext::empty()
        };
    };

    let mut included = fitting_prefix(&costs, budget);
    let mut footer_text = None;
    if included < total {
        // Footer with the widest possible count, so the reserve covers any shown value.
        let reserve = estimate_tokens(&footer(total, total, options.format));
        let Some(remaining) = budget.checked_sub(reserve) else {
            return FormattedContext {
                was_filtered: true,
                sections_total: total,
                ..FormattedContext::empty()
            };
        };
        included = fitting_prefix(&costs, remaining);
        footer_text = Some(footer(included, total, options.format));
    }

    let mut content = String::from(open);
    for section in &sections[..included] {
        content.push_str(&section.body);
    }
    if let Some(f) = &footer_text {
        content.push_str(f);
    }
    content.push_str(close);

    FormattedContext {
        token_count: estimate_tokens(&content),
        result_count: sections[..included].iter().map(|s| s.items).sum(),
        was_filtered: included < total,
        sections_included: included,
        sections_total: total,
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Learning;
    use proptest::prelude::*;
    use serde_json::json;

    fn result(id: &str, content: &str, area: Option<&str>, confidence: f32) -> QueryResult {
        let mut l = Learning::new(id, content).with_confidence(confidence);
        l.code_area = area.map(String::from);
        QueryResult::new(l)
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_priority_boosts_are_additive() {
        let now = Utc::now();
        let mut r = result("L1", "c", None, 0.6);
        r.learning.source_issue = Some(42);
        r.learning.file_path = Some("src/a.rs".into());
        r.learning
            .metadata
            .insert("timestamp".into(), json!(sextant_types::format_ts(now)));

        let ctx = PriorityContext {
            issue_number: Some(42),
            modified_files: vec!["src/a.rs".into()],
        };
        let p = priority_at(&r, Some(&ctx), now);
        assert!((p - 1.2).abs() < 1e-6);

        assert!((priority_at(&r, None, now) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_priority_defaults_and_old_timestamps() {
        let now = Utc::now();
        let mut r = QueryResult::new(Learning::new("L1", "c"));
        assert!((priority_at(&r, None, now) - 0.5).abs() < 1e-6);

        let old = now - Duration::days(45);
        r.learning
            .metadata
            .insert("timestamp".into(), json!(old.timestamp_millis()));
        assert!((priority_at(&r, None, now) - 0.5).abs() < 1e-6);

        let recent = now - Duration::days(2);
        r.learning
            .metadata
            .insert("timestamp".into(), json!(recent.timestamp_millis()));
        assert!((priority_at(&r, None, now) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_group_by_code_area() {
        let results = vec![
            result("1", "a", Some("Db"), 0.5),
            result("2", "b", None, 0.5),
            result("3", "c", Some("Api"), 0.5),
            result("4", "d", Some("Api"), 0.5),
        ];
        let groups = group_by_code_area(&results);
        let names: Vec<&str> = groups.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Api", "Db", GENERAL_AREA]);
        assert_eq!(groups[0].1.len(), 2);
    }

    #[test]
    fn test_sort_by_relevance_is_stable() {
        let results = vec![
            result("a", "x", None, 0.5),
            result("b", "x", None, 0.9),
            result("c", "x", None, 0.5),
        ];
        let ids: Vec<String> = sort_by_relevance(&results, None)
            .into_iter()
            .map(|r| r.learning.id)
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_markdown_layout() {
        let mut r = result("L1", "validate input", Some("Security"), 0.95);
        r.related_patterns
            .push(Pattern::new("P1", "Guard clauses", "Return early"));
        let results = vec![r];

        let out = format_context(FormatInput::results(&results), &FormatOptions::default());
        assert!(out.content.starts_with("# Relevant Knowledge"));
        assert!(out.content.contains("## Security"));
        assert!(out.content.contains("- validate input [confidence 0.95]"));
        assert!(out.content.contains("**Guard clauses**"));
        assert_eq!(out.result_count, 2);
        assert!(!out.was_filtered);
        // Security (0.95) ranks above Patterns (0.7).
        assert!(out.content.find("## Security") < out.content.find("## Patterns"));
    }

    #[test]
    fn test_modified_file_mistakes_rank_first() {
        let mut r = result("L1", "content", Some("Core"), 0.9);
        r.related_mistakes
            .push(Mistake::new("M1", "off by one", "used len-1").with_file_path("src/a.rs"));
        r.related_mistakes
            .push(Mistake::new("M2", "leaked handle", "closed it"));
        let results = vec![r];
        let options = FormatOptions::default().with_context(PriorityContext {
            issue_number: None,
            modified_files: vec!["src/a.rs".into()],
        });

        let out = format_context(FormatInput::results(&results), &options);
        let modified = out.content.find("## Mistakes in Modified Files").unwrap();
        let core = out.content.find("## Core").unwrap();
        let other = out.content.find("## Past Mistakes").unwrap();
        assert!(modified < core && core < other);
    }

    #[test]
    fn test_tagged_and_bullets() {
        let results = vec![result("L1", "a < b & c", Some("Math"), 0.5)];

        let tagged = format_context(
            FormatInput::results(&results),
            &FormatOptions::default().with_format(OutputFormat::Tagged),
        );
        assert!(tagged.content.starts_with("<knowledge>\n"));
        assert!(tagged.content.ends_with("</knowledge>\n"));
        assert!(tagged.content.contains("a &lt; b &amp; c"));

        let bullets = format_context(
            FormatInput::results(&results),
            &FormatOptions::default().with_format(OutputFormat::Bullets),
        );
        assert!(bullets.content.starts_with("- [Math] a < b & c"));
        assert!(!bullets.content.contains('#'));
    }

    #[test]
    fn test_budget_drops_whole_sections_with_footer() {
        let results: Vec<QueryResult> = (0..6)
            .map(|i| {
                result(
                    &format!("L{i}"),
                    &"detail ".repeat(40),
                    Some(&format!("Area{i}")),
                    0.9 - i as f32 * 0.1,
                )
            })
            .collect();

        for format in [OutputFormat::Markdown, OutputFormat::Bullets, OutputFormat::Tagged] {
            let options = FormatOptions::default()
                .with_max_tokens(200)
                .with_format(format);
            let out = format_context(FormatInput::results(&results), &options);

            assert!(out.token_count <= 200, "{format:?}: {}", out.token_count);
            assert!(out.was_filtered);
            assert!(out.sections_included < 6);
            assert!(out.sections_included > 0);
            let phrase = format!("{} of 6 sections", out.sections_included);
            assert!(out.content.contains(&phrase), "{format:?}: {}", out.content);
            // Highest priority area survives.
            assert!(out.content.contains("Area0"));
        }
    }

    #[test]
    fn test_tiny_budget_yields_empty() {
        let results = vec![result("L1", "something", None, 0.5)];
        let out = format_context(
            FormatInput::results(&results),
            &FormatOptions::default().with_max_tokens(2),
        );
        assert!(out.content.is_empty());
        assert_eq!(out.token_count, 0);
        assert_eq!(out.result_count, 0);
        assert!(out.was_filtered);
    }

    #[test]
    fn test_no_results_is_empty_and_unfiltered() {
        let out = format_context(FormatInput::default(), &FormatOptions::default());
        assert_eq!(out, FormattedContext::empty());
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("Markdown".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert_eq!("xml".parse::<OutputFormat>().unwrap(), OutputFormat::Tagged);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    fn arb_results() -> impl Strategy<Value = Vec<QueryResult>> {
        prop::collection::vec(
            (
                "[a-z ]{1,120}",
                prop::option::of(prop::sample::select(vec!["Api", "Db", "Ui", "Core"])),
                0.0f32..=1.0,
            ),
            0..20,
        )
        .prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (content, area, conf))| result(&format!("L{i}"), &content, area, conf))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_budget_respected_and_monotone(
            results in arb_results(),
            budget in 0usize..800,
            extra in 0usize..800,
            format in prop::sample::select(vec![
                OutputFormat::Markdown,
                OutputFormat::Bullets,
                OutputFormat::Tagged,
            ]),
        ) {
            let small = format_context(
                FormatInput::results(&results),
                &FormatOptions::default().with_max_tokens(budget).with_format(format),
            );
            let large = format_context(
                FormatInput::results(&results),
                &FormatOptions::default().with_max_tokens(budget + extra).with_format(format),
            );

            prop_assert!(small.token_count <= budget);
            prop_assert!(large.token_count <= budget + extra);
            prop_assert!(large.result_count >= small.result_count);
        }
    }
}
