use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::agent::AgentRunner;
use crate::beads::{IssueTracker, IssueType};
use crate::config::Budgets;
use crate::error::OrchError;
use crate::prompt::{self, TemplateInputs};
use crate::types::PipelineResult;
use crate::{log_info, log_warn};

/// Priority assigned to phase task issues.
const PHASE_TASK_PRIORITY: u8 = 2;

// --- Artifact path extraction ---

fn research_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Quote and backtick characters are excluded so paths wrapped in
    // `...`, '...' or "..." extract cleanly.
    RE.get_or_init(|| {
        Regex::new(r#"thoughts/(?:searchable/)?shared?/research/[^\s`'"]+\.md"#).expect("valid regex")
    })
}

fn plan_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"thoughts/(?:searchable/)?shared?/plans/[^\s`'"]+\.md"#).expect("valid regex")
    })
}

fn thoughts_md_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"thoughts/[^\s`'"]+\.md"#).expect("valid regex"))
}

fn is_digits(segment: &str, len: usize) -> bool {
    segment.len() == len && segment.chars().all(|c| c.is_ascii_digit())
}

/// First research artifact path in agent output, if any.
pub fn extract_research_path(output: &str) -> Option<String> {
    research_path_regex()
        .find(output)
        .map(|m| m.as_str().to_string())
}

/// First plan artifact path in agent output, if any.
pub fn extract_plan_path(output: &str) -> Option<String> {
    plan_path_regex().find(output).map(|m| m.as_str().to_string())
}

/// All phase-file paths (`...NN-*.md` under thoughts/) in agent output,
/// deduped, in first-appearance order.
pub fn extract_phase_files(output: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    thoughts_md_regex()
        .find_iter(output)
        .map(|m| m.as_str().to_string())
        .filter(|path| derive_phase_title(path).is_some())
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

/// Phase index and human title derived from a phase file name.
///
/// `thoughts/.../2026-03-01-tdd-auth-rework-03-token-store.md` yields
/// `(3, "Token store")`. A leading `YYYY-MM-DD` date prefix is stripped
/// before looking for the number, so dated files without a phase segment
/// (`2026-03-01-notes.md`) are not phase files.
pub fn derive_phase_title(path: &str) -> Option<(u32, String)> {
    let stem = Path::new(path).file_stem()?.to_str()?;
    let segments: Vec<&str> = stem.split('-').collect();

    let start = if segments.len() >= 3
        && is_digits(segments[0], 4)
        && is_digits(segments[1], 2)
        && is_digits(segments[2], 2)
    {
        3
    } else {
        0
    };

    // Last two-digit segment that still has a name after it
    let idx = (start..segments.len().saturating_sub(1))
        .rev()
        .find(|&i| is_digits(segments[i], 2))?;

    let number: u32 = segments[idx].parse().ok()?;
    let mut title = segments[idx + 1..].join(" ");
    if title.is_empty() {
        return None;
    }
    if let Some(first) = title.get(..1) {
        let upper = first.to_uppercase();
        title.replace_range(..1, &upper);
    }
    Some((number, title))
}

/// The `00-overview.md` file is a summary, not an implementable phase.
pub fn is_overview_file(path: &str) -> bool {
    derive_phase_title(path).is_some_and(|(number, _)| number == 0)
}

/// Lines listed under a heading containing "Open Questions", stripped of
/// bullet markers and numbering, up to the next heading.
pub fn extract_open_questions(text: &str) -> Vec<String> {
    static NUMBERING: OnceLock<Regex> = OnceLock::new();
    let numbering = NUMBERING.get_or_init(|| Regex::new(r"^\d+[.)]\s*").expect("valid regex"));

    let mut in_section = false;
    let mut questions = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            in_section = trimmed.to_lowercase().contains("open questions");
            continue;
        }
        if !in_section {
            continue;
        }

        let stripped = trimmed
            .trim_start_matches(['-', '*', '+'])
            .trim_start();
        let stripped = numbering.replace(stripped, "");
        if !stripped.is_empty() {
            questions.push(stripped.to_string());
        }
    }

    questions
}

// --- Step context ---

/// Shared inputs for one phase step.
pub struct StepContext<'a, A: AgentRunner> {
    pub project_path: &'a Path,
    pub agent: &'a A,
    pub budgets: &'a Budgets,
    pub stream: bool,
    pub ticket_id: Option<String>,
}

impl<'a, A: AgentRunner> StepContext<'a, A> {
    fn planning_timeout(&self) -> Duration {
        Duration::from_secs(self.budgets.planning_timeout_secs)
    }

    fn annotate_timeout(&self) -> Duration {
        Duration::from_secs(self.budgets.annotate_timeout_secs)
    }
}

fn fail_at(stage: &str, message: impl Into<String>) -> PipelineResult {
    let err = OrchError::validation(stage, message);
    let stage = err.failed_at().unwrap_or(stage).to_string();
    PipelineResult::fail(err).with_data("failed_at", serde_json::json!(stage))
}

/// Render a phase template and run the agent against it.
async fn invoke_with_template<A: AgentRunner>(
    ctx: &StepContext<'_, A>,
    template_name: &str,
    inputs: &TemplateInputs,
    timeout: Duration,
) -> Result<String, PipelineResult> {
    let rendered = match prompt::render_template(ctx.project_path, template_name, inputs) {
        Ok(rendered) => rendered,
        Err(e) => return Err(fail_at("load_template", e)),
    };

    let invocation = ctx
        .agent
        .invoke(&rendered, timeout, ctx.stream, ctx.project_path)
        .await;

    if !invocation.success {
        let error = invocation
            .error
            .unwrap_or_else(|| "agent invocation failed".to_string());
        return Err(PipelineResult::fail(error));
    }

    Ok(invocation.output)
}

// --- Phase steps ---

/// RESEARCH: turn the research question into a research note on disk.
pub async fn run_research<A: AgentRunner>(
    ctx: &StepContext<'_, A>,
    question: &str,
    additional_context: Option<&str>,
) -> PipelineResult {
    if question.trim().is_empty() {
        return fail_at("validate_inputs", "research question must not be empty");
    }

    let inputs = TemplateInputs {
        research_question: Some(question.to_string()),
        additional_context: additional_context.map(str::to_string),
        ticket_id: ctx.ticket_id.clone(),
        ..Default::default()
    };

    let output =
        match invoke_with_template(ctx, "research", &inputs, ctx.planning_timeout()).await {
            Ok(output) => output,
            Err(result) => return result,
        };

    let Some(research_path) = extract_research_path(&output) else {
        return fail_at(
            "parse_phase",
            "agent output names no research document under thoughts/",
        );
    };

    let open_questions = extract_open_questions(&output);
    log_info!("[research] Research note: {}", research_path);

    PipelineResult::ok()
        .with_data("research_path", serde_json::json!(research_path))
        .with_data("open_questions", serde_json::json!(open_questions))
}

/// DECOMPOSITION: break the research into a plan document.
pub async fn run_decomposition<A: AgentRunner>(
    ctx: &StepContext<'_, A>,
    question: &str,
    research_path: &str,
) -> PipelineResult {
    if research_path.trim().is_empty() {
        return fail_at("validate_inputs", "research path must not be empty");
    }

    let inputs = TemplateInputs {
        research_question: Some(question.to_string()),
        research_path: Some(research_path.to_string()),
        ticket_id: ctx.ticket_id.clone(),
        ..Default::default()
    };

    let output =
        match invoke_with_template(ctx, "decomposition", &inputs, ctx.planning_timeout()).await {
            Ok(output) => output,
            Err(result) => return result,
        };

    let Some(plan_path) = extract_plan_path(&output) else {
        return fail_at(
            "parse_phase",
            "agent output names no plan document under thoughts/",
        );
    };

    log_info!("[decomposition] Plan: {}", plan_path);

    PipelineResult::ok()
        .with_data("plan_path", serde_json::json!(plan_path))
        .with_data("open_questions", serde_json::json!(extract_open_questions(&output)))
}

/// TDD_PLANNING: rework the plan into a test-first plan, optionally
/// seeded with the requirement hierarchy.
pub async fn run_tdd_planning<A: AgentRunner>(
    ctx: &StepContext<'_, A>,
    plan_path: &str,
    hierarchy_json: Option<&str>,
) -> PipelineResult {
    if plan_path.trim().is_empty() {
        return fail_at("validate_inputs", "plan path must not be empty");
    }

    let inputs = TemplateInputs {
        plan_path: Some(plan_path.to_string()),
        hierarchy_json: hierarchy_json.map(str::to_string),
        ticket_id: ctx.ticket_id.clone(),
        ..Default::default()
    };

    let output =
        match invoke_with_template(ctx, "tdd_planning", &inputs, ctx.planning_timeout()).await {
            Ok(output) => output,
            Err(result) => return result,
        };

    // The TDD plan may replace or extend the original plan document.
    let tdd_plan_path = extract_plan_path(&output).unwrap_or_else(|| plan_path.to_string());
    log_info!("[tdd_planning] TDD plan: {}", tdd_plan_path);

    PipelineResult::ok()
        .with_data("plan_path", serde_json::json!(tdd_plan_path))
        .with_data("open_questions", serde_json::json!(extract_open_questions(&output)))
}

/// MULTI_DOC: split the plan into numbered per-phase documents.
pub async fn run_multi_doc<A: AgentRunner>(
    ctx: &StepContext<'_, A>,
    plan_path: &str,
) -> PipelineResult {
    if plan_path.trim().is_empty() {
        return fail_at("validate_inputs", "plan path must not be empty");
    }

    let inputs = TemplateInputs {
        plan_path: Some(plan_path.to_string()),
        ticket_id: ctx.ticket_id.clone(),
        ..Default::default()
    };

    let output =
        match invoke_with_template(ctx, "multi_doc", &inputs, ctx.planning_timeout()).await {
            Ok(output) => output,
            Err(result) => return result,
        };

    let phase_files = extract_phase_files(&output);
    if phase_files.is_empty() {
        return fail_at("parse_phase", "agent output names no numbered phase files");
    }

    log_info!("[multi_doc] {} phase files", phase_files.len());

    PipelineResult::ok().with_data("phase_files", serde_json::json!(phase_files))
}

/// BEADS_SYNC: mirror the phase files into the issue tracker.
///
/// Creates one epic, one task per non-overview phase file (priority 2,
/// each chained to its predecessor via `dep add`), syncs, then asks the
/// agent to annotate each file with its issue id. Dependency wiring,
/// sync, and annotation are best-effort; epic and task creation are not.
pub async fn run_beads_sync<A: AgentRunner, T: IssueTracker>(
    ctx: &StepContext<'_, A>,
    tracker: &T,
    plan_title: &str,
    phase_files: &[String],
) -> PipelineResult {
    if phase_files.is_empty() {
        return fail_at("validate_inputs", "no phase files to sync");
    }

    let epic_id = match tracker.create(plan_title, IssueType::Epic, None) {
        Ok(id) => id,
        Err(e) => return PipelineResult::fail(format!("failed to create epic: {}", e)),
    };
    log_info!("[beads_sync] Epic {}", epic_id);

    let mut numbered: Vec<(u32, String, String)> = phase_files
        .iter()
        .filter(|path| !is_overview_file(path))
        .filter_map(|path| {
            derive_phase_title(path).map(|(number, title)| (number, title, path.clone()))
        })
        .collect();
    numbered.sort_by_key(|(number, _, _)| *number);

    let mut issue_ids = Vec::new();
    let mut previous: Option<String> = None;

    for (number, title, _path) in &numbered {
        let issue_title = format!("Phase {}: {}", number, title);
        let issue_id =
            match tracker.create(&issue_title, IssueType::Task, Some(PHASE_TASK_PRIORITY)) {
                Ok(id) => id,
                Err(e) => {
                    return PipelineResult::fail(format!(
                        "failed to create issue for '{}': {}",
                        issue_title, e
                    ))
                }
            };

        let parent = previous.as_deref().unwrap_or(&epic_id);
        if let Err(e) = tracker.add_dep(&issue_id, parent) {
            log_warn!("[beads_sync] dep add {} -> {} failed: {}", issue_id, parent, e);
        }

        previous = Some(issue_id.clone());
        issue_ids.push(issue_id);
    }

    if let Err(e) = tracker.sync() {
        log_warn!("[beads_sync] sync failed: {}", e);
    }

    // Annotation pass: write the issue id back into each phase document.
    let mut annotated = 0usize;
    for ((_, _, path), issue_id) in numbered.iter().zip(issue_ids.iter()) {
        let annotation = prompt::build_annotation_prompt(path, issue_id, Some(&epic_id));
        let invocation = ctx
            .agent
            .invoke(&annotation, ctx.annotate_timeout(), ctx.stream, ctx.project_path)
            .await;
        if invocation.success {
            annotated += 1;
        } else {
            log_warn!(
                "[beads_sync] annotation of {} failed: {}",
                path,
                invocation.error.unwrap_or_default()
            );
        }
    }

    PipelineResult::ok()
        .with_data("epic_id", serde_json::json!(epic_id))
        .with_data("issue_ids", serde_json::json!(issue_ids))
        .with_data("annotated", serde_json::json!(annotated))
}
