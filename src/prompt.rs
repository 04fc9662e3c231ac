use std::path::{Path, PathBuf};

/// Directory of instruction templates, relative to the project root.
pub const TEMPLATE_DIR: &str = ".claude/commands";

/// Values substituted into instruction templates.
///
/// Templates reference them as `{{key}}` tokens. Unknown tokens are left
/// verbatim so template authors notice them.
#[derive(Debug, Clone, Default)]
pub struct TemplateInputs {
    pub research_question: Option<String>,
    pub research_path: Option<String>,
    pub plan_path: Option<String>,
    pub hierarchy_json: Option<String>,
    pub phase_paths: Vec<String>,
    pub epic_id: Option<String>,
    pub issue_ids: Vec<String>,
    pub ticket_id: Option<String>,
    pub additional_context: Option<String>,
}

impl TemplateInputs {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                "research_question",
                self.research_question.clone().unwrap_or_default(),
            ),
            ("research_path", self.research_path.clone().unwrap_or_default()),
            ("plan_path", self.plan_path.clone().unwrap_or_default()),
            (
                "hierarchy_json",
                self.hierarchy_json.clone().unwrap_or_default(),
            ),
            ("phase_paths", self.phase_paths.join("\n")),
            ("epic_id", self.epic_id.clone().unwrap_or_default()),
            ("issue_ids", self.issue_ids.join(", ")),
            ("ticket_id", self.ticket_id.clone().unwrap_or_default()),
            (
                "additional_context",
                self.additional_context.clone().unwrap_or_default(),
            ),
        ]
    }
}

/// Path of a named instruction template under the project.
pub fn template_path(project_path: &Path, name: &str) -> PathBuf {
    project_path.join(TEMPLATE_DIR).join(format!("{}.md", name))
}

/// Load a template file. The content is opaque to the orchestrator;
/// only the substitution tokens matter.
pub fn load_template(project_path: &Path, name: &str) -> Result<String, String> {
    let path = template_path(project_path, name);
    std::fs::read_to_string(&path)
        .map_err(|e| format!("Failed to load template {}: {}", path.display(), e))
}

/// Replace every known `{{key}}` token with its input value.
pub fn substitute(template: &str, inputs: &TemplateInputs) -> String {
    let mut result = template.to_string();
    for (key, value) in inputs.pairs() {
        let token = format!("{{{{{}}}}}", key);
        if result.contains(&token) {
            result = result.replace(&token, &value);
        }
    }
    result
}

/// Load a template and substitute in one step.
pub fn render_template(
    project_path: &Path,
    name: &str,
    inputs: &TemplateInputs,
) -> Result<String, String> {
    let template = load_template(project_path, name)?;
    Ok(substitute(&template, inputs))
}

// --- Implementation prompt ---

/// Heading of the feedback block appended after a failing test run.
pub const TEST_FAILURE_HEADING: &str = "## Test Failures from Previous Iteration";

/// Build the prompt for one implementation-loop iteration.
///
/// Structure: [instruction body] + [phase files] + [issue list] +
/// [critical rules]. The instruction body comes from the `implement`
/// template when the project provides one, otherwise a built-in body.
pub fn build_implementation_prompt(
    project_path: &Path,
    phase_paths: &[String],
    issue_ids: &[String],
    epic_id: Option<&str>,
    ticket_id: Option<&str>,
) -> String {
    let inputs = TemplateInputs {
        phase_paths: phase_paths.to_vec(),
        issue_ids: issue_ids.to_vec(),
        epic_id: epic_id.map(str::to_string),
        ticket_id: ticket_id.map(str::to_string),
        ..Default::default()
    };

    let body = match render_template(project_path, "implement", &inputs) {
        Ok(rendered) => rendered,
        Err(_) => built_in_implementation_body(&inputs),
    };

    [body, critical_rules()].join("\n\n")
}

fn built_in_implementation_body(inputs: &TemplateInputs) -> String {
    let mut sections = vec![
        "# Autonomous Implementation Agent\n\n\
         You are implementing a planned change autonomously. No human is \
         available for questions. Work through the phase documents in order, \
         implementing each phase and its tests."
            .to_string(),
    ];

    if !inputs.phase_paths.is_empty() {
        sections.push(format!(
            "## Phase Documents\n\n{}",
            inputs
                .phase_paths
                .iter()
                .map(|p| format!("- {}", p))
                .collect::<Vec<_>>()
                .join("\n")
        ));
    }

    if !inputs.issue_ids.is_empty() {
        sections.push(format!(
            "## Tracked Issues\n\nEach phase is tracked as an issue. Close the \
             issue when its phase is fully implemented and tested:\n\n{}",
            inputs
                .issue_ids
                .iter()
                .map(|id| format!("- {}", id))
                .collect::<Vec<_>>()
                .join("\n")
        ));
    }

    if let Some(ref epic) = inputs.epic_id {
        sections.push(format!("## Epic\n\nAll phases roll up to epic `{}`.", epic));
    }

    if let Some(ref ticket) = inputs.ticket_id {
        sections.push(format!("## Ticket\n\nExternal ticket reference: `{}`.", ticket));
    }

    sections.join("\n\n")
}

fn critical_rules() -> String {
    "## Critical Rules\n\n\
     - ALWAYS run the test suite before closing an issue.\n\
     - ALWAYS close the issue (`bd close <id>`) when its phase is complete.\n\
     - ALWAYS emit `/clear` after closing an issue."
        .to_string()
}

/// Append the failing test output to a prompt so the next iteration can
/// react to it. Repeated appends replace the previous block: only the
/// latest failure is relevant.
pub fn append_test_failures(prompt: &str, test_output: &str) -> String {
    let base = match prompt.find(TEST_FAILURE_HEADING) {
        Some(pos) => prompt[..pos].trim_end(),
        None => prompt.trim_end(),
    };
    format!(
        "{}\n\n{}\n\n```\n{}\n```",
        base,
        TEST_FAILURE_HEADING,
        test_output.trim_end()
    )
}

/// Build the best-effort annotation prompt for one phase file.
pub fn build_annotation_prompt(phase_path: &str, issue_id: &str, epic_id: Option<&str>) -> String {
    let mut prompt = format!(
        "Annotate the phase document at `{}` with its tracked issue id.\n\n\
         Add a line near the top of the document:\n\n\
         Issue: {}",
        phase_path, issue_id
    );
    if let Some(epic) = epic_id {
        prompt.push_str(&format!("\nEpic: {}", epic));
    }
    prompt.push_str("\n\nDo not change any other content.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_known_tokens_and_keeps_unknown() {
        let inputs = TemplateInputs {
            research_question: Some("How does auth work?".to_string()),
            ..Default::default()
        };
        let out = substitute("Q: {{research_question}} X: {{unknown_token}}", &inputs);
        assert_eq!(out, "Q: How does auth work? X: {{unknown_token}}");
    }

    #[test]
    fn append_test_failures_replaces_previous_block() {
        let prompt = "Do the work.";
        let once = append_test_failures(prompt, "1 failed");
        let twice = append_test_failures(&once, "2 failed");

        assert_eq!(twice.matches(TEST_FAILURE_HEADING).count(), 1);
        assert!(twice.contains("2 failed"));
        assert!(!twice.contains("1 failed"));
    }

    #[test]
    fn implementation_prompt_carries_critical_rules() {
        let dir = tempfile::TempDir::new().unwrap();
        let prompt = build_implementation_prompt(
            dir.path(),
            &["thoughts/shared/plans/2026-01-01-tdd-x-01-core.md".to_string()],
            &["beads-abc".to_string()],
            Some("beads-epic"),
            None,
        );

        assert!(prompt.contains("ALWAYS run the test suite before closing"));
        assert!(prompt.contains("ALWAYS close the issue"));
        assert!(prompt.contains("/clear"));
        assert!(prompt.contains("beads-abc"));
        assert!(prompt.contains("beads-epic"));
    }
}
