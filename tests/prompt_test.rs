use std::fs;

use tempfile::TempDir;

use autoplan::prompt::{
    append_test_failures, build_annotation_prompt, build_implementation_prompt, load_template,
    render_template, substitute, template_path, TemplateInputs, TEMPLATE_DIR, TEST_FAILURE_HEADING,
};

#[test]
fn template_paths_live_under_claude_commands() {
    let dir = TempDir::new().unwrap();
    let path = template_path(dir.path(), "research");
    assert!(path.ends_with(format!("{}/research.md", TEMPLATE_DIR)));
}

#[test]
fn load_template_errors_on_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = load_template(dir.path(), "research").unwrap_err();
    assert!(err.contains("research.md"));
}

#[test]
fn substitute_fills_every_known_token() {
    let inputs = TemplateInputs {
        research_question: Some("Q".to_string()),
        research_path: Some("thoughts/share/research/r.md".to_string()),
        plan_path: Some("thoughts/share/plans/p.md".to_string()),
        hierarchy_json: Some("{\"id\":\"REQ_000\"}".to_string()),
        phase_paths: vec!["a.md".to_string(), "b.md".to_string()],
        epic_id: Some("beads-epic".to_string()),
        issue_ids: vec!["beads-1".to_string(), "beads-2".to_string()],
        ticket_id: Some("TCK-9".to_string()),
        additional_context: Some("extra".to_string()),
    };

    let template = "\
{{research_question}}|{{research_path}}|{{plan_path}}|{{hierarchy_json}}|\
{{phase_paths}}|{{epic_id}}|{{issue_ids}}|{{ticket_id}}|{{additional_context}}";

    let out = substitute(template, &inputs);

    let expected = "Q|thoughts/share/research/r.md|thoughts/share/plans/p.md|\
{\"id\":\"REQ_000\"}|a.md\nb.md|beads-epic|beads-1, beads-2|TCK-9|extra";
    assert_eq!(out, expected);
}

#[test]
fn absent_inputs_substitute_as_empty() {
    let out = substitute("[{{epic_id}}]", &TemplateInputs::default());
    assert_eq!(out, "[]");
}

#[test]
fn render_template_reads_from_disk_and_substitutes() {
    let dir = TempDir::new().unwrap();
    let commands = dir.path().join(TEMPLATE_DIR);
    fs::create_dir_all(&commands).unwrap();
    fs::write(commands.join("research.md"), "Ask: {{research_question}}").unwrap();

    let inputs = TemplateInputs {
        research_question: Some("why?".to_string()),
        ..Default::default()
    };
    let rendered = render_template(dir.path(), "research", &inputs).unwrap();
    assert_eq!(rendered, "Ask: why?");
}

#[test]
fn implementation_prompt_prefers_the_project_template() {
    let dir = TempDir::new().unwrap();
    let commands = dir.path().join(TEMPLATE_DIR);
    fs::create_dir_all(&commands).unwrap();
    fs::write(commands.join("implement.md"), "CUSTOM BODY {{issue_ids}}").unwrap();

    let prompt = build_implementation_prompt(
        dir.path(),
        &[],
        &["beads-1".to_string()],
        None,
        None,
    );

    assert!(prompt.contains("CUSTOM BODY beads-1"));
    // Critical rules are appended regardless of the template
    assert!(prompt.contains("ALWAYS run the test suite before closing"));
    assert!(prompt.contains("ALWAYS close the issue"));
    assert!(prompt.contains("`/clear`"));
}

#[test]
fn implementation_prompt_falls_back_to_the_built_in_body() {
    let dir = TempDir::new().unwrap(); // no template on disk

    let prompt = build_implementation_prompt(
        dir.path(),
        &["thoughts/x/01-core.md".to_string()],
        &["beads-1".to_string()],
        Some("beads-epic"),
        Some("TCK-1"),
    );

    assert!(prompt.contains("thoughts/x/01-core.md"));
    assert!(prompt.contains("beads-1"));
    assert!(prompt.contains("beads-epic"));
    assert!(prompt.contains("TCK-1"));
    assert!(prompt.contains("ALWAYS emit `/clear`"));
}

#[test]
fn test_failure_block_is_appended_and_replaced() {
    let base = "Implement the thing.";

    let first = append_test_failures(base, "assert_eq failed at line 10");
    assert!(first.starts_with(base));
    assert!(first.contains(TEST_FAILURE_HEADING));
    assert!(first.contains("assert_eq failed at line 10"));

    let second = append_test_failures(&first, "different failure");
    assert_eq!(second.matches(TEST_FAILURE_HEADING).count(), 1);
    assert!(second.contains("different failure"));
    assert!(!second.contains("assert_eq failed at line 10"));
}

#[test]
fn annotation_prompt_names_file_and_issue() {
    let prompt = build_annotation_prompt("thoughts/x/01-core.md", "beads-1", Some("beads-epic"));
    assert!(prompt.contains("thoughts/x/01-core.md"));
    assert!(prompt.contains("Issue: beads-1"));
    assert!(prompt.contains("Epic: beads-epic"));
}
