#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use autoplan::config::{AutoplanConfig, Budgets};
use autoplan::requirement::{RequirementNode, RequirementType};
use autoplan::types::Checkpoint;

/// Creates a requirement node whose description satisfies the contracts
/// lens and trips none of the other lenses.
pub fn make_clean_node(id: &str) -> RequirementNode {
    let mut node = RequirementNode::new(
        id,
        "Accepts a lookup request and returns the matching record",
        RequirementType::Implementation,
    );
    node.acceptance_criteria =
        vec!["Accepts an id and returns the record or raises a not-found error".to_string()];
    node
}

/// Creates a child of `parent_id` with a consistent back-reference.
pub fn make_child(parent_id: &str, suffix: u32) -> RequirementNode {
    let mut node = make_clean_node(&format!("{}.{}", parent_id, suffix));
    node.parent_id = Some(parent_id.to_string());
    node
}

/// A three-node hierarchy (root with two children) that reviews clean.
pub fn make_clean_tree() -> RequirementNode {
    let mut root = make_clean_node("REQ_000");
    root.requirement_type = RequirementType::Parent;
    root.children.push(make_child("REQ_000", 1));
    root.children.push(make_child("REQ_000", 2));
    root
}

/// Budgets tuned for fast tests: no sleeps, small ceilings kept at
/// defaults unless a test overrides them.
pub fn test_budgets() -> Budgets {
    Budgets {
        impl_loop_sleep_secs: 0,
        ..Default::default()
    }
}

/// Config rooted at a temp project with fast budgets. Hook binaries
/// point at nonexistent paths so best-effort hooks stay inert.
pub fn test_config(project_path: &Path) -> AutoplanConfig {
    let mut config = AutoplanConfig::default();
    config.project.path = project_path.to_string_lossy().to_string();
    config.budgets = test_budgets();
    config.tools.oracle_bin = "/nonexistent/silmari-oracle".to_string();
    config.tools.clear_context_bin = "/nonexistent/claude".to_string();
    config
}

/// A minimal structurally valid checkpoint.
pub fn make_checkpoint(phase: &str, timestamp: &str) -> Checkpoint {
    let mut checkpoint = Checkpoint::new(
        "plan.md",
        "0000",
        autoplan::types::AutonomyMode::Checkpoint,
        phase,
    );
    checkpoint.timestamp = timestamp.to_string();
    checkpoint
}

/// Write the five phase templates into `<project>/.claude/commands/`.
pub fn write_templates(project_path: &Path) {
    let dir = project_path.join(".claude/commands");
    fs::create_dir_all(&dir).unwrap();

    let templates = [
        ("research", "Research: {{research_question}}\n{{additional_context}}"),
        ("decomposition", "Decompose {{research_path}} for {{research_question}}"),
        ("tdd_planning", "TDD plan from {{plan_path}}\n{{hierarchy_json}}"),
        ("multi_doc", "Split {{plan_path}} into phase files"),
        ("implement", "Implement phases:\n{{phase_paths}}\nIssues: {{issue_ids}}"),
    ];
    for (name, body) in templates {
        fs::write(dir.join(format!("{}.md", name)), body).unwrap();
    }
}

/// Write an executable shell script and return its absolute path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}
