mod common;

use std::fs;

use tempfile::TempDir;

use autoplan::beads::{
    extract_issue_id, scan_issue_store, status_text_is_closed, BeadsCli, IssueTracker, IssueType,
};

use common::write_script;

// --- Pure parsing ---

#[test]
fn issue_id_extraction_matches_beads_slugs() {
    assert_eq!(
        extract_issue_id("created beads-x9f2 for you"),
        Some("beads-x9f2".to_string())
    );
    assert_eq!(
        extract_issue_id("ids: beads-aaa then beads-bbb"),
        Some("beads-aaa".to_string())
    );
    // uppercase is not a beads slug
    assert_eq!(extract_issue_id("BEADS-XYZ"), None);
    assert_eq!(extract_issue_id(""), None);
}

#[test]
fn closed_status_markers() {
    for text in [
        "Status: closed",
        "status:closed",
        "Status: Done",
        "status:done",
        "STATUS: COMPLETE",
        "status:complete",
        "priority: 2\nstatus: closed\ntitle: x",
    ] {
        assert!(status_text_is_closed(text), "{:?} should read closed", text);
    }

    for text in ["Status: open", "status: in_progress", "", "closed"] {
        assert!(!status_text_is_closed(text), "{:?} should read open", text);
    }
}

// --- CLI adapter against stub scripts ---

#[test]
fn create_parses_the_issue_id_from_cli_output() {
    let dir = TempDir::new().unwrap();
    let bd = write_script(
        dir.path(),
        "bd",
        "echo \"Created issue beads-ab12cd (task, priority 2)\"",
    );

    let cli = BeadsCli::new(bd.to_str().unwrap(), dir.path());
    let id = cli.create("Phase 1: Core", IssueType::Task, Some(2)).unwrap();
    assert_eq!(id, "beads-ab12cd");
}

#[test]
fn create_without_id_in_output_is_an_error() {
    let dir = TempDir::new().unwrap();
    let bd = write_script(dir.path(), "bd", "echo ok");

    let cli = BeadsCli::new(bd.to_str().unwrap(), dir.path());
    let err = cli.create("Epic", IssueType::Epic, None).unwrap_err();
    assert!(err.contains("No issue id"), "unexpected error: {}", err);
}

#[test]
fn is_closed_reads_show_output() {
    let dir = TempDir::new().unwrap();
    let bd = write_script(
        dir.path(),
        "bd",
        r#"case "$1" in
  show) echo "id: $2"; echo "Status: closed";;
  *) exit 0;;
esac"#,
    );

    let cli = BeadsCli::new(bd.to_str().unwrap(), dir.path());
    assert!(cli.is_closed("beads-abc"));
}

#[test]
fn is_closed_is_false_on_subprocess_error() {
    let dir = TempDir::new().unwrap();
    let bd = write_script(dir.path(), "bd", "exit 3");

    let cli = BeadsCli::new(bd.to_str().unwrap(), dir.path());
    assert!(!cli.is_closed("beads-abc"));

    // Missing binary reads as open too
    let gone = BeadsCli::new("/nonexistent/bd", dir.path());
    assert!(!gone.is_closed("beads-abc"));
}

#[test]
fn all_closed_polls_every_id() {
    let dir = TempDir::new().unwrap();
    // beads-open stays open, everything else closed
    let bd = write_script(
        dir.path(),
        "bd",
        r#"case "$2" in
  beads-open) echo "Status: open";;
  *) echo "Status: done";;
esac"#,
    );

    let cli = BeadsCli::new(bd.to_str().unwrap(), dir.path());
    let ids = vec![
        "beads-a".to_string(),
        "beads-open".to_string(),
        "beads-b".to_string(),
    ];
    let (all_ok, closed) = cli.all_closed(&ids);

    assert!(!all_ok);
    assert_eq!(closed, vec!["beads-a".to_string(), "beads-b".to_string()]);

    let (all_ok, closed) = cli.all_closed(&["beads-a".to_string(), "beads-b".to_string()]);
    assert!(all_ok);
    assert_eq!(closed.len(), 2);
}

#[test]
fn update_close_and_comment_pass_the_expected_arguments() {
    let dir = TempDir::new().unwrap();
    // Echo the full argument list into a log file for inspection
    let log = dir.path().join("calls.log");
    let bd = write_script(
        dir.path(),
        "bd",
        &format!("echo \"$@\" >> {}", log.display()),
    );

    let cli = BeadsCli::new(bd.to_str().unwrap(), dir.path());
    cli.update_status("beads-aa", "in_progress").unwrap();
    cli.close("beads-aa").unwrap();
    cli.comment("beads-aa", "tests passing").unwrap();

    let calls = fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = calls.lines().collect();
    assert_eq!(lines[0], "update beads-aa --status=in_progress");
    assert_eq!(lines[1], "close beads-aa");
    assert_eq!(lines[2], "comment beads-aa tests passing");
}

#[test]
fn failing_subcommands_surface_stderr() {
    let dir = TempDir::new().unwrap();
    let bd = write_script(dir.path(), "bd", "echo \"no such issue\" >&2; exit 1");

    let cli = BeadsCli::new(bd.to_str().unwrap(), dir.path());
    let err = cli.show("beads-missing").unwrap_err();
    assert!(err.contains("no such issue"), "unexpected error: {}", err);
}

// --- Issue store scan ---

#[test]
fn issue_store_scan_reads_status_and_skips_corrupt() {
    let dir = TempDir::new().unwrap();
    let beads_dir = dir.path().join(".beads");
    fs::create_dir_all(&beads_dir).unwrap();

    fs::write(
        beads_dir.join("issue-aaa.json"),
        r#"{"status": "open", "depends_on_id": "beads-bbb"}"#,
    )
    .unwrap();
    fs::write(beads_dir.join("issue-bbb.json"), r#"{"status": "closed"}"#).unwrap();
    fs::write(beads_dir.join("issue-ccc.json"), "{ corrupt").unwrap();
    fs::write(beads_dir.join("note.txt"), "not an issue").unwrap();

    let records = scan_issue_store(dir.path()).unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].0, "issue-aaa");
    assert!(records[0].1.is_open());
    assert_eq!(records[0].1.depends_on_id.as_deref(), Some("beads-bbb"));
    assert_eq!(records[1].0, "issue-bbb");
    assert!(!records[1].1.is_open());
}

#[test]
fn issue_store_scan_tolerates_missing_directory() {
    let dir = TempDir::new().unwrap();
    assert!(scan_issue_store(dir.path()).unwrap().is_empty());
}
