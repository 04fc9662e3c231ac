use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::log_debug;

/// Issue kind accepted by `bd create --type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueType {
    Epic,
    Task,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Epic => "epic",
            IssueType::Task => "task",
        }
    }
}

/// Substrings of `bd show` output that mark an issue as closed.
/// Matched case-insensitively against the whole text.
const CLOSED_MARKERS: [&str; 6] = [
    "status: closed",
    "status:closed",
    "status: done",
    "status:done",
    "status: complete",
    "status:complete",
];

fn issue_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"beads-[a-z0-9]+").expect("valid regex"))
}

/// Extract the first beads issue id from tracker output.
pub fn extract_issue_id(output: &str) -> Option<String> {
    issue_id_regex().find(output).map(|m| m.as_str().to_string())
}

/// Whether raw `show` text marks the issue closed.
pub fn status_text_is_closed(text: &str) -> bool {
    let lowered = text.to_lowercase();
    CLOSED_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Interface to the external issue tracker. Enables mocking in
/// implementation-loop and pipeline tests.
pub trait IssueTracker: Send + Sync {
    /// Create an issue and return its id, parsed from the tracker output.
    fn create(
        &self,
        title: &str,
        issue_type: IssueType,
        priority: Option<u8>,
    ) -> Result<String, String>;

    /// Raw text of the issue as the tracker prints it.
    fn show(&self, issue_id: &str) -> Result<String, String>;

    /// Chain `child_id` after `parent_id`. Best-effort at call sites.
    fn add_dep(&self, child_id: &str, parent_id: &str) -> Result<(), String>;

    /// Push local issue state to the shared store. Best-effort at call sites.
    fn sync(&self) -> Result<(), String>;

    fn close(&self, issue_id: &str) -> Result<(), String>;

    fn update_status(&self, issue_id: &str, status: &str) -> Result<(), String>;

    fn comment(&self, issue_id: &str, text: &str) -> Result<(), String>;

    /// True iff the issue's status text carries a closed marker.
    /// Any tracker error reads as "not closed".
    fn is_closed(&self, issue_id: &str) -> bool {
        match self.show(issue_id) {
            Ok(text) => status_text_is_closed(&text),
            Err(_) => false,
        }
    }

    /// Check every id (no fail-fast). Returns the overall verdict and the
    /// subset of ids found closed, in input order.
    fn all_closed(&self, ids: &[String]) -> (bool, Vec<String>) {
        let mut closed = Vec::new();
        for id in ids {
            if self.is_closed(id) {
                closed.push(id.clone());
            }
        }
        (closed.len() == ids.len(), closed)
    }
}

// --- CLI adapter ---

/// Adapter over the `bd` issue tracker CLI. Every primitive is one
/// subprocess call with `cwd` = the project path.
///
/// No timeout is enforced here: tracker polls ride inside the outer
/// iteration budget.
pub struct BeadsCli {
    bin: String,
    project_path: PathBuf,
}

impl BeadsCli {
    pub fn new(bin: &str, project_path: &Path) -> Self {
        Self {
            bin: bin.to_string(),
            project_path: project_path.to_path_buf(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, String> {
        log_debug!("[beads] {} {}", self.bin, args.join(" "));
        let output = Command::new(&self.bin)
            .args(args)
            .current_dir(&self.project_path)
            .output()
            .map_err(|e| format!("Failed to run {} {}: {}", self.bin, args.first().unwrap_or(&""), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} {} failed: {}",
                self.bin,
                args.first().unwrap_or(&""),
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl IssueTracker for BeadsCli {
    fn create(
        &self,
        title: &str,
        issue_type: IssueType,
        priority: Option<u8>,
    ) -> Result<String, String> {
        let priority_str;
        let mut args = vec!["create", "--title", title, "--type", issue_type.as_str()];
        if let Some(p) = priority {
            priority_str = p.to_string();
            args.push("--priority");
            args.push(&priority_str);
        }

        let output = self.run(&args)?;
        extract_issue_id(&output)
            .ok_or_else(|| format!("No issue id found in tracker output: {}", output.trim()))
    }

    fn show(&self, issue_id: &str) -> Result<String, String> {
        self.run(&["show", issue_id])
    }

    fn add_dep(&self, child_id: &str, parent_id: &str) -> Result<(), String> {
        self.run(&["dep", "add", child_id, parent_id]).map(|_| ())
    }

    fn sync(&self) -> Result<(), String> {
        self.run(&["sync"]).map(|_| ())
    }

    fn close(&self, issue_id: &str) -> Result<(), String> {
        self.run(&["close", issue_id]).map(|_| ())
    }

    fn update_status(&self, issue_id: &str, status: &str) -> Result<(), String> {
        let status_arg = format!("--status={}", status);
        self.run(&["update", issue_id, &status_arg]).map(|_| ())
    }

    fn comment(&self, issue_id: &str, text: &str) -> Result<(), String> {
        self.run(&["comment", issue_id, text]).map(|_| ())
    }
}

// --- Read-only issue store scan ---

/// On-disk record in `.beads/issue-*.json`. Only the fields the
/// orchestrator classifies on; everything else is ignored.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IssueRecord {
    pub status: String,
    #[serde(default)]
    pub depends_on_id: Option<String>,
}

impl IssueRecord {
    pub fn is_open(&self) -> bool {
        !status_text_is_closed(&format!("status: {}", self.status))
    }
}

/// Scan `.beads/issue-*.json` under the project root.
///
/// Returns `(file_stem, record)` pairs sorted by file name. Corrupt or
/// unreadable files are skipped, not fatal. A missing `.beads/` directory
/// yields an empty list.
pub fn scan_issue_store(project_path: &Path) -> Result<Vec<(String, IssueRecord)>, String> {
    let beads_dir = project_path.join(".beads");

    let entries = match std::fs::read_dir(&beads_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(format!("Failed to read {}: {}", beads_dir.display(), e)),
    };

    let mut records = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("issue-") || !name.ends_with(".json") {
            continue;
        }

        let contents = match std::fs::read_to_string(entry.path()) {
            Ok(c) => c,
            Err(_) => continue,
        };
        let record: IssueRecord = match serde_json::from_str(&contents) {
            Ok(r) => r,
            Err(_) => continue, // corrupt store entry, skip
        };

        let stem = name.trim_end_matches(".json").to_string();
        records.push((stem, record));
    }

    records.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(records)
}

// --- Mock tracker ---

/// In-memory tracker for tests. `show` texts are scripted per issue id;
/// every mutating call is recorded.
#[derive(Default)]
pub struct MockIssueTracker {
    show_texts: std::sync::Mutex<std::collections::HashMap<String, String>>,
    default_show_text: std::sync::Mutex<Option<String>>,
    created: std::sync::Mutex<Vec<(String, String)>>,
    calls: std::sync::Mutex<Vec<String>>,
    next_id: std::sync::Mutex<u32>,
}

impl MockIssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the text `show` returns for an issue id.
    pub fn set_show_text(&self, issue_id: &str, text: &str) {
        self.show_texts
            .lock()
            .expect("mock lock")
            .insert(issue_id.to_string(), text.to_string());
    }

    /// Fallback `show` text for ids with no scripted entry. Useful when
    /// the test cannot know the generated ids up front.
    pub fn set_default_show_text(&self, text: &str) {
        *self.default_show_text.lock().expect("mock lock") = Some(text.to_string());
    }

    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock lock").clone()
    }

    pub fn created_issues(&self) -> Vec<(String, String)> {
        self.created.lock().expect("mock lock").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("mock lock").push(call);
    }
}

impl IssueTracker for MockIssueTracker {
    fn create(
        &self,
        title: &str,
        issue_type: IssueType,
        _priority: Option<u8>,
    ) -> Result<String, String> {
        let mut next = self.next_id.lock().expect("mock lock");
        *next += 1;
        let id = format!("beads-{:03}x", *next);
        self.created
            .lock()
            .expect("mock lock")
            .push((id.clone(), title.to_string()));
        self.record(format!("create {} {}", issue_type.as_str(), title));
        Ok(id)
    }

    fn show(&self, issue_id: &str) -> Result<String, String> {
        self.record(format!("show {}", issue_id));
        let scripted = self
            .show_texts
            .lock()
            .expect("mock lock")
            .get(issue_id)
            .cloned();
        match scripted {
            Some(text) => Ok(text),
            None => self
                .default_show_text
                .lock()
                .expect("mock lock")
                .clone()
                .ok_or_else(|| format!("Issue not found: {}", issue_id)),
        }
    }

    fn add_dep(&self, child_id: &str, parent_id: &str) -> Result<(), String> {
        self.record(format!("dep add {} {}", child_id, parent_id));
        Ok(())
    }

    fn sync(&self) -> Result<(), String> {
        self.record("sync".to_string());
        Ok(())
    }

    fn close(&self, issue_id: &str) -> Result<(), String> {
        self.record(format!("close {}", issue_id));
        self.set_show_text(issue_id, "Status: closed");
        Ok(())
    }

    fn update_status(&self, issue_id: &str, status: &str) -> Result<(), String> {
        self.record(format!("update {} --status={}", issue_id, status));
        self.set_show_text(issue_id, &format!("Status: {}", status));
        Ok(())
    }

    fn comment(&self, issue_id: &str, text: &str) -> Result<(), String> {
        self.record(format!("comment {} {}", issue_id, text));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_issue_id_from_noisy_output() {
        let output = "Created issue beads-a1b2c3 (priority 2)\n";
        assert_eq!(extract_issue_id(output), Some("beads-a1b2c3".to_string()));
    }

    #[test]
    fn no_id_in_output_returns_none() {
        assert_eq!(extract_issue_id("nothing to see"), None);
    }

    #[test]
    fn closed_markers_match_case_insensitively() {
        assert!(status_text_is_closed("Status: Closed"));
        assert!(status_text_is_closed("status:done"));
        assert!(status_text_is_closed("STATUS: COMPLETE"));
        assert!(!status_text_is_closed("Status: open"));
        assert!(!status_text_is_closed("Status: in_progress"));
    }

    #[test]
    fn all_closed_reports_subset_without_fail_fast() {
        let mock = MockIssueTracker::new();
        mock.set_show_text("beads-aa", "Status: closed");
        mock.set_show_text("beads-bb", "Status: open");
        mock.set_show_text("beads-cc", "Status: done");

        let ids = vec![
            "beads-aa".to_string(),
            "beads-bb".to_string(),
            "beads-cc".to_string(),
        ];
        let (all_ok, closed) = mock.all_closed(&ids);

        assert!(!all_ok);
        assert_eq!(closed, vec!["beads-aa".to_string(), "beads-cc".to_string()]);
        // Every id was polled even after the open one
        assert_eq!(
            mock.recorded_calls()
                .iter()
                .filter(|c| c.starts_with("show"))
                .count(),
            3
        );
    }

    #[test]
    fn is_closed_treats_tracker_error_as_open() {
        let mock = MockIssueTracker::new();
        assert!(!mock.is_closed("beads-missing"));
    }
}
