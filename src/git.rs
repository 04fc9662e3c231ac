use std::path::Path;
use std::process::Command;

/// Verify that a git repository exists in the given directory.
pub fn is_git_repo(project_root: &Path) -> bool {
    run_git_command(&["rev-parse", "--git-dir"], project_root).is_ok()
}

/// The full SHA of HEAD, recorded into checkpoints so a resume can be
/// correlated with the tree the agent was mutating. An empty string is
/// returned for non-repos (checkpoints tolerate it).
pub fn head_sha_or_empty(project_root: &Path) -> String {
    run_git_command(&["rev-parse", "HEAD"], project_root)
        .map(|out| out.trim().to_string())
        .unwrap_or_default()
}

/// Run a git command and return its stdout as a string.
fn run_git_command(args: &[&str], repo_dir: &Path) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| format!("Failed to run git {}: {}", args.first().unwrap_or(&""), e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        ));
    }

    String::from_utf8(output.stdout).map_err(|e| format!("git output is not valid UTF-8: {}", e))
}
