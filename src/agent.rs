use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::{AgentConfig, CliTool};
use crate::{log_debug, log_info, log_warn};

/// Maximum time to wait for graceful shutdown after SIGTERM before sending SIGKILL.
const SIGTERM_GRACE_PERIOD_SECONDS: u64 = 5;

/// Polling interval when waiting for a process group to exit after SIGTERM.
const KILL_POLL_INTERVAL_MS: u64 = 100;

/// Global shutdown flag shared with signal handlers.
fn shutdown_flag() -> &'static Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)))
}

/// Check if a shutdown has been requested via signal.
pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Install signal handlers for SIGTERM and SIGINT that set the shutdown flag.
///
/// Call once at program startup. Subsequent calls are safe (re-registers handlers).
pub fn install_signal_handlers() -> Result<(), String> {
    let flag = Arc::clone(shutdown_flag());
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))
        .map_err(|e| format!("Failed to register SIGTERM handler: {}", e))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, flag)
        .map_err(|e| format!("Failed to register SIGINT handler: {}", e))?;
    Ok(())
}

// --- Process Registry ---

/// Global registry of active child process group IDs.
///
/// Uses `std::sync::Mutex` (not tokio's) because operations are fast
/// (insert/remove/iterate) with no I/O under the lock.
fn process_registry() -> &'static Arc<std::sync::Mutex<HashSet<Pid>>> {
    static REGISTRY: OnceLock<Arc<std::sync::Mutex<HashSet<Pid>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Arc::new(std::sync::Mutex::new(HashSet::new())))
}

fn register_child(pgid: Pid) {
    if let Ok(mut registry) = process_registry().lock() {
        registry.insert(pgid);
    }
}

fn unregister_child(pgid: Pid) {
    if let Ok(mut registry) = process_registry().lock() {
        registry.remove(&pgid);
    }
}

/// Kill all registered child process groups.
///
/// Sends SIGTERM to all registered PGIDs, waits for the grace period,
/// then SIGKILLs any survivors. Clears the registry when done.
pub fn kill_all_children() {
    use nix::sys::signal::{killpg, Signal};

    let pgids: Vec<Pid> = {
        let Ok(registry) = process_registry().lock() else {
            return;
        };
        registry.iter().copied().collect()
    };

    if pgids.is_empty() {
        return;
    }

    for &pgid in &pgids {
        let _ = killpg(pgid, Signal::SIGTERM);
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(SIGTERM_GRACE_PERIOD_SECONDS);
    let poll_interval = Duration::from_millis(KILL_POLL_INTERVAL_MS);

    while std::time::Instant::now() < deadline {
        let all_gone = pgids
            .iter()
            .all(|&pgid| matches!(killpg(pgid, None), Err(nix::errno::Errno::ESRCH)));
        if all_gone {
            break;
        }
        std::thread::sleep(poll_interval);
    }

    for &pgid in &pgids {
        let _ = killpg(pgid, Signal::SIGKILL);
    }

    if let Ok(mut registry) = process_registry().lock() {
        registry.clear();
    }
}

// --- Invocation result ---

/// Outcome of a single agent run. All failures are reported here,
/// never as a panic or an Err crossing the runner boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AgentInvocation {
    pub success: bool,
    /// Combined standard output and standard error, in arrival order.
    pub output: String,
    pub error: Option<String>,
}

impl AgentInvocation {
    pub fn failure(output: String, error: impl Into<String>) -> Self {
        AgentInvocation {
            success: false,
            output,
            error: Some(error.into()),
        }
    }
}

/// Trait for running the code-generation agent. Enables mocking in
/// pipeline and implementation-loop tests.
pub trait AgentRunner: Send + Sync {
    fn invoke(
        &self,
        prompt: &str,
        timeout: Duration,
        stream: bool,
        cwd: &Path,
    ) -> impl std::future::Future<Output = AgentInvocation> + Send;
}

/// Real implementation that spawns a CLI agent as a subprocess.
pub struct CliAgentRunner {
    pub tool: CliTool,
    pub model: Option<String>,
}

impl CliAgentRunner {
    pub fn new(tool: CliTool, model: Option<String>) -> Self {
        Self { tool, model }
    }

    pub fn from_config(agent: &AgentConfig) -> Self {
        Self::new(agent.cli.clone(), agent.model.clone())
    }

    /// Verify that the configured CLI tool is available on PATH.
    pub fn verify_cli_available(&self) -> Result<(), String> {
        let output = std::process::Command::new(self.tool.binary_name())
            .args(self.tool.version_args())
            .output()
            .map_err(|e| {
                format!(
                    "{} not found on PATH. {} ({})",
                    self.tool.display_name(),
                    self.tool.install_hint(),
                    e
                )
            })?;

        if !output.status.success() {
            return Err(format!(
                "{} found but `{} {}` failed",
                self.tool.display_name(),
                self.tool.binary_name(),
                self.tool.version_args().join(" ")
            ));
        }

        Ok(())
    }
}

impl AgentRunner for CliAgentRunner {
    async fn invoke(
        &self,
        prompt: &str,
        timeout: Duration,
        stream: bool,
        cwd: &Path,
    ) -> AgentInvocation {
        let mut cmd = tokio::process::Command::new(self.tool.binary_name());
        cmd.args(self.tool.build_args(prompt, self.model.as_deref()));
        cmd.current_dir(cwd);
        run_captured_subprocess(cmd, self.tool.binary_name(), timeout, stream).await
    }
}

/// Spawn a subprocess, capture combined stdout+stderr, enforce a wall-clock
/// timeout. The caller configures the `Command` (program, args, cwd); this
/// function handles process group isolation, capture, timeout, and kill.
///
/// On timeout the whole process group is killed and the partial output
/// captured so far is returned with a timeout error.
pub async fn run_captured_subprocess(
    mut cmd: tokio::process::Command,
    program: &str,
    timeout: Duration,
    stream: bool,
) -> AgentInvocation {
    // stdin MUST be null — with setpgid the child is in a background process
    // group, and any attempt to read from the terminal would cause SIGTTIN.
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    // SAFETY: pre_exec runs between fork() and exec() where only
    // async-signal-safe functions are permitted. setpgid is async-signal-safe
    // per POSIX.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                .map_err(std::io::Error::other)?;
            Ok(())
        });
    }

    log_debug!("[agent] Spawning `{}`...", program);
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return AgentInvocation::failure(
                String::new(),
                format!("`{}` not found on PATH", program),
            );
        }
        Err(e) => {
            return AgentInvocation::failure(
                String::new(),
                format!("Failed to spawn `{}`: {}", program, e),
            );
        }
    };

    let child_pid = match child.id() {
        Some(pid) => pid as i32,
        None => {
            return AgentInvocation::failure(String::new(), "Failed to get child PID".to_string());
        }
    };
    let pgid = Pid::from_raw(child_pid);
    log_debug!("[agent] Subprocess spawned (pid={})", child_pid);
    register_child(pgid);

    // Drain stdout and stderr concurrently so neither pipe can fill and
    // deadlock the child. Lines are interleaved in arrival order.
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_task = tokio::spawn(drain_lines(stdout, stream));
    let err_task = tokio::spawn(drain_lines(stderr, stream));

    log_debug!("[agent] Waiting (timeout={}s)...", timeout.as_secs());
    let wait_result = tokio::time::timeout(timeout, child.wait()).await;

    let collect_output = |out: Result<String, tokio::task::JoinError>,
                          err: Result<String, tokio::task::JoinError>| {
        let mut combined = out.unwrap_or_default();
        let err = err.unwrap_or_default();
        if !err.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&err);
        }
        (combined, err)
    };

    match wait_result {
        Err(_) => {
            log_debug!(
                "[agent] TIMEOUT after {}s — killing process group",
                timeout.as_secs()
            );
            kill_process_group(child_pid).await;
            let _ = child.wait().await;
            unregister_child(pgid);
            let (combined, _) = collect_output(out_task.await, err_task.await);
            AgentInvocation::failure(
                combined,
                format!("`{}` timed out after {} seconds", program, timeout.as_secs()),
            )
        }
        Ok(wait_result) => {
            unregister_child(pgid);
            let (combined, stderr_text) = collect_output(out_task.await, err_task.await);

            let exit_status = match wait_result {
                Ok(status) => status,
                Err(e) => {
                    return AgentInvocation::failure(
                        combined,
                        format!("Error waiting for `{}`: {}", program, e),
                    );
                }
            };
            log_debug!("[agent] Subprocess exited (status={:?})", exit_status.code());

            if is_shutdown_requested() {
                return AgentInvocation::failure(combined, "Shutdown requested".to_string());
            }

            if exit_status.success() {
                AgentInvocation {
                    success: true,
                    output: combined,
                    error: None,
                }
            } else {
                let detail = if stderr_text.trim().is_empty() {
                    format!("`{}` exited with {:?}", program, exit_status.code())
                } else {
                    stderr_text.trim().to_string()
                };
                AgentInvocation::failure(combined, detail)
            }
        }
    }
}

/// Read a child pipe to completion, line by line. When `stream` is set,
/// each line is echoed to stderr as it arrives.
async fn drain_lines<R>(pipe: Option<R>, stream: bool) -> String
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let Some(pipe) = pipe else {
        return String::new();
    };

    let mut reader = BufReader::new(pipe).lines();
    let mut collected = String::new();
    while let Ok(Some(line)) = reader.next_line().await {
        if stream {
            log_info!("{}", line);
        }
        collected.push_str(&line);
        collected.push('\n');
    }
    collected
}

/// Kill a process group by PID. Sends SIGTERM, polls for exit, then SIGKILL.
///
/// The blocking poll-and-sleep loop runs on the tokio blocking thread pool
/// via `spawn_blocking` to avoid stalling async worker threads.
async fn kill_process_group(pgid: i32) {
    tokio::task::spawn_blocking(move || {
        use nix::sys::signal::{killpg, Signal};

        let pgid = Pid::from_raw(pgid);

        if let Err(nix::errno::Errno::ESRCH) = killpg(pgid, Signal::SIGTERM) {
            return; // already gone
        }

        let deadline =
            std::time::Instant::now() + Duration::from_secs(SIGTERM_GRACE_PERIOD_SECONDS);
        let poll_interval = Duration::from_millis(KILL_POLL_INTERVAL_MS);

        while std::time::Instant::now() < deadline {
            // Signal 0 checks if the process group exists without sending a signal
            match killpg(pgid, None) {
                Err(nix::errno::Errno::ESRCH) => return,
                _ => std::thread::sleep(poll_interval),
            }
        }

        let _ = killpg(pgid, Signal::SIGKILL);
    })
    .await
    .unwrap_or_else(|e| log_warn!("kill_process_group task panicked: {}", e));
}

// --- Mock runner ---

/// Mock agent runner for pipeline and implementation-loop tests.
///
/// Returns predefined invocations from a configurable sequence. Each call
/// to `invoke` returns the next result; when the sequence is exhausted the
/// last result repeats (implementation-loop tests iterate an unknown
/// number of times).
pub struct MockAgentRunner {
    results: tokio::sync::Mutex<Vec<AgentInvocation>>,
    prompts: tokio::sync::Mutex<Vec<String>>,
}

impl MockAgentRunner {
    pub fn new(results: Vec<AgentInvocation>) -> Self {
        let mut reversed = results;
        reversed.reverse();
        Self {
            results: tokio::sync::Mutex::new(reversed),
            prompts: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Prompts captured from each `invoke` call, in order.
    pub async fn recorded_prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

impl AgentRunner for MockAgentRunner {
    async fn invoke(
        &self,
        prompt: &str,
        _timeout: Duration,
        _stream: bool,
        _cwd: &Path,
    ) -> AgentInvocation {
        self.prompts.lock().await.push(prompt.to_string());
        let mut results = self.results.lock().await;
        if results.len() > 1 {
            results.pop().expect("checked non-empty")
        } else {
            results.last().cloned().unwrap_or_else(|| {
                AgentInvocation::failure(
                    String::new(),
                    "MockAgentRunner: no results configured".to_string(),
                )
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_combined_output_on_success() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2");

        let result = run_captured_subprocess(cmd, "sh", Duration::from_secs(10), false).await;

        assert!(result.success);
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_reports_stderr() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg("echo boom >&2; exit 3");

        let result = run_captured_subprocess(cmd, "sh", Duration::from_secs(10), false).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg("echo started; sleep 30");

        let result = run_captured_subprocess(cmd, "sh", Duration::from_millis(200), false).await;

        assert!(!result.success);
        let err = result.error.expect("timeout error");
        assert!(err.contains("timed out"), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn missing_binary_is_reported_not_thrown() {
        let cmd = tokio::process::Command::new("autoplan-no-such-binary");

        let result =
            run_captured_subprocess(cmd, "autoplan-no-such-binary", Duration::from_secs(1), false)
                .await;

        assert!(!result.success);
        assert!(result.error.expect("error").contains("not found"));
    }

    #[tokio::test]
    async fn mock_repeats_last_result_when_exhausted() {
        let mock = MockAgentRunner::new(vec![AgentInvocation {
            success: true,
            output: "done".to_string(),
            error: None,
        }]);

        let cwd = std::path::Path::new(".");
        for _ in 0..3 {
            let result = mock.invoke("p", Duration::from_secs(1), false, cwd).await;
            assert!(result.success);
            assert_eq!(result.output, "done");
        }
        assert_eq!(mock.recorded_prompts().await.len(), 3);
    }
}
