use std::path::Path;
use std::time::Duration;

use crate::agent::run_captured_subprocess;
use crate::{log_debug, log_info};

/// Message returned when neither test command is available.
pub const NO_TEST_COMMAND_MSG: &str = "No test command found, skipping";

/// Interface to the project test suite. Enables mocking in
/// implementation-loop tests.
pub trait TestRunner: Send + Sync {
    /// Run the suite. Returns `(passed, combined_output)`. Never errors:
    /// infrastructure failures read as a failed run with the reason in
    /// the output.
    fn run_tests(
        &self,
        project_path: &Path,
    ) -> impl std::future::Future<Output = (bool, String)> + Send;
}

/// Real runner: `pytest -v --tb=short` first, `make test` only when the
/// pytest binary is missing from PATH entirely.
///
/// A pytest run that fails is a test failure, never a reason to fall back.
pub struct CommandTestRunner {
    pytest_bin: String,
    make_bin: String,
    timeout: Duration,
}

impl CommandTestRunner {
    pub fn new(pytest_bin: &str, make_bin: &str, timeout: Duration) -> Self {
        Self {
            pytest_bin: pytest_bin.to_string(),
            make_bin: make_bin.to_string(),
            timeout,
        }
    }

    /// Binary lookup: spawn failure with `NotFound` means absent.
    /// Any other outcome (including a nonzero exit) means present.
    fn binary_available(&self, bin: &str) -> bool {
        match std::process::Command::new(bin)
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
        {
            Ok(_) => true,
            Err(e) => e.kind() != std::io::ErrorKind::NotFound,
        }
    }

    async fn run_command(
        &self,
        program: &str,
        args: &[&str],
        project_path: &Path,
    ) -> (bool, String) {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        cmd.current_dir(project_path);

        let result = run_captured_subprocess(cmd, program, self.timeout, false).await;

        if result.success {
            (true, result.output)
        } else {
            let mut output = result.output;
            if let Some(err) = result.error {
                if !output.is_empty() && !output.ends_with('\n') {
                    output.push('\n');
                }
                output.push_str(&err);
            }
            (false, output)
        }
    }
}

impl TestRunner for CommandTestRunner {
    async fn run_tests(&self, project_path: &Path) -> (bool, String) {
        if self.binary_available(&self.pytest_bin) {
            log_debug!("[tests] Running {} -v --tb=short", self.pytest_bin);
            return self
                .run_command(&self.pytest_bin, &["-v", "--tb=short"], project_path)
                .await;
        }

        if project_path.join("Makefile").exists() {
            log_debug!("[tests] {} missing, falling back to make test", self.pytest_bin);
            return self.run_command(&self.make_bin, &["test"], project_path).await;
        }

        log_info!("[tests] {}", NO_TEST_COMMAND_MSG);
        (true, NO_TEST_COMMAND_MSG.to_string())
    }
}

// --- Mock runner ---

/// Scripted test runner for loop tests. Results are consumed in order;
/// the last one repeats once exhausted.
pub struct MockTestRunner {
    results: std::sync::Mutex<Vec<(bool, String)>>,
    run_count: std::sync::atomic::AtomicU32,
}

impl MockTestRunner {
    pub fn new(results: Vec<(bool, String)>) -> Self {
        let mut reversed = results;
        reversed.reverse();
        Self {
            results: std::sync::Mutex::new(reversed),
            run_count: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn passing() -> Self {
        Self::new(vec![(true, "all tests passed".to_string())])
    }

    pub fn runs(&self) -> u32 {
        self.run_count.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl TestRunner for MockTestRunner {
    async fn run_tests(&self, _project_path: &Path) -> (bool, String) {
        self.run_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut results = self.results.lock().expect("mock lock");
        if results.len() > 1 {
            results.pop().expect("checked non-empty")
        } else {
            results
                .last()
                .cloned()
                .unwrap_or((false, "MockTestRunner: no results configured".to_string()))
        }
    }
}
