use std::path::PathBuf;
use std::time::Duration;

use crate::agent::{is_shutdown_requested, AgentRunner};
use crate::beads::IssueTracker;
use crate::config::Budgets;
use crate::prompt;
use crate::test_runner::TestRunner;
use crate::types::ImplementationResult;
use crate::{log_info, log_warn};

/// Inputs to the implementation loop.
pub struct ImplementationParams {
    pub project_path: PathBuf,
    pub phase_files: Vec<String>,
    pub issue_ids: Vec<String>,
    pub epic_id: Option<String>,
    pub ticket_id: Option<String>,
    /// Iteration ceiling; zero means "use the configured default".
    pub max_iterations: u32,
    pub stream: bool,
}

/// Run the bounded implementation cycle: agent, sleep, poll issue
/// statuses, run tests.
///
/// The loop exits successfully only when every tracked issue is closed
/// AND the test suite passes in the same iteration. Agent failures
/// (including timeouts) are logged and the loop continues; the iteration
/// ceiling is the only backstop.
pub async fn run_implementation_loop<A, T, R>(
    params: &ImplementationParams,
    agent: &A,
    tracker: &T,
    tests: &R,
    budgets: &Budgets,
) -> ImplementationResult
where
    A: AgentRunner,
    T: IssueTracker,
    R: TestRunner,
{
    let mut result = ImplementationResult::default();

    if params.project_path.as_os_str().is_empty() {
        result.error = Some("project path must not be empty".to_string());
        return result;
    }
    if params.issue_ids.is_empty() {
        result.error = Some("issue list must not be empty".to_string());
        return result;
    }

    let max_iterations = if params.max_iterations == 0 {
        budgets.impl_max_iterations
    } else {
        params.max_iterations
    };
    let agent_timeout = Duration::from_secs(budgets.impl_timeout_secs);
    let loop_sleep = Duration::from_secs(budgets.impl_loop_sleep_secs);

    let base_prompt = prompt::build_implementation_prompt(
        &params.project_path,
        &params.phase_files,
        &params.issue_ids,
        params.epic_id.as_deref(),
        params.ticket_id.as_deref(),
    );
    let mut current_prompt = base_prompt.clone();

    for iteration in 1..=max_iterations {
        result.iterations = iteration;

        if is_shutdown_requested() {
            result.error = Some(format!(
                "shutdown requested before iteration {}",
                iteration
            ));
            return result;
        }

        log_info!(
            "[implement] Iteration {}/{} ({} issues open)",
            iteration,
            max_iterations,
            params.issue_ids.len() - result.phases_closed.len()
        );

        let invocation = agent
            .invoke(&current_prompt, agent_timeout, params.stream, &params.project_path)
            .await;

        if !invocation.success {
            log_warn!(
                "[implement] Iteration {} agent failure: {}",
                iteration,
                invocation.error.as_deref().unwrap_or("unknown error")
            );
        }

        result.output.push_str(&invocation.output);
        if !invocation.output.is_empty() && !invocation.output.ends_with('\n') {
            result.output.push('\n');
        }

        // The pause is deliberate breathing room for the tracker to settle;
        // it is not charged against the agent timeout.
        if loop_sleep > Duration::ZERO {
            tokio::time::sleep(loop_sleep).await;
        }

        let (all_ok, closed) = tracker.all_closed(&params.issue_ids);
        result.phases_closed = closed;

        if !all_ok {
            continue;
        }

        log_info!("[implement] All {} issues closed; running tests", params.issue_ids.len());
        let (passed, test_output) = tests.run_tests(&params.project_path).await;
        result.tests_passed = passed;

        if passed {
            result.success = true;
            log_info!("[implement] Tests passed on iteration {}", iteration);
            return result;
        }

        log_warn!("[implement] Tests failed on iteration {}; feeding output back", iteration);
        current_prompt = prompt::append_test_failures(&base_prompt, &test_output);
    }

    result.error = Some(format!(
        "max iterations ({}) reached without completing implementation",
        max_iterations
    ));
    result
}
