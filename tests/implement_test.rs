mod common;

use std::path::PathBuf;

use autoplan::agent::{AgentInvocation, MockAgentRunner};
use autoplan::beads::{IssueTracker, MockIssueTracker};
use autoplan::config::Budgets;
use autoplan::implement::{run_implementation_loop, ImplementationParams};
use autoplan::prompt::TEST_FAILURE_HEADING;
use autoplan::test_runner::MockTestRunner;

use common::test_budgets;

fn make_params(issue_ids: &[&str]) -> ImplementationParams {
    ImplementationParams {
        project_path: PathBuf::from("/tmp/project"),
        phase_files: vec!["thoughts/shared/plans/2026-03-01-tdd-x-01-core.md".to_string()],
        issue_ids: issue_ids.iter().map(|s| s.to_string()).collect(),
        epic_id: Some("beads-epic1".to_string()),
        ticket_id: None,
        max_iterations: 0,
        stream: false,
    }
}

fn ok_invocation(output: &str) -> AgentInvocation {
    AgentInvocation {
        success: true,
        output: output.to_string(),
        error: None,
    }
}

/// Scenario: issue already closed and tests pass on the first try.
#[tokio::test]
async fn immediate_success_completes_in_one_iteration() {
    let params = make_params(&["ISSUE-1"]);
    let agent = MockAgentRunner::new(vec![ok_invocation("implemented phase 1")]);
    let tracker = MockIssueTracker::new();
    tracker.set_show_text("ISSUE-1", "Status: closed");
    let tests = MockTestRunner::passing();
    let budgets = test_budgets();

    let result = run_implementation_loop(&params, &agent, &tracker, &tests, &budgets).await;

    assert!(result.success);
    assert_eq!(result.iterations, 1);
    assert!(result.tests_passed);
    assert_eq!(result.phases_closed, vec!["ISSUE-1".to_string()]);
    assert!(result.output.contains("implemented phase 1"));
    assert_eq!(tests.runs(), 1);
}

/// Scenario: issues never close; the ceiling is the only exit.
#[tokio::test]
async fn open_issues_exhaust_max_iterations() {
    let mut params = make_params(&["ISSUE-1"]);
    params.max_iterations = 3;
    let agent = MockAgentRunner::new(vec![ok_invocation("still working")]);
    let tracker = MockIssueTracker::new();
    tracker.set_show_text("ISSUE-1", "Status: open");
    let tests = MockTestRunner::passing();
    let budgets = test_budgets();

    let result = run_implementation_loop(&params, &agent, &tracker, &tests, &budgets).await;

    assert!(!result.success);
    assert_eq!(result.iterations, 3);
    assert!(!result.tests_passed);
    assert!(result.phases_closed.is_empty());
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("max iterations (3)"));
    // Tests never ran: closure gate failed every iteration
    assert_eq!(tests.runs(), 0);
}

#[tokio::test]
async fn agent_failures_do_not_terminate_the_loop() {
    let mut params = make_params(&["ISSUE-1"]);
    params.max_iterations = 3;
    let agent = MockAgentRunner::new(vec![
        AgentInvocation::failure("partial output".to_string(), "agent timed out"),
        ok_invocation("finished the work"),
    ]);
    let tracker = MockIssueTracker::new();
    tracker.set_show_text("ISSUE-1", "Status: open");
    let tests = MockTestRunner::passing();
    let budgets = test_budgets();

    let result = run_implementation_loop(&params, &agent, &tracker, &tests, &budgets).await;

    // Two iterations ran past the failure before exhausting on the third
    assert_eq!(result.iterations, 3);
    assert!(result.output.contains("partial output"));
    assert!(result.output.contains("finished the work"));
}

#[tokio::test]
async fn failing_tests_feed_output_into_the_next_prompt() {
    let mut params = make_params(&["ISSUE-1"]);
    params.max_iterations = 2;
    let agent = MockAgentRunner::new(vec![ok_invocation("done")]);
    let tracker = MockIssueTracker::new();
    tracker.set_show_text("ISSUE-1", "Status: closed");
    let tests = MockTestRunner::new(vec![
        (false, "FAILED tests/test_auth.py::test_login".to_string()),
        (true, "all green".to_string()),
    ]);
    let budgets = test_budgets();

    let result = run_implementation_loop(&params, &agent, &tracker, &tests, &budgets).await;

    assert!(result.success);
    assert_eq!(result.iterations, 2);
    assert!(result.tests_passed);
    assert_eq!(tests.runs(), 2);

    let prompts = agent.recorded_prompts().await;
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains(TEST_FAILURE_HEADING));
    assert!(prompts[1].contains(TEST_FAILURE_HEADING));
    assert!(prompts[1].contains("FAILED tests/test_auth.py::test_login"));
}

#[tokio::test]
async fn partial_closure_is_reported_in_phases_closed() {
    let mut params = make_params(&["ISSUE-1", "ISSUE-2", "ISSUE-3"]);
    params.max_iterations = 1;
    let agent = MockAgentRunner::new(vec![ok_invocation("one down")]);
    let tracker = MockIssueTracker::new();
    tracker.set_show_text("ISSUE-1", "Status: done");
    tracker.set_show_text("ISSUE-2", "Status: open");
    tracker.set_show_text("ISSUE-3", "Status: complete");
    let tests = MockTestRunner::passing();
    let budgets = test_budgets();

    let result = run_implementation_loop(&params, &agent, &tracker, &tests, &budgets).await;

    assert!(!result.success);
    assert_eq!(
        result.phases_closed,
        vec!["ISSUE-1".to_string(), "ISSUE-3".to_string()]
    );
}

#[tokio::test]
async fn empty_issue_list_is_a_validation_failure() {
    let params = make_params(&[]);
    let agent = MockAgentRunner::new(vec![ok_invocation("unused")]);
    let tracker = MockIssueTracker::new();
    let tests = MockTestRunner::passing();
    let budgets = test_budgets();

    let result = run_implementation_loop(&params, &agent, &tracker, &tests, &budgets).await;

    assert!(!result.success);
    assert_eq!(result.iterations, 0);
    assert!(result.error.as_deref().unwrap().contains("issue list"));
    assert!(agent.recorded_prompts().await.is_empty());
}

#[tokio::test]
async fn zero_max_iterations_uses_the_configured_default() {
    let params = make_params(&["ISSUE-1"]); // max_iterations: 0
    let agent = MockAgentRunner::new(vec![ok_invocation("working")]);
    let tracker = MockIssueTracker::new();
    tracker.set_show_text("ISSUE-1", "Status: open");
    let tests = MockTestRunner::passing();
    let budgets = Budgets {
        impl_max_iterations: 2,
        ..test_budgets()
    };

    let result = run_implementation_loop(&params, &agent, &tracker, &tests, &budgets).await;

    assert!(!result.success);
    assert_eq!(result.iterations, 2);
    assert!(result.error.as_deref().unwrap().contains("max iterations (2)"));
}

#[tokio::test]
async fn success_invariants_hold() {
    let params = make_params(&["ISSUE-1", "ISSUE-2"]);
    let agent = MockAgentRunner::new(vec![ok_invocation("done")]);
    let tracker = MockIssueTracker::new();
    tracker.close("ISSUE-1").unwrap();
    tracker.close("ISSUE-2").unwrap();
    let tests = MockTestRunner::passing();
    let budgets = test_budgets();

    let result = run_implementation_loop(&params, &agent, &tracker, &tests, &budgets).await;

    assert!(result.success);
    assert!(result.iterations <= budgets.impl_max_iterations);
    assert!(result.tests_passed);
    assert_eq!(result.phases_closed.len(), params.issue_ids.len());
    assert!(result.error.is_none());
}
