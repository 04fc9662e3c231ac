use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::agent::{is_shutdown_requested, AgentRunner};
use crate::autonomy;
use crate::beads::IssueTracker;
use crate::checkpoint::{hash_plan_file, validate_plan, CheckpointStore};
use crate::config::{AutoplanConfig, Budgets};
use crate::git;
use crate::hooks;
use crate::implement::{self, ImplementationParams};
use crate::phases::{self, StepContext};
use crate::review::PhaseTracker;
use crate::test_runner::TestRunner;
use crate::types::{
    now_utc_rfc3339, AutonomyMode, Checkpoint, PhaseState, PhaseType, PipelineResult,
};
use crate::{log_error, log_info, log_warn};

// --- User interaction ---

/// Blocking confirmation at pause points. Mockable for tests.
pub trait UserPrompt: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
}

/// Reads a y/N answer from standard input.
pub struct StdinPrompt;

impl UserPrompt for StdinPrompt {
    fn confirm(&self, message: &str) -> bool {
        eprint!("{} [y/N] ", message);
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Always approves. Used for fully-autonomous runs and tests.
pub struct AutoApprovePrompt;

impl UserPrompt for AutoApprovePrompt {
    fn confirm(&self, _message: &str) -> bool {
        true
    }
}

// --- Run outcome ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    Completed,
    PhaseFailed(PhaseType),
    PausedByUser(PhaseType),
    ShutdownRequested,
}

#[derive(Debug)]
pub struct PipelineRun {
    pub halt_reason: HaltReason,
    pub completed_phases: Vec<PhaseType>,
    pub phase_results: BTreeMap<String, serde_json::Value>,
    pub errors: Vec<String>,
    pub checkpoint_path: Option<PathBuf>,
}

impl PipelineRun {
    pub fn success(&self) -> bool {
        self.halt_reason == HaltReason::Completed
    }
}

// --- Carry-forward state ---

/// Artifacts flowing between phases, persisted into checkpoints so a
/// resumed run picks up where it stopped.
#[derive(Debug, Clone, Default)]
struct CarryState {
    question: String,
    additional_context: Option<String>,
    research_path: Option<String>,
    plan_path: Option<String>,
    phase_files: Vec<String>,
    epic_id: Option<String>,
    issue_ids: Vec<String>,
}

impl CarryState {
    fn to_state_map(&self) -> BTreeMap<String, serde_json::Value> {
        let mut state = BTreeMap::new();
        state.insert("question".to_string(), serde_json::json!(self.question));
        if let Some(ref ctx) = self.additional_context {
            state.insert("additional_context".to_string(), serde_json::json!(ctx));
        }
        if let Some(ref path) = self.research_path {
            state.insert("research_path".to_string(), serde_json::json!(path));
        }
        if let Some(ref path) = self.plan_path {
            state.insert("plan_path".to_string(), serde_json::json!(path));
        }
        if !self.phase_files.is_empty() {
            state.insert("phase_files".to_string(), serde_json::json!(self.phase_files));
        }
        if let Some(ref epic) = self.epic_id {
            state.insert("epic_id".to_string(), serde_json::json!(epic));
        }
        if !self.issue_ids.is_empty() {
            state.insert("issue_ids".to_string(), serde_json::json!(self.issue_ids));
        }
        state
    }

    fn from_state_map(state: &BTreeMap<String, serde_json::Value>) -> Self {
        let get_str =
            |key: &str| state.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let get_list = |key: &str| -> Vec<String> {
            state
                .get(key)
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };

        CarryState {
            question: get_str("question").unwrap_or_default(),
            additional_context: get_str("additional_context"),
            research_path: get_str("research_path"),
            plan_path: get_str("plan_path"),
            phase_files: get_list("phase_files"),
            epic_id: get_str("epic_id"),
            issue_ids: get_list("issue_ids"),
        }
    }

    /// Absorb a phase's outputs.
    fn absorb(&mut self, result: &PipelineResult) {
        if let Some(path) = result.get_str("research_path") {
            self.research_path = Some(path.to_string());
        }
        if let Some(path) = result.get_str("plan_path") {
            self.plan_path = Some(path.to_string());
        }
        let files = result.get_str_list("phase_files");
        if !files.is_empty() {
            self.phase_files = files;
        }
        if let Some(epic) = result.get_str("epic_id") {
            self.epic_id = Some(epic.to_string());
        }
        let issues = result.get_str_list("issue_ids");
        if !issues.is_empty() {
            self.issue_ids = issues;
        }
    }
}

// --- Orchestrator ---

/// Glues the phase steps, autonomy policy, and checkpoint store into the
/// six-phase pipeline. Phases run strictly sequentially; subprocesses are
/// the only parallelism.
pub struct Orchestrator<'a, A, T, R, P>
where
    A: AgentRunner,
    T: IssueTracker,
    R: TestRunner,
    P: UserPrompt,
{
    config: &'a AutoplanConfig,
    mode: AutonomyMode,
    agent: &'a A,
    tracker: &'a T,
    tests: &'a R,
    user: &'a P,
    store: CheckpointStore,
    stream: bool,
    max_iterations: u32,
}

impl<'a, A, T, R, P> Orchestrator<'a, A, T, R, P>
where
    A: AgentRunner,
    T: IssueTracker,
    R: TestRunner,
    P: UserPrompt,
{
    pub fn new(
        config: &'a AutoplanConfig,
        mode: AutonomyMode,
        agent: &'a A,
        tracker: &'a T,
        tests: &'a R,
        user: &'a P,
    ) -> Self {
        let store = CheckpointStore::pipeline(&config.project_path());
        Self {
            config,
            mode,
            agent,
            tracker,
            tests,
            user,
            store,
            stream: false,
            max_iterations: 0,
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    fn budgets(&self) -> &Budgets {
        &self.config.budgets
    }

    /// Run the pipeline from the first phase.
    pub async fn run(&self, question: &str, additional_context: Option<&str>) -> PipelineRun {
        if question.trim().is_empty() {
            return PipelineRun {
                halt_reason: HaltReason::PhaseFailed(PhaseType::Research),
                completed_phases: Vec::new(),
                phase_results: BTreeMap::new(),
                errors: vec!["validate_inputs: research question must not be empty".to_string()],
                checkpoint_path: None,
            };
        }

        let carry = CarryState {
            question: question.to_string(),
            additional_context: additional_context.map(str::to_string),
            ..Default::default()
        };

        let checkpoint = Checkpoint::new("", "", self.mode, PhaseType::Research.name());
        self.drive(PhaseTracker::new(), carry, checkpoint, 0).await
    }

    /// Resume a previous run from its checkpoint.
    ///
    /// Refuses to proceed when the plan file changed since the checkpoint
    /// was written (content-hash mismatch).
    pub async fn resume(&self, checkpoint_path: &Path) -> Result<PipelineRun, String> {
        let checkpoint = self.store.load(checkpoint_path)?;

        if !checkpoint.plan_path.is_empty() {
            validate_plan(&checkpoint)?;
        }

        let carry = CarryState::from_state_map(&checkpoint.state);
        let mut tracker = PhaseTracker::new();
        for name in &checkpoint.completed_phases {
            if let Ok(phase) = crate::types::parse_phase_type(name) {
                tracker.set_state_unchecked(phase, PhaseState::Complete);
            }
        }

        let start_idx = checkpoint.current_phase_idx;
        log_info!(
            "[pipeline] Resuming {} at phase {} ({} complete)",
            checkpoint.id,
            checkpoint.phase,
            checkpoint.completed_phases.len()
        );

        Ok(self.drive(tracker, carry, checkpoint, start_idx).await)
    }

    /// Locate the newest checkpoint for this project, if any.
    pub fn latest_checkpoint(&self) -> Result<Option<PathBuf>, String> {
        Ok(self.store.latest()?.map(|(path, _)| path))
    }

    async fn drive(
        &self,
        mut tracker: PhaseTracker,
        mut carry: CarryState,
        mut checkpoint: Checkpoint,
        start_idx: usize,
    ) -> PipelineRun {
        let run_started = Instant::now();
        let base_secs = checkpoint.cumulative_secs;
        let mut phase_results = BTreeMap::new();
        let mut errors: Vec<String> = checkpoint.errors.clone();
        let mut checkpoint_path = None;
        let project_path = self.config.project_path();

        for idx in start_idx..PhaseType::ALL.len() {
            let phase = PhaseType::ALL[idx];

            if is_shutdown_requested() {
                log_warn!("[pipeline] Shutdown requested before {}", phase);
                self.fill_checkpoint(
                    &mut checkpoint,
                    &tracker,
                    &carry,
                    idx,
                    &errors,
                    run_started,
                    base_secs,
                );
                checkpoint_path = self.write_checkpoint(&checkpoint);
                return PipelineRun {
                    halt_reason: HaltReason::ShutdownRequested,
                    completed_phases: tracker.completed(),
                    phase_results,
                    errors,
                    checkpoint_path,
                };
            }

            if !tracker.dependencies_met(phase) {
                errors.push(format!("dependencies not met for phase {}", phase));
                return PipelineRun {
                    halt_reason: HaltReason::PhaseFailed(phase),
                    completed_phases: tracker.completed(),
                    phase_results,
                    errors,
                    checkpoint_path,
                };
            }

            if let Err(e) = tracker.transition(phase, PhaseState::InProgress) {
                errors.push(e);
                return PipelineRun {
                    halt_reason: HaltReason::PhaseFailed(phase),
                    completed_phases: tracker.completed(),
                    phase_results,
                    errors,
                    checkpoint_path,
                };
            }

            log_info!("[pipeline] Phase {} started", phase);
            let result = self.dispatch(phase, &carry).await;
            phase_results.insert(
                phase.name().to_string(),
                serde_json::to_value(&result).unwrap_or(serde_json::Value::Null),
            );

            if !result.success {
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "phase failed".to_string());
                log_error!("[pipeline] Phase {} failed: {}", phase, error);
                errors.push(format!("{}: {}", phase, error));
                if let Err(e) = tracker.transition(phase, PhaseState::Failed) {
                    log_warn!("[pipeline] {}", e);
                }

                self.fill_checkpoint(
                    &mut checkpoint,
                    &tracker,
                    &carry,
                    idx,
                    &errors,
                    run_started,
                    base_secs,
                );
                checkpoint.phase_results = phase_results.clone();
                checkpoint_path = self.write_checkpoint(&checkpoint);

                return PipelineRun {
                    halt_reason: HaltReason::PhaseFailed(phase),
                    completed_phases: tracker.completed(),
                    phase_results,
                    errors,
                    checkpoint_path,
                };
            }

            carry.absorb(&result);
            if let Err(e) = tracker.transition(phase, PhaseState::Complete) {
                log_warn!("[pipeline] {}", e);
            }
            log_info!("[pipeline] Phase {} complete", phase);

            let policy = autonomy::policy_for(self.mode, phase);
            let next_idx = idx + 1;

            if policy.write_checkpoint {
                self.fill_checkpoint(
                    &mut checkpoint,
                    &tracker,
                    &carry,
                    next_idx.min(PhaseType::ALL.len() - 1),
                    &errors,
                    run_started,
                    base_secs,
                );
                checkpoint.phase_results = phase_results.clone();
                checkpoint_path = self.write_checkpoint(&checkpoint);
            }

            hooks::clear_agent_context(&self.config.tools.clear_context_bin, &project_path);

            if phase == PhaseType::Implementation {
                hooks::record_memory_episode(&self.config.tools.oracle_bin, &project_path);
            }

            if policy.pause_after_phase && next_idx < PhaseType::ALL.len() {
                let message = format!(
                    "Phase {} complete. Continue to {}?",
                    phase,
                    PhaseType::ALL[next_idx]
                );
                if !self.user.confirm(&message) {
                    log_info!("[pipeline] Paused after {}", phase);
                    return PipelineRun {
                        halt_reason: HaltReason::PausedByUser(phase),
                        completed_phases: tracker.completed(),
                        phase_results,
                        errors,
                        checkpoint_path,
                    };
                }
            }
        }

        hooks::compile_memory(&self.config.tools.oracle_bin, &project_path);

        PipelineRun {
            halt_reason: HaltReason::Completed,
            completed_phases: tracker.completed(),
            phase_results,
            errors,
            checkpoint_path,
        }
    }

    async fn dispatch(&self, phase: PhaseType, carry: &CarryState) -> PipelineResult {
        let project_path = self.config.project_path();
        let ctx = StepContext {
            project_path: &project_path,
            agent: self.agent,
            budgets: self.budgets(),
            stream: self.stream,
            ticket_id: if self.config.project.ticket_id.is_empty() {
                None
            } else {
                Some(self.config.project.ticket_id.clone())
            },
        };

        match phase {
            PhaseType::Research => {
                phases::run_research(&ctx, &carry.question, carry.additional_context.as_deref())
                    .await
            }
            PhaseType::Decomposition => {
                let Some(ref research_path) = carry.research_path else {
                    return PipelineResult::fail("no research path from the research phase")
                        .with_data("failed_at", serde_json::json!("validate_inputs"));
                };
                phases::run_decomposition(&ctx, &carry.question, research_path).await
            }
            PhaseType::TddPlanning => {
                let Some(ref plan_path) = carry.plan_path else {
                    return PipelineResult::fail("no plan path from the decomposition phase")
                        .with_data("failed_at", serde_json::json!("validate_inputs"));
                };
                phases::run_tdd_planning(&ctx, plan_path, None).await
            }
            PhaseType::MultiDoc => {
                let Some(ref plan_path) = carry.plan_path else {
                    return PipelineResult::fail("no plan path from the planning phases")
                        .with_data("failed_at", serde_json::json!("validate_inputs"));
                };
                phases::run_multi_doc(&ctx, plan_path).await
            }
            PhaseType::BeadsSync => {
                let plan_title = carry
                    .plan_path
                    .as_deref()
                    .and_then(|p| Path::new(p).file_stem().and_then(|s| s.to_str()))
                    .map(str::to_string)
                    .unwrap_or_else(|| carry.question.clone());
                phases::run_beads_sync(&ctx, self.tracker, &plan_title, &carry.phase_files).await
            }
            PhaseType::Implementation => {
                let params = ImplementationParams {
                    project_path: project_path.clone(),
                    phase_files: carry.phase_files.clone(),
                    issue_ids: carry.issue_ids.clone(),
                    epic_id: carry.epic_id.clone(),
                    ticket_id: ctx.ticket_id.clone(),
                    max_iterations: self.max_iterations,
                    stream: self.stream,
                };
                let outcome = implement::run_implementation_loop(
                    &params,
                    self.agent,
                    self.tracker,
                    self.tests,
                    self.budgets(),
                )
                .await;

                let mut result = if outcome.success {
                    PipelineResult::ok()
                } else {
                    PipelineResult::fail(
                        outcome
                            .error
                            .clone()
                            .unwrap_or_else(|| "implementation incomplete".to_string()),
                    )
                };
                result = result
                    .with_data("iterations", serde_json::json!(outcome.iterations))
                    .with_data("tests_passed", serde_json::json!(outcome.tests_passed))
                    .with_data("phases_closed", serde_json::json!(outcome.phases_closed));
                result
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_checkpoint(
        &self,
        checkpoint: &mut Checkpoint,
        tracker: &PhaseTracker,
        carry: &CarryState,
        current_idx: usize,
        errors: &[String],
        run_started: Instant,
        base_secs: u64,
    ) {
        let project_path = self.config.project_path();

        if let Some(ref plan_path) = carry.plan_path {
            // Store the resolved path so a later validate_plan reads the
            // same file this hash was computed from.
            let on_disk = project_path.join(plan_path);
            let hash_target = if on_disk.exists() {
                on_disk
            } else {
                PathBuf::from(plan_path)
            };
            checkpoint.plan_path = hash_target.to_string_lossy().to_string();
            match hash_plan_file(&hash_target) {
                Ok(hash) => checkpoint.plan_hash = hash,
                Err(e) => log_warn!("[pipeline] Could not hash plan: {}", e),
            }
        }

        checkpoint.autonomy_mode = self.mode;
        checkpoint.current_phase_idx = current_idx;
        checkpoint.phase = PhaseType::ALL[current_idx.min(PhaseType::ALL.len() - 1)]
            .name()
            .to_string();
        checkpoint.completed_phases = tracker
            .completed()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        checkpoint.pending_phases = tracker
            .pending()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        checkpoint.state = carry.to_state_map();
        checkpoint.errors = errors.to_vec();
        checkpoint.git_commit = git::head_sha_or_empty(&project_path);
        checkpoint.timestamp = now_utc_rfc3339();
        // base_secs carries time from previous runs; elapsed is this run only,
        // so repeated checkpoint writes never double-count.
        checkpoint.cumulative_secs = base_secs + run_started.elapsed().as_secs();
    }

    fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Option<PathBuf> {
        match self.store.save(checkpoint) {
            Ok(path) => {
                log_info!("[pipeline] Checkpoint written: {}", path.display());
                Some(path)
            }
            Err(e) => {
                log_warn!("[pipeline] Failed to write checkpoint: {}", e);
                None
            }
        }
    }
}
