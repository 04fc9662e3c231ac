use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::analyzers;
use crate::checkpoint::CheckpointStore;
use crate::config::Budgets;
use crate::findings::{
    categorize, generate_recommendations, CategorizedFindings, Finding, Recommendations,
    StepAnalysis,
};
use crate::requirement::RequirementNode;
use crate::types::{
    AutonomyMode, Checkpoint, FindingCounts, PhaseState, PhaseType, ReviewStep, TerminationReason,
};
use crate::{log_debug, log_info, log_warn};

// --- Phase state machine ---

/// Per-phase lifecycle states for one review or pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTracker {
    states: [PhaseState; PhaseType::ALL.len()],
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            states: [PhaseState::Pending; PhaseType::ALL.len()],
        }
    }

    pub fn state(&self, phase: PhaseType) -> PhaseState {
        self.states[phase.index()]
    }

    pub fn set_state_unchecked(&mut self, phase: PhaseType, state: PhaseState) {
        self.states[phase.index()] = state;
    }

    /// Apply a transition, or fail and leave the state unchanged.
    pub fn transition(&mut self, phase: PhaseType, to: PhaseState) -> Result<(), String> {
        let from = self.state(phase);
        if !from.is_valid_transition(&to) {
            return Err(format!(
                "Invalid phase transition for {}: {} -> {}",
                phase, from, to
            ));
        }
        self.states[phase.index()] = to;
        Ok(())
    }

    /// Phase `i` may run only when every earlier phase is complete.
    /// The first phase has no dependency.
    pub fn dependencies_met(&self, phase: PhaseType) -> bool {
        PhaseType::ALL[..phase.index()]
            .iter()
            .all(|p| self.state(*p) == PhaseState::Complete)
    }

    pub fn completed(&self) -> Vec<PhaseType> {
        PhaseType::ALL
            .iter()
            .copied()
            .filter(|p| self.state(*p) == PhaseState::Complete)
            .collect()
    }

    pub fn pending(&self) -> Vec<PhaseType> {
        PhaseType::ALL
            .iter()
            .copied()
            .filter(|p| self.state(*p) != PhaseState::Complete)
            .collect()
    }
}

// --- Step navigation ---

/// Cursor over the five analysis steps. Navigation refuses to wrap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepNavigator {
    idx: usize,
}

impl StepNavigator {
    pub fn new() -> Self {
        Self { idx: 0 }
    }

    pub fn current(&self) -> ReviewStep {
        ReviewStep::ALL[self.idx]
    }

    pub fn next(&mut self) -> Result<ReviewStep, String> {
        if self.idx + 1 >= ReviewStep::ALL.len() {
            return Err(format!(
                "Already at the last step ({}); cannot advance",
                self.current()
            ));
        }
        self.idx += 1;
        Ok(self.current())
    }

    pub fn previous(&mut self) -> Result<ReviewStep, String> {
        if self.idx == 0 {
            return Err(format!(
                "Already at the first step ({}); cannot go back",
                self.current()
            ));
        }
        self.idx -= 1;
        Ok(self.current())
    }
}

// --- Guarded tree traversal ---

/// Depth-first analysis of a requirement tree under one step.
///
/// Two guards bound the recursion:
/// - cycle guard: an id seen twice yields a single Critical finding and
///   the subtree under the revisited node is not analyzed further
/// - depth guard: descent past `max_depth` yields a single Warning and
///   stops
pub fn review_tree(
    step: ReviewStep,
    root: &RequirementNode,
    phase_name: &str,
    max_depth: usize,
) -> Vec<StepAnalysis> {
    let mut visited = HashSet::new();
    let mut analyses = Vec::new();
    walk(step, root, phase_name, 1, max_depth, &mut visited, &mut analyses);
    analyses
}

fn walk(
    step: ReviewStep,
    node: &RequirementNode,
    phase_name: &str,
    depth: usize,
    max_depth: usize,
    visited: &mut HashSet<String>,
    analyses: &mut Vec<StepAnalysis>,
) {
    if !visited.insert(node.id.clone()) {
        let finding = Finding::critical(
            &format!("{}-{}-cycle", step, node.id),
            &node.id,
            &format!("Circular dependency detected at requirement {}", node.id),
            "Break the cycle in the requirement hierarchy",
        );
        analyses.push(StepAnalysis::new(step, &node.id, vec![finding]));
        return;
    }

    if depth > max_depth {
        let finding = Finding::warning(
            &format!("{}-{}-depth", step, node.id),
            &node.id,
            &format!("Maximum recursion depth exceeded at requirement {}", node.id),
            &format!("Hierarchy is deeper than {} levels", max_depth),
        );
        analyses.push(StepAnalysis::new(step, &node.id, vec![finding]));
        return;
    }

    analyses.push(analyzers::analyze(step, node, phase_name));

    for child in &node.children {
        walk(step, child, phase_name, depth + 1, max_depth, visited, analyses);
    }
}

// --- Review results ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StepReview {
    pub step: ReviewStep,
    pub analyses: Vec<StepAnalysis>,
    pub categorized: CategorizedFindings,
    pub recommendations: Recommendations,
}

impl StepReview {
    pub fn findings(&self) -> Vec<&Finding> {
        self.analyses.iter().flat_map(|a| a.findings.iter()).collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PhaseReview {
    pub phase: PhaseType,
    pub steps: Vec<StepReview>,
    pub counts: FindingCounts,
    pub can_proceed: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReviewReport {
    pub phases: Vec<PhaseReview>,
    pub total_counts: FindingCounts,
    pub can_proceed: bool,
    pub termination_reason: TerminationReason,
}

impl ReviewReport {
    /// CLI exit code: 0 clean, 1 warnings only, 2 any critical.
    pub fn exit_code(&self) -> i32 {
        exit_code(&self.total_counts)
    }
}

pub fn exit_code(counts: &FindingCounts) -> i32 {
    if counts.critical > 0 {
        2
    } else if counts.warning > 0 {
        1
    } else {
        0
    }
}

/// Build one step's review: traverse the tree, categorize, recommend.
pub fn review_step(
    step: ReviewStep,
    root: &RequirementNode,
    phase: PhaseType,
    max_depth: usize,
) -> StepReview {
    let analyses = review_tree(step, root, phase.name(), max_depth);
    let findings: Vec<Finding> = analyses
        .iter()
        .flat_map(|a| a.findings.iter().cloned())
        .collect();
    let categorized = categorize(&findings);
    let recommendations = generate_recommendations(&findings);

    StepReview {
        step,
        analyses,
        categorized,
        recommendations,
    }
}

// --- Review engine ---

/// Optional checkpointing attached to a review run.
pub struct ReviewCheckpointing {
    pub store: CheckpointStore,
    pub plan_path: String,
    pub plan_hash: String,
    pub slug: String,
    pub autonomy_mode: AutonomyMode,
}

/// Drives the nested review loops: six phases, five steps per phase,
/// guarded depth-first traversal per step.
///
/// Progression gates on critical findings: the first step that produces
/// one fails its phase and terminates the review with
/// `critical_blocking`. Warnings never gate.
pub struct ReviewEngine<'a> {
    budgets: &'a Budgets,
    cancel: CancellationToken,
    checkpointing: Option<ReviewCheckpointing>,
}

impl<'a> ReviewEngine<'a> {
    pub fn new(budgets: &'a Budgets) -> Self {
        Self {
            budgets,
            cancel: CancellationToken::new(),
            checkpointing: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_checkpointing(mut self, checkpointing: ReviewCheckpointing) -> Self {
        self.checkpointing = Some(checkpointing);
        self
    }

    pub fn run(&self, root: &RequirementNode) -> ReviewReport {
        let started = Instant::now();
        let deadline = Duration::from_secs(self.budgets.review_timeout_secs);
        let mut tracker = PhaseTracker::new();
        let mut phases = Vec::new();
        let mut total_counts = FindingCounts::default();
        let mut iterations = 0u32;
        let mut termination = TerminationReason::AllComplete;

        'outer: for phase in PhaseType::ALL {
            if !tracker.dependencies_met(phase) {
                // A failed earlier phase blocks everything after it.
                break;
            }

            if let Err(e) = tracker.transition(phase, PhaseState::InProgress) {
                log_warn!("[review] {}", e);
                break;
            }
            log_info!("[review] Phase {} started", phase);

            let mut steps = Vec::new();
            let mut phase_counts = FindingCounts::default();
            let mut phase_blocked = false;

            let mut navigator = StepNavigator::new();
            loop {
                let step = navigator.current();

                if self.cancel.is_cancelled() || crate::agent::is_shutdown_requested() {
                    termination = TerminationReason::UserCancelled;
                    self.finish_phase(&mut tracker, phase, PhaseState::Failed);
                    phases.push(PhaseReview {
                        phase,
                        steps,
                        counts: phase_counts,
                        can_proceed: false,
                    });
                    break 'outer;
                }

                if started.elapsed() >= deadline {
                    termination = TerminationReason::Timeout;
                    self.finish_phase(&mut tracker, phase, PhaseState::Failed);
                    phases.push(PhaseReview {
                        phase,
                        steps,
                        counts: phase_counts,
                        can_proceed: false,
                    });
                    break 'outer;
                }

                iterations += 1;
                if iterations > self.budgets.review_max_iterations {
                    termination = TerminationReason::MaxIterations;
                    self.finish_phase(&mut tracker, phase, PhaseState::Failed);
                    phases.push(PhaseReview {
                        phase,
                        steps,
                        counts: phase_counts,
                        can_proceed: false,
                    });
                    break 'outer;
                }

                let step_review =
                    review_step(step, root, phase, self.budgets.max_recursion_depth);
                log_debug!(
                    "[review] {} / {}: wd={} warn={} crit={}",
                    phase,
                    step,
                    step_review.categorized.counts.well_defined,
                    step_review.categorized.counts.warning,
                    step_review.categorized.counts.critical
                );

                phase_counts.add(&step_review.categorized.counts);
                total_counts.add(&step_review.categorized.counts);
                let blocked = !step_review.categorized.can_proceed;
                steps.push(step_review);

                if blocked {
                    phase_blocked = true;
                    break;
                }

                if navigator.next().is_err() {
                    break; // last step done
                }
            }

            let can_proceed = !phase_blocked;
            let end_state = if phase_blocked {
                PhaseState::Failed
            } else {
                PhaseState::Complete
            };
            self.finish_phase(&mut tracker, phase, end_state);

            phases.push(PhaseReview {
                phase,
                steps,
                counts: phase_counts,
                can_proceed,
            });

            self.write_checkpoint(&tracker, phase, &total_counts);

            if phase_blocked {
                termination = TerminationReason::CriticalBlocking;
                log_info!("[review] Phase {} blocked on critical findings", phase);
                break;
            }
            log_info!("[review] Phase {} complete", phase);
        }

        ReviewReport {
            phases,
            can_proceed: total_counts.critical == 0
                && termination == TerminationReason::AllComplete,
            total_counts,
            termination_reason: termination,
        }
    }

    fn finish_phase(&self, tracker: &mut PhaseTracker, phase: PhaseType, state: PhaseState) {
        if let Err(e) = tracker.transition(phase, state) {
            log_warn!("[review] {}", e);
        }
    }

    /// Persist a review checkpoint after a phase, when configured.
    /// Checkpoint failures are logged, never fatal to the review.
    fn write_checkpoint(&self, tracker: &PhaseTracker, phase: PhaseType, counts: &FindingCounts) {
        let Some(ref ckpt) = self.checkpointing else {
            return;
        };

        let mut checkpoint = Checkpoint::new(
            &ckpt.plan_path,
            &ckpt.plan_hash,
            ckpt.autonomy_mode,
            phase.name(),
        );
        checkpoint.current_phase_idx = phase.index();
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
        checkpoint.total_counts = *counts;

        if let Err(e) = ckpt.store.save_review(&checkpoint, &ckpt.slug) {
            log_warn!("[review] Failed to write review checkpoint: {}", e);
        }
    }
}
