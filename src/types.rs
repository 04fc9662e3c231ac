use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// --- Enums ---

/// Autonomy policy selector for the pipeline.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyMode {
    #[default]
    Checkpoint,
    Batch,
    FullyAutonomous,
}

impl std::fmt::Display for AutonomyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutonomyMode::Checkpoint => write!(f, "checkpoint"),
            AutonomyMode::Batch => write!(f, "batch"),
            AutonomyMode::FullyAutonomous => write!(f, "fully_autonomous"),
        }
    }
}

pub fn parse_autonomy_mode(s: &str) -> Result<AutonomyMode, String> {
    match s.to_lowercase().as_str() {
        "checkpoint" => Ok(AutonomyMode::Checkpoint),
        "batch" => Ok(AutonomyMode::Batch),
        "fully_autonomous" | "fully-autonomous" | "autonomous" => Ok(AutonomyMode::FullyAutonomous),
        _ => Err(format!(
            "Invalid autonomy mode '{}': expected checkpoint, batch, or fully_autonomous",
            s
        )),
    }
}

/// The six pipeline phases, in execution order.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    Research,
    Decomposition,
    TddPlanning,
    MultiDoc,
    BeadsSync,
    Implementation,
}

impl PhaseType {
    /// All phases in pipeline order.
    pub const ALL: [PhaseType; 6] = [
        PhaseType::Research,
        PhaseType::Decomposition,
        PhaseType::TddPlanning,
        PhaseType::MultiDoc,
        PhaseType::BeadsSync,
        PhaseType::Implementation,
    ];

    /// Zero-based position in the pipeline order.
    pub fn index(&self) -> usize {
        PhaseType::ALL
            .iter()
            .position(|p| p == self)
            .expect("phase is in ALL")
    }

    pub fn name(&self) -> &'static str {
        match self {
            PhaseType::Research => "research",
            PhaseType::Decomposition => "decomposition",
            PhaseType::TddPlanning => "tdd_planning",
            PhaseType::MultiDoc => "multi_doc",
            PhaseType::BeadsSync => "beads_sync",
            PhaseType::Implementation => "implementation",
        }
    }
}

impl std::fmt::Display for PhaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub fn parse_phase_type(s: &str) -> Result<PhaseType, String> {
    match s.to_lowercase().as_str() {
        "research" => Ok(PhaseType::Research),
        "decomposition" => Ok(PhaseType::Decomposition),
        "tdd_planning" | "tdd-planning" => Ok(PhaseType::TddPlanning),
        "multi_doc" | "multi-doc" => Ok(PhaseType::MultiDoc),
        "beads_sync" | "beads-sync" => Ok(PhaseType::BeadsSync),
        "implementation" => Ok(PhaseType::Implementation),
        _ => Err(format!(
            "Invalid phase '{}': expected research, decomposition, tdd_planning, multi_doc, beads_sync, or implementation",
            s
        )),
    }
}

/// Lifecycle state of a single phase within a run.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    #[default]
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl PhaseState {
    /// Validates whether a transition from this state to `to` is allowed.
    ///
    /// Rules:
    /// - Pending can only start: Pending -> InProgress
    /// - InProgress resolves: InProgress -> Complete | Failed
    /// - Failed may be retried: Failed -> InProgress
    /// - Complete is terminal within a run
    pub fn is_valid_transition(&self, to: &PhaseState) -> bool {
        use PhaseState::*;

        matches!(
            (self, to),
            (Pending, InProgress) | (InProgress, Complete) | (InProgress, Failed) | (Failed, InProgress)
        )
    }
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseState::Pending => write!(f, "pending"),
            PhaseState::InProgress => write!(f, "in_progress"),
            PhaseState::Complete => write!(f, "complete"),
            PhaseState::Failed => write!(f, "failed"),
        }
    }
}

/// The five review analysis steps, in fixed order.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStep {
    Contracts,
    Interfaces,
    Promises,
    DataModels,
    Apis,
}

impl ReviewStep {
    /// All steps in analysis order.
    pub const ALL: [ReviewStep; 5] = [
        ReviewStep::Contracts,
        ReviewStep::Interfaces,
        ReviewStep::Promises,
        ReviewStep::DataModels,
        ReviewStep::Apis,
    ];

    pub fn index(&self) -> usize {
        ReviewStep::ALL
            .iter()
            .position(|s| s == self)
            .expect("step is in ALL")
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReviewStep::Contracts => "contracts",
            ReviewStep::Interfaces => "interfaces",
            ReviewStep::Promises => "promises",
            ReviewStep::DataModels => "data_models",
            ReviewStep::Apis => "apis",
        }
    }
}

impl std::fmt::Display for ReviewStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub fn parse_review_step(s: &str) -> Result<ReviewStep, String> {
    match s.to_lowercase().as_str() {
        "contracts" => Ok(ReviewStep::Contracts),
        "interfaces" => Ok(ReviewStep::Interfaces),
        "promises" => Ok(ReviewStep::Promises),
        "data_models" | "data-models" | "datamodels" => Ok(ReviewStep::DataModels),
        "apis" => Ok(ReviewStep::Apis),
        _ => Err(format!(
            "Invalid review step '{}': expected contracts, interfaces, promises, data_models, or apis",
            s
        )),
    }
}

/// Severity of a review finding. Only Critical blocks progression.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    WellDefined,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::WellDefined => write!(f, "well_defined"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Parse a severity string. Accepts common synonyms agents emit.
pub fn parse_severity(s: &str) -> Result<Severity, String> {
    match s.to_lowercase().as_str() {
        "well_defined" | "well-defined" | "ok" | "good" => Ok(Severity::WellDefined),
        "warning" | "warn" => Ok(Severity::Warning),
        "critical" | "error" | "fail" => Ok(Severity::Critical),
        _ => Err(format!(
            "Invalid severity '{}': expected well_defined, warning, or critical",
            s
        )),
    }
}

/// Why a review loop stopped.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    AllComplete,
    CriticalBlocking,
    MaxIterations,
    Timeout,
    UserCancelled,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::AllComplete => write!(f, "all_complete"),
            TerminationReason::CriticalBlocking => write!(f, "critical_blocking"),
            TerminationReason::MaxIterations => write!(f, "max_iterations"),
            TerminationReason::Timeout => write!(f, "timeout"),
            TerminationReason::UserCancelled => write!(f, "user_cancelled"),
        }
    }
}

// --- Result carriers ---

/// Severity tallies for a step, phase, or whole review.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct FindingCounts {
    pub well_defined: usize,
    pub warning: usize,
    pub critical: usize,
}

impl FindingCounts {
    pub fn total(&self) -> usize {
        self.well_defined + self.warning + self.critical
    }

    pub fn add(&mut self, other: &FindingCounts) {
        self.well_defined += other.well_defined;
        self.warning += other.warning;
        self.critical += other.critical;
    }
}

/// Generic result of a pipeline phase or operation.
///
/// Carries artifact paths and per-phase outputs forward in `data`.
/// BTreeMap keeps serialized output stable across runs.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PipelineResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl PipelineResult {
    pub fn ok() -> Self {
        PipelineResult {
            success: true,
            error: None,
            data: BTreeMap::new(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        PipelineResult {
            success: false,
            error: Some(error.into()),
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: &str, value: serde_json::Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        self.data
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Outcome of the bounded implementation loop.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ImplementationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub iterations: u32,
    pub tests_passed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases_closed: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

// --- Checkpoint schema ---

/// A serialized snapshot of orchestrator state sufficient to resume.
///
/// Timestamps are RFC3339 UTC with a `Z` suffix so lexicographic order
/// equals chronological order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub id: String,
    pub plan_path: String,
    pub plan_hash: String,
    pub autonomy_mode: AutonomyMode,
    pub phase: String,
    pub current_phase_idx: usize,
    #[serde(default)]
    pub completed_phases: Vec<String>,
    #[serde(default)]
    pub pending_phases: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub phase_results: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub total_counts: FindingCounts,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub state: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default)]
    pub git_commit: String,
    pub timestamp: String,
    #[serde(default)]
    pub started_at: String,
    #[serde(default)]
    pub cumulative_secs: u64,
}

impl Checkpoint {
    /// Minimal checkpoint with required fields populated and a fresh id.
    pub fn new(plan_path: &str, plan_hash: &str, autonomy_mode: AutonomyMode, phase: &str) -> Self {
        let now = now_utc_rfc3339();
        Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            plan_path: plan_path.to_string(),
            plan_hash: plan_hash.to_string(),
            autonomy_mode,
            phase: phase.to_string(),
            current_phase_idx: 0,
            completed_phases: Vec::new(),
            pending_phases: Vec::new(),
            phase_results: BTreeMap::new(),
            total_counts: FindingCounts::default(),
            state: BTreeMap::new(),
            errors: Vec::new(),
            git_commit: String::new(),
            timestamp: now.clone(),
            started_at: now,
            cumulative_secs: 0,
        }
    }
}

/// Current time as RFC3339 UTC with `Z` suffix (sorts lexicographically).
pub fn now_utc_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
