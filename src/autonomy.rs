use crate::types::{AutonomyMode, PhaseType};

/// What the orchestrator does after a phase under the selected mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePolicy {
    /// Block on user input before moving to the next phase.
    pub pause_after_phase: bool,
    /// Persist a checkpoint once the phase resolves.
    pub write_checkpoint: bool,
    /// Accept the phase's artifacts without asking.
    pub auto_approve: bool,
}

/// Pipeline groups: batches of phases that form one logical unit of work.
pub const PIPELINE_GROUPS: [(&str, &[PhaseType]); 3] = [
    (
        "planning",
        &[
            PhaseType::Research,
            PhaseType::Decomposition,
            PhaseType::TddPlanning,
        ],
    ),
    ("document", &[PhaseType::MultiDoc, PhaseType::BeadsSync]),
    ("execution", &[PhaseType::Implementation]),
];

/// Review groups differ from the pipeline groups on purpose: review
/// pairs tdd_planning with multi_doc, and beads_sync with implementation.
pub const REVIEW_GROUPS: [(&str, &[PhaseType]); 3] = [
    ("planning", &[PhaseType::Research, PhaseType::Decomposition]),
    ("tdd", &[PhaseType::TddPlanning, PhaseType::MultiDoc]),
    (
        "execution",
        &[PhaseType::BeadsSync, PhaseType::Implementation],
    ),
];

/// Name of the pipeline group containing `phase`.
pub fn pipeline_group(phase: PhaseType) -> &'static str {
    PIPELINE_GROUPS
        .iter()
        .find(|(_, phases)| phases.contains(&phase))
        .map(|(name, _)| *name)
        .expect("every phase belongs to a pipeline group")
}

/// Name of the review group containing `phase`.
pub fn review_group(phase: PhaseType) -> &'static str {
    REVIEW_GROUPS
        .iter()
        .find(|(_, phases)| phases.contains(&phase))
        .map(|(name, _)| *name)
        .expect("every phase belongs to a review group")
}

/// BATCH pauses only at group boundaries: decomposition, multi_doc, and
/// implementation (the tail of each review group).
pub fn is_batch_boundary(phase: PhaseType) -> bool {
    matches!(
        phase,
        PhaseType::Decomposition | PhaseType::MultiDoc | PhaseType::Implementation
    )
}

/// The policy matrix.
///
/// | mode             | pause        | checkpoint   | auto-approve  |
/// |------------------|--------------|--------------|---------------|
/// | checkpoint       | always       | always       | never         |
/// | batch            | boundary     | boundary     | within groups |
/// | fully_autonomous | never        | always       | always        |
///
/// Fully-autonomous still checkpoints after every phase for crash
/// recovery.
pub fn policy_for(mode: AutonomyMode, phase: PhaseType) -> PhasePolicy {
    let boundary = is_batch_boundary(phase);
    match mode {
        AutonomyMode::Checkpoint => PhasePolicy {
            pause_after_phase: true,
            write_checkpoint: true,
            auto_approve: false,
        },
        AutonomyMode::Batch => PhasePolicy {
            pause_after_phase: boundary,
            write_checkpoint: boundary,
            auto_approve: !boundary,
        },
        AutonomyMode::FullyAutonomous => PhasePolicy {
            pause_after_phase: false,
            write_checkpoint: true,
            auto_approve: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_phase_belongs_to_both_grouping_tables() {
        for phase in PhaseType::ALL {
            pipeline_group(phase);
            review_group(phase);
        }
    }

    #[test]
    fn groupings_differ_where_intended() {
        assert_eq!(pipeline_group(PhaseType::TddPlanning), "planning");
        assert_eq!(review_group(PhaseType::TddPlanning), "tdd");
        assert_eq!(pipeline_group(PhaseType::BeadsSync), "document");
        assert_eq!(review_group(PhaseType::BeadsSync), "execution");
    }

    #[test]
    fn batch_pauses_only_at_boundaries() {
        let research = policy_for(AutonomyMode::Batch, PhaseType::Research);
        assert!(!research.pause_after_phase);
        assert!(!research.write_checkpoint);
        assert!(research.auto_approve);

        let decomposition = policy_for(AutonomyMode::Batch, PhaseType::Decomposition);
        assert!(decomposition.pause_after_phase);
        assert!(decomposition.write_checkpoint);
        assert!(!decomposition.auto_approve);
    }
}
