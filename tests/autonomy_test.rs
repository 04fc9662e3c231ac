use autoplan::autonomy::{
    is_batch_boundary, pipeline_group, policy_for, review_group, PIPELINE_GROUPS, REVIEW_GROUPS,
};
use autoplan::types::{AutonomyMode, PhaseType};

/// The full 18-cell policy matrix: (mode, phase) ->
/// (pause_after_phase, write_checkpoint, auto_approve).
#[test]
fn policy_matrix_is_exactly_as_specified() {
    use AutonomyMode::*;
    use PhaseType::*;

    let cells: [(AutonomyMode, PhaseType, bool, bool, bool); 18] = [
        // checkpoint: pause always, checkpoint always, never auto-approve
        (Checkpoint, Research, true, true, false),
        (Checkpoint, Decomposition, true, true, false),
        (Checkpoint, TddPlanning, true, true, false),
        (Checkpoint, MultiDoc, true, true, false),
        (Checkpoint, BeadsSync, true, true, false),
        (Checkpoint, Implementation, true, true, false),
        // batch: boundaries are decomposition, multi_doc, implementation
        (Batch, Research, false, false, true),
        (Batch, Decomposition, true, true, false),
        (Batch, TddPlanning, false, false, true),
        (Batch, MultiDoc, true, true, false),
        (Batch, BeadsSync, false, false, true),
        (Batch, Implementation, true, true, false),
        // fully_autonomous: never pause, always checkpoint, always approve
        (FullyAutonomous, Research, false, true, true),
        (FullyAutonomous, Decomposition, false, true, true),
        (FullyAutonomous, TddPlanning, false, true, true),
        (FullyAutonomous, MultiDoc, false, true, true),
        (FullyAutonomous, BeadsSync, false, true, true),
        (FullyAutonomous, Implementation, false, true, true),
    ];

    for (mode, phase, pause, write, approve) in cells {
        let policy = policy_for(mode, phase);
        assert_eq!(
            policy.pause_after_phase, pause,
            "pause_after_phase for {:?}/{}",
            mode, phase
        );
        assert_eq!(
            policy.write_checkpoint, write,
            "write_checkpoint for {:?}/{}",
            mode, phase
        );
        assert_eq!(
            policy.auto_approve, approve,
            "auto_approve for {:?}/{}",
            mode, phase
        );
    }
}

#[test]
fn batch_boundaries_are_the_three_group_tails() {
    assert!(!is_batch_boundary(PhaseType::Research));
    assert!(is_batch_boundary(PhaseType::Decomposition));
    assert!(!is_batch_boundary(PhaseType::TddPlanning));
    assert!(is_batch_boundary(PhaseType::MultiDoc));
    assert!(!is_batch_boundary(PhaseType::BeadsSync));
    assert!(is_batch_boundary(PhaseType::Implementation));
}

#[test]
fn pipeline_groups_partition_the_phases() {
    let covered: usize = PIPELINE_GROUPS.iter().map(|(_, phases)| phases.len()).sum();
    assert_eq!(covered, PhaseType::ALL.len());

    assert_eq!(pipeline_group(PhaseType::Research), "planning");
    assert_eq!(pipeline_group(PhaseType::Decomposition), "planning");
    assert_eq!(pipeline_group(PhaseType::TddPlanning), "planning");
    assert_eq!(pipeline_group(PhaseType::MultiDoc), "document");
    assert_eq!(pipeline_group(PhaseType::BeadsSync), "document");
    assert_eq!(pipeline_group(PhaseType::Implementation), "execution");
}

#[test]
fn review_groups_differ_from_pipeline_groups() {
    let covered: usize = REVIEW_GROUPS.iter().map(|(_, phases)| phases.len()).sum();
    assert_eq!(covered, PhaseType::ALL.len());

    assert_eq!(review_group(PhaseType::Research), "planning");
    assert_eq!(review_group(PhaseType::Decomposition), "planning");
    assert_eq!(review_group(PhaseType::TddPlanning), "tdd");
    assert_eq!(review_group(PhaseType::MultiDoc), "tdd");
    assert_eq!(review_group(PhaseType::BeadsSync), "execution");
    assert_eq!(review_group(PhaseType::Implementation), "execution");
}

/// Scenario: batch mode over research then decomposition pauses and
/// checkpoints only after decomposition.
#[test]
fn batch_mode_research_to_decomposition_boundary() {
    let research = policy_for(AutonomyMode::Batch, PhaseType::Research);
    let decomposition = policy_for(AutonomyMode::Batch, PhaseType::Decomposition);

    assert!(!research.pause_after_phase);
    assert!(!research.write_checkpoint);
    assert!(decomposition.pause_after_phase);
    assert!(decomposition.write_checkpoint);
}
