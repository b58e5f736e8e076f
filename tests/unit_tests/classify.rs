use coalesce::classify::{RowClassifier, RowClassifierBuilder, RowStatus, SkipPhase};
use coalesce::{AssemblyError, ErrorCategory};

#[test]
fn classify_reports_marked_rows() {
    let classifier = RowClassifierBuilder::new(10..20)
        .mark_dirichlet([12, 15])
        .unwrap()
        .mark_overset([17])
        .unwrap()
        .build();

    assert_eq!(classifier.classify(12), RowStatus::Dirichlet);
    assert_eq!(classifier.classify(15), RowStatus::Dirichlet);
    assert_eq!(classifier.classify(17), RowStatus::Overset);
    assert_eq!(classifier.classify(11), RowStatus::Normal);
    // Rows owned by other ranks are never classified as skipped
    assert_eq!(classifier.classify(3), RowStatus::Normal);
    assert!(classifier.has_skipped_rows());
    assert_eq!(classifier.skip_set().len(), 3);
}

#[test]
fn dirichlet_takes_precedence_over_overset() {
    let classifier = RowClassifierBuilder::new(0..4)
        .mark_dirichlet([1])
        .unwrap()
        .mark_overset([1, 2])
        .unwrap()
        .build();
    assert_eq!(classifier.classify(1), RowStatus::Dirichlet);
    assert_eq!(classifier.classify(2), RowStatus::Overset);
}

#[test]
fn marking_nodes_marks_all_their_dofs() {
    let classifier = RowClassifierBuilder::new(0..9)
        .mark_dirichlet_nodes(&[1], 3)
        .unwrap()
        .mark_overset_nodes(&[2], 3)
        .unwrap()
        .build();
    let statuses: Vec<_> = (0..9).map(|row| classifier.classify(row)).collect();
    use RowStatus::*;
    assert_eq!(
        statuses,
        vec![Normal, Normal, Normal, Dirichlet, Dirichlet, Dirichlet, Overset, Overset, Overset]
    );
}

#[test]
fn marking_rows_outside_the_owned_range_fails() {
    let result = RowClassifierBuilder::new(5..10).mark_dirichlet([4]);
    assert_eq!(result.unwrap_err(), AssemblyError::RowOutOfRange { row: 4, range: 5..10 });
}

#[test]
fn skipping_is_suspended_during_dedicated_phases() {
    let mut classifier = RowClassifierBuilder::new(0..8)
        .mark_dirichlet([5])
        .unwrap()
        .mark_overset([6])
        .unwrap()
        .build();
    assert_eq!(classifier.phase(), SkipPhase::Generic);
    assert!(classifier.is_skipped(5));
    assert!(classifier.is_skipped(6));
    assert!(!classifier.is_skipped(4));

    classifier.begin_dirichlet_phase().unwrap();
    assert_eq!(classifier.phase(), SkipPhase::Dirichlet);
    assert!(!classifier.is_skipped(5));
    assert!(!classifier.is_skipped(6));
    classifier.end_dirichlet_phase().unwrap();
    assert!(classifier.is_skipped(5));

    classifier.begin_overset_phase().unwrap();
    assert!(!classifier.is_skipped(6));
    classifier.end_overset_phase().unwrap();
    assert!(classifier.is_skipped(6));
}

#[test]
fn mismatched_phases_are_sequencing_errors() {
    let mut classifier = RowClassifier::all_normal(0..4);
    assert!(!classifier.has_skipped_rows());

    let err = classifier.end_dirichlet_phase().unwrap_err();
    assert_eq!(
        err,
        AssemblyError::PhaseMismatch {
            expected: SkipPhase::Dirichlet,
            found: SkipPhase::Generic
        }
    );
    assert_eq!(err.category(), ErrorCategory::Sequencing);

    classifier.begin_dirichlet_phase().unwrap();
    assert_eq!(
        classifier.begin_overset_phase(),
        Err(AssemblyError::PhaseMismatch {
            expected: SkipPhase::Generic,
            found: SkipPhase::Dirichlet
        })
    );
    assert_eq!(
        classifier.end_overset_phase(),
        Err(AssemblyError::PhaseMismatch {
            expected: SkipPhase::Overset,
            found: SkipPhase::Dirichlet
        })
    );
    classifier.end_dirichlet_phase().unwrap();
}
