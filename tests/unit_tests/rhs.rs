use coalesce::assembly::{RhsAssembler, RhsAssemblerConfig};
use coalesce::memory::MemoryController;
use coalesce::partition::RhsEntry;
use coalesce::AssemblyError;
use matrixcompare::assert_matrix_eq;
use nalgebra::DVector;
use proptest::collection::vec;
use proptest::prelude::*;
use std::ops::Range;
use util::dense_from_pairs;

fn assembler(rows: Range<usize>, sort: bool, expected_entry_count: usize) -> RhsAssembler<f64> {
    RhsAssembler::configure(RhsAssemblerConfig {
        name: String::from("rhs"),
        sort,
        rows,
        expected_entry_count,
    })
}

#[test]
fn entries_of_the_same_row_are_summed() {
    let mut controller = MemoryController::new("test");
    let mut assembler = assembler(0..4, false, 2);
    assembler.ingest(&[2, 2], &[5.0, -1.5]).unwrap();
    let mut scratch = controller.acquire(2, 4);
    assembler.assemble_values(&mut scratch).unwrap();
    assert_eq!(assembler.values(), &DVector::from_column_slice(&[0.0, 0.0, 3.5, 0.0]));
    assert_eq!(assembler.export_to_host().unwrap()[2], 3.5);
    assert_eq!(assembler.stats().exports, 1);
}

#[test]
fn export_requires_assembly() {
    let mut assembler = assembler(0..4, false, 2);
    assert_eq!(assembler.export_to_host().unwrap_err(), AssemblyError::NotAssembled);
    assert!(!assembler.is_assembled());
}

#[test]
fn rejected_entries_are_not_staged() {
    let mut assembler = assembler(3..5, true, 2);
    assert_eq!(
        assembler.ingest_entry(RhsEntry::new(5, 1.0)),
        Err(AssemblyError::RowOutOfRange { row: 5, range: 3..5 })
    );
    assert_eq!(
        assembler.ingest(&[3], &[1.0, 2.0]),
        Err(AssemblyError::LengthMismatch { expected: 1, found: 2 })
    );
    assert_eq!(
        assembler.ingest_entries(&[RhsEntry::new(3, 1.0); 3]),
        Err(AssemblyError::EntryCountExceeded { expected: 2, attempted: 3 })
    );
    assert_eq!(assembler.staged_len(), 0);
}

#[test]
fn reassembly_replaces_previous_values() {
    let mut controller = MemoryController::new("test");
    let mut assembler = assembler(10..13, false, 3);
    assembler
        .ingest_entries(&[RhsEntry::new(10, 1.0), RhsEntry::new(12, 2.0)])
        .unwrap();
    let mut scratch = controller.acquire(2, 3);
    assembler.assemble_values(&mut scratch).unwrap();

    assembler.clear_staged();
    assembler.ingest_entry(RhsEntry::new(11, 4.0)).unwrap();
    let mut scratch = controller.acquire(1, 3);
    assembler.assemble_values(&mut scratch).unwrap();
    assert_eq!(assembler.values().as_slice(), &[0.0, 4.0, 0.0]);
    assert_eq!(assembler.stats().value_assemblies, 2);
}

fn pairs() -> impl Strategy<Value = (Range<usize>, Vec<(usize, f64)>)> {
    (0usize..5, 1usize..10).prop_flat_map(|(offset, nrows)| {
        let rows = offset..offset + nrows;
        let pair = (rows.clone(), -10i32..10).prop_map(|(i, v)| (i, v as f64 / 8.0));
        (Just(rows), vec(pair, 0..50))
    })
}

proptest! {
    #[test]
    fn assembled_rhs_matches_reference((rows, pairs) in pairs(), sort in any::<bool>()) {
        let mut controller = MemoryController::new("test");
        let mut assembler = assembler(rows.clone(), sort, pairs.len());
        for &(row, value) in &pairs {
            assembler.ingest_entry(RhsEntry::new(row, value)).unwrap();
        }
        let mut scratch = controller.acquire(pairs.len(), rows.len());
        assembler.assemble_values(&mut scratch).unwrap();
        let expected = dense_from_pairs(rows, &pairs);
        let assembled = assembler.export_to_host().unwrap().clone();
        assert_matrix_eq!(assembled, expected, comp = abs, tol = 1e-12);
    }
}
