use coalesce::assembly::{MatrixAssembler, MatrixAssemblerConfig};
use coalesce::coalesce_sparse::RowLayout;
use coalesce::memory::MemoryController;
use coalesce::partition::CoordinateEntry;
use coalesce::{AssemblyError, ErrorCategory};
use matrixcompare::assert_matrix_eq;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use proptest::collection::vec;
use proptest::prelude::*;
use std::ops::Range;
use util::{count_distinct_coordinates, dense_from_triplets};

fn assembler(rows: Range<usize>, ncols: usize, sort: bool, expected_entry_count: usize) -> MatrixAssembler<f64> {
    MatrixAssembler::configure(MatrixAssemblerConfig {
        name: String::from("test"),
        sort,
        rows,
        cols: 0..ncols,
        expected_entry_count,
    })
}

fn assemble_triplets(
    rows: Range<usize>,
    ncols: usize,
    sort: bool,
    triplets: &[(usize, usize, f64)],
) -> Result<MatrixAssembler<f64>, AssemblyError> {
    let mut controller = MemoryController::new("test");
    let mut assembler = assembler(rows.clone(), ncols, sort, triplets.len());
    for &(i, j, v) in triplets {
        assembler.ingest_entry(CoordinateEntry::new(i, j, v))?;
    }
    let mut scratch = controller.acquire(triplets.len(), rows.len());
    assembler.assemble(&mut scratch)?;
    Ok(assembler)
}

#[test]
fn duplicates_are_summed_into_sorted_rows() {
    for sort in [false, true] {
        let mut assembler =
            assemble_triplets(0..2, 2, sort, &[(0, 0, 1.0), (0, 1, 2.0), (0, 0, 3.0)]).unwrap();
        assert_eq!(assembler.nnz(), 2);
        assert_eq!(assembler.row_offsets(), &[0, 2, 2]);
        assert_eq!(assembler.col_indices(), &[0, 1]);
        assert_eq!(assembler.values(), &[4.0, 2.0]);
        assert_eq!(assembler.diagonal_positions(), &[Some(0), None]);

        // Moving the diagonal first is a no-op for row 0, but row 1 has no diagonal
        assert_eq!(
            assembler.reorder_diagonal_first(),
            Err(AssemblyError::MissingDiagonal { row: 1 })
        );
        assert_eq!(assembler.col_indices(), &[0, 1]);
        assert_eq!(assembler.layout(), RowLayout::Natural);
    }
}

#[test]
fn ingest_accepts_parallel_arrays() {
    let mut controller = MemoryController::new("test");
    let mut assembler = assembler(0..1, 2, false, 3);
    assembler
        .ingest(&[0, 0, 0], &[0, 1, 0], &[1.0, 2.0, 3.0])
        .unwrap();
    assert_eq!(assembler.staged_len(), 3);
    assert_eq!(
        assembler.ingest(&[0], &[0, 1], &[1.0]),
        Err(AssemblyError::LengthMismatch { expected: 1, found: 2 })
    );
    let mut scratch = controller.acquire(3, 1);
    assembler.assemble(&mut scratch).unwrap();
    assert_eq!(assembler.values(), &[4.0, 2.0]);
}

#[test]
fn diagonal_first_layout_round_trips() {
    #[rustfmt::skip]
    let triplets = [
        (10, 3, 1.0), (10, 10, 2.0), (10, 12, 3.0),
        (11, 11, 4.0), (11, 0, 5.0),
        (12, 12, 6.0), (12, 10, 7.0), (12, 11, 8.0), (12, 13, 9.0),
    ];
    let mut assembler = assemble_triplets(10..13, 14, false, &triplets).unwrap();
    let natural_cols = assembler.col_indices().to_vec();
    let natural_values = assembler.values().to_vec();
    assert_eq!(natural_cols, vec![3, 10, 12, 0, 11, 10, 11, 12, 13]);

    assembler.reorder_diagonal_first().unwrap();
    assert_eq!(assembler.layout(), RowLayout::DiagonalFirst);
    assert_eq!(assembler.col_indices(), &[10, 3, 12, 11, 0, 12, 10, 11, 13]);
    assert_eq!(assembler.values(), &[2.0, 1.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);

    let host = assembler.export_to_host().unwrap();
    assert_eq!(host.layout(), RowLayout::DiagonalFirst);
    assert_eq!(host.get(12, 12), Some(&6.0));

    assembler.reorder_diagonal_last().unwrap();
    assert_eq!(assembler.col_indices(), natural_cols.as_slice());
    assert_eq!(assembler.values(), natural_values.as_slice());
    assert_eq!(assembler.stats().reorders, 2);
}

#[test]
fn values_are_reassembled_into_existing_graph() {
    let mut controller = MemoryController::new("test");
    let mut assembler = assembler(0..3, 3, false, 8);
    assembler
        .ingest_entries(&[
            CoordinateEntry::new(0, 0, 1.0),
            CoordinateEntry::new(1, 1, 1.0),
            CoordinateEntry::new(2, 2, 1.0),
            CoordinateEntry::new(0, 2, 1.0),
        ])
        .unwrap();
    let mut scratch = controller.acquire(4, 3);
    assembler.assemble(&mut scratch).unwrap();
    assert_eq!(assembler.nnz(), 4);
    assert_eq!(assembler.unused_slots(), 0);

    // Same graph, a subset of the entries with new values
    assembler.clear_staged();
    assembler
        .ingest_entries(&[
            CoordinateEntry::new(2, 2, 5.0),
            CoordinateEntry::new(0, 0, 2.0),
            CoordinateEntry::new(2, 2, 5.0),
        ])
        .unwrap();
    let mut scratch = controller.acquire(3, 3);
    assembler.assemble_values(&mut scratch).unwrap();
    assert_eq!(assembler.col_indices(), &[0, 2, 1, 2]);
    assert_eq!(assembler.values(), &[2.0, 0.0, 0.0, 10.0]);
    // Slots (0, 2) and (1, 1) were not contributed to
    assert_eq!(assembler.unused_slots(), 2);
    assert_eq!(assembler.stats().graph_assemblies, 1);
    assert_eq!(assembler.stats().value_assemblies, 2);

    // An entry outside of the graph cannot be placed
    assembler.clear_staged();
    assembler
        .ingest_entry(CoordinateEntry::new(1, 0, 1.0))
        .unwrap();
    let mut scratch = controller.acquire(1, 3);
    assert_eq!(
        assembler.assemble_values(&mut scratch),
        Err(AssemblyError::EntryNotInGraph { row: 1, col: 0 })
    );
}

#[test]
fn sequencing_errors() {
    let mut controller = MemoryController::new("test");
    let mut assembler = assembler(0..2, 2, false, 2);
    assert_eq!(assembler.export_to_host().unwrap_err(), AssemblyError::NotAssembled);
    assert_eq!(assembler.reorder_diagonal_first(), Err(AssemblyError::NotAssembled));

    let mut scratch = controller.acquire(0, 2);
    let err = assembler.assemble_values(&mut scratch).unwrap_err();
    assert_eq!(err, AssemblyError::GraphNotAssembled);
    assert_eq!(err.category(), ErrorCategory::Sequencing);

    assembler.assemble_graph(&mut scratch).unwrap();
    assembler.invalidate_graph();
    assert!(!assembler.has_graph());
    assert_eq!(assembler.assemble_values(&mut scratch), Err(AssemblyError::GraphNotAssembled));
}

#[test]
fn undersized_scratch_is_rejected() {
    let mut controller = MemoryController::new("test");
    let mut assembler = assembler(0..3, 3, false, 4);
    assembler
        .ingest(&[0, 1, 2, 2], &[0, 1, 2, 0], &[1.0, 1.0, 1.0, 1.0])
        .unwrap();

    let mut scratch = controller.acquire(2, 3);
    let err = assembler.assemble_graph(&mut scratch).unwrap_err();
    assert_eq!(
        err,
        AssemblyError::ScratchTooSmall {
            entries: 4,
            rows: 3,
            available_entries: 2,
            available_rows: 3
        }
    );
    assert_eq!(err.category(), ErrorCategory::Capacity);
    assert!(!assembler.has_graph());

    // Enough entries, but bins for the wrong number of rows
    let mut scratch = controller.acquire(4, 2);
    assert!(matches!(
        assembler.assemble_graph(&mut scratch),
        Err(AssemblyError::ScratchTooSmall { available_rows: 2, .. })
    ));

    let mut scratch = controller.acquire(4, 3);
    assembler.assemble(&mut scratch).unwrap();
    assert_eq!(assembler.nnz(), 4);
}

#[test]
fn rejected_entries_are_not_staged() {
    let mut assembler = assembler(5..8, 10, false, 3);
    assert_eq!(
        assembler.ingest_entry(CoordinateEntry::new(4, 0, 1.0)),
        Err(AssemblyError::RowOutOfRange { row: 4, range: 5..8 })
    );
    assert_eq!(
        assembler.ingest_entry(CoordinateEntry::new(5, 10, 1.0)),
        Err(AssemblyError::ColumnOutOfRange { col: 10, range: 0..10 })
    );
    let entries = vec![CoordinateEntry::new(6, 6, 1.0); 4];
    let err = assembler.ingest_entries(&entries).unwrap_err();
    assert_eq!(err, AssemblyError::EntryCountExceeded { expected: 3, attempted: 4 });
    assert_eq!(err.category(), ErrorCategory::Capacity);
    assert_eq!(assembler.staged_len(), 0);

    assembler.ingest_entries(&entries[..3]).unwrap();
    assert_eq!(
        assembler.ingest_entry(CoordinateEntry::new(6, 6, 1.0)),
        Err(AssemblyError::EntryCountExceeded { expected: 3, attempted: 4 })
    );
}

#[test]
fn empty_rows_have_empty_slices() {
    let assembler = assemble_triplets(0..4, 4, false, &[(2, 1, 1.0), (2, 1, 1.0)]).unwrap();
    assert_eq!(assembler.row_offsets(), &[0, 0, 0, 1, 1]);
    assert_eq!(assembler.col_indices(), &[1]);
    assert_eq!(assembler.values(), &[2.0]);
}

/// Triplets over rows `offset .. offset + nrows` and columns `0 .. ncols`, with heavy duplication.
fn triplets() -> impl Strategy<Value = (Range<usize>, usize, Vec<(usize, usize, f64)>)> {
    (0usize..5, 1usize..8, 1usize..8).prop_flat_map(|(offset, nrows, ncols)| {
        let rows = offset..offset + nrows;
        let entry = (rows.clone(), 0..ncols, -10i32..10).prop_map(|(i, j, v)| (i, j, v as f64 / 4.0));
        (Just(rows), Just(ncols), vec(entry, 0..60))
    })
}

proptest! {
    #[test]
    fn assembled_values_are_sums_of_contributions((rows, ncols, triplets) in triplets(), sort in any::<bool>()) {
        let mut assembler = assemble_triplets(rows.clone(), ncols, sort, &triplets).unwrap();
        let host = assembler.export_to_host().unwrap();
        let expected = dense_from_triplets(rows.clone(), ncols, &triplets);
        assert_matrix_eq!(host.to_dense(), expected, comp = abs, tol = 1e-12);
        prop_assert_eq!(host.nnz(), count_distinct_coordinates(&triplets));
        for i in 0 .. rows.len() {
            let row_cols = host.row(i).column_indices();
            prop_assert!(row_cols.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn assembly_agrees_with_coo_conversion((rows, ncols, triplets) in triplets()) {
        let mut coo = CooMatrix::new(rows.len(), ncols);
        for &(i, j, v) in &triplets {
            coo.push(i - rows.start, j, v);
        }
        let expected = CsrMatrix::from(&coo);

        let mut assembler = assemble_triplets(rows, ncols, false, &triplets).unwrap();
        let csr = assembler.export_to_host().unwrap().to_csr_matrix().unwrap();
        prop_assert_eq!(csr.pattern(), expected.pattern());
        assert_matrix_eq!(csr, expected, comp = abs, tol = 1e-12);
    }

    #[test]
    fn assembly_is_independent_of_arrival_order((rows, ncols, triplets) in triplets()) {
        let forward = assemble_triplets(rows.clone(), ncols, false, &triplets).unwrap();
        let reversed: Vec<_> = triplets.iter().rev().copied().collect();
        let backward = assemble_triplets(rows.clone(), ncols, false, &reversed).unwrap();
        let sorted = assemble_triplets(rows, ncols, true, &reversed).unwrap();

        prop_assert_eq!(forward.row_offsets(), backward.row_offsets());
        prop_assert_eq!(forward.col_indices(), backward.col_indices());
        prop_assert_eq!(forward.col_indices(), sorted.col_indices());
        for (a, b) in forward.values().iter().zip(backward.values()) {
            prop_assert!((a - b).abs() <= 1e-12);
        }
        prop_assert_eq!(backward.values(), sorted.values());
    }

    #[test]
    fn diagonal_reordering_round_trips((rows, ncols, mut triplets) in triplets()) {
        let ncols = ncols.max(rows.end);
        for row in rows.clone() {
            triplets.push((row, row, 1.0));
        }
        let mut assembler = assemble_triplets(rows.clone(), ncols, false, &triplets).unwrap();
        let cols = assembler.col_indices().to_vec();
        let values = assembler.values().to_vec();

        assembler.reorder_diagonal_first().unwrap();
        for (i, window) in assembler.row_offsets().windows(2).enumerate() {
            let row_cols = &assembler.col_indices()[window[0] .. window[1]];
            prop_assert_eq!(row_cols[0], rows.start + i);
            // Each row holds exactly one diagonal entry
            prop_assert_eq!(row_cols.iter().filter(|&&c| c == rows.start + i).count(), 1);
        }
        assembler.reorder_diagonal_last().unwrap();
        prop_assert_eq!(assembler.col_indices(), cols.as_slice());
        prop_assert_eq!(assembler.values(), values.as_slice());
    }
}
