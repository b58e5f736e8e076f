use crate::assembly::{group_by_row, AssemblyStats};
use crate::error::AssemblyError;
use crate::memory::{bytes_to_gb, Scratch};
use crate::partition::CoordinateEntry;
use crate::Real;
use coalesce_paradis::{par_for_each_segment_mut, par_for_each_segment_pair_mut, try_par_for_each_segment_mut};
use coalesce_sparse::kernels::{
    count_distinct_sorted, counts_to_offsets, find_diagonal_sorted, rotate_diagonal_first, rotate_diagonal_last,
};
use coalesce_sparse::{HostCsr, RowLayout};
use itertools::izip;
use log::debug;
use rayon::prelude::*;
use std::mem::size_of;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixAssemblerConfig {
    pub name: String,
    /// Group entries by a global sort instead of binning them by row.
    pub sort: bool,
    /// Global rows owned by this assembler.
    pub rows: Range<usize>,
    /// Admissible global columns.
    pub cols: Range<usize>,
    /// Upper bound on the number of entries staged per assembly.
    pub expected_entry_count: usize,
}

/// Reduces coordinate entries into a CSR matrix over a contiguous block of rows.
///
/// Assembly is split in two stages. [`assemble_graph`](Self::assemble_graph) computes the
/// sparsity graph (row offsets and column indices) from the staged entries, and
/// [`assemble_values`](Self::assemble_values) sums staged values into the slots of an existing
/// graph. As long as the sparsity does not change, only the second stage needs to run in
/// subsequent assembly cycles.
#[derive(Debug, Clone)]
pub struct MatrixAssembler<T> {
    config: MatrixAssemblerConfig,
    staged: Vec<CoordinateEntry<T>>,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<T>,
    // Position of the diagonal within each row, in natural column order
    diagonal_positions: Vec<Option<usize>>,
    layout: RowLayout,
    graph_assembled: bool,
    values_assembled: bool,
    // Graph slots that received no staged entry in the most recent value assembly
    unused_slots: usize,
    host: HostCsr<T>,
    stats: AssemblyStats,
}

impl<T: Real> MatrixAssembler<T> {
    pub fn configure(config: MatrixAssemblerConfig) -> Self {
        let num_rows = config.rows.len();
        Self {
            staged: Vec::with_capacity(config.expected_entry_count),
            row_offsets: vec![0; num_rows + 1],
            col_indices: Vec::new(),
            values: Vec::new(),
            diagonal_positions: vec![None; num_rows],
            layout: RowLayout::Natural,
            graph_assembled: false,
            values_assembled: false,
            unused_slots: 0,
            host: HostCsr::new(config.rows.clone(), config.cols.end),
            stats: AssemblyStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &MatrixAssemblerConfig {
        &self.config
    }

    pub fn num_rows(&self) -> usize {
        self.config.rows.len()
    }

    fn check_entry(&self, entry: &CoordinateEntry<T>) -> Result<(), AssemblyError> {
        if !self.config.rows.contains(&entry.row) {
            return Err(AssemblyError::RowOutOfRange {
                row: entry.row,
                range: self.config.rows.clone(),
            });
        }
        if !self.config.cols.contains(&entry.col) {
            return Err(AssemblyError::ColumnOutOfRange {
                col: entry.col,
                range: self.config.cols.clone(),
            });
        }
        Ok(())
    }

    fn check_count(&self, additional: usize) -> Result<(), AssemblyError> {
        let attempted = self.staged.len() + additional;
        if attempted > self.config.expected_entry_count {
            return Err(AssemblyError::EntryCountExceeded {
                expected: self.config.expected_entry_count,
                attempted,
            });
        }
        Ok(())
    }

    /// Stage the entries `(rows[k], cols[k], values[k])` for the next assembly.
    ///
    /// No entry is staged if any of them is rejected.
    pub fn ingest(&mut self, rows: &[usize], cols: &[usize], values: &[T]) -> Result<(), AssemblyError> {
        for len in [cols.len(), values.len()] {
            if len != rows.len() {
                return Err(AssemblyError::LengthMismatch {
                    expected: rows.len(),
                    found: len,
                });
            }
        }
        self.check_count(rows.len())?;
        let entries = izip!(rows, cols, values).map(|(&row, &col, &value)| CoordinateEntry::new(row, col, value));
        for entry in entries.clone() {
            self.check_entry(&entry)?;
        }
        self.staged.extend(entries);
        Ok(())
    }

    /// Stage a single entry for the next assembly.
    pub fn ingest_entry(&mut self, entry: CoordinateEntry<T>) -> Result<(), AssemblyError> {
        self.check_count(1)?;
        self.check_entry(&entry)?;
        self.staged.push(entry);
        Ok(())
    }

    /// Stage all of the given entries. No entry is staged if any of them is rejected.
    pub fn ingest_entries(&mut self, entries: &[CoordinateEntry<T>]) -> Result<(), AssemblyError> {
        self.check_count(entries.len())?;
        for entry in entries {
            self.check_entry(entry)?;
        }
        self.staged.extend_from_slice(entries);
        Ok(())
    }

    /// Discard all staged entries, keeping the assembled graph and values.
    pub fn clear_staged(&mut self) {
        self.staged.clear();
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Forget the assembled graph, so that the next cycle must call
    /// [`assemble_graph`](Self::assemble_graph) again.
    pub fn invalidate_graph(&mut self) {
        self.graph_assembled = false;
        self.values_assembled = false;
    }

    pub fn has_graph(&self) -> bool {
        self.graph_assembled
    }

    /// Number of graph slots that no staged entry contributed to in the most recent call to
    /// [`assemble_values`](Self::assemble_values).
    ///
    /// A non-zero count means that the sparsity of the staged entries is a strict subset of the
    /// assembled graph, so the graph holds explicit zeros that a fresh graph would not have.
    pub fn unused_slots(&self) -> usize {
        self.unused_slots
    }

    fn group_staged(&self, scratch: &mut Scratch) -> Result<(), AssemblyError> {
        let first_row = self.config.rows.start;
        let staged = &self.staged;
        group_by_row(
            scratch,
            staged.len(),
            self.num_rows(),
            self.config.sort,
            |k| staged[k].row - first_row,
            |k| staged[k].col,
        )?;
        Ok(())
    }

    /// Compute the sparsity graph of the staged entries.
    ///
    /// Every distinct `(row, col)` pair among the staged entries becomes exactly one stored
    /// entry, and the columns of every row are stored in ascending order.
    pub fn assemble_graph(&mut self, scratch: &mut Scratch) -> Result<(), AssemblyError> {
        let timer = Instant::now();
        self.group_staged(scratch)?;

        let num_entries = self.staged.len();
        let staged = &self.staged;
        let bin_offsets = &*scratch.bin_offsets;
        let locations = &scratch.bin_locations[..num_entries];

        // Gather the column of each grouped entry, so that every row is a sorted column slice
        let grouped_cols = &mut scratch.temp[..num_entries];
        grouped_cols
            .par_iter_mut()
            .zip(locations.par_iter())
            .for_each(|(col, &k)| *col = staged[k].col);
        let grouped_cols = &*grouped_cols;

        let num_rows = self.num_rows();
        self.row_offsets.resize(num_rows + 1, 0);
        self.row_offsets[..num_rows]
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, count)| *count = count_distinct_sorted(&grouped_cols[bin_offsets[i]..bin_offsets[i + 1]]));
        self.row_offsets[num_rows] = 0;
        let nnz = counts_to_offsets(&mut self.row_offsets);

        self.col_indices.resize(nnz, 0);
        par_for_each_segment_mut(&mut self.col_indices, &self.row_offsets, |i, row_cols| {
            let mut group = grouped_cols[bin_offsets[i]..bin_offsets[i + 1]].iter().copied();
            let mut next = group.next();
            for col in row_cols.iter_mut() {
                if let Some(c) = next {
                    *col = c;
                    next = group.find(|&other| other != c);
                }
            }
        })?;

        self.values.resize(nnz, T::zero());
        self.values.fill(T::zero());
        self.layout = RowLayout::Natural;
        self.update_diagonal_positions();

        self.graph_assembled = true;
        self.values_assembled = false;
        self.unused_slots = 0;
        self.stats.graph_assemblies += 1;
        self.stats.staged_entries = num_entries;
        self.stats.graph_time += timer.elapsed();
        debug!(
            "{}: assembled graph with {} rows and {} non-zeros from {} entries in {:?}",
            self.config.name,
            num_rows,
            nnz,
            num_entries,
            timer.elapsed()
        );
        Ok(())
    }

    fn update_diagonal_positions(&mut self) {
        let first_row = self.config.rows.start;
        let row_offsets = &self.row_offsets;
        let col_indices = &self.col_indices;
        self.diagonal_positions.resize(self.config.rows.len(), None);
        self.diagonal_positions
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, position)| {
                let row_cols = &col_indices[row_offsets[i]..row_offsets[i + 1]];
                *position = find_diagonal_sorted(row_cols, first_row + i);
            });
    }

    /// Sum the staged values into the slots of the assembled graph.
    ///
    /// Slots without any staged entry are zero afterwards. The matrix is left in the natural
    /// row layout.
    pub fn assemble_values(&mut self, scratch: &mut Scratch) -> Result<(), AssemblyError> {
        if !self.graph_assembled {
            return Err(AssemblyError::GraphNotAssembled);
        }
        let timer = Instant::now();
        if self.layout == RowLayout::DiagonalFirst {
            self.apply_layout(RowLayout::Natural)?;
        }
        self.group_staged(scratch)?;

        let first_row = self.config.rows.start;
        let staged = &self.staged;
        let bin_offsets = &*scratch.bin_offsets;
        let locations = &scratch.bin_locations[..staged.len()];
        let row_offsets = &self.row_offsets;
        let col_indices = &self.col_indices;
        let unused_slots = AtomicUsize::new(0);

        try_par_for_each_segment_mut(&mut self.values, row_offsets, |i, row_values| {
            let row_cols = &col_indices[row_offsets[i]..row_offsets[i + 1]];
            row_values.fill(T::zero());
            // Both the group and the row are sorted by column, so a single merge pass suffices
            let mut slot = 0;
            let mut last_hit = None;
            let mut num_hit = 0;
            for &k in &locations[bin_offsets[i]..bin_offsets[i + 1]] {
                let entry = &staged[k];
                while slot < row_cols.len() && row_cols[slot] < entry.col {
                    slot += 1;
                }
                if slot == row_cols.len() || row_cols[slot] != entry.col {
                    return Err(AssemblyError::EntryNotInGraph {
                        row: first_row + i,
                        col: entry.col,
                    });
                }
                if last_hit != Some(slot) {
                    last_hit = Some(slot);
                    num_hit += 1;
                }
                row_values[slot] += entry.value;
            }
            unused_slots.fetch_add(row_cols.len() - num_hit, Ordering::Relaxed);
            Ok(())
        })?;

        self.unused_slots = unused_slots.into_inner();
        self.values_assembled = true;
        self.stats.value_assemblies += 1;
        self.stats.staged_entries = staged.len();
        self.stats.value_time += timer.elapsed();
        debug!(
            "{}: summed {} entries into {} non-zeros in {:?}",
            self.config.name,
            self.stats.staged_entries,
            self.nnz(),
            timer.elapsed()
        );
        Ok(())
    }

    /// Assemble both the graph and the values of the staged entries.
    pub fn assemble(&mut self, scratch: &mut Scratch) -> Result<(), AssemblyError> {
        self.assemble_graph(scratch)?;
        self.assemble_values(scratch)
    }

    fn apply_layout(&mut self, layout: RowLayout) -> Result<(), AssemblyError> {
        if layout == self.layout {
            return Ok(());
        }
        if let Some(row) = self.diagonal_positions.iter().position(Option::is_none) {
            return Err(AssemblyError::MissingDiagonal {
                row: self.config.rows.start + row,
            });
        }
        let diagonal_positions = &self.diagonal_positions;
        par_for_each_segment_pair_mut(
            &mut self.col_indices,
            &mut self.values,
            &self.row_offsets,
            |i, row_cols, row_values| {
                if let Some(position) = diagonal_positions[i] {
                    match layout {
                        RowLayout::DiagonalFirst => rotate_diagonal_first(row_cols, row_values, position),
                        RowLayout::Natural => rotate_diagonal_last(row_cols, row_values, position),
                    }
                }
            },
        )?;
        self.layout = layout;
        Ok(())
    }

    /// Move the diagonal entry of every row to the front (`[D|L|U]`).
    ///
    /// Fails with [`AssemblyError::MissingDiagonal`] if any row lacks a diagonal entry, in
    /// which case the matrix is left unchanged.
    pub fn reorder_diagonal_first(&mut self) -> Result<(), AssemblyError> {
        self.reorder(RowLayout::DiagonalFirst)
    }

    /// Restore ascending column order in every row (`[L|D|U]`).
    pub fn reorder_diagonal_last(&mut self) -> Result<(), AssemblyError> {
        self.reorder(RowLayout::Natural)
    }

    /// Bring the matrix into the given row layout.
    pub fn reorder(&mut self, layout: RowLayout) -> Result<(), AssemblyError> {
        if !self.values_assembled {
            return Err(AssemblyError::NotAssembled);
        }
        let timer = Instant::now();
        self.apply_layout(layout)?;
        self.stats.reorders += 1;
        self.stats.reorder_time += timer.elapsed();
        Ok(())
    }

    /// Copy the assembled matrix into host memory, in its current row layout.
    pub fn export_to_host(&mut self) -> Result<&HostCsr<T>, AssemblyError> {
        if !self.values_assembled {
            return Err(AssemblyError::NotAssembled);
        }
        let timer = Instant::now();
        self.host.copy_from(
            self.config.rows.clone(),
            self.config.cols.end,
            &self.row_offsets,
            &self.col_indices,
            &self.values,
            self.layout,
        );
        self.stats.exports += 1;
        self.stats.export_time += timer.elapsed();
        Ok(&self.host)
    }

    /// The most recent host export.
    pub fn host(&self) -> &HostCsr<T> {
        &self.host
    }

    pub fn is_assembled(&self) -> bool {
        self.values_assembled
    }

    pub fn nnz(&self) -> usize {
        self.col_indices.len()
    }

    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn layout(&self) -> RowLayout {
        self.layout
    }

    /// Position of the diagonal entry within each row in natural column order.
    pub fn diagonal_positions(&self) -> &[Option<usize>] {
        &self.diagonal_positions
    }

    pub fn stats(&self) -> &AssemblyStats {
        &self.stats
    }

    pub fn memory_footprint_bytes(&self) -> usize {
        size_of::<CoordinateEntry<T>>() * self.staged.capacity()
            + size_of::<usize>() * (self.row_offsets.capacity() + self.col_indices.capacity())
            + size_of::<T>() * self.values.capacity()
            + size_of::<Option<usize>>() * self.diagonal_positions.capacity()
            + self.host.memory_footprint_bytes()
    }

    pub fn memory_footprint_gb(&self) -> f64 {
        bytes_to_gb(self.memory_footprint_bytes())
    }
}
