use itertools::izip;
use nalgebra::{DMatrix, Scalar};
use nalgebra_sparse::{CsrMatrix, SparseFormatError};
use num::Zero;
use std::ops::Range;

/// The position of the diagonal entry within each row of a CSR matrix.
///
/// Solver back ends disagree on this: some want the diagonal entry stored first in every row,
/// others expect plain ascending column order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RowLayout {
    /// Ascending column order, the diagonal is stored where it naturally falls (`[L|D|U]`).
    Natural,
    /// The diagonal entry is stored first, the remaining entries follow in ascending order (`[D|L|U]`).
    DiagonalFirst,
}

impl Default for RowLayout {
    fn default() -> Self {
        Self::Natural
    }
}

/// A CSR matrix for a contiguous block of global rows, stored in host memory.
///
/// Row `i` of the block corresponds to global row `row_range().start + i`. Column indices are
/// global. This is the format handed over to external solvers, and the buffers are retained
/// across assembly cycles so that repeated exports do not allocate.
#[derive(Debug, Clone, PartialEq)]
pub struct HostCsr<T> {
    first_row: usize,
    ncols: usize,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<T>,
    layout: RowLayout,
}

/// A single row of a [`HostCsr`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HostCsrRow<'a, T> {
    global_row: usize,
    column_indices: &'a [usize],
    values: &'a [T],
}

impl<'a, T> HostCsrRow<'a, T> {
    pub fn global_row(&self) -> usize {
        self.global_row
    }

    /// Number of non-zeros in this row.
    pub fn nnz(&self) -> usize {
        self.column_indices.len()
    }

    pub fn column_indices(&self) -> &'a [usize] {
        self.column_indices
    }

    pub fn values(&self) -> &'a [T] {
        self.values
    }

    /// Returns the stored value at the given global column, if present.
    ///
    /// Works for either row layout.
    pub fn get(&self, col: usize) -> Option<&'a T> {
        self.column_indices
            .iter()
            .position(|&c| c == col)
            .map(|local_idx| &self.values[local_idx])
    }
}

impl<T> HostCsr<T> {
    /// An empty matrix over the given rows (no stored entries).
    pub fn new(rows: Range<usize>, ncols: usize) -> Self {
        Self {
            first_row: rows.start,
            ncols,
            row_offsets: vec![0; rows.len() + 1],
            col_indices: Vec::new(),
            values: Vec::new(),
            layout: RowLayout::Natural,
        }
    }

    /// Construct a matrix from raw CSR arrays.
    ///
    /// Panics if the arrays are inconsistent with each other.
    pub fn from_csr_data(
        rows: Range<usize>,
        ncols: usize,
        row_offsets: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<T>,
        layout: RowLayout,
    ) -> Self {
        assert_eq!(
            rows.len() + 1,
            row_offsets.len(),
            "length of row_offsets must be equal to num_rows + 1"
        );
        assert_eq!(col_indices.len(), values.len());
        assert_eq!(row_offsets.first().copied(), Some(0));
        assert_eq!(row_offsets.last().copied(), Some(col_indices.len()));
        assert!(
            row_offsets.windows(2).all(|w| w[0] <= w[1]),
            "row_offsets must be non-decreasing"
        );
        Self {
            first_row: rows.start,
            ncols,
            row_offsets,
            col_indices,
            values,
            layout,
        }
    }

    /// Overwrite the contents of this matrix, reusing the existing allocations.
    pub fn copy_from(
        &mut self,
        rows: Range<usize>,
        ncols: usize,
        row_offsets: &[usize],
        col_indices: &[usize],
        values: &[T],
        layout: RowLayout,
    ) where
        T: Clone,
    {
        assert_eq!(rows.len() + 1, row_offsets.len());
        assert_eq!(col_indices.len(), values.len());
        self.first_row = rows.start;
        self.ncols = ncols;
        self.row_offsets.clear();
        self.row_offsets.extend_from_slice(row_offsets);
        self.col_indices.clear();
        self.col_indices.extend_from_slice(col_indices);
        self.values.clear();
        self.values.extend_from_slice(values);
        self.layout = layout;
    }

    pub fn nrows(&self) -> usize {
        self.row_offsets.len() - 1
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.col_indices.len()
    }

    /// The global rows stored in this matrix.
    pub fn row_range(&self) -> Range<usize> {
        self.first_row..self.first_row + self.nrows()
    }

    pub fn layout(&self) -> RowLayout {
        self.layout
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

    /// Memory held by the three CSR arrays, in bytes.
    pub fn memory_footprint_bytes(&self) -> usize {
        let index_size = std::mem::size_of::<usize>();
        index_size * (self.row_offsets.capacity() + self.col_indices.capacity())
            + std::mem::size_of::<T>() * self.values.capacity()
    }

    /// The row with the given *local* index.
    pub fn row(&self, local_index: usize) -> HostCsrRow<T> {
        let begin = self.row_offsets[local_index];
        let end = self.row_offsets[local_index + 1];
        HostCsrRow {
            global_row: self.first_row + local_index,
            column_indices: &self.col_indices[begin..end],
            values: &self.values[begin..end],
        }
    }

    /// The row with the given *global* index, if it is stored here.
    pub fn global_row(&self, global_row: usize) -> Option<HostCsrRow<T>> {
        if self.row_range().contains(&global_row) {
            Some(self.row(global_row - self.first_row))
        } else {
            None
        }
    }

    pub fn get(&self, global_row: usize, col: usize) -> Option<&T> {
        self.global_row(global_row)?.get(col)
    }

    /// Gives an iterator over stored entries `(global_row, col, value)` in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> {
        (0..self.nrows()).flat_map(move |i| {
            let row = self.row(i);
            let global_row = row.global_row();
            izip!(row.column_indices(), row.values()).map(move |(j, v)| (global_row, *j, v))
        })
    }

    /// Converts to an `nalgebra-sparse` CSR matrix with `nrows()` rows and `ncols()` columns.
    ///
    /// Rows are brought into natural order first, since `nalgebra-sparse` requires sorted
    /// column indices.
    pub fn to_csr_matrix(&self) -> Result<CsrMatrix<T>, SparseFormatError>
    where
        T: Scalar,
    {
        let mut col_indices = self.col_indices.clone();
        let mut values = self.values.clone();
        if self.layout != RowLayout::Natural {
            let mut pairs = Vec::new();
            for window in self.row_offsets.windows(2) {
                let range = window[0]..window[1];
                pairs.clear();
                pairs.extend(izip!(
                    col_indices[range.clone()].iter().copied(),
                    values[range.clone()].iter().cloned()
                ));
                pairs.sort_by_key(|(col, _)| *col);
                for (k, (col, value)) in pairs.drain(..).enumerate() {
                    col_indices[range.start + k] = col;
                    values[range.start + k] = value;
                }
            }
        }
        CsrMatrix::try_from_csr_data(
            self.nrows(),
            self.ncols,
            self.row_offsets.clone(),
            col_indices,
            values,
        )
    }

    /// Dense `nrows() x ncols()` representation, summing any repeated entries.
    pub fn to_dense(&self) -> DMatrix<T>
    where
        T: Scalar + Zero + std::ops::AddAssign,
    {
        let mut dense = DMatrix::zeros(self.nrows(), self.ncols);
        for (global_row, col, value) in self.iter() {
            dense[(global_row - self.first_row, col)] += value.clone();
        }
        dense
    }
}
