use nalgebra::{DMatrix, DVector, Scalar};
use num::Zero;
use std::ops::{AddAssign, Range};

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

/// Reference assembly: sums coordinate triplets into a dense `rows.len() x ncols` matrix.
///
/// Rows are global indices, offset by `rows.start`.
pub fn dense_from_triplets<T>(rows: Range<usize>, ncols: usize, triplets: &[(usize, usize, T)]) -> DMatrix<T>
where
    T: Scalar + Zero + AddAssign,
{
    let mut dense = DMatrix::zeros(rows.len(), ncols);
    for (i, j, v) in triplets {
        assert!(rows.contains(i), "Row {} is outside of {:?}", i, rows);
        dense[(i - rows.start, *j)] += v.clone();
    }
    dense
}

/// Reference assembly of a dense rhs block from `(global_row, value)` pairs.
pub fn dense_from_pairs<T>(rows: Range<usize>, pairs: &[(usize, T)]) -> DVector<T>
where
    T: Scalar + Zero + AddAssign,
{
    let mut dense = DVector::zeros(rows.len());
    for (i, v) in pairs {
        assert!(rows.contains(i), "Row {} is outside of {:?}", i, rows);
        dense[i - rows.start] += v.clone();
    }
    dense
}

/// Number of distinct `(row, col)` pairs among the given triplets.
pub fn count_distinct_coordinates<T>(triplets: &[(usize, usize, T)]) -> usize {
    let mut coords: Vec<_> = triplets.iter().map(|(i, j, _)| (*i, *j)).collect();
    coords.sort_unstable();
    coords.dedup();
    coords.len()
}
