//! Row-level kernels shared by the matrix and rhs assemblers.
//!
//! All kernels operate on plain slices so that they can be run on a single row from inside
//! a parallel loop without any allocation.

/// Converts per-bin counts into exclusive offsets in place and returns the total count.
///
/// The slice is expected to have one more entry than there are bins. The last entry is
/// ignored on input and holds the total on output, so that `offsets[i] .. offsets[i + 1]`
/// is the range of bin `i` afterwards.
pub fn counts_to_offsets(counts: &mut [usize]) -> usize {
    let mut offset = 0;
    for count_or_offset in counts.iter_mut() {
        let count = *count_or_offset;
        *count_or_offset = offset;
        offset += count;
    }
    offset
}

/// Counts the distinct entries of a sorted index slice.
pub fn count_distinct_sorted(idx_array: &[usize]) -> usize {
    debug_assert!(idx_array.windows(2).all(|w| w[0] <= w[1]));
    if idx_array.is_empty() {
        0
    } else {
        1 + idx_array.windows(2).filter(|w| w[0] != w[1]).count()
    }
}

/// Returns the local position of `diagonal_col` in a row whose columns are in ascending order.
pub fn find_diagonal_sorted(column_indices: &[usize], diagonal_col: usize) -> Option<usize> {
    column_indices.binary_search(&diagonal_col).ok()
}

/// Moves the entry at `diagonal_pos` to the front of the row, shifting the entries before it
/// one slot to the right. The relative order of all other entries is preserved.
pub fn rotate_diagonal_first<T>(column_indices: &mut [usize], values: &mut [T], diagonal_pos: usize) {
    assert_eq!(column_indices.len(), values.len());
    assert!(diagonal_pos < column_indices.len());
    column_indices[..=diagonal_pos].rotate_right(1);
    values[..=diagonal_pos].rotate_right(1);
}

/// Inverse of [`rotate_diagonal_first`]: moves the leading entry back to `diagonal_pos`.
pub fn rotate_diagonal_last<T>(column_indices: &mut [usize], values: &mut [T], diagonal_pos: usize) {
    assert_eq!(column_indices.len(), values.len());
    assert!(diagonal_pos < column_indices.len());
    column_indices[..=diagonal_pos].rotate_left(1);
    values[..=diagonal_pos].rotate_left(1);
}
