//! Parallel iteration over disjoint, offset-delimited segments of a slice.
//!
//! A CSR matrix stores row `i` in `data[offsets[i] .. offsets[i + 1]]`. Since the rows of a valid
//! offset array never overlap, every row can be handed to a different thread as a plain
//! `&mut [T]`. The functions in this module check the offsets once and then do exactly that.
use crate::{ParallelIndexedCollection, ParallelSliceAccess};
use rayon::prelude::*;
use std::error::Error;
use std::fmt;

/// Indicates that an offset array does not describe disjoint segments of a slice.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvalidOffsets {
    /// Index of the first offset that violates the requirements.
    pub position: usize,
}

impl fmt::Display for InvalidOffsets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Offsets are decreasing or out of bounds at position {}",
            self.position
        )
    }
}

impl Error for InvalidOffsets {}

/// Checks that `offsets` is non-decreasing and that its last entry does not exceed `len`.
///
/// An empty offset array describes zero segments and is valid.
pub fn validate_offsets(offsets: &[usize], len: usize) -> Result<(), InvalidOffsets> {
    for (position, window) in offsets.windows(2).enumerate() {
        if window[0] > window[1] {
            return Err(InvalidOffsets {
                position: position + 1,
            });
        }
    }
    match offsets.last() {
        Some(&last) if last > len => Err(InvalidOffsets {
            position: offsets.len() - 1,
        }),
        _ => Ok(()),
    }
}

/// Calls `f(segment_index, segment)` in parallel for every segment `data[offsets[i] .. offsets[i + 1]]`.
pub fn par_for_each_segment_mut<T, F>(data: &mut [T], offsets: &[usize], f: F) -> Result<(), InvalidOffsets>
where
    T: Send + Sync,
    F: Fn(usize, &mut [T]) + Send + Sync,
{
    validate_offsets(offsets, data.len())?;
    let num_segments = offsets.len().saturating_sub(1);
    let access: ParallelSliceAccess<T> = unsafe { data.create_access() };

    (0..num_segments).into_par_iter().for_each(|i| {
        // Segments are disjoint since offsets are non-decreasing and in bounds
        let segment = unsafe { access.subslice_mut(offsets[i]..offsets[i + 1]) };
        f(i, segment);
    });
    Ok(())
}

/// Fallible variant of [`par_for_each_segment_mut`].
///
/// Stops visiting segments once any call to `f` has returned an error, and returns one of the
/// errors encountered. Which one is unspecified if several segments fail.
pub fn try_par_for_each_segment_mut<T, E, F>(data: &mut [T], offsets: &[usize], f: F) -> Result<(), E>
where
    T: Send + Sync,
    E: From<InvalidOffsets> + Send,
    F: Fn(usize, &mut [T]) -> Result<(), E> + Send + Sync,
{
    validate_offsets(offsets, data.len())?;
    let num_segments = offsets.len().saturating_sub(1);
    let access: ParallelSliceAccess<T> = unsafe { data.create_access() };

    (0..num_segments).into_par_iter().try_for_each(|i| {
        let segment = unsafe { access.subslice_mut(offsets[i]..offsets[i + 1]) };
        f(i, segment)
    })
}

/// Like [`par_for_each_segment_mut`], but visits the same segment of two equally long slices.
///
/// This is the natural shape of a CSR row: a slice of column indices together with the
/// corresponding slice of values.
pub fn par_for_each_segment_pair_mut<A, B, F>(
    a: &mut [A],
    b: &mut [B],
    offsets: &[usize],
    f: F,
) -> Result<(), InvalidOffsets>
where
    A: Send + Sync,
    B: Send + Sync,
    F: Fn(usize, &mut [A], &mut [B]) + Send + Sync,
{
    assert_eq!(a.len(), b.len(), "Paired slices must have the same length.");
    validate_offsets(offsets, a.len())?;
    let num_segments = offsets.len().saturating_sub(1);
    let a_access: ParallelSliceAccess<A> = unsafe { a.create_access() };
    let b_access: ParallelSliceAccess<B> = unsafe { b.create_access() };

    (0..num_segments).into_par_iter().for_each(|i| {
        let range = offsets[i]..offsets[i + 1];
        let a_segment = unsafe { a_access.subslice_mut(range.clone()) };
        let b_segment = unsafe { b_access.subslice_mut(range) };
        f(i, a_segment, b_segment);
    });
    Ok(())
}
