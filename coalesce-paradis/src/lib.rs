//! paradis
//! =======
//!
//! Parallel processing of disjoint records.
//!
//! The assembly kernels in `coalesce` write to scattered positions of shared buffers from many
//! threads at once. Each position is written by exactly one thread, either because the position
//! was claimed through an atomic counter or because it lies in a segment (a row) that only one
//! thread visits. Safe Rust cannot express this directly, so this crate collects the (small)
//! amount of unsafe code needed for it behind a few narrow abstractions.

pub mod segments;
pub mod slice;

pub use segments::{
    par_for_each_segment_mut, par_for_each_segment_pair_mut, try_par_for_each_segment_mut, InvalidOffsets,
};
pub use slice::ParallelSliceAccess;

/// Facilitates parallel mutable access to the records stored in a collection.
///
/// The records are defined by the associated type
/// [`RecordMut`][`ParallelIndexedAccess::RecordMut`].
///
/// # Safety
///
/// An implementor must ensure that it is sound for multiple threads to access *disjoint*
/// records mutably.
///
/// It is the responsibility of the consumer that no two threads access the same record, and
/// that a single thread never holds two records associated with the same index.
pub unsafe trait ParallelIndexedAccess<'record>: Sync + Send + Clone {
    type RecordMut;

    unsafe fn get_unchecked_mut(&self, index: usize) -> Self::RecordMut;
}

/// An indexed collection that exposes parallel indexed access to its contents.
///
/// The typical pattern for a generic parallel algorithm is to take any collection satisfying
/// this trait as input, at which point we can guarantee that we are able to create the only
/// parallel access to the collection.
///
/// # Examples
///
/// Slot claiming: every thread obtains a unique position from an atomic counter and writes
/// its value there. No two threads ever receive the same position, so the writes are disjoint.
///
/// ```rust
/// use coalesce_paradis::{ParallelIndexedAccess, ParallelIndexedCollection};
/// use rayon::prelude::*;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let mut slots = vec![0usize; 64];
/// let counter = AtomicUsize::new(0);
/// {
///     let access = unsafe { slots.as_mut_slice().create_access() };
///     (0..64usize).into_par_iter().for_each(|value| {
///         let position = counter.fetch_add(1, Ordering::Relaxed);
///         // The position is unique to this task
///         unsafe { *access.get_unchecked_mut(position) = value + 1; }
///     });
/// }
///
/// slots.sort_unstable();
/// assert_eq!(slots, (1..=64).collect::<Vec<_>>());
/// ```
///
/// # Safety
///
/// This trait is unsafe because the soundness of consuming code relies on the correctness of
/// the implementation of [`ParallelIndexedCollection::len`].
/// Consumers of this trait are permitted to access records
/// (accessed through [`ParallelIndexedCollection::Access`]) with indices `[0, len)`. Therefore,
/// an incorrect length may lead to unsoundness.
pub unsafe trait ParallelIndexedCollection<'a> {
    type Access;

    unsafe fn create_access(&'a mut self) -> Self::Access;
    fn len(&self) -> usize;
}
