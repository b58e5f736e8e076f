//! Reduction of staged coordinate entries into assembled CSR and dense storage.
//!
//! Both assemblers first *group* their staged entries by row: afterwards, the scratch array
//! `bin_locations` holds the indices of all staged entries, grouped by row, and `bin_offsets`
//! delimits the group of each row. Within a group, entry indices are ordered by
//! `(column, staging index)`. The grouping is therefore independent of the order in which
//! concurrent threads happened to scatter entries, and so is the floating point summation
//! order of the reduction that follows.
use crate::error::AssemblyError;
use crate::memory::Scratch;
use coalesce_paradis::{par_for_each_segment_mut, ParallelIndexedAccess, ParallelIndexedCollection};
use coalesce_sparse::kernels::counts_to_offsets;
use rayon::prelude::*;
use std::sync::atomic::Ordering;
use std::time::Duration;

mod matrix;
mod rhs;

pub use matrix::{MatrixAssembler, MatrixAssemblerConfig};
pub use rhs::{RhsAssembler, RhsAssemblerConfig};

/// Counters and timings accumulated by an assembler over its lifetime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblyStats {
    pub graph_assemblies: usize,
    pub value_assemblies: usize,
    pub exports: usize,
    pub reorders: usize,
    /// Number of entries staged for the most recent assembly.
    pub staged_entries: usize,
    pub graph_time: Duration,
    pub value_time: Duration,
    pub export_time: Duration,
    pub reorder_time: Duration,
}

impl AssemblyStats {
    pub fn total_time(&self) -> Duration {
        self.graph_time + self.value_time + self.export_time + self.reorder_time
    }

    pub fn mean_graph_time(&self) -> Duration {
        mean(self.graph_time, self.graph_assemblies)
    }

    pub fn mean_value_time(&self) -> Duration {
        mean(self.value_time, self.value_assemblies)
    }

    pub fn mean_export_time(&self) -> Duration {
        mean(self.export_time, self.exports)
    }
}

fn mean(total: Duration, count: usize) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(count) => total / count,
        Err(_) => total.div_f64(count as f64),
    }
}

/// Group `num_entries` entries by row, as described in the module documentation.
///
/// `row_of(k)` must return the local row (in `0 .. num_rows`) of entry `k`, and `col_of(k)` the
/// key by which entries of the same row are ordered.
pub(crate) fn group_by_row<R, C>(
    scratch: &mut Scratch,
    num_entries: usize,
    num_rows: usize,
    sort: bool,
    row_of: R,
    col_of: C,
) -> Result<(), AssemblyError>
where
    R: Fn(usize) -> usize + Sync,
    C: Fn(usize) -> usize + Sync,
{
    let available_rows = scratch.bin_cursors.len();
    if scratch.bin_locations.len() < num_entries
        || scratch.temp.len() < num_entries
        || available_rows != num_rows
        || scratch.bin_offsets.len() != num_rows + 1
    {
        return Err(AssemblyError::ScratchTooSmall {
            entries: num_entries,
            rows: num_rows,
            available_entries: scratch.bin_locations.len().min(scratch.temp.len()),
            available_rows,
        });
    }
    scratch.bin_offsets.fill(0);
    let locations = &mut scratch.bin_locations[..num_entries];

    if sort {
        locations
            .par_iter_mut()
            .enumerate()
            .for_each(|(k, location)| *location = k);
        locations.par_sort_unstable_by_key(|&k| (row_of(k), col_of(k), k));
        for &k in locations.iter() {
            scratch.bin_offsets[row_of(k)] += 1;
        }
        counts_to_offsets(scratch.bin_offsets);
    } else {
        let cursors = scratch.bin_cursors;
        for cursor in cursors {
            cursor.store(0, Ordering::Relaxed);
        }
        (0..num_entries).into_par_iter().for_each(|k| {
            cursors[row_of(k)].fetch_add(1, Ordering::Relaxed);
        });
        for (offset, cursor) in scratch.bin_offsets.iter_mut().zip(cursors) {
            *offset = cursor.load(Ordering::Relaxed);
        }
        counts_to_offsets(scratch.bin_offsets);
        for (cursor, &offset) in cursors.iter().zip(scratch.bin_offsets.iter()) {
            cursor.store(offset, Ordering::Relaxed);
        }

        {
            let access = unsafe { locations.create_access() };
            (0..num_entries).into_par_iter().for_each(|k| {
                let position = cursors[row_of(k)].fetch_add(1, Ordering::Relaxed);
                // Each position is handed out once, and the cursors of a row never leave its bin
                unsafe { *access.get_unchecked_mut(position) = k };
            });
        }

        par_for_each_segment_mut(locations, scratch.bin_offsets, |_, group| {
            group.sort_unstable_by_key(|&k| (col_of(k), k));
        })?;
    }
    Ok(())
}
