use crate::assembly::{group_by_row, AssemblyStats};
use crate::error::AssemblyError;
use crate::memory::{bytes_to_gb, Scratch};
use crate::partition::RhsEntry;
use crate::Real;
use log::debug;
use nalgebra::DVector;
use rayon::prelude::*;
use std::mem::size_of;
use std::ops::Range;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RhsAssemblerConfig {
    pub name: String,
    pub sort: bool,
    pub rows: Range<usize>,
    pub expected_entry_count: usize,
}

/// Reduces `(row, value)` entries into a dense vector over a contiguous block of rows.
#[derive(Debug, Clone)]
pub struct RhsAssembler<T: Real> {
    config: RhsAssemblerConfig,
    staged: Vec<RhsEntry<T>>,
    values: DVector<T>,
    assembled: bool,
    host: DVector<T>,
    stats: AssemblyStats,
}

impl<T: Real> RhsAssembler<T> {
    pub fn configure(config: RhsAssemblerConfig) -> Self {
        let num_rows = config.rows.len();
        Self {
            staged: Vec::with_capacity(config.expected_entry_count),
            values: DVector::zeros(num_rows),
            assembled: false,
            host: DVector::zeros(num_rows),
            stats: AssemblyStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &RhsAssemblerConfig {
        &self.config
    }

    pub fn num_rows(&self) -> usize {
        self.config.rows.len()
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

    fn check_row(&self, row: usize) -> Result<(), AssemblyError> {
        if self.config.rows.contains(&row) {
            Ok(())
        } else {
            Err(AssemblyError::RowOutOfRange {
                row,
                range: self.config.rows.clone(),
            })
        }
    }

    /// Stage the entries `(rows[k], values[k])` for the next assembly.
    pub fn ingest(&mut self, rows: &[usize], values: &[T]) -> Result<(), AssemblyError> {
        if values.len() != rows.len() {
            return Err(AssemblyError::LengthMismatch {
                expected: rows.len(),
                found: values.len(),
            });
        }
        self.check_count(rows.len())?;
        for &row in rows {
            self.check_row(row)?;
        }
        self.staged
            .extend(rows.iter().zip(values).map(|(&row, &value)| RhsEntry::new(row, value)));
        Ok(())
    }

    pub fn ingest_entry(&mut self, entry: RhsEntry<T>) -> Result<(), AssemblyError> {
        self.check_count(1)?;
        self.check_row(entry.row)?;
        self.staged.push(entry);
        Ok(())
    }

    /// Stage all of the given entries. No entry is staged if any of them is rejected.
    pub fn ingest_entries(&mut self, entries: &[RhsEntry<T>]) -> Result<(), AssemblyError> {
        self.check_count(entries.len())?;
        for entry in entries {
            self.check_row(entry.row)?;
        }
        self.staged.extend_from_slice(entries);
        Ok(())
    }

    pub fn clear_staged(&mut self) {
        self.staged.clear();
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Sum the staged entries into the dense vector. Rows without entries are zero.
    ///
    /// Entries of the same row are summed in the order they were staged.
    pub fn assemble_values(&mut self, scratch: &mut Scratch) -> Result<(), AssemblyError> {
        let timer = Instant::now();
        let first_row = self.config.rows.start;
        let staged = &self.staged;
        group_by_row(
            scratch,
            staged.len(),
            self.config.rows.len(),
            self.config.sort,
            |k| staged[k].row - first_row,
            |_| 0,
        )?;

        let bin_offsets = &*scratch.bin_offsets;
        let locations = &scratch.bin_locations[..staged.len()];
        self.values
            .as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, value)| {
                *value = locations[bin_offsets[i]..bin_offsets[i + 1]]
                    .iter()
                    .fold(T::zero(), |sum, &k| sum + staged[k].value);
            });

        self.assembled = true;
        self.stats.value_assemblies += 1;
        self.stats.staged_entries = staged.len();
        self.stats.value_time += timer.elapsed();
        debug!(
            "{}: summed {} rhs entries into {} rows in {:?}",
            self.config.name,
            staged.len(),
            self.values.len(),
            timer.elapsed()
        );
        Ok(())
    }

    /// Copy the assembled vector into host memory.
    pub fn export_to_host(&mut self) -> Result<&DVector<T>, AssemblyError> {
        if !self.assembled {
            return Err(AssemblyError::NotAssembled);
        }
        let timer = Instant::now();
        self.host.copy_from(&self.values);
        self.stats.exports += 1;
        self.stats.export_time += timer.elapsed();
        Ok(&self.host)
    }

    /// The most recent host export.
    pub fn host(&self) -> &DVector<T> {
        &self.host
    }

    pub fn is_assembled(&self) -> bool {
        self.assembled
    }

    pub fn values(&self) -> &DVector<T> {
        &self.values
    }

    pub fn stats(&self) -> &AssemblyStats {
        &self.stats
    }

    pub fn memory_footprint_bytes(&self) -> usize {
        size_of::<RhsEntry<T>>() * self.staged.capacity() + size_of::<T>() * (self.values.len() + self.host.len())
    }

    pub fn memory_footprint_gb(&self) -> f64 {
        bytes_to_gb(self.memory_footprint_bytes())
    }
}
