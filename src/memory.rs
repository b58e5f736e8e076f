//! Scratch memory shared by the matrix and rhs assemblers.
use log::debug;
use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Owns the temporary buffers used while binning staged entries by row.
///
/// The matrix and rhs assemblers never run at the same time, so a single set of buffers sized
/// for the larger of the two serves both. Buffers only ever grow, so that after the first
/// assembly cycle no further allocation takes place.
#[derive(Debug, Default)]
pub struct MemoryController {
    name: String,
    bin_offsets: Vec<usize>,
    bin_locations: Vec<usize>,
    temp: Vec<usize>,
    bin_cursors: Vec<AtomicUsize>,
}

/// Exclusive view of the scratch buffers of a [`MemoryController`], sized for one assembly.
///
/// The view borrows the controller mutably, so at most one assembler can hold it at a time.
#[derive(Debug)]
pub struct Scratch<'a> {
    /// `num_bins + 1` entries, zeroed on acquisition.
    pub bin_offsets: &'a mut [usize],
    /// `capacity_hint` entries holding entry indices grouped by bin.
    pub bin_locations: &'a mut [usize],
    /// `capacity_hint` entries of general purpose workspace.
    pub temp: &'a mut [usize],
    /// One insertion cursor per bin for concurrent scattering.
    pub bin_cursors: &'a [AtomicUsize],
}

impl MemoryController {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lend out scratch buffers able to bin `capacity_hint` entries into `num_bins` bins.
    pub fn acquire(&mut self, capacity_hint: usize, num_bins: usize) -> Scratch<'_> {
        if capacity_hint > self.bin_locations.len() || num_bins + 1 > self.bin_offsets.len() {
            debug!(
                "{}: growing assembly scratch to {} entries and {} bins",
                self.name,
                capacity_hint.max(self.bin_locations.len()),
                num_bins.max(self.bin_cursors.len())
            );
        }
        if self.bin_locations.len() < capacity_hint {
            self.bin_locations.resize(capacity_hint, 0);
            self.temp.resize(capacity_hint, 0);
        }
        if self.bin_offsets.len() < num_bins + 1 {
            self.bin_offsets.resize(num_bins + 1, 0);
        }
        if self.bin_cursors.len() < num_bins {
            self.bin_cursors.resize_with(num_bins, || AtomicUsize::new(0));
        }

        let bin_offsets = &mut self.bin_offsets[..=num_bins];
        bin_offsets.fill(0);
        let bin_cursors = &self.bin_cursors[..num_bins];
        for cursor in bin_cursors {
            cursor.store(0, Ordering::Relaxed);
        }

        Scratch {
            bin_offsets,
            bin_locations: &mut self.bin_locations[..capacity_hint],
            temp: &mut self.temp[..capacity_hint],
            bin_cursors,
        }
    }

    /// Number of entries the scratch buffers can currently hold without growing.
    pub fn capacity(&self) -> usize {
        self.bin_locations.len()
    }

    /// Number of bins the scratch buffers can currently hold without growing.
    pub fn bin_capacity(&self) -> usize {
        self.bin_cursors.len()
    }

    pub fn memory_footprint_bytes(&self) -> usize {
        size_of::<usize>() * (self.bin_offsets.capacity() + self.bin_locations.capacity() + self.temp.capacity())
            + size_of::<AtomicUsize>() * self.bin_cursors.capacity()
    }

    pub fn memory_footprint_gb(&self) -> f64 {
        bytes_to_gb(self.memory_footprint_bytes())
    }

    /// Free all scratch memory.
    pub fn release(&mut self) {
        self.bin_offsets = Vec::new();
        self.bin_locations = Vec::new();
        self.temp = Vec::new();
        self.bin_cursors = Vec::new();
    }
}

pub(crate) fn bytes_to_gb(bytes: usize) -> f64 {
    bytes as f64 / 1.0e9
}
