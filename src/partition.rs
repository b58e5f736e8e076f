//! Partitioned buffers of coordinate entries, written concurrently through atomic slot claims.
//!
//! Every contribution batch of an assembly cycle writes into its own partition. Within a
//! partition, each writer claims a unique slot from an atomic cursor before writing, so any
//! number of threads may write to the same partition at once without further synchronization.
use crate::error::AssemblyError;
use coalesce_paradis::{ParallelIndexedAccess, ParallelIndexedCollection, ParallelSliceAccess};
use num::Zero;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A single `(row, col, value)` contribution to a matrix. Indices are global.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CoordinateEntry<T> {
    pub row: usize,
    pub col: usize,
    pub value: T,
}

/// A single `(row, value)` contribution to a right-hand side. The row is global.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RhsEntry<T> {
    pub row: usize,
    pub value: T,
}

impl<T> CoordinateEntry<T> {
    pub fn new(row: usize, col: usize, value: T) -> Self {
        Self { row, col, value }
    }
}

impl<T> RhsEntry<T> {
    pub fn new(row: usize, value: T) -> Self {
        Self { row, value }
    }
}

impl<T: Zero> Default for CoordinateEntry<T> {
    fn default() -> Self {
        Self::new(usize::MAX, usize::MAX, T::zero())
    }
}

impl<T: Zero> Default for RhsEntry<T> {
    fn default() -> Self {
        Self::new(usize::MAX, T::zero())
    }
}

/// A fixed-capacity entry buffer split into partitions.
///
/// All partitions live in one contiguous allocation. The number of valid entries of each
/// partition is given by its cursor, clamped to the partition capacity.
#[derive(Debug)]
pub struct PartitionedBuffer<E> {
    entries: Vec<E>,
    offsets: Vec<usize>,
    cursors: Vec<AtomicUsize>,
    current: Option<usize>,
}

impl<E: Copy + Default> PartitionedBuffer<E> {
    /// A buffer with one partition per given capacity.
    pub fn with_capacities(capacities: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(capacities.len() + 1);
        offsets.push(0);
        for capacity in capacities {
            let last = *offsets.last().unwrap_or(&0);
            offsets.push(last + capacity);
        }
        let total = *offsets.last().unwrap_or(&0);
        Self {
            entries: vec![E::default(); total],
            offsets,
            cursors: capacities.iter().map(|_| AtomicUsize::new(0)).collect(),
            current: None,
        }
    }
}

impl<E> PartitionedBuffer<E> {
    pub fn num_partitions(&self) -> usize {
        self.cursors.len()
    }

    fn partition_range(&self, partition: usize) -> Range<usize> {
        assert!(
            partition < self.num_partitions(),
            "Partition {} out of bounds for buffer with {} partitions.",
            partition,
            self.num_partitions()
        );
        self.offsets[partition]..self.offsets[partition + 1]
    }

    pub fn capacity(&self, partition: usize) -> usize {
        self.partition_range(partition).len()
    }

    /// Total capacity over all partitions.
    pub fn total_capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of entries written to the partition since it was last drained.
    pub fn len(&self, partition: usize) -> usize {
        let capacity = self.capacity(partition);
        self.cursors[partition].load(Ordering::Acquire).min(capacity)
    }

    /// Total number of undrained entries over all partitions.
    pub fn total_len(&self) -> usize {
        (0..self.num_partitions()).map(|p| self.len(p)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// The partition most recently selected by [`next_partition`](Self::next_partition).
    pub fn current_partition(&self) -> Option<usize> {
        self.current
    }

    /// Select the next partition in round-robin order, starting at partition zero.
    pub fn next_partition(&mut self) -> usize {
        let next = match self.current {
            Some(p) => (p + 1) % self.num_partitions(),
            None => 0,
        };
        self.current = Some(next);
        next
    }

    /// Obtain a writer for the given partition.
    ///
    /// Fails with [`AssemblyError::PartitionNotDrained`] if the partition still holds entries.
    pub fn writer(&mut self, partition: usize) -> Result<PartitionWriter<'_, E>, AssemblyError>
    where
        E: Send + Sync,
    {
        let range = self.partition_range(partition);
        let cursor = &self.cursors[partition];
        if cursor.load(Ordering::Acquire) > 0 {
            return Err(AssemblyError::PartitionNotDrained { partition });
        }
        let capacity = range.len();
        let slots = unsafe { self.entries[range].create_access() };
        Ok(PartitionWriter {
            partition,
            slots,
            cursor,
            capacity,
        })
    }

    /// The entries currently held by the partition.
    pub fn entries(&self, partition: usize) -> &[E] {
        let start = self.offsets[partition];
        &self.entries[start..start + self.len(partition)]
    }

    /// Mark the partition as empty and return the entries it held.
    pub fn drain(&mut self, partition: usize) -> &[E] {
        let range = self.partition_range(partition);
        let len = std::mem::take(self.cursors[partition].get_mut()).min(range.len());
        &self.entries[range.start..range.start + len]
    }

    /// Drain the partition, appending its entries to `out`.
    pub fn drain_into(&mut self, partition: usize, out: &mut Vec<E>)
    where
        E: Clone,
    {
        out.extend_from_slice(self.drain(partition));
    }

    /// Empty every partition and restart the round robin.
    pub fn clear(&mut self) {
        for cursor in &mut self.cursors {
            *cursor.get_mut() = 0;
        }
        self.current = None;
    }

    pub fn memory_footprint_bytes(&self) -> usize {
        std::mem::size_of::<E>() * self.entries.capacity()
            + std::mem::size_of::<usize>() * self.offsets.capacity()
            + std::mem::size_of::<AtomicUsize>() * self.cursors.capacity()
    }
}

/// A claimed slot in a partition. Must be written with [`PartitionWriter::write`].
#[derive(Debug)]
#[must_use]
pub struct Slot<'w> {
    partition: usize,
    index: usize,
    marker: PhantomData<&'w ()>,
}

impl<'w> Slot<'w> {
    /// Position of the slot within its partition.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// A range of consecutive claimed slots in a partition.
#[derive(Debug)]
#[must_use]
pub struct SlotRange<'w> {
    partition: usize,
    range: Range<usize>,
    marker: PhantomData<&'w ()>,
}

impl<'w> SlotRange<'w> {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }
}

/// Concurrent write access to a single partition.
///
/// All methods take `&self`, and the writer can be shared among threads. Slots are claimed with
/// a single `fetch_add` on the partition cursor, so every claim returns a position that no
/// other claim returns, and a position beyond the capacity is reported as an error instead of
/// being written.
pub struct PartitionWriter<'a, E> {
    partition: usize,
    slots: ParallelSliceAccess<'a, E>,
    cursor: &'a AtomicUsize,
    capacity: usize,
}

impl<'a, E: Send + Sync> PartitionWriter<'a, E> {
    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots claimed so far, clamped to the capacity.
    pub fn len(&self) -> usize {
        self.cursor.load(Ordering::Acquire).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn claim(&self, count: usize) -> Result<Range<usize>, AssemblyError> {
        let start = self.cursor.fetch_add(count, Ordering::AcqRel);
        let end = start + count;
        if end > self.capacity {
            return Err(AssemblyError::PartitionCapacityExceeded {
                partition: self.partition,
                capacity: self.capacity,
            });
        }
        Ok(start..end)
    }

    pub fn claim_slot(&self) -> Result<Slot<'_>, AssemblyError> {
        let range = self.claim(1)?;
        Ok(Slot {
            partition: self.partition,
            index: range.start,
            marker: PhantomData,
        })
    }

    /// Claim `count` consecutive slots with a single atomic operation.
    pub fn claim_slots(&self, count: usize) -> Result<SlotRange<'_>, AssemblyError> {
        let range = self.claim(count)?;
        Ok(SlotRange {
            partition: self.partition,
            range,
            marker: PhantomData,
        })
    }

    pub fn write(&self, slot: Slot<'_>, entry: E) {
        assert_eq!(slot.partition, self.partition, "Slot was claimed from another partition.");
        assert!(slot.index < self.capacity);
        // The slot was handed out exactly once by the cursor and is consumed here
        unsafe { *self.slots.get_unchecked_mut(slot.index) = entry };
    }

    /// Write `entries` to a claimed range. The number of entries must match the range length.
    pub fn write_range(&self, slots: SlotRange<'_>, entries: &[E]) -> Result<(), AssemblyError>
    where
        E: Copy,
    {
        assert_eq!(slots.partition, self.partition, "Slots were claimed from another partition.");
        if entries.len() != slots.len() {
            return Err(AssemblyError::LengthMismatch {
                expected: slots.len(),
                found: entries.len(),
            });
        }
        assert!(slots.range.end <= self.capacity);
        let target = unsafe { self.slots.subslice_mut(slots.range) };
        target.copy_from_slice(entries);
        Ok(())
    }

    /// Claim a slot and write `entry` to it.
    pub fn push(&self, entry: E) -> Result<(), AssemblyError> {
        let slot = self.claim_slot()?;
        self.write(slot, entry);
        Ok(())
    }
}
