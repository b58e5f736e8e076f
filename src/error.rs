//! Errors raised while assembling a linear system.
//!
//! None of these errors are recoverable within an assembly cycle: once raised, the buffers of
//! the cycle are in an unspecified (but memory safe) state and the cycle must be abandoned.
use crate::applier::AssemblyState;
use crate::classify::SkipPhase;
use coalesce_paradis::InvalidOffsets;
use std::error::Error;
use std::fmt;
use std::ops::Range;

/// Coarse classification of [`AssemblyError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A buffer received more entries than it was sized for. Indicates a sizing defect upstream.
    Capacity,
    /// An operation was invoked out of order.
    Sequencing,
    /// The contributed entries are inconsistent with the requested operation.
    Structural,
    /// The system was configured with inconsistent settings.
    Configuration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AssemblyError {
    /// A partition of an entry buffer ran out of slots.
    PartitionCapacityExceeded { partition: usize, capacity: usize },
    /// An assembler was handed more entries than the configured upper bound.
    EntryCountExceeded { expected: usize, attempted: usize },
    /// Scratch buffers were acquired for fewer entries, or a different number of rows, than an
    /// assembly needs.
    ScratchTooSmall { entries: usize, rows: usize, available_entries: usize, available_rows: usize },
    /// Numeric assembly was requested before the sparsity graph was assembled.
    GraphNotAssembled,
    /// The result of an assembly was requested before assembly took place.
    NotAssembled,
    /// The assembly cycle state machine was asked to perform an invalid transition.
    InvalidTransition { from: AssemblyState, to: AssemblyState },
    /// A partition was selected for writing while it still held entries from an earlier batch.
    PartitionNotDrained { partition: usize },
    /// A dedicated population phase was ended (or begun) out of order.
    PhaseMismatch { expected: SkipPhase, found: SkipPhase },
    /// A row has no diagonal entry, so its diagonal cannot be moved.
    MissingDiagonal { row: usize },
    /// Numeric assembly encountered an entry that is not part of the assembled sparsity graph.
    EntryNotInGraph { row: usize, col: usize },
    RowOutOfRange { row: usize, range: Range<usize> },
    ColumnOutOfRange { col: usize, range: Range<usize> },
    /// Input arrays that must have equal length do not.
    LengthMismatch { expected: usize, found: usize },
    /// Internally computed row offsets do not describe disjoint rows.
    CorruptOffsets(InvalidOffsets),
    InvalidSettings(String),
}

impl AssemblyError {
    pub fn category(&self) -> ErrorCategory {
        use AssemblyError::*;
        match self {
            PartitionCapacityExceeded { .. } | EntryCountExceeded { .. } | ScratchTooSmall { .. } => {
                ErrorCategory::Capacity
            }
            GraphNotAssembled
            | NotAssembled
            | InvalidTransition { .. }
            | PartitionNotDrained { .. }
            | PhaseMismatch { .. } => ErrorCategory::Sequencing,
            MissingDiagonal { .. }
            | EntryNotInGraph { .. }
            | RowOutOfRange { .. }
            | ColumnOutOfRange { .. }
            | LengthMismatch { .. }
            | CorruptOffsets(_) => ErrorCategory::Structural,
            InvalidSettings(_) => ErrorCategory::Configuration,
        }
    }
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use AssemblyError::*;
        match self {
            PartitionCapacityExceeded { partition, capacity } => write!(
                f,
                "Partition {} exceeded its capacity of {} entries. The contribution count estimate is too small.",
                partition, capacity
            ),
            EntryCountExceeded { expected, attempted } => write!(
                f,
                "Attempted to stage {} entries, but the assembler was configured for at most {}.",
                attempted, expected
            ),
            ScratchTooSmall {
                entries,
                rows,
                available_entries,
                available_rows,
            } => write!(
                f,
                "Assembly of {} entries over {} rows requires larger scratch buffers \
                 (acquired for {} entries and {} rows).",
                entries, rows, available_entries, available_rows
            ),
            GraphNotAssembled => write!(f, "Numeric assembly requires a previously assembled graph."),
            NotAssembled => write!(f, "The system has not been assembled."),
            InvalidTransition { from, to } => {
                write!(f, "Invalid assembly state transition from {:?} to {:?}.", from, to)
            }
            PartitionNotDrained { partition } => {
                write!(f, "Partition {} still holds entries that have not been assembled.", partition)
            }
            PhaseMismatch { expected, found } => {
                write!(f, "Expected the {:?} phase, but the current phase is {:?}.", expected, found)
            }
            MissingDiagonal { row } => write!(f, "Row {} has no diagonal entry.", row),
            EntryNotInGraph { row, col } => {
                write!(f, "Entry ({}, {}) is not part of the assembled sparsity graph.", row, col)
            }
            RowOutOfRange { row, range } => write!(f, "Row {} is outside of the row range {:?}.", row, range),
            ColumnOutOfRange { col, range } => {
                write!(f, "Column {} is outside of the column range {:?}.", col, range)
            }
            LengthMismatch { expected, found } => {
                write!(f, "Input length mismatch: expected {}, found {}.", expected, found)
            }
            CorruptOffsets(err) => write!(f, "Corrupt row offsets: {}", err),
            InvalidSettings(msg) => write!(f, "Invalid assembly settings: {}", msg),
        }
    }
}

impl Error for AssemblyError {}

impl From<InvalidOffsets> for AssemblyError {
    fn from(err: InvalidOffsets) -> Self {
        AssemblyError::CorruptOffsets(err)
    }
}
