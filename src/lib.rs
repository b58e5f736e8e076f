//! coalesce
//! ========
//!
//! Concurrent, partitioned assembly of distributed sparse linear systems.
//!
//! Many independent parallel kernels contribute small, possibly duplicate `(row, col, value)`
//! and `(row, value)` entries to a linear system. The [`applier::CoeffApplier`] admits or skips
//! each contribution according to a [`classify::RowClassifier`], stores accepted entries in
//! lock-free [`partition::PartitionedBuffer`]s, and reduces them into a CSR matrix and dense
//! right-hand sides with the [`assembly`] kernels.
use nalgebra::RealField;
use std::fmt::LowerExp;

pub mod applier;
pub mod assembly;
pub mod classify;
pub mod error;
pub mod memory;
pub mod partition;
pub mod settings;
pub mod system;

pub use applier::{Accumulator, AssemblyState, CoeffApplier};
pub use error::{AssemblyError, ErrorCategory};

pub extern crate coalesce_sparse;
pub extern crate nalgebra;

/// Scalar type of assembled values.
pub trait Real: RealField + Copy + LowerExp + Send + Sync {}

impl<T> Real for T where T: RealField + Copy + LowerExp + Send + Sync {}
