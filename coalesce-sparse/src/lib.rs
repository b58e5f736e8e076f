//! Host-side sparse storage for assembled linear systems.
//!
//! The assemblers in `coalesce` produce CSR matrices for a contiguous block of global rows.
//! This crate holds the storage format handed to solvers ([`HostCsr`]), the row layout
//! conventions solvers negotiate ([`RowLayout`]) and the small per-row kernels the assemblers
//! are built from.

mod csr;
mod dump;
pub mod kernels;

pub use csr::{HostCsr, HostCsrRow, RowLayout};
pub use dump::write_rhs;
