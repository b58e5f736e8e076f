//! Classification of rows into those populated by the generic accumulation path and those
//! populated by dedicated boundary-condition passes.
//!
//! Dirichlet and overset rows are *skipped* by the generic path and repopulated from scratch
//! by their dedicated pass, rather than being accumulated and then zeroed and reset.
use crate::error::AssemblyError;
use rustc_hash::FxHashSet;
use std::ops::Range;

/// How a row is populated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RowStatus {
    /// Populated by the generic accumulation path.
    Normal,
    /// Constrained to a fixed value. Has no off-diagonal entries and is populated by the
    /// Dirichlet pass.
    Dirichlet,
    /// Fringe row of an overset mesh, populated with interpolation weights from a donor mesh.
    Overset,
}

/// The population pass that is currently running.
///
/// Skipped rows are only rejected in the [`SkipPhase::Generic`] phase.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SkipPhase {
    Generic,
    Dirichlet,
    Overset,
}

#[derive(Debug, Clone)]
pub struct RowClassifierBuilder {
    rows: Range<usize>,
    status: Vec<RowStatus>,
}

impl RowClassifierBuilder {
    /// A builder for the given owned rows, all initially [`RowStatus::Normal`].
    pub fn new(rows: Range<usize>) -> Self {
        Self {
            status: vec![RowStatus::Normal; rows.len()],
            rows,
        }
    }

    fn mark(&mut self, rows: impl IntoIterator<Item = usize>, status: RowStatus) -> Result<(), AssemblyError> {
        for row in rows {
            if !self.rows.contains(&row) {
                return Err(AssemblyError::RowOutOfRange {
                    row,
                    range: self.rows.clone(),
                });
            }
            let current = &mut self.status[row - self.rows.start];
            // Dirichlet takes precedence: a constrained row stays constrained
            if *current != RowStatus::Dirichlet {
                *current = status;
            }
        }
        Ok(())
    }

    pub fn mark_dirichlet(mut self, rows: impl IntoIterator<Item = usize>) -> Result<Self, AssemblyError> {
        self.mark(rows, RowStatus::Dirichlet)?;
        Ok(self)
    }

    pub fn mark_overset(mut self, rows: impl IntoIterator<Item = usize>) -> Result<Self, AssemblyError> {
        self.mark(rows, RowStatus::Overset)?;
        Ok(self)
    }

    /// Mark all `num_dof` rows of each of the given nodes as Dirichlet rows.
    pub fn mark_dirichlet_nodes(self, nodes: &[usize], num_dof: usize) -> Result<Self, AssemblyError> {
        self.mark_dirichlet(node_rows(nodes, num_dof))
    }

    /// Mark all `num_dof` rows of each of the given nodes as overset fringe rows.
    pub fn mark_overset_nodes(self, nodes: &[usize], num_dof: usize) -> Result<Self, AssemblyError> {
        self.mark_overset(node_rows(nodes, num_dof))
    }

    pub fn build(self) -> RowClassifier {
        let skip_set: FxHashSet<usize> = self
            .status
            .iter()
            .enumerate()
            .filter(|(_, status)| **status != RowStatus::Normal)
            .map(|(local_idx, _)| self.rows.start + local_idx)
            .collect();
        RowClassifier {
            rows: self.rows,
            status: self.status,
            skip_set,
            phase: SkipPhase::Generic,
        }
    }
}

fn node_rows(nodes: &[usize], num_dof: usize) -> impl Iterator<Item = usize> + '_ {
    nodes
        .iter()
        .flat_map(move |&node| (0..num_dof).map(move |d| num_dof * node + d))
}

/// Immutable row statuses plus the currently active population phase.
#[derive(Debug, Clone)]
pub struct RowClassifier {
    rows: Range<usize>,
    status: Vec<RowStatus>,
    skip_set: FxHashSet<usize>,
    phase: SkipPhase,
}

impl RowClassifier {
    /// A classifier in which every row is [`RowStatus::Normal`].
    pub fn all_normal(rows: Range<usize>) -> Self {
        RowClassifierBuilder::new(rows).build()
    }

    pub fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }

    /// Status of the given global row. Rows not owned by this classifier are normal.
    pub fn classify(&self, row: usize) -> RowStatus {
        if self.rows.contains(&row) {
            self.status[row - self.rows.start]
        } else {
            RowStatus::Normal
        }
    }

    /// Whether contributions to `row` are dropped in the current phase.
    #[inline]
    pub fn is_skipped(&self, row: usize) -> bool {
        self.phase == SkipPhase::Generic && self.skip_set.contains(&row)
    }

    /// The rows excluded from the generic accumulation path.
    pub fn skip_set(&self) -> &FxHashSet<usize> {
        &self.skip_set
    }

    pub fn has_skipped_rows(&self) -> bool {
        !self.skip_set.is_empty()
    }

    pub fn phase(&self) -> SkipPhase {
        self.phase
    }

    fn begin_phase(&mut self, phase: SkipPhase) -> Result<(), AssemblyError> {
        if self.phase != SkipPhase::Generic {
            return Err(AssemblyError::PhaseMismatch {
                expected: SkipPhase::Generic,
                found: self.phase,
            });
        }
        self.phase = phase;
        Ok(())
    }

    fn end_phase(&mut self, phase: SkipPhase) -> Result<(), AssemblyError> {
        if self.phase != phase {
            return Err(AssemblyError::PhaseMismatch {
                expected: phase,
                found: self.phase,
            });
        }
        self.phase = SkipPhase::Generic;
        Ok(())
    }

    /// Stop skipping rows so that the Dirichlet pass can populate them.
    pub fn begin_dirichlet_phase(&mut self) -> Result<(), AssemblyError> {
        self.begin_phase(SkipPhase::Dirichlet)
    }

    pub fn end_dirichlet_phase(&mut self) -> Result<(), AssemblyError> {
        self.end_phase(SkipPhase::Dirichlet)
    }

    /// Stop skipping rows so that the overset pass can populate them.
    pub fn begin_overset_phase(&mut self) -> Result<(), AssemblyError> {
        self.begin_phase(SkipPhase::Overset)
    }

    pub fn end_overset_phase(&mut self) -> Result<(), AssemblyError> {
        self.end_phase(SkipPhase::Overset)
    }

    /// Return to the generic phase regardless of the current phase.
    pub(crate) fn reset_phase(&mut self) {
        self.phase = SkipPhase::Generic;
    }
}
