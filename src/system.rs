//! The linear system capability interface, and its implementation on top of [`CoeffApplier`].
use crate::applier::{Accumulator, AssemblyState, CoeffApplier};
use crate::classify::RowClassifier;
use crate::error::AssemblyError;
use crate::settings::{AssemblySettings, PartitionSizing, SystemLayout};
use crate::Real;
use coalesce_sparse::{HostCsr, RowLayout};
use log::debug;
use nalgebra::DVector;

/// Outcome of a linear solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveSummary<T> {
    pub iterations: usize,
    pub residual_norm: T,
}

/// An external solver that consumes the assembled system.
pub trait SolverBackend<T: Real> {
    /// The row layout the backend expects the matrix in.
    fn row_layout(&self) -> RowLayout;

    /// Hand the assembled matrix and all rhs components over to the backend.
    fn load(&mut self, matrix: &HostCsr<T>, rhs: &[&DVector<T>]) -> eyre::Result<()>;

    /// Solve for the given rhs component, using `solution` as initial guess.
    fn solve(&mut self, component: usize, solution: &mut DVector<T>) -> eyre::Result<SolveSummary<T>>;
}

/// A distributed linear system that is repeatedly assembled from local contributions and solved.
pub trait LinearSystem<T: Real> {
    /// Discard the previous system and prepare for a new assembly cycle.
    fn zero_system(&mut self) -> Result<(), AssemblyError>;

    /// Run one contribution batch. The kernel may submit contributions concurrently.
    fn sum_into<F>(&mut self, kernel: F) -> Result<(), AssemblyError>
    where
        F: FnOnce(&Accumulator<'_, T>) -> Result<(), AssemblyError>;

    /// Constrain the given rows to `bc_values`, given the current `solution` at those rows.
    fn apply_dirichlet_bcs(&mut self, rows: &[usize], solution: &[T], bc_values: &[T]) -> Result<(), AssemblyError>;

    /// Finish assembly and hand the system to the solver.
    fn load_complete(&mut self) -> eyre::Result<()>;

    fn solve(&mut self, component: usize, solution: &mut DVector<T>) -> eyre::Result<SolveSummary<T>>;
}

/// A [`LinearSystem`] assembled by a [`CoeffApplier`] and solved by a backend fixed at construction.
#[derive(Debug)]
pub struct AssembledLinearSystem<T: Real, B> {
    applier: CoeffApplier<T>,
    backend: B,
}

impl<T: Real, B: SolverBackend<T>> AssembledLinearSystem<T, B> {
    pub fn new(
        settings: AssemblySettings,
        layout: SystemLayout,
        classifier: RowClassifier,
        sizing: PartitionSizing,
        backend: B,
    ) -> Result<Self, AssemblyError> {
        let mut applier = CoeffApplier::new(settings, layout, classifier, sizing)?;
        applier.reorder(backend.row_layout())?;
        Ok(Self { applier, backend })
    }

    pub fn applier(&self) -> &CoeffApplier<T> {
        &self.applier
    }

    pub fn applier_mut(&mut self) -> &mut CoeffApplier<T> {
        &mut self.applier
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<T: Real, B: SolverBackend<T>> LinearSystem<T> for AssembledLinearSystem<T, B> {
    fn zero_system(&mut self) -> Result<(), AssemblyError> {
        self.applier.reset()
    }

    fn sum_into<F>(&mut self, kernel: F) -> Result<(), AssemblyError>
    where
        F: FnOnce(&Accumulator<'_, T>) -> Result<(), AssemblyError>,
    {
        let accumulator = self.applier.begin_accumulation()?;
        kernel(&accumulator)
    }

    fn apply_dirichlet_bcs(&mut self, rows: &[usize], solution: &[T], bc_values: &[T]) -> Result<(), AssemblyError> {
        self.applier.begin_dirichlet_phase()?;
        let result = self.applier.apply_dirichlet_bcs(rows, solution, bc_values);
        self.applier.end_dirichlet_phase()?;
        result
    }

    fn load_complete(&mut self) -> eyre::Result<()> {
        if self.applier.state() != AssemblyState::Finalized {
            self.applier.finalize()?;
        }
        let layout = self.backend.row_layout();
        self.applier.reorder(layout)?;
        let num_components = self.applier.settings().num_rhs_components;
        let rhs = (0..num_components)
            .map(|c| self.applier.rhs(c))
            .collect::<Result<Vec<_>, _>>()?;
        self.backend.load(self.applier.matrix()?, &rhs)?;
        debug!(
            "{}: loaded {} rows into the solver in {:?} layout",
            self.applier.settings().name,
            self.applier.layout().num_rows(),
            layout
        );
        Ok(())
    }

    fn solve(&mut self, component: usize, solution: &mut DVector<T>) -> eyre::Result<SolveSummary<T>> {
        self.backend.solve(component, solution)
    }
}
