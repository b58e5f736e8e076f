use coalesce::classify::RowClassifierBuilder;
use coalesce::coalesce_sparse::{HostCsr, RowLayout};
use coalesce::settings::{AssemblySettings, PartitionSizing, SystemLayout};
use coalesce::system::{AssembledLinearSystem, LinearSystem, SolveSummary, SolverBackend};
use coalesce::AssemblyState;
use eyre::eyre;
use matrixcompare::assert_matrix_eq;
use nalgebra::{dmatrix, dvector, DMatrix, DVector};
use rayon::prelude::*;

/// Direct solver on a dense copy of a single-rank system.
#[derive(Debug)]
struct DenseLu {
    layout: RowLayout,
    matrix: Option<DMatrix<f64>>,
    rhs: Vec<DVector<f64>>,
    loaded_layouts: Vec<RowLayout>,
}

impl DenseLu {
    fn new(layout: RowLayout) -> Self {
        Self {
            layout,
            matrix: None,
            rhs: Vec::new(),
            loaded_layouts: Vec::new(),
        }
    }
}

impl SolverBackend<f64> for DenseLu {
    fn row_layout(&self) -> RowLayout {
        self.layout
    }

    fn load(&mut self, matrix: &HostCsr<f64>, rhs: &[&DVector<f64>]) -> eyre::Result<()> {
        self.loaded_layouts.push(matrix.layout());
        self.matrix = Some(matrix.to_dense());
        self.rhs = rhs.iter().map(|&b| b.clone()).collect();
        Ok(())
    }

    fn solve(&mut self, component: usize, solution: &mut DVector<f64>) -> eyre::Result<SolveSummary<f64>> {
        let matrix = self
            .matrix
            .as_ref()
            .ok_or_else(|| eyre!("no system has been loaded"))?;
        let rhs = self
            .rhs
            .get(component)
            .ok_or_else(|| eyre!("no rhs component {}", component))?;
        let x = matrix
            .clone()
            .lu()
            .solve(rhs)
            .ok_or_else(|| eyre!("system is singular"))?;
        let residual_norm = (matrix * &x - rhs).norm();
        solution.copy_from(&x);
        Ok(SolveSummary {
            iterations: 1,
            residual_norm,
        })
    }
}

/// Poisson problem `-u'' = 1` on `[0, 1]` with `u(0) = u(1) = 0`, discretized with linear elements.
fn poisson_system(num_elements: usize, layout: RowLayout) -> AssembledLinearSystem<f64, DenseLu> {
    let num_nodes = num_elements + 1;
    let classifier = RowClassifierBuilder::new(0..num_nodes)
        .mark_dirichlet([0, num_nodes - 1])
        .unwrap()
        .build();
    let sizing = PartitionSizing::new()
        .with_partition(num_elements, 2)
        .with_partition(2, 1);
    AssembledLinearSystem::new(
        AssemblySettings::new("poisson").with_num_partitions(2),
        SystemLayout::square(0..num_nodes, num_nodes),
        classifier,
        sizing,
        DenseLu::new(layout),
    )
    .unwrap()
}

fn assemble_poisson(system: &mut AssembledLinearSystem<f64, DenseLu>, num_elements: usize) {
    let h = 1.0 / num_elements as f64;
    let rhs = dvector![h / 2.0, h / 2.0];
    let lhs = dmatrix![1.0, -1.0; -1.0, 1.0] / h;
    system.zero_system().unwrap();
    system
        .sum_into(|accumulator| {
            (0..num_elements)
                .into_par_iter()
                .try_for_each(|e| accumulator.sum_into(&[e, e + 1], &rhs, &lhs))
        })
        .unwrap();
    system
        .apply_dirichlet_bcs(&[0, num_elements], &[0.0, 0.0], &[0.0, 0.0])
        .unwrap();
}

#[test]
fn poisson_problem_is_solved_exactly_at_the_nodes() {
    let num_elements = 16;
    let mut system = poisson_system(num_elements, RowLayout::Natural);
    assemble_poisson(&mut system, num_elements);
    system.load_complete().unwrap();

    let mut solution = DVector::zeros(num_elements + 1);
    let summary = system.solve(0, &mut solution).unwrap();
    assert!(summary.residual_norm < 1e-10);

    // Linear elements reproduce the exact solution u(x) = x (1 - x) / 2 at the nodes
    let expected = DVector::from_fn(num_elements + 1, |i, _| {
        let x = i as f64 / num_elements as f64;
        x * (1.0 - x) / 2.0
    });
    assert_matrix_eq!(solution, expected, comp = abs, tol = 1e-12);
}

#[test]
fn backend_receives_its_preferred_layout() {
    let num_elements = 4;
    let mut system = poisson_system(num_elements, RowLayout::DiagonalFirst);
    assert_eq!(system.applier().row_layout(), RowLayout::DiagonalFirst);

    for _ in 0..2 {
        assemble_poisson(&mut system, num_elements);
        system.load_complete().unwrap();
        assert_eq!(system.applier().state(), AssemblyState::Finalized);
    }
    assert_eq!(system.backend().loaded_layouts, vec![RowLayout::DiagonalFirst; 2]);

    let matrix = system.applier().matrix().unwrap();
    for i in 0..matrix.nrows() {
        assert_eq!(matrix.row(i).column_indices()[0], i);
    }
    // Boundary rows only carry their constraint
    assert_eq!(matrix.row(0).column_indices(), &[0]);
    assert_eq!(matrix.row(num_elements).column_indices(), &[num_elements]);
    assert_eq!(system.applier().cycles(), 2);
    assert_eq!(system.applier().matrix_assembler().stats().graph_assemblies, 1);

    let mut solution = DVector::zeros(num_elements + 1);
    assert!(system.solve(1, &mut solution).is_err());
}

#[test]
fn solving_without_a_loaded_system_fails() {
    let mut system = poisson_system(2, RowLayout::Natural);
    let mut solution = DVector::zeros(3);
    assert!(system.solve(0, &mut solution).is_err());
    // Nothing was accumulated yet
    assert!(system.load_complete().is_err());
}
