//! The coefficient applier orchestrates one linear system through repeated assembly cycles.
//!
//! A cycle runs through the states
//!
//! ```text
//! Idle -> Accumulating -> Reducing -> Finalized -> Idle
//! ```
//!
//! In the `Accumulating` state, contribution batches write into the partitioned entry buffers
//! through an [`Accumulator`], which may be shared among any number of threads. `finalize`
//! drains every partition into the matrix and rhs assemblers, reduces the entries and exports
//! the result to host memory. The assembled system stays available until `reset` returns the
//! applier to `Idle` for the next cycle.
use crate::assembly::{MatrixAssembler, MatrixAssemblerConfig, RhsAssembler, RhsAssemblerConfig};
use crate::classify::{RowClassifier, SkipPhase};
use crate::error::AssemblyError;
use crate::memory::MemoryController;
use crate::partition::{CoordinateEntry, PartitionWriter, PartitionedBuffer, RhsEntry};
use crate::settings::{AssemblySettings, PartitionSizing, SystemLayout};
use crate::Real;
use coalesce_sparse::{write_rhs, HostCsr, RowLayout};
use log::{debug, info, trace, warn};
use nalgebra::{DMatrixView, DVector, DVectorView};
use std::cell::RefCell;
use std::io::{self, Write};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thread_local::ThreadLocal;

/// State of the current assembly cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AssemblyState {
    Idle,
    Accumulating,
    Reducing,
    Finalized,
}

#[derive(Debug)]
struct AccumulatorWorkspace<T> {
    rows: Vec<usize>,
    matrix_entries: Vec<CoordinateEntry<T>>,
    rhs_entries: Vec<Vec<RhsEntry<T>>>,
}

impl<T> Default for AccumulatorWorkspace<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            matrix_entries: Vec::new(),
            rhs_entries: Vec::new(),
        }
    }
}

/// Orchestrates the assembly of one distributed linear system.
///
/// The applier exclusively owns its entry buffers, assemblers and scratch memory for the
/// lifetime of the linear system.
#[derive(Debug)]
pub struct CoeffApplier<T: Real> {
    settings: AssemblySettings,
    layout: SystemLayout,
    classifier: RowClassifier,
    state: AssemblyState,
    target_layout: RowLayout,

    matrix_entries: PartitionedBuffer<CoordinateEntry<T>>,
    rhs_entries: Vec<PartitionedBuffer<RhsEntry<T>>>,
    memory: MemoryController,
    matrix: MatrixAssembler<T>,
    rhs: Vec<RhsAssembler<T>>,

    filled_rows: Vec<AtomicBool>,
    off_rank: AtomicUsize,
    dropped_off_rank: usize,
    workspace: ThreadLocal<RefCell<AccumulatorWorkspace<T>>>,

    cycles: usize,
    finalize_time: Duration,
}

impl<T: Real> CoeffApplier<T> {
    pub fn new(
        settings: AssemblySettings,
        layout: SystemLayout,
        classifier: RowClassifier,
        sizing: PartitionSizing,
    ) -> Result<Self, AssemblyError> {
        settings.validate()?;
        layout.validate()?;
        if sizing.num_partitions() != settings.num_partitions {
            return Err(AssemblyError::InvalidSettings(format!(
                "partition sizing describes {} partitions, but {} were configured",
                sizing.num_partitions(),
                settings.num_partitions
            )));
        }
        if classifier.rows() != layout.rows {
            return Err(AssemblyError::InvalidSettings(format!(
                "classifier rows {:?} do not match the owned rows {:?}",
                classifier.rows(),
                layout.rows
            )));
        }

        let num_rows = layout.num_rows();
        let fill_entries = if settings.fill_unfilled_rows { num_rows } else { 0 };
        let matrix_capacity = sizing.total_matrix_capacity(settings.num_dof) + fill_entries;
        let rhs_capacity = sizing.total_rhs_capacity(settings.num_dof) + fill_entries;

        let matrix = MatrixAssembler::configure(MatrixAssemblerConfig {
            name: settings.name.clone(),
            sort: settings.sort,
            rows: layout.rows.clone(),
            cols: layout.cols.clone(),
            expected_entry_count: matrix_capacity,
        });
        let rhs = (0..settings.num_rhs_components)
            .map(|_| {
                RhsAssembler::configure(RhsAssemblerConfig {
                    name: settings.name.clone(),
                    sort: settings.sort,
                    rows: layout.rows.clone(),
                    expected_entry_count: rhs_capacity,
                })
            })
            .collect();
        let rhs_capacities = sizing.rhs_capacities(settings.num_dof);
        let rhs_entries = (0..settings.num_rhs_components)
            .map(|_| PartitionedBuffer::with_capacities(&rhs_capacities))
            .collect();

        debug!(
            "{}: created applier for rows {:?} with {} partitions, {} matrix and {} rhs entries",
            settings.name,
            layout.rows,
            settings.num_partitions,
            matrix_capacity,
            rhs_capacity
        );

        Ok(Self {
            matrix_entries: PartitionedBuffer::with_capacities(&sizing.matrix_capacities(settings.num_dof)),
            rhs_entries,
            memory: MemoryController::new(settings.name.clone()),
            matrix,
            rhs,
            filled_rows: (0..num_rows).map(|_| AtomicBool::new(false)).collect(),
            off_rank: AtomicUsize::new(0),
            dropped_off_rank: 0,
            workspace: ThreadLocal::new(),
            state: AssemblyState::Idle,
            target_layout: RowLayout::Natural,
            cycles: 0,
            finalize_time: Duration::ZERO,
            settings,
            layout,
            classifier,
        })
    }

    pub fn settings(&self) -> &AssemblySettings {
        &self.settings
    }

    pub fn layout(&self) -> &SystemLayout {
        &self.layout
    }

    pub fn classifier(&self) -> &RowClassifier {
        &self.classifier
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    /// Start (or continue) accumulating, handing out an accumulator for the next partition.
    ///
    /// Every call selects the next partition in round-robin order. The returned accumulator
    /// borrows the applier, so contribution batches run one after the other, while the
    /// contributions within a batch may be submitted concurrently.
    pub fn begin_accumulation(&mut self) -> Result<Accumulator<'_, T>, AssemblyError> {
        match self.state {
            AssemblyState::Idle | AssemblyState::Accumulating => {}
            from => {
                return Err(AssemblyError::InvalidTransition {
                    from,
                    to: AssemblyState::Accumulating,
                })
            }
        }

        let partition = self.matrix_entries.next_partition();
        trace!("{}: accumulating into partition {}", self.settings.name, partition);
        let matrix = self.matrix_entries.writer(partition)?;
        let rhs = self
            .rhs_entries
            .iter_mut()
            .map(|buffer| buffer.writer(partition))
            .collect::<Result<Vec<_>, _>>()?;
        self.state = AssemblyState::Accumulating;

        Ok(Accumulator {
            partition,
            matrix,
            rhs,
            classifier: &self.classifier,
            rows: self.layout.rows.clone(),
            cols: self.layout.cols.clone(),
            num_dof: self.settings.num_dof,
            filled_rows: &self.filled_rows,
            off_rank: &self.off_rank,
            workspace: &self.workspace,
        })
    }

    pub fn begin_dirichlet_phase(&mut self) -> Result<(), AssemblyError> {
        self.classifier.begin_dirichlet_phase()
    }

    pub fn end_dirichlet_phase(&mut self) -> Result<(), AssemblyError> {
        self.classifier.end_dirichlet_phase()
    }

    pub fn begin_overset_phase(&mut self) -> Result<(), AssemblyError> {
        self.classifier.begin_overset_phase()
    }

    pub fn end_overset_phase(&mut self) -> Result<(), AssemblyError> {
        self.classifier.end_overset_phase()
    }

    /// Write Dirichlet conditions into the next partition. See [`Accumulator::apply_dirichlet_bcs`].
    pub fn apply_dirichlet_bcs(&mut self, rows: &[usize], solution: &[T], bc_values: &[T]) -> Result<(), AssemblyError> {
        self.begin_accumulation()?
            .apply_dirichlet_bcs(rows, solution, bc_values)
    }

    /// Reduce all accumulated entries and export the assembled system to host memory.
    pub fn finalize(&mut self) -> Result<(), AssemblyError> {
        if self.state != AssemblyState::Accumulating {
            return Err(AssemblyError::InvalidTransition {
                from: self.state,
                to: AssemblyState::Reducing,
            });
        }
        self.state = AssemblyState::Reducing;
        let timer = Instant::now();

        self.matrix.clear_staged();
        for rhs in &mut self.rhs {
            rhs.clear_staged();
        }
        for partition in 0..self.matrix_entries.num_partitions() {
            self.matrix.ingest_entries(self.matrix_entries.drain(partition))?;
            for (buffer, rhs) in self.rhs_entries.iter_mut().zip(&mut self.rhs) {
                rhs.ingest_entries(buffer.drain(partition))?;
            }
        }

        self.dropped_off_rank = std::mem::take(self.off_rank.get_mut());
        if self.dropped_off_rank > 0 {
            warn!(
                "{}: dropped contributions to {} rows outside of the owned rows {:?}",
                self.settings.name, self.dropped_off_rank, self.layout.rows
            );
        }
        self.fill_unfilled_rows()?;

        let capacity = self
            .rhs
            .iter()
            .map(RhsAssembler::staged_len)
            .fold(self.matrix.staged_len(), usize::max);
        let mut scratch = self.memory.acquire(capacity, self.layout.num_rows());

        if !self.matrix.has_graph() {
            self.matrix.assemble_graph(&mut scratch)?;
        }
        match self.matrix.assemble_values(&mut scratch) {
            Err(AssemblyError::EntryNotInGraph { row, col }) => {
                debug!(
                    "{}: entry ({}, {}) is not in the graph, reassembling the graph",
                    self.settings.name, row, col
                );
                self.matrix.assemble_graph(&mut scratch)?;
                self.matrix.assemble_values(&mut scratch)?;
            }
            Ok(()) if self.matrix.unused_slots() > 0 => {
                debug!(
                    "{}: {} graph slots received no entries, reassembling the graph",
                    self.settings.name,
                    self.matrix.unused_slots()
                );
                self.matrix.assemble_graph(&mut scratch)?;
                self.matrix.assemble_values(&mut scratch)?;
            }
            result => result?,
        }
        for rhs in &mut self.rhs {
            rhs.assemble_values(&mut scratch)?;
        }

        if self.target_layout != RowLayout::Natural {
            self.matrix.reorder(self.target_layout)?;
        }
        self.matrix.export_to_host()?;
        for rhs in &mut self.rhs {
            rhs.export_to_host()?;
        }

        self.state = AssemblyState::Finalized;
        self.cycles += 1;
        self.finalize_time += timer.elapsed();
        debug!(
            "{}: finalized cycle {} with {} non-zeros in {:?}",
            self.settings.name,
            self.cycles,
            self.matrix.nnz(),
            timer.elapsed()
        );
        Ok(())
    }

    /// Give every owned row without any entry a unit diagonal and a zero rhs, then clear the
    /// fill flags for the next cycle.
    fn fill_unfilled_rows(&mut self) -> Result<(), AssemblyError> {
        let first_row = self.layout.rows.start;
        let mut num_filled = 0;
        for (local_row, filled) in self.filled_rows.iter_mut().enumerate() {
            let was_filled = std::mem::take(filled.get_mut());
            if !was_filled && self.settings.fill_unfilled_rows {
                let row = first_row + local_row;
                self.matrix
                    .ingest_entry(CoordinateEntry::new(row, row, T::one()))?;
                for rhs in &mut self.rhs {
                    rhs.ingest_entry(RhsEntry::new(row, T::zero()))?;
                }
                num_filled += 1;
            }
        }
        if num_filled > 0 {
            debug!("{}: filled {} rows without entries", self.settings.name, num_filled);
        }
        Ok(())
    }

    /// Bring the exported matrix into the row layout expected by the consuming solver.
    ///
    /// The layout is remembered and applied in every subsequent cycle.
    pub fn reorder(&mut self, layout: RowLayout) -> Result<(), AssemblyError> {
        if self.state == AssemblyState::Finalized && self.matrix.layout() != layout {
            self.matrix.reorder(layout)?;
            self.matrix.export_to_host()?;
        }
        self.target_layout = layout;
        Ok(())
    }

    pub fn row_layout(&self) -> RowLayout {
        self.target_layout
    }

    /// The assembled matrix. Only available in the `Finalized` state.
    pub fn matrix(&self) -> Result<&HostCsr<T>, AssemblyError> {
        match self.state {
            AssemblyState::Finalized => Ok(self.matrix.host()),
            _ => Err(AssemblyError::NotAssembled),
        }
    }

    /// The assembled rhs of the given component. Only available in the `Finalized` state.
    ///
    /// Panics if the component is out of bounds.
    pub fn rhs(&self, component: usize) -> Result<&DVector<T>, AssemblyError> {
        match self.state {
            AssemblyState::Finalized => Ok(self.rhs[component].host()),
            _ => Err(AssemblyError::NotAssembled),
        }
    }

    pub fn matrix_assembler(&self) -> &MatrixAssembler<T> {
        &self.matrix
    }

    pub fn rhs_assemblers(&self) -> &[RhsAssembler<T>] {
        &self.rhs
    }

    /// Write the assembled matrix and every rhs component in MatrixMarket format.
    ///
    /// `rhs_writer` is called once per rhs component to obtain its writer.
    pub fn dump_data<W, F>(&self, matrix_writer: W, mut rhs_writer: F) -> eyre::Result<()>
    where
        W: Write,
        F: FnMut(usize) -> io::Result<W>,
    {
        self.matrix()?.write_matrix_market(matrix_writer)?;
        for component in 0..self.rhs.len() {
            write_rhs(rhs_writer(component)?, self.layout.rows.start, self.rhs(component)?)?;
        }
        Ok(())
    }

    /// Return to `Idle`, discarding the assembled system. The sparsity graph is kept.
    pub fn reset(&mut self) -> Result<(), AssemblyError> {
        match self.state {
            AssemblyState::Idle | AssemblyState::Finalized => {}
            from => {
                return Err(AssemblyError::InvalidTransition {
                    from,
                    to: AssemblyState::Idle,
                })
            }
        }
        self.matrix_entries.clear();
        for buffer in &mut self.rhs_entries {
            buffer.clear();
        }
        for filled in &mut self.filled_rows {
            *filled.get_mut() = false;
        }
        *self.off_rank.get_mut() = 0;
        self.classifier.reset_phase();
        self.state = AssemblyState::Idle;
        Ok(())
    }

    /// Force the sparsity graph to be reassembled in the next cycle.
    pub fn invalidate_graph(&mut self) {
        self.matrix.invalidate_graph();
    }

    /// Number of contribution rows outside of the owned rows dropped in the last finalized cycle.
    pub fn dropped_off_rank(&self) -> usize {
        self.dropped_off_rank
    }

    /// Number of finalized cycles.
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    pub fn memory_footprint_gb(&self) -> f64 {
        let buffers = self.matrix_entries.memory_footprint_bytes()
            + self
                .rhs_entries
                .iter()
                .map(PartitionedBuffer::memory_footprint_bytes)
                .sum::<usize>();
        crate::memory::bytes_to_gb(buffers)
            + self.memory.memory_footprint_gb()
            + self.matrix.memory_footprint_gb()
            + self
                .rhs
                .iter()
                .map(RhsAssembler::memory_footprint_gb)
                .sum::<f64>()
    }
}

impl<T: Real> Drop for CoeffApplier<T> {
    fn drop(&mut self) {
        if self.cycles > 0 {
            let stats = self.matrix.stats();
            info!(
                "{}: {} cycles, finalize {:?} total. Graph assembly: {} in {:?} (mean {:?}). \
                 Value assembly: {} in {:?} (mean {:?}). Export: mean {:?}.",
                self.settings.name,
                self.cycles,
                self.finalize_time,
                stats.graph_assemblies,
                stats.graph_time,
                stats.mean_graph_time(),
                stats.value_assemblies,
                stats.value_time,
                stats.mean_value_time(),
                stats.mean_export_time()
            );
        }
    }
}

/// Concurrent contribution interface for one batch of an assembly cycle.
///
/// All methods take `&self` and the accumulator is `Sync`, so a batch is typically submitted
/// from a rayon parallel iterator over mesh entities. Contributions to rows outside of the owned
/// rows are dropped and counted. Contributions to rows skipped by the classifier are dropped
/// silently.
pub struct Accumulator<'a, T: Real> {
    partition: usize,
    matrix: PartitionWriter<'a, CoordinateEntry<T>>,
    rhs: Vec<PartitionWriter<'a, RhsEntry<T>>>,
    classifier: &'a RowClassifier,
    rows: Range<usize>,
    cols: Range<usize>,
    num_dof: usize,
    filled_rows: &'a [AtomicBool],
    off_rank: &'a AtomicUsize,
    workspace: &'a ThreadLocal<RefCell<AccumulatorWorkspace<T>>>,
}

impl<'a, T: Real> Accumulator<'a, T> {
    /// The partition this accumulator writes to.
    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn num_rhs_components(&self) -> usize {
        self.rhs.len()
    }

    /// Whether contributions to `row` are accepted, marking accepted rows as filled.
    fn admit(&self, row: usize) -> bool {
        if !self.rows.contains(&row) {
            self.off_rank.fetch_add(1, Ordering::Relaxed);
            false
        } else if self.classifier.is_skipped(row) {
            false
        } else {
            self.filled_rows[row - self.rows.start].store(true, Ordering::Relaxed);
            true
        }
    }

    fn check_col(&self, col: usize) -> Result<(), AssemblyError> {
        if self.cols.contains(&col) {
            Ok(())
        } else {
            Err(AssemblyError::ColumnOutOfRange {
                col,
                range: self.cols.clone(),
            })
        }
    }

    fn workspace(&self) -> std::cell::RefMut<'a, AccumulatorWorkspace<T>> {
        let mut ws = self.workspace.get_or_default().borrow_mut();
        ws.rows.clear();
        ws.matrix_entries.clear();
        ws.rhs_entries.resize_with(self.rhs.len(), Vec::new);
        for entries in &mut ws.rhs_entries {
            entries.clear();
        }
        ws
    }

    /// Write the staged entries of the workspace, claiming one contiguous range per buffer.
    fn commit(&self, ws: &AccumulatorWorkspace<T>) -> Result<(), AssemblyError> {
        if !ws.matrix_entries.is_empty() {
            let slots = self.matrix.claim_slots(ws.matrix_entries.len())?;
            self.matrix.write_range(slots, &ws.matrix_entries)?;
        }
        for (writer, entries) in self.rhs.iter().zip(&ws.rhs_entries) {
            if !entries.is_empty() {
                let slots = writer.claim_slots(entries.len())?;
                writer.write_range(slots, entries)?;
            }
        }
        Ok(())
    }

    fn expand_rows(&self, ws: &mut AccumulatorWorkspace<T>, ids: &[usize]) {
        let num_dof = self.num_dof;
        ws.rows
            .extend(ids.iter().flat_map(|&id| (0..num_dof).map(move |d| num_dof * id + d)));
    }

    /// Stage the dense block `lhs` over the expanded rows of the workspace, together with
    /// `rhs(i, c)` for the first `num_components` rhs components.
    fn stage_block(
        &self,
        ws: &mut AccumulatorWorkspace<T>,
        num_components: usize,
        rhs: impl Fn(usize, usize) -> T,
        lhs: &DMatrixView<T>,
    ) -> Result<(), AssemblyError> {
        let n = ws.rows.len();
        for found in [lhs.nrows(), lhs.ncols()] {
            if found != n {
                return Err(AssemblyError::LengthMismatch { expected: n, found });
            }
        }
        for &col in &ws.rows {
            self.check_col(col)?;
        }

        for i in 0..n {
            let row = ws.rows[i];
            if !self.admit(row) {
                continue;
            }
            for j in 0..n {
                let entry = CoordinateEntry::new(row, ws.rows[j], lhs[(i, j)]);
                ws.matrix_entries.push(entry);
            }
            for c in 0..num_components {
                ws.rhs_entries[c].push(RhsEntry::new(row, rhs(i, c)));
            }
        }
        Ok(())
    }

    /// Add the dense local contribution of one entity.
    ///
    /// `ids` are node ids, each expanded into `num_dof` consecutive rows. With `k` rows in total,
    /// `rhs` has length `k` and `lhs` is `k x k`, both ordered by (node, dof). The rhs is
    /// written to the first rhs component.
    pub fn sum_into<'b>(
        &self,
        ids: &[usize],
        rhs: impl Into<DVectorView<'b, T>>,
        lhs: impl Into<DMatrixView<'b, T>>,
    ) -> Result<(), AssemblyError> {
        let rhs = rhs.into();
        let lhs = lhs.into();
        let mut ws = self.workspace();
        self.expand_rows(&mut ws, ids);
        if rhs.len() != ws.rows.len() {
            return Err(AssemblyError::LengthMismatch {
                expected: ws.rows.len(),
                found: rhs.len(),
            });
        }
        self.stage_block(&mut ws, 1, |i, _| rhs[i], &lhs)?;
        self.commit(&ws)
    }

    /// Add the contribution of one entity to a system with several rhs components.
    ///
    /// `rhs` is `k x c` with one column per rhs component, `lhs` is `k x k`.
    pub fn sum_into_segregated<'b>(
        &self,
        ids: &[usize],
        rhs: impl Into<DMatrixView<'b, T>>,
        lhs: impl Into<DMatrixView<'b, T>>,
    ) -> Result<(), AssemblyError> {
        let rhs = rhs.into();
        let lhs = lhs.into();
        let mut ws = self.workspace();
        self.expand_rows(&mut ws, ids);
        let expected = (ws.rows.len(), self.rhs.len());
        if rhs.shape() != expected {
            return Err(AssemblyError::LengthMismatch {
                expected: expected.0 * expected.1,
                found: rhs.len(),
            });
        }
        self.stage_block(&mut ws, self.rhs.len(), |i, c| rhs[(i, c)], &lhs)?;
        self.commit(&ws)
    }

    /// Add raw coordinate contributions. Rhs values are written to the first rhs component.
    pub fn sum_into_entries(
        &self,
        rows: &[usize],
        cols: &[usize],
        values: &[T],
        rhs_rows: &[usize],
        rhs_values: &[T],
    ) -> Result<(), AssemblyError> {
        for (expected, found) in [
            (rows.len(), cols.len()),
            (rows.len(), values.len()),
            (rhs_rows.len(), rhs_values.len()),
        ] {
            if expected != found {
                return Err(AssemblyError::LengthMismatch { expected, found });
            }
        }
        for &col in cols {
            self.check_col(col)?;
        }
        let mut ws = self.workspace();
        for ((&row, &col), &value) in rows.iter().zip(cols).zip(values) {
            if self.admit(row) {
                ws.matrix_entries.push(CoordinateEntry::new(row, col, value));
            }
        }
        for (&row, &value) in rhs_rows.iter().zip(rhs_values) {
            if self.admit(row) {
                ws.rhs_entries[0].push(RhsEntry::new(row, value));
            }
        }
        self.commit(&ws)
    }

    /// Constrain the given rows to fixed values.
    ///
    /// Each row receives a unit diagonal and, for every rhs component `c`, the rhs value
    /// `bc_values[i * c_total + c] - solution[i * c_total + c]`, so that a Newton update
    /// moves the solution onto the boundary value. Only valid in the Dirichlet phase.
    pub fn apply_dirichlet_bcs(&self, rows: &[usize], solution: &[T], bc_values: &[T]) -> Result<(), AssemblyError> {
        if self.classifier.phase() != SkipPhase::Dirichlet {
            return Err(AssemblyError::PhaseMismatch {
                expected: SkipPhase::Dirichlet,
                found: self.classifier.phase(),
            });
        }
        let num_components = self.rhs.len();
        let expected = rows.len() * num_components;
        for found in [solution.len(), bc_values.len()] {
            if found != expected {
                return Err(AssemblyError::LengthMismatch { expected, found });
            }
        }

        let mut ws = self.workspace();
        for (i, &row) in rows.iter().enumerate() {
            if !self.admit(row) {
                continue;
            }
            ws.matrix_entries.push(CoordinateEntry::new(row, row, T::one()));
            for c in 0..num_components {
                let k = i * num_components + c;
                ws.rhs_entries[c].push(RhsEntry::new(row, bc_values[k] - solution[k]));
            }
        }
        self.commit(&ws)
    }
}
