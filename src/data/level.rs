//! One level of the multigrid hierarchy: this rank's boxes plus everything
//! precomputed for communicating and applying the operator on them.

use hashbrown::HashMap;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::algs::exchange::ExchangePlan;
use crate::algs::transfer::TransferPlan;
use crate::data::grid_box::GridBox;
use crate::data::vector_id::VectorId;
use crate::debug_invariants::DebugInvariants;
use crate::mg_error::MgError;
use crate::operators::tensor::{BatchBuffers, KernelTable, TensorBasis, TensorKernel};
use crate::topology::{BoundaryKind, BoxPartition, StencilShape};

/// Operator data attached to a level by the last rebuild.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OperatorState {
    pub a: f64,
    pub b: f64,
    /// Estimate of the largest eigenvalue of `D^-1 A`.
    pub dominant_eigenvalue: f64,
    /// Gershgorin bound on the same spectrum.
    pub eigenvalue_bound: f64,
    pub alpha_is_zero: bool,
    pub rebuilt: bool,
}

impl Default for OperatorState {
    fn default() -> Self {
        Self {
            a: 0.0,
            b: 1.0,
            dominant_eigenvalue: 0.0,
            eigenvalue_bound: 0.0,
            alpha_is_zero: true,
            rebuilt: false,
        }
    }
}

/// Values reduced together by one all-reduce unless a level reserves more.
const DEFAULT_REDUCE_WIDTH: usize = 4;

/// Kernels prolongating from the next-coarser level into this one.
#[derive(Clone, Debug)]
pub struct Prolongation {
    pub linear: TensorKernel,
    pub quartic: TensorKernel,
}

#[derive(Debug)]
pub struct Level {
    pub(crate) index: usize,
    pub(crate) partition: BoxPartition,
    pub(crate) boundary: BoundaryKind,
    pub(crate) ghosts: usize,
    pub(crate) h: f64,
    pub(crate) rank: usize,
    pub(crate) boxes: Vec<GridBox>,
    /// Global box index to position in `boxes`.
    pub(crate) slots: HashMap<usize, usize>,
    /// One plan per [`StencilShape`].
    pub(crate) plans: Vec<ExchangePlan>,
    pub(crate) num_vectors: usize,
    pub(crate) op: OperatorState,
    pub(crate) prolongation: Option<Prolongation>,
    /// Restriction into and interpolation out of this level, paired with
    /// the next-finer level.
    pub(crate) transfer: Option<TransferPlan>,
    /// Per-box partial sums, `boxes.len()` rows of at most `reduce_width`.
    pub(crate) partials: Mutex<Vec<f64>>,
    pub(crate) reduce_width: usize,
}

impl Level {
    /// Allocate this rank's boxes of `partition` and plan their exchanges.
    pub fn new(
        index: usize,
        partition: BoxPartition,
        ghosts: usize,
        boundary: BoundaryKind,
        rank: usize,
        num_vectors: usize,
    ) -> Result<Self, MgError> {
        let owned = partition.owned_by(rank);
        let boxes: Vec<GridBox> = owned
            .iter()
            .map(|&g| GridBox::new(g, &partition.boxes()[g], ghosts, num_vectors))
            .collect();
        let slots: HashMap<usize, usize> = owned.iter().enumerate().map(|(s, &g)| (g, s)).collect();
        let plans = StencilShape::ALL
            .iter()
            .map(|&shape| ExchangePlan::build(index, &partition, rank, ghosts, boundary, shape, &slots))
            .collect::<Result<Vec<_>, _>>()?;
        let h = 1.0 / partition.global_dim() as f64;
        let level = Self {
            index,
            partition,
            boundary,
            ghosts,
            h,
            rank,
            boxes,
            slots,
            plans,
            num_vectors,
            op: OperatorState::default(),
            prolongation: None,
            transfer: None,
            partials: Mutex::new(vec![0.0; owned.len() * DEFAULT_REDUCE_WIDTH]),
            reduce_width: DEFAULT_REDUCE_WIDTH,
        };
        level.debug_assert_invariants();
        Ok(level)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn partition(&self) -> &BoxPartition {
        &self.partition
    }

    pub fn global_dim(&self) -> usize {
        self.partition.global_dim()
    }

    pub fn box_dim(&self) -> usize {
        self.partition.box_dim()
    }

    /// Total number of cells across all ranks.
    pub fn global_cells(&self) -> f64 {
        (self.global_dim() as f64).powi(3)
    }

    pub fn h(&self) -> f64 {
        self.h
    }

    pub fn boundary(&self) -> BoundaryKind {
        self.boundary
    }

    pub fn is_periodic(&self) -> bool {
        self.boundary.is_periodic()
    }

    pub fn ghosts(&self) -> usize {
        self.ghosts
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn boxes(&self) -> &[GridBox] {
        &self.boxes
    }

    pub fn boxes_mut(&mut self) -> &mut [GridBox] {
        &mut self.boxes
    }

    pub fn num_vectors(&self) -> usize {
        self.num_vectors
    }

    pub fn operator_state(&self) -> &OperatorState {
        &self.op
    }

    pub fn prolongation(&self) -> Option<&Prolongation> {
        self.prolongation.as_ref()
    }

    pub fn exchange_plan(&self, shape: StencilShape) -> &ExchangePlan {
        &self.plans[shape.slot()]
    }

    /// This rank's box with global index `global`, if it owns it.
    pub fn box_by_global(&self, global: usize) -> Option<&GridBox> {
        self.slots.get(&global).map(|&s| &self.boxes[s])
    }

    pub(crate) fn slot_of(&self, global: usize) -> Option<usize> {
        self.slots.get(&global).copied()
    }

    /// Value of `id` at an in-domain global cell, if this rank owns it.
    pub fn cell_value(&self, id: VectorId, cell: [usize; 3]) -> Option<f64> {
        let b = self.box_by_global(self.partition.box_containing(cell))?;
        let c = [0, 1, 2].map(|a| (cell[a] - b.low[a]) as isize);
        Some(b.get(id, c[0], c[1], c[2]))
    }

    pub fn transfer_plan(&self) -> Option<&TransferPlan> {
        self.transfer.as_ref()
    }

    /// Plan restriction from and interpolation into `fine`, the next-finer level.
    pub fn plan_transfers(&mut self, fine: &Level) -> Result<(), MgError> {
        self.transfer = Some(TransferPlan::build(fine, self)?);
        Ok(())
    }

    /// Make room for reductions of up to `width` values at once.
    pub(crate) fn reserve_reductions(&mut self, width: usize) {
        if width > self.reduce_width {
            self.reduce_width = width;
            self.partials.get_mut().resize(self.boxes.len() * width, 0.0);
        }
    }

    /// Append `count` zeroed vectors to every box.
    pub(crate) fn add_vectors(&mut self, count: usize) {
        for b in &mut self.boxes {
            let len = b.vectors[0].len();
            b.vectors.extend((0..count).map(|_| vec![0.0; len]));
        }
        self.num_vectors += count;
    }

    /// Choose the prolongation kernels for boxes of this level.
    ///
    /// Elements are the coarse cells under one fine box.
    pub(crate) fn select_prolongation(&mut self, table: &KernelTable, vectorize: bool) {
        let elements = (self.box_dim() / 2).pow(3);
        let linear = table.select(TensorBasis::linear_prolongation(), elements, vectorize);
        let quartic = table.select(TensorBasis::quartic_prolongation(), elements, vectorize);
        log::debug!(
            "level {}: prolongation kernels linear={:?} quartic={:?}",
            self.index,
            linear,
            quartic
        );
        let buffers = BatchBuffers::for_kernel(&quartic);
        for b in &mut self.boxes {
            b.batch = buffers.clone();
        }
        self.prolongation = Some(Prolongation { linear, quartic });
    }

    /// Set interior cells of `id` from their global index.
    pub fn fill_cells_indexed<F>(&mut self, id: VectorId, f: F)
    where
        F: Fn([usize; 3]) -> f64 + Sync,
    {
        let v = id.get();
        self.boxes.par_iter_mut().for_each(|b| {
            let layout = b.layout();
            let low = b.low;
            let data = &mut b.vectors[v];
            for k in 0..layout.dim {
                for j in 0..layout.dim {
                    let row = layout.row(j, k);
                    for i in 0..layout.dim {
                        data[row + i] = f([low[0] + i, low[1] + j, low[2] + k]);
                    }
                }
            }
        });
    }

    /// Set interior cells of `id` from a function of the cell-center
    /// coordinate in the unit cube.
    pub fn fill_cells<F>(&mut self, id: VectorId, f: F)
    where
        F: Fn(f64, f64, f64) -> f64 + Sync,
    {
        let h = self.h;
        self.fill_cells_indexed(id, |g| {
            f((g[0] as f64 + 0.5) * h, (g[1] as f64 + 0.5) * h, (g[2] as f64 + 0.5) * h)
        });
    }

    /// Set the face coefficient along `axis` from a function of the
    /// face-center coordinate. Faces `0..=dim` along `axis` are written, so
    /// both faces of every interior cell are set.
    pub fn fill_faces<F>(&mut self, axis: usize, f: F)
    where
        F: Fn(f64, f64, f64) -> f64 + Sync,
    {
        let v = VectorId::beta(axis).get();
        let h = self.h;
        self.boxes.par_iter_mut().for_each(|b| {
            let layout = b.layout();
            let low = b.low;
            let data = &mut b.vectors[v];
            let mut ext = [layout.dim; 3];
            ext[axis] += 1;
            for k in 0..ext[2] {
                for j in 0..ext[1] {
                    for i in 0..ext[0] {
                        let c = [i, j, k];
                        let x = [0, 1, 2].map(|a| {
                            let g = (low[a] + c[a]) as f64;
                            if a == axis { g * h } else { (g + 0.5) * h }
                        });
                        data[layout.index(i as isize, j as isize, k as isize)] = f(x[0], x[1], x[2]);
                    }
                }
            }
        });
    }
}

impl DebugInvariants for Level {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "level");
    }

    fn validate_invariants(&self) -> Result<(), MgError> {
        if self.ghosts < 1 {
            return Err(MgError::GhostWidthTooSmall { ghosts: self.ghosts, radius: 1 });
        }
        for (slot, b) in self.boxes.iter().enumerate() {
            let spec = &self.partition.boxes()[b.global_index];
            if spec.owner != self.rank || spec.low != b.low || spec.dim != b.dim {
                return Err(MgError::PartitionMismatch(format!(
                    "level {}: box {} does not match its partition entry",
                    self.index, b.global_index
                )));
            }
            if self.slots.get(&b.global_index) != Some(&slot) {
                return Err(MgError::PartitionMismatch(format!(
                    "level {}: slot map disagrees for box {}",
                    self.index, b.global_index
                )));
            }
            if b.vectors.len() != self.num_vectors {
                return Err(MgError::PartitionMismatch(format!(
                    "level {}: box {} holds {} vectors, expected {}",
                    self.index,
                    b.global_index,
                    b.vectors.len(),
                    self.num_vectors
                )));
            }
        }
        if self.plans.len() != StencilShape::ALL.len() {
            return Err(MgError::PartitionMismatch(format!(
                "level {}: missing exchange plans",
                self.index
            )));
        }
        Ok(())
    }
}
