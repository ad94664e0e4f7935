//! Construction of the level hierarchy and the operations that span two
//! levels of it.

use crate::algs::communicator::Communicator;
use crate::algs::restriction::{RestrictionMode, restrict};
use crate::config::MgConfig;
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::krylov::BottomSolver;
use crate::mg_error::MgError;
use crate::operators::OperatorKind;
use crate::operators::rebuild::rebuild_operator;
use crate::operators::tensor::KernelTable;
use crate::smoothers::Smoother;
use crate::topology::{BoundaryKind, BoxPartition};

/// Levels finest first, plus everything fixed at build time.
#[derive(Debug)]
pub struct Hierarchy<C: Communicator> {
    pub(crate) levels: Vec<Level>,
    pub(crate) comm: C,
    pub(crate) config: MgConfig,
    pub(crate) smoother: Smoother,
    pub(crate) bottom: BottomSolver,
}

impl<C: Communicator> Hierarchy<C> {
    /// Build every level of the hierarchy for `partition` on this rank.
    ///
    /// The finest level is `partition` itself; coarser levels follow
    /// [`BoxPartition::coarsen`] until the global dimension would drop below
    /// the minimum coarse dimension (2 for periodic, 1 for Dirichlet unless
    /// configured), the domain can no longer be halved, or `max_levels` is
    /// reached. Coefficients are left zeroed; fill the finest level and call
    /// [`Hierarchy::rebuild_operators`].
    pub fn build(
        partition: BoxPartition,
        ghosts: usize,
        boundary: BoundaryKind,
        comm: C,
        config: MgConfig,
    ) -> Result<Self, MgError> {
        config.validate()?;
        if ghosts < OperatorKind::RADIUS {
            return Err(MgError::GhostWidthTooSmall {
                ghosts,
                radius: OperatorKind::RADIUS,
            });
        }
        if partition.ranks() != comm.size() {
            return Err(MgError::PartitionMismatch(format!(
                "partition is laid out for {} ranks, communicator has {}",
                partition.ranks(),
                comm.size()
            )));
        }
        let min_dim = config
            .min_coarse_dim
            .unwrap_or(if boundary.is_periodic() { 2 } else { 1 })
            .max(1);

        let mut partitions = vec![partition];
        while partitions.len() < config.max_levels {
            let Some(last) = partitions.last() else { break };
            match last.coarsen(config.agglomerate_below) {
                Some(next) if next.global_dim() >= min_dim => partitions.push(next),
                _ => break,
            }
        }
        let coarsest = partitions.last().map(BoxPartition::global_dim).unwrap_or(0);
        if coarsest > config.max_coarse_dim {
            return Err(MgError::CoarseDimTooLarge {
                dim: coarsest,
                max: config.max_coarse_dim,
            });
        }

        let rank = comm.rank();
        let n = partitions.len();
        let mut levels = partitions
            .into_iter()
            .enumerate()
            .map(|(index, p)| Level::new(index, p, ghosts, boundary, rank, VectorId::COUNT))
            .collect::<Result<Vec<_>, _>>()?;

        let bottom = BottomSolver::from_config(&config);
        if let Some(last) = levels.last_mut() {
            last.add_vectors(bottom.work_vectors());
            last.reserve_reductions(bottom.reduction_width());
        }
        if boundary.is_periodic() {
            log::debug!(
                "periodic boundaries: solves with a nonzero Helmholtz term need zero-mean right-hand sides; \
                 singular ones are shifted to zero mean"
            );
        }
        let table = KernelTable::new();
        for level in levels.iter_mut().take(n.saturating_sub(1)) {
            level.select_prolongation(&table, config.vectorize_tensor);
        }
        for l in 1..n {
            let (fine, coarse) = pair_mut(&mut levels, l - 1, l)?;
            coarse.plan_transfers(fine)?;
        }
        for level in &levels {
            log::debug!(
                "level {}: global {}^3, boxes of {}^3, {} local boxes, h = {:e}",
                level.index(),
                level.global_dim(),
                level.box_dim(),
                level.boxes().len(),
                level.h()
            );
        }

        Ok(Self {
            smoother: Smoother::from_config(&config),
            bottom,
            levels,
            comm,
            config,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, level: usize) -> Result<&Level, MgError> {
        let levels = self.levels.len();
        self.levels.get(level).ok_or(MgError::UnknownLevel { level, levels })
    }

    /// All levels, e.g. to move data between two of them directly.
    pub fn levels_mut(&mut self) -> &mut [Level] {
        &mut self.levels
    }

    /// Mutable access, e.g. to fill coefficients or a right-hand side.
    pub fn level_mut(&mut self, level: usize) -> Result<&mut Level, MgError> {
        let levels = self.levels.len();
        self.levels.get_mut(level).ok_or(MgError::UnknownLevel { level, levels })
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn config(&self) -> &MgConfig {
        &self.config
    }

    pub fn operator(&self) -> OperatorKind {
        self.config.operator
    }

    pub fn smoother(&self) -> &Smoother {
        &self.smoother
    }

    pub fn bottom_solver(&self) -> &BottomSolver {
        &self.bottom
    }

    /// Restrict `fine_id` on `fine_level` into `coarse_id` on the next level.
    pub fn restrict(
        &mut self,
        fine_level: usize,
        fine_id: VectorId,
        coarse_level: usize,
        coarse_id: VectorId,
        mode: RestrictionMode,
    ) -> Result<(), MgError> {
        if coarse_level != fine_level + 1 {
            return Err(MgError::Unsupported(format!(
                "restriction goes from level {fine_level} to {}, not {coarse_level}",
                fine_level + 1
            )));
        }
        let (fine, coarse) = pair_mut(&mut self.levels, fine_level, coarse_level)?;
        restrict(fine, fine_id, coarse, coarse_id, mode, &self.comm)
    }

    /// Rebuild the operator of one level, restricting the coefficients from
    /// level `from` (which must be the next-finer level) when given.
    pub fn rebuild_operator(&mut self, level: usize, from: Option<usize>, a: f64, b: f64) -> Result<(), MgError> {
        let kind = self.config.operator;
        match from {
            None => {
                let levels = self.levels.len();
                let l = self.levels.get_mut(level).ok_or(MgError::UnknownLevel { level, levels })?;
                rebuild_operator(l, None, &self.comm, kind, a, b)
            }
            Some(f) => {
                if f + 1 != level {
                    return Err(MgError::Unsupported(format!(
                        "level {level} takes its coefficients from level {}, not {f}",
                        level.saturating_sub(1)
                    )));
                }
                let (fine, coarse) = pair_mut(&mut self.levels, f, level)?;
                rebuild_operator(coarse, Some(fine), &self.comm, kind, a, b)
            }
        }
    }

    /// Rebuild every level from the finest level's coefficients.
    pub fn rebuild_operators(&mut self, a: f64, b: f64) -> Result<(), MgError> {
        self.rebuild_operator(0, None, a, b)?;
        for l in 1..self.levels.len() {
            self.rebuild_operator(l, Some(l - 1), a, b)?;
        }
        Ok(())
    }
}

/// The two levels `fine < coarse` borrowed together.
pub(crate) fn pair_mut(levels: &mut [Level], fine: usize, coarse: usize) -> Result<(&mut Level, &mut Level), MgError> {
    let count = levels.len();
    if coarse >= count {
        return Err(MgError::UnknownLevel { level: coarse, levels: count });
    }
    if fine >= coarse {
        return Err(MgError::Unsupported(format!(
            "level {fine} is not finer than level {coarse}"
        )));
    }
    let (head, tail) = levels.split_at_mut(coarse);
    Ok((&mut head[fine], &mut tail[0]))
}
