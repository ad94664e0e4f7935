//! V-cycles, F-cycles and the solve loops around them.
//!
//! A solve works on a private copy of the right-hand side in `F_MINUS_AV`.
//! Below the level being solved, every level uses `U` for its correction and
//! `F_MINUS_AV` for its restricted residual, so the caller's `u` and `f` may
//! be any vectors of the solve level that the solver does not use itself.

use std::time::Instant;

use serde::Serialize;

use crate::algs::communicator::Communicator;
use crate::algs::interpolation::{InterpolationOrder, interpolate};
use crate::algs::reduction;
use crate::algs::restriction::{RestrictionMode, restrict};
use crate::data::vector_id::VectorId;
use crate::krylov::Criteria;
use crate::mg::hierarchy::{Hierarchy, pair_mut};
use crate::mg::telemetry::{Telemetry, timed};
use crate::mg_error::MgError;
use crate::operators::residual;
use crate::smoothers::Relaxation;

/// Right-hand side of every level during a solve.
const RHS: VectorId = VectorId::F_MINUS_AV;

/// A right-hand-side mean below this fraction of its max norm counts as zero.
const MEAN_TOLERANCE: f64 = 1e-12;

/// What a solve achieved.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SolveOutcome {
    pub converged: bool,
    /// Full cycles run; an F-cycle counts as one.
    pub cycles: usize,
    /// Residual norm of the zero initial guess.
    pub initial_residual: f64,
    pub final_residual: f64,
}

impl<C: Communicator> Hierarchy<C> {
    /// Solve `a alpha u - b div(beta grad u) = f` on `level` from a zero guess
    /// with repeated V-cycles.
    ///
    /// Operators are rebuilt first if `a` or `b` changed. Non-convergence is
    /// reported in the outcome, not as an error.
    #[allow(clippy::too_many_arguments)]
    pub fn solve(
        &mut self,
        level: usize,
        u: VectorId,
        f: VectorId,
        a: f64,
        b: f64,
        dtol: f64,
        rtol: f64,
        telemetry: &mut Telemetry,
    ) -> Result<SolveOutcome, MgError> {
        self.run(level, u, f, a, b, dtol, rtol, false, telemetry)
    }

    /// As [`Hierarchy::solve`], but starts with one F-cycle: the problem is
    /// solved on the coarser levels first and each solution is interpolated
    /// with the high-order prolongation as the next level's initial guess.
    #[allow(clippy::too_many_arguments)]
    pub fn fmg_solve(
        &mut self,
        level: usize,
        u: VectorId,
        f: VectorId,
        a: f64,
        b: f64,
        dtol: f64,
        rtol: f64,
        telemetry: &mut Telemetry,
    ) -> Result<SolveOutcome, MgError> {
        self.run(level, u, f, a, b, dtol, rtol, true, telemetry)
    }

    #[allow(clippy::too_many_arguments)]
    fn run(
        &mut self,
        level: usize,
        u: VectorId,
        f: VectorId,
        a: f64,
        b: f64,
        dtol: f64,
        rtol: f64,
        fmg: bool,
        telemetry: &mut Telemetry,
    ) -> Result<SolveOutcome, MgError> {
        let start = Instant::now();
        let singular = self.prepare(level, u, f, a, b)?;
        let mut crit = Criteria { dtol, rtol, r0: 0.0 };
        {
            let l = &mut self.levels[level];
            reduction::zero(l, u);
            crit.r0 = crit.measure(l, &self.comm, RHS)?;
        }
        let mut outcome = SolveOutcome {
            converged: crit.r0 == 0.0,
            cycles: 0,
            initial_residual: crit.r0,
            final_residual: crit.r0,
        };

        if !outcome.converged && fmg {
            self.fcycle(level, u, telemetry)?;
            outcome.cycles += 1;
            outcome.converged = self.check(level, u, singular, &crit, &mut outcome)?;
        }
        while !outcome.converged && outcome.cycles < self.config.max_vcycles {
            if singular {
                self.remove_mean(level, u)?;
            }
            self.vcycle(level, u, RHS, telemetry)?;
            outcome.cycles += 1;
            outcome.converged = self.check(level, u, singular, &crit, &mut outcome)?;
        }

        if !outcome.converged {
            log::warn!(
                "level {level}: not converged after {} cycles, residual {:e} -> {:e}",
                outcome.cycles,
                outcome.initial_residual,
                outcome.final_residual
            );
        }
        telemetry.solves += 1;
        telemetry.solve_time += start.elapsed();
        telemetry.last_outcome = Some(outcome);
        Ok(outcome)
    }

    /// Validate the vectors, rebuild stale operators and set up the private
    /// right-hand side. Returns whether the operator is singular.
    fn prepare(&mut self, level: usize, u: VectorId, f: VectorId, a: f64, b: f64) -> Result<bool, MgError> {
        let levels = self.levels.len();
        let l = self.levels.get(level).ok_or(MgError::UnknownLevel { level, levels })?;
        let internal = [
            VectorId::F_MINUS_AV,
            VectorId::TEMP,
            VectorId::SCRATCH,
            VectorId::ALPHA,
            VectorId::BETA_I,
            VectorId::BETA_J,
            VectorId::BETA_K,
            VectorId::DINV,
        ];
        if internal.contains(&u) || u == f || u.get() >= l.num_vectors() || f.get() >= l.num_vectors() {
            return Err(MgError::Unsupported(format!(
                "cannot solve for {u} with right-hand side {f} on level {level}"
            )));
        }
        if level + 1 < levels && VectorId::COUNT + self.bottom.work_vectors() > self.levels[levels - 1].num_vectors() {
            return Err(MgError::Unsupported(format!(
                "coarsest level lacks the work vectors of {:?}",
                self.bottom.kind
            )));
        }

        for n in level..levels {
            let op = self.levels[n].operator_state();
            if !op.rebuilt || op.a != a || op.b != b {
                self.rebuild_operator(n, (n > 0).then(|| n - 1), a, b)?;
            }
        }

        let kind = self.config.operator;
        let l = &mut self.levels[level];
        reduction::copy(l, RHS, f);
        let singular = kind.is_singular(l, a);
        if l.is_periodic() {
            let mean = reduction::mean(l, &self.comm, RHS)?;
            let scale = reduction::norm_inf(l, &self.comm, RHS)?;
            let significant = mean.abs() > MEAN_TOLERANCE * scale;
            if kind.requires_zero_mean(l, a) && significant {
                return Err(MgError::Unsupported(format!(
                    "periodic Helmholtz problem on level {level} has a right-hand side with mean {mean:e}"
                )));
            }
            if singular && mean != 0.0 {
                if significant {
                    log::warn!("level {level}: shifting right-hand side by {:e} to remove its mean", -mean);
                }
                reduction::shift(l, RHS, RHS, -mean);
            }
        }
        Ok(singular)
    }

    /// Residual after a cycle: updates `outcome` and reports convergence.
    fn check(
        &mut self,
        level: usize,
        u: VectorId,
        singular: bool,
        crit: &Criteria,
        outcome: &mut SolveOutcome,
    ) -> Result<bool, MgError> {
        if singular {
            self.remove_mean(level, u)?;
        }
        let kind = self.config.operator;
        let l = &mut self.levels[level];
        residual(l, &self.comm, kind, VectorId::TEMP, u, RHS)?;
        let norm = crit.measure(l, &self.comm, VectorId::TEMP)?;
        outcome.final_residual = norm;
        let relative = if crit.r0 > 0.0 { norm / crit.r0 } else { 0.0 };
        log::info!(
            "level {level} cycle {:>2}: residual {norm:.15e} relative {relative:.6e}",
            outcome.cycles
        );
        Ok(crit.met(norm))
    }

    fn remove_mean(&mut self, level: usize, u: VectorId) -> Result<(), MgError> {
        let l = &mut self.levels[level];
        let mean = reduction::mean(l, &self.comm, u)?;
        reduction::shift(l, u, u, -mean);
        Ok(())
    }

    /// One V-cycle on `level` for `A u = f`, improving `u` in place.
    pub(crate) fn vcycle(&mut self, level: usize, u: VectorId, f: VectorId, t: &mut Telemetry) -> Result<(), MgError> {
        t.level_mut(level).vcycles += 1;
        if level + 1 == self.levels.len() {
            return self.bottom_solve(level, u, f, t);
        }
        self.smooth(level, u, f, t)?;
        self.residual_timed(level, VectorId::TEMP, u, f, t)?;
        self.restrict_timed(level, VectorId::TEMP, RHS, t)?;
        reduction::zero(&mut self.levels[level + 1], VectorId::U);
        self.vcycle(level + 1, VectorId::U, RHS, t)?;
        self.interpolate_timed(level, u, 1.0, InterpolationOrder::Linear, t)?;
        self.smooth(level, u, f, t)
    }

    /// One F-cycle on `level` for `A u = F_MINUS_AV`, overwriting `u`.
    pub(crate) fn fcycle(&mut self, level: usize, u: VectorId, t: &mut Telemetry) -> Result<(), MgError> {
        t.level_mut(level).fcycles += 1;
        if level + 1 == self.levels.len() {
            reduction::zero(&mut self.levels[level], u);
            return self.bottom_solve(level, u, RHS, t);
        }
        self.restrict_timed(level, RHS, RHS, t)?;
        reduction::zero(&mut self.levels[level + 1], VectorId::U);
        self.fcycle(level + 1, VectorId::U, t)?;
        self.interpolate_timed(level, u, 0.0, InterpolationOrder::Quartic, t)?;
        self.vcycle(level, u, RHS, t)
    }

    fn smooth(&mut self, level: usize, u: VectorId, f: VectorId, t: &mut Telemetry) -> Result<(), MgError> {
        let kind = self.config.operator;
        let Self {
            ref mut levels,
            ref comm,
            ref smoother,
            ..
        } = *self;
        let c = t.level_mut(level);
        c.smooths += 1;
        timed(&mut c.smooth_time, || smoother.relax(&mut levels[level], comm, kind, u, f))
    }

    fn residual_timed(
        &mut self,
        level: usize,
        dst: VectorId,
        u: VectorId,
        f: VectorId,
        t: &mut Telemetry,
    ) -> Result<(), MgError> {
        let kind = self.config.operator;
        let c = t.level_mut(level);
        c.residuals += 1;
        let Self {
            ref mut levels, ref comm, ..
        } = *self;
        timed(&mut c.residual_time, || residual(&mut levels[level], comm, kind, dst, u, f))
    }

    /// Cell-restrict `src` on `level` into `dst` on the next level.
    fn restrict_timed(&mut self, level: usize, src: VectorId, dst: VectorId, t: &mut Telemetry) -> Result<(), MgError> {
        let c = t.level_mut(level);
        c.restrictions += 1;
        let Self {
            ref mut levels, ref comm, ..
        } = *self;
        let (fine, coarse) = pair_mut(levels, level, level + 1)?;
        timed(&mut c.restriction_time, || {
            restrict(fine, src, coarse, dst, RestrictionMode::Cell, comm)
        })
    }

    /// `u = prescale * u + I(U)` from the next level into `level`.
    fn interpolate_timed(
        &mut self,
        level: usize,
        u: VectorId,
        prescale: f64,
        order: InterpolationOrder,
        t: &mut Telemetry,
    ) -> Result<(), MgError> {
        let c = t.level_mut(level);
        c.interpolations += 1;
        let Self {
            ref mut levels, ref comm, ..
        } = *self;
        let (fine, coarse) = pair_mut(levels, level, level + 1)?;
        timed(&mut c.interpolation_time, || {
            interpolate(coarse, VectorId::U, fine, u, prescale, order, comm)
        })
    }

    fn bottom_solve(&mut self, level: usize, u: VectorId, f: VectorId, t: &mut Telemetry) -> Result<(), MgError> {
        let kind = self.config.operator;
        let Self {
            ref mut levels,
            ref comm,
            ref smoother,
            ref mut bottom,
            ..
        } = *self;
        let c = t.level_mut(level);
        c.bottom_solves += 1;
        let report = timed(&mut c.bottom_time, || {
            bottom.solve(&mut levels[level], comm, kind, smoother, u, f)
        })?;
        c.krylov_iterations += report.iterations;
        if !report.converged {
            c.bottom_failures += 1;
        }
        Ok(())
    }
}
