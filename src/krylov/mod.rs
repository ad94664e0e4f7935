//! Bottom solvers for the coarsest level.
//!
//! All Krylov methods work in vectors appended to the coarsest level at
//! build time (see [`BottomSolver::work_vectors`]); `TEMP` and `SCRATCH`
//! stay free for the fallback smoother. Non-convergence is reported, not
//! raised: the best iterate is left in `u`.

pub mod bicgstab;
pub mod cabicgstab;
pub mod cacg;
pub mod cg;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algs::communicator::Communicator;
use crate::algs::reduction;
use crate::config::MgConfig;
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;
use crate::operators::OperatorKind;
use crate::smoothers::{Relaxation, Smoother};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BottomSolverKind {
    /// Jacobi-preconditioned conjugate gradients.
    Cg,
    /// Jacobi-preconditioned BiCGStab.
    #[default]
    BiCgStab,
    /// s-step CG with one reduction per `s` iterations.
    CaCg,
    /// s-step BiCGStab with one reduction per `s` iterations.
    CaBiCgStab,
    /// A fixed number of smoother calls.
    Relaxation,
}

impl BottomSolverKind {
    /// Work vectors needed for block size `s`.
    pub fn work_vectors(self, s: usize) -> usize {
        match self {
            BottomSolverKind::Cg => cg::WORK_VECTORS,
            BottomSolverKind::BiCgStab => bicgstab::WORK_VECTORS,
            BottomSolverKind::CaCg => cacg::work_vectors(s),
            BottomSolverKind::CaBiCgStab => cabicgstab::work_vectors(s),
            BottomSolverKind::Relaxation => 0,
        }
    }
}

/// What one bottom solve achieved.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct KrylovReport {
    pub converged: bool,
    /// Krylov iterations, or smoother calls for [`BottomSolverKind::Relaxation`].
    pub iterations: usize,
    /// Final residual over the initial one: 2-norms for the Krylov methods,
    /// the max-norm stopping measure for relaxation.
    pub relative_residual: f64,
}

/// Tolerances and limits shared by every method.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KrylovParams {
    /// Absolute bound on `||D^-1 r||_inf` for relaxation; ignored when not positive.
    pub dtol: f64,
    pub rtol: f64,
    pub max_iterations: usize,
    pub s: usize,
}

/// Stopping rule shared by the cycle controller and the relaxation
/// fallback.
///
/// With `dtol > 0` residuals are measured as `||D^-1 r||_inf`, otherwise as
/// `||r||_inf`. The rule is met once the measure drops below `dtol` or below
/// `rtol` times its initial value `r0`; non-positive tolerances are ignored.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Criteria {
    pub dtol: f64,
    pub rtol: f64,
    pub r0: f64,
}

impl Criteria {
    pub(crate) fn met(&self, norm: f64) -> bool {
        (self.dtol > 0.0 && norm < self.dtol) || (self.rtol > 0.0 && norm < self.rtol * self.r0)
    }

    /// Measure residual `r`; `TEMP` is overwritten when `dtol > 0`.
    pub(crate) fn measure<C: Communicator>(&self, level: &mut Level, comm: &C, r: VectorId) -> Result<f64, MgError> {
        if self.dtol > 0.0 {
            reduction::mul(level, VectorId::TEMP, 1.0, r, VectorId::DINV);
            reduction::norm_inf(level, comm, VectorId::TEMP)
        } else {
            reduction::norm_inf(level, comm, r)
        }
    }
}

#[derive(Clone, Debug)]
pub struct BottomSolver {
    pub kind: BottomSolverKind,
    pub params: KrylovParams,
    /// Upper bound on smoother calls made by [`BottomSolverKind::Relaxation`].
    pub relaxations: usize,
    workspace: Workspace,
}

impl BottomSolver {
    pub fn new(kind: BottomSolverKind, params: KrylovParams, relaxations: usize) -> Self {
        Self {
            workspace: Workspace::new(kind, params.s),
            kind,
            params,
            relaxations,
        }
    }

    pub fn from_config(config: &MgConfig) -> Self {
        Self::new(
            config.bottom_solver,
            KrylovParams {
                dtol: config.bottom_dtol,
                rtol: config.bottom_rtol,
                max_iterations: config.bottom_max_iterations,
                s: config.ca_krylov_s,
            },
            config.bottom_relaxations,
        )
    }

    /// Values the method reduces in one all-reduce; the coarsest level
    /// reserves this many partial sums per box.
    pub fn reduction_width(&self) -> usize {
        self.workspace.gram.pairs.len().max(2)
    }

    pub fn work_vectors(&self) -> usize {
        self.kind.work_vectors(self.params.s)
    }

    /// Solve `A u = f` on `level` from the current `u`.
    ///
    /// For a singular operator `f` is shifted to zero mean first and `u` is
    /// returned with zero mean.
    pub fn solve<C: Communicator>(
        &mut self,
        level: &mut Level,
        comm: &C,
        op: OperatorKind,
        smoother: &Smoother,
        u: VectorId,
        f: VectorId,
    ) -> Result<KrylovReport, MgError> {
        let needed = VectorId::COUNT + self.work_vectors();
        if level.num_vectors < needed {
            return Err(MgError::Unsupported(format!(
                "{:?} needs {needed} vectors on level {}, found {}",
                self.kind, level.index, level.num_vectors
            )));
        }
        level.reserve_reductions(self.reduction_width());
        let singular = op.is_singular(level, level.op.a);
        if singular {
            let m = reduction::mean(level, comm, f)?;
            if m != 0.0 {
                log::debug!("level {}: removing mean {m:e} from bottom right-hand side", level.index);
                reduction::shift(level, f, f, -m);
            }
        }
        let report = match self.kind {
            BottomSolverKind::Cg => cg::solve(level, comm, op, &self.params, u, f)?,
            BottomSolverKind::BiCgStab => bicgstab::solve(level, comm, op, &self.params, u, f)?,
            BottomSolverKind::CaCg => cacg::solve(level, comm, op, &self.params, &mut self.workspace, u, f)?,
            BottomSolverKind::CaBiCgStab => {
                cabicgstab::solve(level, comm, op, &self.params, &mut self.workspace, u, f)?
            }
            BottomSolverKind::Relaxation => self.relax(level, comm, op, smoother, u, f)?,
        };
        if singular {
            let m = reduction::mean(level, comm, u)?;
            reduction::shift(level, u, u, -m);
        }
        if !report.converged {
            log::warn!(
                "level {}: {:?} stopped after {} iterations at relative residual {:e}",
                level.index,
                self.kind,
                report.iterations,
                report.relative_residual
            );
        }
        Ok(report)
    }

    /// Up to `relaxations` smoother calls, stopping as soon as the
    /// residual meets the `dtol`/`rtol` rule. `SCRATCH` holds the residual.
    fn relax<C: Communicator>(
        &self,
        level: &mut Level,
        comm: &C,
        op: OperatorKind,
        smoother: &Smoother,
        u: VectorId,
        f: VectorId,
    ) -> Result<KrylovReport, MgError> {
        let mut crit = Criteria {
            dtol: self.params.dtol,
            rtol: self.params.rtol,
            r0: 0.0,
        };
        crate::operators::residual(level, comm, op, VectorId::SCRATCH, u, f)?;
        crit.r0 = crit.measure(level, comm, VectorId::SCRATCH)?;
        let mut report = KrylovReport {
            converged: crit.r0 == 0.0 || crit.met(crit.r0),
            iterations: 0,
            relative_residual: if crit.r0 == 0.0 { 0.0 } else { 1.0 },
        };
        while !report.converged && report.iterations < self.relaxations {
            smoother.relax(level, comm, op, u, f)?;
            report.iterations += 1;
            crate::operators::residual(level, comm, op, VectorId::SCRATCH, u, f)?;
            let norm = crit.measure(level, comm, VectorId::SCRATCH)?;
            report.relative_residual = norm / crit.r0;
            report.converged = crit.met(norm);
        }
        Ok(report)
    }
}

impl Default for BottomSolver {
    fn default() -> Self {
        BottomSolver::from_config(&MgConfig::default())
    }
}

/// Work vector `n` of a Krylov method.
pub(crate) const fn work(n: usize) -> VectorId {
    VectorId::extra(n)
}

/// 2-norm of `f - A u`, formed in `SCRATCH`.
fn residual_norm<C: Communicator>(
    level: &mut Level,
    comm: &C,
    op: OperatorKind,
    u: VectorId,
    f: VectorId,
) -> Result<f64, MgError> {
    crate::operators::residual(level, comm, op, VectorId::SCRATCH, u, f)?;
    Ok(reduction::dot(level, comm, VectorId::SCRATCH, VectorId::SCRATCH)?.sqrt())
}

/// Gram matrix of the monomial basis `work(0..n)` plus optional projections
/// onto one more vector, refreshed in place by a single reduction.
#[derive(Clone, Debug, Default)]
pub(crate) struct Gram {
    n: usize,
    g: Vec<f64>,
    pairs: Vec<(VectorId, VectorId)>,
    reduced: Vec<f64>,
    /// Start of `<w, v_j>` in `reduced`.
    projections_at: usize,
}

impl Gram {
    pub(crate) fn new(n: usize, extra: Option<VectorId>) -> Self {
        let mut pairs = Vec::with_capacity(n * (n + 1) / 2 + n);
        for i in 0..n {
            for j in i..n {
                pairs.push((work(i), work(j)));
            }
        }
        let projections_at = pairs.len();
        if let Some(w) = extra {
            pairs.extend((0..n).map(|j| (w, work(j))));
        }
        Self {
            n,
            g: vec![0.0; n * n],
            reduced: vec![0.0; pairs.len()],
            pairs,
            projections_at,
        }
    }

    pub(crate) fn compute<C: Communicator>(&mut self, level: &Level, comm: &C) -> Result<(), MgError> {
        reduction::dots_into(level, comm, &self.pairs, &mut self.reduced)?;
        let n = self.n;
        let mut at = 0;
        for i in 0..n {
            for j in i..n {
                self.g[i * n + j] = self.reduced[at];
                self.g[j * n + i] = self.reduced[at];
                at += 1;
            }
        }
        Ok(())
    }

    /// `<w, v_j>` for the extra vector, empty if none was requested.
    pub(crate) fn projections(&self) -> &[f64] {
        &self.reduced[self.projections_at..]
    }

    /// `a^T G b` for coefficient vectors in the basis.
    pub(crate) fn inner(&self, a: &[f64], b: &[f64]) -> f64 {
        let mut s = 0.0;
        for i in 0..self.n {
            if a[i] == 0.0 {
                continue;
            }
            let row = &self.g[i * self.n..(i + 1) * self.n];
            s += a[i] * row.iter().zip(b).map(|(g, b)| g * b).sum::<f64>();
        }
        s
    }
}

/// Coefficient vectors of the s-step methods, one per recurrence quantity.
#[derive(Clone, Debug, Default)]
pub(crate) struct Coefficients {
    pub p: Vec<f64>,
    pub r: Vec<f64>,
    pub x: Vec<f64>,
    pub ap: Vec<f64>,
    pub q: Vec<f64>,
    pub aq: Vec<f64>,
}

impl Coefficients {
    fn new(n: usize) -> Self {
        Self {
            p: vec![0.0; n],
            r: vec![0.0; n],
            x: vec![0.0; n],
            ap: vec![0.0; n],
            q: vec![0.0; n],
            aq: vec![0.0; n],
        }
    }

    /// Start an outer iteration: `p` and `r` are basis vectors `p0` and `r0`.
    pub(crate) fn reset(&mut self, p0: usize, r0: usize) {
        for v in [&mut self.p, &mut self.r, &mut self.x, &mut self.ap, &mut self.q, &mut self.aq] {
            v.fill(0.0);
        }
        self.p[p0] = 1.0;
        self.r[r0] = 1.0;
    }
}

/// Buffers for the s-step methods, sized once for a method and block size.
#[derive(Clone, Debug, Default)]
pub(crate) struct Workspace {
    pub gram: Gram,
    pub c: Coefficients,
}

impl Workspace {
    fn new(kind: BottomSolverKind, s: usize) -> Self {
        let s = s.max(1);
        match kind {
            BottomSolverKind::CaCg => {
                let n = cacg::work_vectors(s);
                Self {
                    gram: Gram::new(n, None),
                    c: Coefficients::new(n),
                }
            }
            BottomSolverKind::CaBiCgStab => {
                let n = cabicgstab::basis_len(s);
                Self {
                    gram: Gram::new(n, Some(work(n))),
                    c: Coefficients::new(n),
                }
            }
            _ => Self::default(),
        }
    }
}

/// Coefficient-space product with `A` for a two-block scaled monomial basis
/// `[p, Bp, .., B^{np-1} p, r, Br, .., B^{nr-1} r]` with `B = A / sigma`.
pub(crate) fn shift_coefficients(c: &[f64], np: usize, nr: usize, sigma: f64, out: &mut [f64]) {
    out.fill(0.0);
    for j in 0..np - 1 {
        out[j + 1] += sigma * c[j];
    }
    for m in 0..nr - 1 {
        out[np + m + 1] += sigma * c[np + m];
    }
}

/// `||A r|| / ||r||`, the scale that keeps monomial basis vectors of
/// comparable size. `work` is overwritten.
pub(crate) fn basis_scale<C: Communicator>(
    level: &mut Level,
    comm: &C,
    op: OperatorKind,
    r: VectorId,
    work: VectorId,
) -> Result<f64, MgError> {
    crate::operators::apply_op(level, comm, op, work, r)?;
    let d = reduction::dots(level, comm, &[(work, work), (r, r)])?;
    if d[0] > 0.0 && d[1] > 0.0 && d[0].is_finite() {
        Ok((d[0] / d[1]).sqrt())
    } else {
        Ok(1.0)
    }
}

/// `dst = A src / sigma`
pub(crate) fn scaled_apply<C: Communicator>(
    level: &mut Level,
    comm: &C,
    op: OperatorKind,
    sigma: f64,
    dst: VectorId,
    src: VectorId,
) -> Result<(), MgError> {
    crate::operators::apply_op(level, comm, op, dst, src)?;
    reduction::scale(level, dst, 1.0 / sigma, dst);
    Ok(())
}

/// Expand coefficient vectors in the basis `work(0..n)` back into grid
/// vectors: `dst = sum(c_j v_j)`, or `dst += ..` when accumulating.
///
/// Every new value of a cell is formed before any is written, so targets
/// may be members of the basis.
pub(crate) fn recover(level: &mut Level, n: usize, updates: [(VectorId, &[f64], bool); 3]) {
    level.boxes.par_iter_mut().for_each(|b| {
        let layout = b.layout();
        let mut values = [0.0; 3];
        for k in 0..layout.dim {
            for j in 0..layout.dim {
                let row = layout.row(j, k);
                for c in row..row + layout.dim {
                    for (value, &(dst, coeffs, accumulate)) in values.iter_mut().zip(&updates) {
                        let mut v = if accumulate { b.vectors[dst.get()][c] } else { 0.0 };
                        for (m, &cj) in coeffs[..n].iter().enumerate() {
                            if cj != 0.0 {
                                v += cj * b.vectors[work(m).get()][c];
                            }
                        }
                        *value = v;
                    }
                    for (value, &(dst, ..)) in values.iter().zip(&updates) {
                        b.vectors[dst.get()][c] = *value;
                    }
                }
            }
        }
    });
}

pub(crate) fn axpy(y: &mut [f64], a: f64, x: &[f64]) {
    for (y, x) in y.iter_mut().zip(x) {
        *y += a * x;
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::operators::rebuild::rebuild_operator;
    use crate::topology::{BoundaryKind, BoxPartition};

    /// A small rebuilt level with a smooth RHS and room for any bottom solver.
    pub fn bottom_level(boundary: BoundaryKind, op: OperatorKind, a: f64, extra: usize) -> Level {
        let p = BoxPartition::uniform(2, 2, 1).unwrap();
        let mut l = Level::new(0, p, 2, boundary, 0, VectorId::COUNT).unwrap();
        l.add_vectors(extra);
        l.fill_cells(VectorId::ALPHA, |_, _, _| 1.0);
        for axis in 0..3 {
            l.fill_faces(axis, |x, y, z| 1.0 + 0.5 * x * y * z);
        }
        rebuild_operator(&mut l, None, &NoComm, op, a, 1.0).unwrap();
        l.fill_cells(VectorId::F, |x, y, z| x * (1.0 - y) + z * z);
        reduction::zero(&mut l, VectorId::U);
        l
    }

    pub fn relative_residual(l: &mut Level, op: OperatorKind) -> f64 {
        let r = residual_norm(l, &NoComm, op, VectorId::U, VectorId::F).unwrap();
        let f = reduction::dot(l, &NoComm, VectorId::F, VectorId::F).unwrap().sqrt();
        r / f
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::topology::BoundaryKind;

    /// CG variants get a symmetric problem.
    fn problem(kind: BottomSolverKind) -> (BoundaryKind, OperatorKind) {
        match kind {
            BottomSolverKind::Cg | BottomSolverKind::CaCg => {
                (BoundaryKind::Periodic, OperatorKind::ConstantCoefficient)
            }
            _ => (BoundaryKind::Dirichlet, OperatorKind::VariableCoefficient),
        }
    }

    const ALL: [BottomSolverKind; 4] = [
        BottomSolverKind::Cg,
        BottomSolverKind::BiCgStab,
        BottomSolverKind::CaCg,
        BottomSolverKind::CaBiCgStab,
    ];

    fn solver(kind: BottomSolverKind) -> BottomSolver {
        solver_with(kind, 0.0, 1e-9)
    }

    fn solver_with(kind: BottomSolverKind, dtol: f64, rtol: f64) -> BottomSolver {
        let params = KrylovParams {
            dtol,
            rtol,
            max_iterations: 200,
            s: 2,
        };
        BottomSolver::new(kind, params, 10)
    }

    #[test]
    fn every_method_solves_a_helmholtz_problem() {
        for kind in ALL {
            let mut s = solver(kind);
            let (boundary, op) = problem(kind);
            let mut l = bottom_level(boundary, op, 1.0, s.work_vectors());
            let report = s.solve(&mut l, &NoComm, op, &Smoother::default(), VectorId::U, VectorId::F).unwrap();
            assert!(report.converged, "{kind:?}: {report:?}");
            assert!(relative_residual(&mut l, op) < 1e-6, "{kind:?}");
        }
    }

    #[test]
    fn singular_problem_solution_has_zero_mean() {
        for kind in ALL {
            let mut s = solver(kind);
            let (_, op) = problem(kind);
            let mut l = bottom_level(BoundaryKind::Periodic, op, 0.0, s.work_vectors());
            s.solve(&mut l, &NoComm, op, &Smoother::default(), VectorId::U, VectorId::F).unwrap();
            assert!(reduction::mean(&l, &NoComm, VectorId::F).unwrap().abs() < 1e-12);
            let m = reduction::mean(&l, &NoComm, VectorId::U).unwrap();
            assert!(m.abs() < 1e-12, "{kind:?}: {m}");
        }
    }

    #[test]
    fn relaxation_fallback_reports_progress() {
        let op = OperatorKind::VariableCoefficient;
        let mut l = bottom_level(BoundaryKind::Dirichlet, op, 1.0, 0);
        // no tolerance: every call is made
        let mut s = solver_with(BottomSolverKind::Relaxation, 0.0, 0.0);
        let report = s.solve(&mut l, &NoComm, op, &Smoother::default(), VectorId::U, VectorId::F).unwrap();
        assert_eq!(report.iterations, 10);
        assert!(!report.converged);
        assert!(report.relative_residual < 1.0);
    }

    #[test]
    fn relaxation_stops_once_the_residual_is_small_enough() {
        let op = OperatorKind::VariableCoefficient;
        let mut l = bottom_level(BoundaryKind::Dirichlet, op, 1.0, 0);
        let mut s = solver_with(BottomSolverKind::Relaxation, 0.0, 0.5);
        let report = s.solve(&mut l, &NoComm, op, &Smoother::default(), VectorId::U, VectorId::F).unwrap();
        assert!(report.converged, "{report:?}");
        assert!(report.iterations >= 1 && report.iterations < 10, "{report:?}");
        assert!(report.relative_residual < 0.5);
    }

    #[test]
    fn relaxation_skips_sweeps_below_the_absolute_bound() {
        let op = OperatorKind::VariableCoefficient;
        let mut l = bottom_level(BoundaryKind::Dirichlet, op, 1.0, 0);
        let mut s = solver_with(BottomSolverKind::Relaxation, 1e30, 0.0);
        let report = s.solve(&mut l, &NoComm, op, &Smoother::default(), VectorId::U, VectorId::F).unwrap();
        assert!(report.converged);
        assert_eq!(report.iterations, 0);
        assert!(reduction::norm_inf(&l, &NoComm, VectorId::U).unwrap() == 0.0);
    }

    #[test]
    fn gram_matrix_is_refreshed_in_place() {
        let op = OperatorKind::ConstantCoefficient;
        let mut l = bottom_level(BoundaryKind::Periodic, op, 1.0, 3);
        l.fill_cells(work(0), |_, _, _| 1.0);
        l.fill_cells(work(1), |_, _, _| 2.0);
        l.fill_cells(work(2), |_, _, _| 3.0);
        let mut gram = Gram::new(2, Some(work(2)));
        l.reserve_reductions(gram.pairs.len());
        gram.compute(&l, &NoComm).unwrap();
        // 64 cells
        assert_eq!(gram.inner(&[1.0, 0.0], &[0.0, 1.0]), 128.0);
        assert_eq!(gram.projections(), &[192.0, 384.0]);
        l.fill_cells(work(0), |_, _, _| -1.0);
        gram.compute(&l, &NoComm).unwrap();
        assert_eq!(gram.inner(&[1.0, 0.0], &[1.0, 1.0]), 64.0 - 128.0);
        assert_eq!(gram.projections(), &[-192.0, 384.0]);
    }

    #[test]
    fn missing_work_vectors_are_reported() {
        let op = OperatorKind::VariableCoefficient;
        let mut l = bottom_level(BoundaryKind::Dirichlet, op, 1.0, 0);
        let err = solver(BottomSolverKind::Cg)
            .solve(&mut l, &NoComm, op, &Smoother::default(), VectorId::U, VectorId::F)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn shift_matrix_moves_each_block_up_one_power() {
        // [p, Ap, A^2 p, r, Ar]
        let c = [1.0, 2.0, 3.0, 4.0, 5.0];
        let mut out = [9.0; 5];
        shift_coefficients(&c, 3, 2, 1.0, &mut out);
        assert_eq!(out, [0.0, 1.0, 2.0, 0.0, 4.0]);
        shift_coefficients(&c, 3, 2, 2.0, &mut out);
        assert_eq!(out, [0.0, 2.0, 4.0, 0.0, 8.0]);
    }
}
