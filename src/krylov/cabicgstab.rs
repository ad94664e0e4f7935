//! s-step (communication-avoiding) BiCGStab.
//!
//! The basis is `[p, .., A^{2s} p, r, .., A^{2s-1} r]`; its Gram matrix and
//! its projections onto the shadow residual share one reduction per outer
//! iteration.

use crate::algs::communicator::Communicator;
use crate::algs::reduction;
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;
use crate::operators::{OperatorKind, residual};

use super::{
    KrylovParams, KrylovReport, Workspace, axpy, basis_scale, dot, recover, scaled_apply, shift_coefficients,
    work,
};

pub(crate) fn basis_len(s: usize) -> usize {
    4 * s + 1
}

/// Basis plus the shadow residual.
pub fn work_vectors(s: usize) -> usize {
    basis_len(s) + 1
}

pub fn solve<C: Communicator>(
    level: &mut Level,
    comm: &C,
    op: OperatorKind,
    params: &KrylovParams,
    ws: &mut Workspace,
    u: VectorId,
    f: VectorId,
) -> Result<KrylovReport, MgError> {
    let s = params.s.max(1);
    let (np, nr) = (2 * s + 1, 2 * s);
    let n = basis_len(s);
    let rt = work(n);
    let (p, r) = (work(0), work(np));
    let Workspace { gram, c } = ws;

    residual(level, comm, op, r, u, f)?;
    reduction::copy(level, rt, r);
    reduction::copy(level, p, r);
    let r0 = reduction::dot(level, comm, r, r)?.sqrt();
    let mut report = KrylovReport {
        converged: r0 == 0.0,
        iterations: 0,
        relative_residual: 0.0,
    };
    if report.converged {
        return Ok(report);
    }
    report.relative_residual = 1.0;
    let sigma = basis_scale(level, comm, op, r, work(1))?;

    while report.iterations < params.max_iterations {
        for j in 0..np - 1 {
            scaled_apply(level, comm, op, sigma, work(j + 1), work(j))?;
        }
        for j in np..n - 1 {
            scaled_apply(level, comm, op, sigma, work(j + 1), work(j))?;
        }
        gram.compute(level, comm)?;
        let g = gram.projections();

        c.reset(0, np);
        let mut rho = dot(g, &c.r);
        let mut breakdown = false;
        for _ in 0..s {
            shift_coefficients(&c.p, np, nr, sigma, &mut c.ap);
            let g_apc = dot(g, &c.ap);
            if rho == 0.0 || g_apc == 0.0 || !g_apc.is_finite() {
                breakdown = true;
                break;
            }
            let alpha = rho / g_apc;
            c.q.copy_from_slice(&c.r);
            axpy(&mut c.q, -alpha, &c.ap);
            shift_coefficients(&c.q, np, nr, sigma, &mut c.aq);
            let aqaq = gram.inner(&c.aq, &c.aq);
            axpy(&mut c.x, alpha, &c.p);
            if aqaq <= 0.0 || !aqaq.is_finite() {
                c.r.copy_from_slice(&c.q);
                breakdown = true;
                break;
            }
            let omega = gram.inner(&c.q, &c.aq) / aqaq;
            axpy(&mut c.x, omega, &c.q);
            c.r.copy_from_slice(&c.q);
            axpy(&mut c.r, -omega, &c.aq);
            report.iterations += 1;
            report.relative_residual = gram.inner(&c.r, &c.r).max(0.0).sqrt() / r0;
            if report.relative_residual < params.rtol {
                report.converged = true;
                break;
            }
            if omega == 0.0 {
                breakdown = true;
                break;
            }
            let rho_new = dot(g, &c.r);
            let beta = (rho_new / rho) * (alpha / omega);
            rho = rho_new;
            axpy(&mut c.p, -omega, &c.ap);
            for (pj, rj) in c.p.iter_mut().zip(&c.r) {
                *pj = rj + beta * *pj;
            }
        }

        let updates = [(u, c.x.as_slice(), true), (r, c.r.as_slice(), false), (p, c.p.as_slice(), false)];
        recover(level, n, updates);
        if report.converged || breakdown {
            break;
        }
    }
    Ok(report)
}
