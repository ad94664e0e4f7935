//! s-step (communication-avoiding) conjugate gradients.
//!
//! Each outer iteration builds the monomial basis
//! `[p, Ap, .., A^s p, r, Ar, .., A^{s-1} r]`, reduces its Gram matrix once
//! and then runs `s` CG iterations on coefficient vectors in that basis.

use crate::algs::communicator::Communicator;
use crate::algs::reduction;
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;
use crate::operators::{OperatorKind, residual};

use super::{
    KrylovParams, KrylovReport, Workspace, axpy, basis_scale, recover, scaled_apply, shift_coefficients, work,
};

pub fn work_vectors(s: usize) -> usize {
    2 * s + 1
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
    let n = work_vectors(s);
    let (p, r) = (work(0), work(s + 1));
    let Workspace { gram, c } = ws;

    residual(level, comm, op, r, u, f)?;
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

    'outer: while report.iterations < params.max_iterations {
        for j in 0..s {
            scaled_apply(level, comm, op, sigma, work(j + 1), work(j))?;
        }
        for j in s + 1..n - 1 {
            scaled_apply(level, comm, op, sigma, work(j + 1), work(j))?;
        }
        gram.compute(level, comm)?;

        c.reset(0, s + 1);
        let mut rr = gram.inner(&c.r, &c.r);
        let mut breakdown = false;
        for _ in 0..s {
            shift_coefficients(&c.p, s + 1, s, sigma, &mut c.ap);
            let pap = gram.inner(&c.p, &c.ap);
            if pap == 0.0 || !pap.is_finite() || rr == 0.0 {
                breakdown = true;
                break;
            }
            let alpha = rr / pap;
            axpy(&mut c.x, alpha, &c.p);
            axpy(&mut c.r, -alpha, &c.ap);
            let rr_new = gram.inner(&c.r, &c.r).max(0.0);
            report.iterations += 1;
            report.relative_residual = rr_new.sqrt() / r0;
            if report.relative_residual < params.rtol {
                report.converged = true;
                break;
            }
            let beta = rr_new / rr;
            rr = rr_new;
            for (pj, rj) in c.p.iter_mut().zip(&c.r) {
                *pj = rj + beta * *pj;
            }
        }

        let updates = [(u, c.x.as_slice(), true), (r, c.r.as_slice(), false), (p, c.p.as_slice(), false)];
        recover(level, n, updates);
        if report.converged || breakdown {
            break 'outer;
        }
    }
    Ok(report)
}
