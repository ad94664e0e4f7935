//! Right Jacobi-preconditioned BiCGStab.

use crate::algs::communicator::Communicator;
use crate::algs::reduction::{self, dots};
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;
use crate::operators::{OperatorKind, apply_op, residual};

use super::{KrylovParams, KrylovReport, work};

pub const WORK_VECTORS: usize = 7;

const R: VectorId = work(0);
/// Shadow residual.
const RT: VectorId = work(1);
const P: VectorId = work(2);
const PH: VectorId = work(3);
const V: VectorId = work(4);
const SH: VectorId = work(5);
const T: VectorId = work(6);

pub fn solve<C: Communicator>(
    level: &mut Level,
    comm: &C,
    op: OperatorKind,
    params: &KrylovParams,
    u: VectorId,
    f: VectorId,
) -> Result<KrylovReport, MgError> {
    residual(level, comm, op, R, u, f)?;
    reduction::copy(level, RT, R);
    reduction::copy(level, P, R);
    let rr = reduction::dot(level, comm, R, R)?;
    let r0 = rr.sqrt();
    let mut rho = rr;
    let mut report = KrylovReport {
        converged: r0 == 0.0,
        iterations: 0,
        relative_residual: 0.0,
    };
    if report.converged {
        return Ok(report);
    }
    report.relative_residual = 1.0;

    while report.iterations < params.max_iterations {
        reduction::mul(level, PH, 1.0, VectorId::DINV, P);
        apply_op(level, comm, op, V, PH)?;
        let rtv = reduction::dot(level, comm, RT, V)?;
        if rtv == 0.0 || !rtv.is_finite() {
            break;
        }
        let alpha = rho / rtv;
        // r becomes s = r - alpha v
        reduction::add(level, R, 1.0, R, -alpha, V);
        reduction::add(level, u, 1.0, u, alpha, PH);
        report.iterations += 1;
        let ss = reduction::dot(level, comm, R, R)?;
        report.relative_residual = ss.sqrt() / r0;
        if report.relative_residual < params.rtol {
            report.converged = true;
            break;
        }

        reduction::mul(level, SH, 1.0, VectorId::DINV, R);
        apply_op(level, comm, op, T, SH)?;
        let d = dots(level, comm, &[(T, T), (T, R)])?;
        if d[0] == 0.0 || !d[0].is_finite() {
            break;
        }
        let omega = d[1] / d[0];
        reduction::add(level, u, 1.0, u, omega, SH);
        reduction::add(level, R, 1.0, R, -omega, T);

        let d = dots(level, comm, &[(R, R), (RT, R)])?;
        report.relative_residual = d[0].sqrt() / r0;
        if report.relative_residual < params.rtol {
            report.converged = true;
            break;
        }
        if omega == 0.0 || rho == 0.0 {
            break;
        }
        let beta = (d[1] / rho) * (alpha / omega);
        rho = d[1];
        reduction::add(level, P, 1.0, P, -omega, V);
        reduction::add(level, P, 1.0, R, beta, P);
    }
    Ok(report)
}
