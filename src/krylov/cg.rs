//! Jacobi-preconditioned conjugate gradients.

use crate::algs::communicator::Communicator;
use crate::algs::reduction::{self, dots};
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;
use crate::operators::{OperatorKind, apply_op, residual};

use super::{KrylovParams, KrylovReport, work};

pub const WORK_VECTORS: usize = 4;

const R: VectorId = work(0);
const Z: VectorId = work(1);
const P: VectorId = work(2);
const Q: VectorId = work(3);

pub fn solve<C: Communicator>(
    level: &mut Level,
    comm: &C,
    op: OperatorKind,
    params: &KrylovParams,
    u: VectorId,
    f: VectorId,
) -> Result<KrylovReport, MgError> {
    residual(level, comm, op, R, u, f)?;
    reduction::mul(level, Z, 1.0, VectorId::DINV, R);
    reduction::copy(level, P, Z);
    let d = dots(level, comm, &[(R, R), (R, Z)])?;
    let r0 = d[0].sqrt();
    let mut rz = d[1];
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
        apply_op(level, comm, op, Q, P)?;
        let pq = reduction::dot(level, comm, P, Q)?;
        if pq == 0.0 || !pq.is_finite() {
            break;
        }
        let alpha = rz / pq;
        reduction::add(level, u, 1.0, u, alpha, P);
        reduction::add(level, R, 1.0, R, -alpha, Q);
        reduction::mul(level, Z, 1.0, VectorId::DINV, R);
        report.iterations += 1;

        let d = dots(level, comm, &[(R, R), (R, Z)])?;
        report.relative_residual = d[0].sqrt() / r0;
        if report.relative_residual < params.rtol {
            report.converged = true;
            break;
        }
        if rz == 0.0 {
            break;
        }
        let beta = d[1] / rz;
        rz = d[1];
        reduction::add(level, P, 1.0, Z, beta, P);
    }
    Ok(report)
}
