//! Chebyshev polynomial smoothing targeting the upper part of the spectrum
//! of `D^-1 A`.
//!
//! The three-term recurrence rotates through `u`, `TEMP` and `SCRATCH`.

use crate::algs::communicator::Communicator;
use crate::algs::reduction;
use crate::data::level::{Level, OperatorState};
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;
use crate::operators::{OperatorKind, fill_ghosts, map_stencil};

use super::{Relaxation, check_vectors};

/// Margin applied to the power-method estimate of the largest eigenvalue.
pub const EIGENVALUE_MARGIN: f64 = 1.1;
/// Lower end of the targeted interval as a fraction of the upper end.
pub const LOWER_FRACTION: f64 = 0.125;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chebyshev {
    pub degree: usize,
    /// Polynomial applications per call.
    pub sweeps: usize,
}

/// Upper end of the smoothing interval: the margined estimate, never past
/// the Gershgorin bound.
pub fn upper_eigenvalue(op: &OperatorState) -> f64 {
    let beta = EIGENVALUE_MARGIN * op.dominant_eigenvalue;
    if op.eigenvalue_bound > 0.0 { beta.min(op.eigenvalue_bound) } else { beta }
}

/// Recurrence coefficients `(c1, c2)` of
/// `x_{n+1} = x_n + c1 (x_n - x_{n-1}) + c2 D^-1 (f - A x_n)`.
pub fn coefficients(degree: usize, beta: f64) -> Vec<(f64, f64)> {
    let alpha = LOWER_FRACTION * beta;
    let theta = 0.5 * (beta + alpha);
    let delta = 0.5 * (beta - alpha);
    let sigma = theta / delta;
    let mut rho = 1.0 / sigma;
    let mut out = Vec::with_capacity(degree);
    out.push((0.0, 1.0 / theta));
    for _ in 1..degree {
        let prev = rho;
        rho = 1.0 / (2.0 * sigma - prev);
        out.push((rho * prev, 2.0 * rho / delta));
    }
    out
}

impl Relaxation for Chebyshev {
    fn relax<C: Communicator>(
        &self,
        level: &mut Level,
        comm: &C,
        op: OperatorKind,
        u: VectorId,
        f: VectorId,
    ) -> Result<(), MgError> {
        check_vectors(u, f)?;
        let beta = upper_eigenvalue(&level.op);
        if beta.is_nan() || beta <= 0.0 || self.degree == 0 {
            return Err(MgError::Unsupported(format!(
                "Chebyshev smoothing of degree {} needs a positive eigenvalue estimate on level {} (got {beta})",
                self.degree, level.index
            )));
        }
        let coeffs = coefficients(self.degree, beta);
        let ring = [u, VectorId::TEMP, VectorId::SCRATCH];
        let (rhs, dinv) = (f.get(), VectorId::DINV.get());
        for _ in 0..self.sweeps {
            for (n, &(c1, c2)) in coeffs.iter().enumerate() {
                let cur = ring[n % 3];
                // the first step ignores the previous iterate
                let prev = if n == 0 { cur } else { ring[(n + 2) % 3] };
                let next = ring[(n + 1) % 3];
                fill_ghosts(level, comm, op, cur)?;
                let (x, xp) = (cur.get(), prev.get());
                map_stencil(level, op, next, |s, b, c, _| {
                    let v = &b.vectors;
                    v[x][c] + c1 * (v[x][c] - v[xp][c]) + c2 * v[dinv][c] * (v[rhs][c] - s.apply(&v[x], c))
                });
            }
            let last = ring[coeffs.len() % 3];
            if last != u {
                reduction::copy(level, u, last);
            }
        }
        Ok(())
    }
}
