//! Weighted Jacobi.

use crate::algs::communicator::Communicator;
use crate::algs::reduction;
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;
use crate::operators::{OperatorKind, fill_ghosts, map_stencil};

use super::{Relaxation, check_vectors};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Jacobi {
    pub sweeps: usize,
    /// Damping factor, `2/3` by default.
    pub weight: f64,
}

impl Relaxation for Jacobi {
    fn relax<C: Communicator>(
        &self,
        level: &mut Level,
        comm: &C,
        op: OperatorKind,
        u: VectorId,
        f: VectorId,
    ) -> Result<(), MgError> {
        check_vectors(u, f)?;
        let (rhs, dinv, w) = (f.get(), VectorId::DINV.get(), self.weight);
        let (mut src, mut dst) = (u, VectorId::TEMP);
        for _ in 0..self.sweeps {
            fill_ghosts(level, comm, op, src)?;
            let x = src.get();
            map_stencil(level, op, dst, |s, b, c, _| {
                let v = &b.vectors;
                v[x][c] + w * v[dinv][c] * (v[rhs][c] - s.apply(&v[x], c))
            });
            std::mem::swap(&mut src, &mut dst);
        }
        if src != u {
            reduction::copy(level, u, src);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::smoothers::test_support::*;
    use crate::topology::BoundaryKind;

    #[test]
    fn odd_sweep_count_lands_in_u() {
        let op = OperatorKind::VariableCoefficient;
        let mut l = rough_level(BoundaryKind::Dirichlet, op);
        let before = residual_norm(&mut l, op);
        let j = Jacobi { sweeps: 3, weight: 2.0 / 3.0 };
        j.relax(&mut l, &NoComm, op, VectorId::U, VectorId::F).unwrap();
        assert!(residual_norm(&mut l, op) < before);
    }
}
