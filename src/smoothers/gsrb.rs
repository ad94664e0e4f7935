//! Red-black Gauss-Seidel, out of place.
//!
//! Each half sweep updates one color from the previous iterate into the
//! other work vector, so the result never depends on box or thread order.
//! Ghosts are refreshed before every half sweep.

use crate::algs::communicator::Communicator;
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;
use crate::operators::{OperatorKind, fill_ghosts, map_stencil};

use super::{Relaxation, check_vectors};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gsrb {
    /// Full (red plus black) sweeps per call.
    pub sweeps: usize,
}

impl Relaxation for Gsrb {
    fn relax<C: Communicator>(
        &self,
        level: &mut Level,
        comm: &C,
        op: OperatorKind,
        u: VectorId,
        f: VectorId,
    ) -> Result<(), MgError> {
        check_vectors(u, f)?;
        let (rhs, dinv) = (f.get(), VectorId::DINV.get());
        let (mut src, mut dst) = (u, VectorId::TEMP);
        // an even number of half sweeps leaves the result in `u`
        for half in 0..2 * self.sweeps {
            let color = half % 2;
            fill_ghosts(level, comm, op, src)?;
            let x = src.get();
            map_stencil(level, op, dst, |s, b, c, g| {
                let v = &b.vectors;
                if (g[0] + g[1] + g[2]) % 2 == color {
                    v[x][c] + v[dinv][c] * (v[rhs][c] - s.apply(&v[x], c))
                } else {
                    v[x][c]
                }
            });
            std::mem::swap(&mut src, &mut dst);
        }
        Ok(())
    }
}
