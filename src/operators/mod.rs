//! Discrete operators and their application.
//!
//! - [`stencil`]: pointwise variable- and constant-coefficient operators.
//! - [`rebuild`]: coefficient restriction, `D^-1` and eigenvalue estimation.
//! - [`tensor`]: batched tensor-product contractions and their dispatch table.

pub mod rebuild;
pub mod stencil;
pub mod tensor;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algs::boundary::apply_boundary;
use crate::algs::communicator::Communicator;
use crate::algs::exchange::exchange;
use crate::data::grid_box::GridBox;
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;
use crate::topology::{ClosureOrder, StencilShape};

use self::stencil::{Stencil, with_stencil};

/// The operator discretization, fixed when the hierarchy is built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorKind {
    /// `a alpha u - b div(beta grad u)`, 4th-order flux form.
    #[default]
    VariableCoefficient,
    /// `a u - b lap(u)`, 13-point 4th-order Laplacian.
    ConstantCoefficient,
}

impl OperatorKind {
    /// Ghost width every operator here needs.
    pub const RADIUS: usize = 2;

    /// Ghost region read by one application.
    pub fn shape(self) -> StencilShape {
        match self {
            OperatorKind::VariableCoefficient => StencilShape::NoCorners,
            OperatorKind::ConstantCoefficient => StencilShape::Faces,
        }
    }

    /// Whether the operator has a constant null space for `a`: periodic
    /// boundaries and no zeroth-order term.
    pub fn is_singular(self, level: &Level, a: f64) -> bool {
        level.is_periodic() && (a == 0.0 || (self == OperatorKind::VariableCoefficient && level.op.alpha_is_zero))
    }

    /// Whether a right-hand side must already have zero mean: periodic
    /// boundaries with a nonsingular Helmholtz term, which no shift can fix.
    pub fn requires_zero_mean(self, level: &Level, a: f64) -> bool {
        level.is_periodic() && !self.is_singular(level, a)
    }
}

/// Exchange and close the ghosts of `x` so the operator can read them.
pub fn fill_ghosts<C: Communicator>(
    level: &mut Level,
    comm: &C,
    kind: OperatorKind,
    x: VectorId,
) -> Result<(), MgError> {
    exchange(level, comm, x, kind.shape())?;
    apply_boundary(level, x, ClosureOrder::Quartic);
    Ok(())
}

/// `dst = A x` on interior cells. `dst` must differ from `x` and from the
/// coefficient vectors.
pub fn apply_op<C: Communicator>(
    level: &mut Level,
    comm: &C,
    kind: OperatorKind,
    dst: VectorId,
    x: VectorId,
) -> Result<(), MgError> {
    fill_ghosts(level, comm, kind, x)?;
    map_stencil(level, kind, dst, |s, rest, c, _| s.apply(rest.vector(x), c));
    Ok(())
}

/// `res = rhs - A x` on interior cells.
pub fn residual<C: Communicator>(
    level: &mut Level,
    comm: &C,
    kind: OperatorKind,
    res: VectorId,
    x: VectorId,
    rhs: VectorId,
) -> Result<(), MgError> {
    fill_ghosts(level, comm, kind, x)?;
    map_stencil(level, kind, res, |s, rest, c, _| rest.vector(rhs)[c] - s.apply(rest.vector(x), c));
    Ok(())
}

/// `dst[c] = f(stencil, box, c, global_cell)` over interior cells, with the
/// stencil bound once per box.
pub(crate) fn map_stencil<F>(level: &mut Level, kind: OperatorKind, dst: VectorId, f: F)
where
    F: Fn(&dyn Stencil, &GridBox, usize, [usize; 3]) -> f64 + Sync,
{
    let op = level.op;
    let h = level.h;
    level.boxes.par_iter_mut().for_each(|b| {
        let layout = b.layout();
        let low = b.low;
        b.with_split(dst, |out, rest| {
            with_stencil!(kind, rest, &op, h, |s| {
                for k in 0..layout.dim {
                    for j in 0..layout.dim {
                        let row = layout.row(j, k);
                        for i in 0..layout.dim {
                            out[row + i] = f(s, rest, row + i, [low[0] + i, low[1] + j, low[2] + k]);
                        }
                    }
                }
            })
        });
    });
}
