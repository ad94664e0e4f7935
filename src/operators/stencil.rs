//! Pointwise evaluation of the fourth-order finite-volume operators.
//!
//! Both operators approximate `a alpha u - b div(beta grad u)` on cell
//! averages with radius-2 stencils. A [`Stencil`] is bound to one box (its
//! coefficient arrays and strides) and then evaluated at flat offsets, so the
//! operator choice is resolved once per box rather than once per cell.

use crate::data::grid_box::GridBox;
use crate::data::level::OperatorState;
use crate::data::vector_id::VectorId;

/// Operator evaluation bound to one box.
pub trait Stencil: Sync {
    /// `(A x)` at flat offset `c`; ghosts of `x` must be current.
    fn apply(&self, x: &[f64], c: usize) -> f64;
}

/// Face flux along the axis with stride `s`, at the low face of cell `c`,
/// including the transverse coefficient-gradient correction.
#[inline(always)]
fn flux(beta: &[f64], x: &[f64], c: usize, s: usize, t1: usize, t2: usize) -> f64 {
    beta[c] * (15.0 * (x[c] - x[c - s]) - (x[c + s] - x[c - 2 * s]))
        + 0.25
            * ((beta[c + t1] - beta[c - t1]) * (x[c + t1] - x[c - s + t1] - x[c - t1] + x[c - s - t1])
                + (beta[c + t2] - beta[c - t2]) * (x[c + t2] - x[c - s + t2] - x[c - t2] + x[c - s - t2]))
}

/// `a alpha x - b div(beta grad x)` with face coefficients, no-corners footprint.
pub struct VariableCoefficient<'a> {
    alpha: &'a [f64],
    beta: [&'a [f64]; 3],
    strides: [usize; 3],
    a: f64,
    b_h2inv_12: f64,
}

impl<'a> VariableCoefficient<'a> {
    pub fn bind(b: &'a GridBox, op: &OperatorState, h: f64) -> Self {
        Self {
            alpha: b.vector(VectorId::ALPHA),
            beta: [
                b.vector(VectorId::BETA_I),
                b.vector(VectorId::BETA_J),
                b.vector(VectorId::BETA_K),
            ],
            strides: [1, b.jstride(), b.kstride()],
            a: op.a,
            b_h2inv_12: op.b / (12.0 * h * h),
        }
    }
}

impl Stencil for VariableCoefficient<'_> {
    #[inline(always)]
    fn apply(&self, x: &[f64], c: usize) -> f64 {
        let [si, sj, sk] = self.strides;
        let [bi, bj, bk] = self.beta;
        let div = flux(bi, x, c + si, si, sj, sk) - flux(bi, x, c, si, sj, sk)
            + flux(bj, x, c + sj, sj, si, sk)
            - flux(bj, x, c, sj, si, sk)
            + flux(bk, x, c + sk, sk, si, sj)
            - flux(bk, x, c, sk, si, sj);
        self.a * self.alpha[c] * x[c] - self.b_h2inv_12 * div
    }
}

/// `a x - b lap(x)` with the 13-point fourth-order Laplacian, star footprint.
pub struct ConstantCoefficient {
    strides: [usize; 3],
    a: f64,
    b_h2inv_12: f64,
}

impl ConstantCoefficient {
    pub fn bind(b: &GridBox, op: &OperatorState, h: f64) -> Self {
        Self {
            strides: [1, b.jstride(), b.kstride()],
            a: op.a,
            b_h2inv_12: op.b / (12.0 * h * h),
        }
    }
}

impl Stencil for ConstantCoefficient {
    #[inline(always)]
    fn apply(&self, x: &[f64], c: usize) -> f64 {
        let mut lap = -90.0 * x[c];
        for s in self.strides {
            lap += 16.0 * (x[c + s] + x[c - s]) - (x[c + 2 * s] + x[c - 2 * s]);
        }
        self.a * x[c] - self.b_h2inv_12 * lap
    }
}

/// Bind the stencil of `$kind` to `$box` and evaluate `$body` with it.
///
/// The match happens once per box, never per cell.
macro_rules! with_stencil {
    ($kind:expr, $box:expr, $op:expr, $h:expr, |$s:ident| $body:expr) => {
        match $kind {
            $crate::operators::OperatorKind::VariableCoefficient => {
                let $s = &$crate::operators::stencil::VariableCoefficient::bind($box, $op, $h);
                $body
            }
            $crate::operators::OperatorKind::ConstantCoefficient => {
                let $s = &$crate::operators::stencil::ConstantCoefficient::bind($box, $op, $h);
                $body
            }
        }
    };
}

pub(crate) use with_stencil;
