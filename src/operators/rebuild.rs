//! Black-box construction of the data every smoother needs.
//!
//! Coarse coefficients come from restricting the next-finer level. The
//! diagonal is recovered by applying the operator to colored indicator
//! vectors, so the same code serves every [`OperatorKind`] and every
//! boundary closure. The largest eigenvalue of `D^-1 A` is then estimated
//! by power iteration and bounded from above by Gershgorin.

use itertools::iproduct;
use rayon::prelude::*;

use crate::algs::boundary::extrapolate_betas;
use crate::algs::communicator::Communicator;
use crate::algs::exchange::exchange;
use crate::algs::reduction::{self, dots};
use crate::algs::restriction::{RestrictionMode, restrict};
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;
use crate::operators::{OperatorKind, fill_ghosts, map_stencil};
use crate::topology::StencilShape;

/// Iterations of the power method on `D^-1 A`.
pub const POWER_ITERATIONS: usize = 30;

/// Probe colors per axis.
///
/// Any two cells at distance one or two along an axis must differ in color,
/// also across a periodic wrap, so the color count must divide the periodic
/// dimension.
pub fn colors_per_axis(level: &Level) -> usize {
    let n = level.global_dim();
    if !level.is_periodic() {
        return 4;
    }
    [4, 3, 5].into_iter().find(|c| n % c == 0).unwrap_or(n)
}

/// Uniform value in `[-1, 1)` from a global cell index.
fn hashed(g: [usize; 3], n: usize) -> f64 {
    let mut z = (g[0] + n * (g[1] + n * g[2])) as u64;
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^= z >> 31;
    2.0 * ((z >> 11) as f64 / (1u64 << 53) as f64) - 1.0
}

/// Rebuild the operator of `level` for `a alpha u - b div(beta grad u)`.
///
/// With `from` set, alpha and the betas are first restricted from that
/// (finer) level. Overwrites `TEMP`, `SCRATCH` and `F_MINUS_AV`.
pub fn rebuild_operator<C: Communicator>(
    level: &mut Level,
    from: Option<&Level>,
    comm: &C,
    kind: OperatorKind,
    a: f64,
    b: f64,
) -> Result<(), MgError> {
    if let Some(fine) = from {
        restrict(fine, VectorId::ALPHA, level, VectorId::ALPHA, RestrictionMode::Cell, comm)?;
        for axis in 0..3 {
            let beta = VectorId::beta(axis);
            restrict(fine, beta, level, beta, RestrictionMode::face(axis), comm)?;
        }
    }
    for axis in 0..3 {
        exchange(level, comm, VectorId::beta(axis), StencilShape::Box)?;
    }
    extrapolate_betas(level);

    level.op.a = a;
    level.op.b = b;
    let bound = probe_diagonal(level, comm, kind)?;
    level.op.eigenvalue_bound = bound;
    level.op.alpha_is_zero = match kind {
        OperatorKind::VariableCoefficient => {
            reduction::dot(level, comm, VectorId::ALPHA, VectorId::ALPHA)? == 0.0
        }
        OperatorKind::ConstantCoefficient => false,
    };
    level.op.dominant_eigenvalue = power_method(level, comm, kind)?;
    level.op.rebuilt = true;
    log::debug!(
        "level {}: rebuilt {:?} (a={a}, b={b}) lambda_max(D^-1 A)~{:.6} <= {:.6}, alpha_is_zero={}",
        level.index,
        kind,
        level.op.dominant_eigenvalue,
        bound,
        level.op.alpha_is_zero
    );
    Ok(())
}

/// Fill `DINV` from colored probes and return the Gershgorin bound on the
/// spectrum of `D^-1 A`.
fn probe_diagonal<C: Communicator>(level: &mut Level, comm: &C, kind: OperatorKind) -> Result<f64, MgError> {
    let colors = colors_per_axis(level);
    let (dinv, acc, temp, scratch) = (
        VectorId::DINV.get(),
        VectorId::F_MINUS_AV.get(),
        VectorId::TEMP.get(),
        VectorId::SCRATCH.get(),
    );
    reduction::zero(level, VectorId::DINV);
    reduction::zero(level, VectorId::F_MINUS_AV);

    for (ck, cj, ci) in iproduct!(0..colors, 0..colors, 0..colors) {
        let color = [ci, cj, ck];
        let on = move |g: [usize; 3]| (0..3).all(|a| g[a] % colors == color[a]);
        level.fill_cells_indexed(VectorId::TEMP, move |g| if on(g) { 1.0 } else { 0.0 });
        fill_ghosts(level, comm, kind, VectorId::TEMP)?;
        map_stencil(level, kind, VectorId::SCRATCH, |s, b, c, _| s.apply(&b.vectors[temp], c));
        level.boxes.par_iter_mut().for_each(|b| {
            let low = b.low;
            let layout = b.layout();
            for k in 0..layout.dim {
                for j in 0..layout.dim {
                    let row = layout.row(j, k);
                    for i in 0..layout.dim {
                        let c = row + i;
                        let v = b.vectors[scratch][c];
                        b.vectors[acc][c] += v.abs();
                        if on([low[0] + i, low[1] + j, low[2] + k]) {
                            b.vectors[dinv][c] = v;
                        }
                    }
                }
            }
        });
    }

    // invert, remembering the first degenerate diagonal of each box
    let per_box: Vec<(f64, Option<([i64; 3], f64)>)> = level
        .boxes
        .par_iter_mut()
        .map(|b| {
            let low = b.low;
            let layout = b.layout();
            let mut bound = 0.0f64;
            let mut bad = None;
            for k in 0..layout.dim {
                for j in 0..layout.dim {
                    let row = layout.row(j, k);
                    for i in 0..layout.dim {
                        let c = row + i;
                        let d = b.vectors[dinv][c];
                        if d == 0.0 || !d.is_finite() {
                            bad.get_or_insert(([low[0] + i, low[1] + j, low[2] + k].map(|x| x as i64), d));
                            continue;
                        }
                        bound = bound.max(b.vectors[acc][c] / d.abs());
                        b.vectors[dinv][c] = 1.0 / d;
                    }
                }
            }
            b.vectors[acc].fill(0.0);
            (bound, bad)
        })
        .collect();

    let local_bound = per_box.iter().fold(0.0f64, |m, (b, _)| m.max(*b));
    let local_bad = per_box.into_iter().find_map(|(_, bad)| bad);
    // every rank must leave together
    let flagged = comm.allreduce_max(if local_bad.is_some() { 1.0 } else { 0.0 })?;
    if flagged > 0.0 {
        let (cell, value) = local_bad.unwrap_or(([-1; 3], f64::NAN));
        return Err(MgError::ZeroDiagonal {
            level: level.index,
            cell,
            value,
        });
    }
    comm.allreduce_max(local_bound)
}

/// Norm-ratio power iteration on `D^-1 A` from a hashed start vector.
fn power_method<C: Communicator>(level: &mut Level, comm: &C, kind: OperatorKind) -> Result<f64, MgError> {
    let n = level.global_dim();
    let (dinv, temp) = (VectorId::DINV.get(), VectorId::TEMP.get());
    level.fill_cells_indexed(VectorId::TEMP, move |g| hashed(g, n));
    let mut lambda = 0.0;
    for _ in 0..POWER_ITERATIONS {
        fill_ghosts(level, comm, kind, VectorId::TEMP)?;
        map_stencil(level, kind, VectorId::SCRATCH, |s, b, c, _| {
            b.vectors[dinv][c] * s.apply(&b.vectors[temp], c)
        });
        let d = dots(
            level,
            comm,
            &[(VectorId::SCRATCH, VectorId::SCRATCH), (VectorId::TEMP, VectorId::TEMP)],
        )?;
        if d[0] == 0.0 || d[1] == 0.0 {
            break;
        }
        lambda = (d[0] / d[1]).sqrt();
        reduction::scale(level, VectorId::TEMP, 1.0 / d[0].sqrt(), VectorId::SCRATCH);
    }
    Ok(lambda)
}
