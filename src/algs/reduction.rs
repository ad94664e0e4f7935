//! Level-wide vector arithmetic and global reductions.
//!
//! Element-wise operations touch interior cells only. Reductions compute one
//! partial per box in parallel into the level's reserved scratch, add the
//! partials in box order on the calling thread, then combine ranks with a
//! single all-reduce. The max norm needs no ordering and reduces directly.

use rayon::prelude::*;

use crate::algs::communicator::Communicator;
use crate::data::grid_box::GridBox;
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;

/// `dst[c] = f(vectors, c)` over every interior cell `c`.
///
/// `f` may read any vector, including `dst` itself.
pub(crate) fn update_interior<F>(level: &mut Level, dst: VectorId, f: F)
where
    F: Fn(&[Vec<f64>], usize) -> f64 + Sync,
{
    let d = dst.get();
    level.boxes.par_iter_mut().for_each(|b| {
        let layout = b.layout();
        for k in 0..layout.dim {
            for j in 0..layout.dim {
                let row = layout.row(j, k);
                for c in row..row + layout.dim {
                    let value = f(&b.vectors, c);
                    b.vectors[d][c] = value;
                }
            }
        }
    });
}

/// Per-rank sums of `width` interior quantities, added box by box.
///
/// `f` writes one box's partials into its row of the level's reserved
/// scratch; rows are then added in box order into `out`.
fn local_sums_into<F>(level: &Level, width: usize, out: &mut [f64], f: F) -> Result<(), MgError>
where
    F: Fn(&GridBox, &mut [f64]) + Sync,
{
    if width > level.reduce_width {
        return Err(MgError::Unsupported(format!(
            "level {}: {width} simultaneous reductions, {} reserved",
            level.index, level.reduce_width
        )));
    }
    out[..width].fill(0.0);
    if width == 0 {
        return Ok(());
    }
    let mut partials = level.partials.lock();
    let rows = &mut partials[..level.boxes.len() * width];
    level
        .boxes
        .par_iter()
        .zip(rows.par_chunks_mut(width))
        .for_each(|(b, acc)| {
            acc.fill(0.0);
            f(b, acc);
        });
    for row in rows.chunks_exact(width) {
        for (t, v) in out.iter_mut().zip(row) {
            *t += v;
        }
    }
    Ok(())
}

/// Per-rank sums of `N` interior quantities, added box by box.
pub(crate) fn local_sums<const N: usize, F>(level: &Level, f: F) -> Result<[f64; N], MgError>
where
    F: Fn(&[Vec<f64>], usize) -> [f64; N] + Sync,
{
    let mut total = [0.0; N];
    local_sums_into(level, N, &mut total, |b, acc| {
        let layout = b.layout();
        for k in 0..layout.dim {
            for j in 0..layout.dim {
                let row = layout.row(j, k);
                for c in row..row + layout.dim {
                    let v = f(&b.vectors, c);
                    for n in 0..N {
                        acc[n] += v[n];
                    }
                }
            }
        }
    })?;
    Ok(total)
}

pub fn dot<C: Communicator>(level: &Level, comm: &C, a: VectorId, b: VectorId) -> Result<f64, MgError> {
    let (a, b) = (a.get(), b.get());
    let mut s = local_sums(level, |v, c| [v[a][c] * v[b][c]])?;
    comm.allreduce_sum(&mut s)?;
    Ok(s[0])
}

/// Several dot products reduced in one all-reduce.
pub fn dots<C: Communicator, const N: usize>(
    level: &Level,
    comm: &C,
    pairs: &[(VectorId, VectorId); N],
) -> Result<[f64; N], MgError> {
    let mut out = [0.0; N];
    dots_into(level, comm, pairs, &mut out)?;
    Ok(out)
}

/// [`dots`] for a pair list whose length is only known at run time;
/// `out[n]` receives the product of `pairs[n]`.
pub fn dots_into<C: Communicator>(
    level: &Level,
    comm: &C,
    pairs: &[(VectorId, VectorId)],
    out: &mut [f64],
) -> Result<(), MgError> {
    let out = &mut out[..pairs.len()];
    local_sums_into(level, pairs.len(), out, |b, acc| {
        let layout = b.layout();
        for (slot, &(x, y)) in acc.iter_mut().zip(pairs) {
            let (x, y) = (b.vector(x), b.vector(y));
            for k in 0..layout.dim {
                for j in 0..layout.dim {
                    let row = layout.row(j, k);
                    for c in row..row + layout.dim {
                        *slot += x[c] * y[c];
                    }
                }
            }
        }
    })?;
    comm.allreduce_sum(out)
}

pub fn sum<C: Communicator>(level: &Level, comm: &C, id: VectorId) -> Result<f64, MgError> {
    let v = id.get();
    let mut s = local_sums(level, |x, c| [x[v][c]])?;
    comm.allreduce_sum(&mut s)?;
    Ok(s[0])
}

/// Average over all interior cells of the level.
pub fn mean<C: Communicator>(level: &Level, comm: &C, id: VectorId) -> Result<f64, MgError> {
    Ok(sum(level, comm, id)? / level.global_cells())
}

/// Max norm over all interior cells of the level.
pub fn norm_inf<C: Communicator>(level: &Level, comm: &C, id: VectorId) -> Result<f64, MgError> {
    let v = id.get();
    let local = level
        .boxes
        .par_iter()
        .map(|b| {
            let layout = b.layout();
            let x = &b.vectors[v];
            let mut m = 0.0f64;
            for k in 0..layout.dim {
                for j in 0..layout.dim {
                    let row = layout.row(j, k);
                    for c in row..row + layout.dim {
                        m = m.max(x[c].abs());
                    }
                }
            }
            m
        })
        .reduce(|| 0.0, f64::max);
    comm.allreduce_max(local)
}

/// Zero every entry of `id`, ghosts included.
pub fn zero(level: &mut Level, id: VectorId) {
    let v = id.get();
    level.boxes.par_iter_mut().for_each(|b| b.vectors[v].fill(0.0));
}

pub fn set(level: &mut Level, id: VectorId, value: f64) {
    update_interior(level, id, |_, _| value);
}

pub fn copy(level: &mut Level, dst: VectorId, src: VectorId) {
    let s = src.get();
    update_interior(level, dst, |v, c| v[s][c]);
}

/// `dst = scale * src`
pub fn scale(level: &mut Level, dst: VectorId, scale: f64, src: VectorId) {
    let s = src.get();
    update_interior(level, dst, |v, c| scale * v[s][c]);
}

/// `dst = src + shift`
pub fn shift(level: &mut Level, dst: VectorId, src: VectorId, shift: f64) {
    let s = src.get();
    update_interior(level, dst, |v, c| v[s][c] + shift);
}

/// `dst = sa * a + sb * b`
pub fn add(level: &mut Level, dst: VectorId, sa: f64, a: VectorId, sb: f64, b: VectorId) {
    let (a, b) = (a.get(), b.get());
    update_interior(level, dst, |v, c| sa * v[a][c] + sb * v[b][c]);
}

/// `dst = scale * a * b`, element-wise.
pub fn mul(level: &mut Level, dst: VectorId, scale: f64, a: VectorId, b: VectorId) {
    let (a, b) = (a.get(), b.get());
    update_interior(level, dst, |v, c| scale * v[a][c] * v[b][c]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::topology::{BoundaryKind, BoxPartition};

    fn level() -> Level {
        let p = BoxPartition::uniform(2, 2, 1).unwrap();
        Level::new(0, p, 2, BoundaryKind::Periodic, 0, VectorId::COUNT).unwrap()
    }

    #[test]
    fn reductions_cover_all_boxes() {
        let mut l = level();
        l.fill_cells_indexed(VectorId::U, |g| (g[0] + g[1] + g[2]) as f64);
        // sum over 4^3 cells of i + j + k = 3 * 16 * (0 + 1 + 2 + 3)
        assert_eq!(sum(&l, &NoComm, VectorId::U).unwrap(), 288.0);
        assert_eq!(mean(&l, &NoComm, VectorId::U).unwrap(), 4.5);
        assert_eq!(norm_inf(&l, &NoComm, VectorId::U).unwrap(), 9.0);
        set(&mut l, VectorId::F, 2.0);
        assert_eq!(dot(&l, &NoComm, VectorId::U, VectorId::F).unwrap(), 576.0);
        let d = dots(&l, &NoComm, &[(VectorId::F, VectorId::F), (VectorId::U, VectorId::F)]).unwrap();
        assert_eq!(d, [256.0, 576.0]);
    }

    #[test]
    fn elementwise_ops_alias_safely() {
        let mut l = level();
        set(&mut l, VectorId::U, 3.0);
        scale(&mut l, VectorId::U, 2.0, VectorId::U);
        shift(&mut l, VectorId::U, VectorId::U, -1.0);
        add(&mut l, VectorId::TEMP, 1.0, VectorId::U, -2.0, VectorId::U);
        mul(&mut l, VectorId::F, 0.5, VectorId::U, VectorId::TEMP);
        assert_eq!(l.cell_value(VectorId::U, [1, 2, 3]), Some(5.0));
        assert_eq!(l.cell_value(VectorId::TEMP, [3, 3, 3]), Some(-5.0));
        assert_eq!(l.cell_value(VectorId::F, [0, 0, 0]), Some(-12.5));
        zero(&mut l, VectorId::F);
        assert_eq!(norm_inf(&l, &NoComm, VectorId::F).unwrap(), 0.0);
    }

    #[test]
    fn wide_reductions_need_a_reservation() {
        let mut l = level();
        set(&mut l, VectorId::U, 1.0);
        let pairs = [(VectorId::U, VectorId::U); 6];
        let mut out = [0.0; 6];
        assert!(dots_into(&l, &NoComm, &pairs, &mut out).unwrap_err().is_configuration());
        l.reserve_reductions(6);
        dots_into(&l, &NoComm, &pairs, &mut out).unwrap();
        assert_eq!(out, [64.0; 6]);
    }
}
