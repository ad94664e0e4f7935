//! Ghost filling at the physical domain boundary.
//!
//! Periodic levels need nothing here: the halo exchange already wraps. On
//! Dirichlet levels the ghosts outside the domain are extrapolated after the
//! exchange, one axis at a time (i, then j, then k) across the full
//! ghost-inclusive extent of the other two axes, so edge and corner ghosts
//! end up as tensor-product extrapolations.

use rayon::prelude::*;

use crate::data::grid_box::Layout;
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::topology::{ClosureOrder, DirichletClosure};

/// Offset of the cell at position `m` along `axis` and `(t1, t2)` across it.
#[inline]
fn line_index(layout: &Layout, axis: usize, m: isize, t1: isize, t2: isize) -> usize {
    match axis {
        0 => layout.index(m, t1, t2),
        1 => layout.index(t1, m, t2),
        _ => layout.index(t1, t2, m),
    }
}

/// Extrapolate homogeneous Dirichlet ghosts of `id` on every box touching
/// the domain boundary.
pub fn apply_boundary(level: &mut Level, id: VectorId, order: ClosureOrder) {
    if level.is_periodic() {
        return;
    }
    let n = level.global_dim();
    let v = id.get();
    level.boxes.par_iter_mut().for_each(|b| {
        let layout = b.layout();
        let low = b.low;
        let closure = DirichletClosure::new(order, n.min(layout.dim + layout.ghosts));
        let depth = layout.ghosts.min(2) as isize;
        let d = layout.dim as isize;
        let g = layout.ghosts as isize;
        let data = &mut b.vectors[v];
        let mut interior = [0.0; 4];
        for axis in 0..3 {
            let at_low = low[axis] == 0;
            let at_high = low[axis] + layout.dim == n;
            if !at_low && !at_high {
                continue;
            }
            for t2 in -g..d + g {
                for t1 in -g..d + g {
                    if at_low {
                        for m in 0..closure.points {
                            interior[m] = data[line_index(&layout, axis, m as isize, t1, t2)];
                        }
                        for dep in 1..=depth {
                            data[line_index(&layout, axis, -dep, t1, t2)] =
                                closure.ghost(dep as usize, &interior);
                        }
                    }
                    if at_high {
                        for m in 0..closure.points {
                            interior[m] = data[line_index(&layout, axis, d - 1 - m as isize, t1, t2)];
                        }
                        for dep in 1..=depth {
                            data[line_index(&layout, axis, d - 1 + dep, t1, t2)] =
                                closure.ghost(dep as usize, &interior);
                        }
                    }
                }
            }
        }
    });
}

/// Copy the face coefficients outward into ghosts beyond a Dirichlet
/// boundary, so transverse differences of beta stay one-sided there.
///
/// Along its own axis a face coefficient is valid up to index `dim` (the
/// high face of the last cell); along the other axes up to `dim - 1`.
pub fn extrapolate_betas(level: &mut Level) {
    if level.is_periodic() {
        return;
    }
    let n = level.global_dim();
    level.boxes.par_iter_mut().for_each(|b| {
        let layout = b.layout();
        let low = b.low;
        let d = layout.dim as isize;
        let g = layout.ghosts as isize;
        for beta_axis in 0..3 {
            let data = &mut b.vectors[VectorId::beta(beta_axis).get()];
            for axis in 0..3 {
                let at_low = low[axis] == 0;
                let at_high = low[axis] + layout.dim == n;
                let top = if axis == beta_axis { d } else { d - 1 };
                for t2 in -g..d + g {
                    for t1 in -g..d + g {
                        if at_low {
                            let edge = data[line_index(&layout, axis, 0, t1, t2)];
                            for m in -g..0 {
                                data[line_index(&layout, axis, m, t1, t2)] = edge;
                            }
                        }
                        if at_high {
                            let edge = data[line_index(&layout, axis, top, t1, t2)];
                            for m in top + 1..d + g {
                                data[line_index(&layout, axis, m, t1, t2)] = edge;
                            }
                        }
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{BoundaryKind, BoxPartition};

    fn level(boundary: BoundaryKind) -> Level {
        let p = BoxPartition::uniform(1, 8, 1).unwrap();
        Level::new(0, p, 2, boundary, 0, VectorId::COUNT).unwrap()
    }

    #[test]
    fn linear_closure_is_odd_reflection() {
        let mut l = level(BoundaryKind::Dirichlet);
        l.fill_cells_indexed(VectorId::U, |g| 1.0 + g[0] as f64);
        apply_boundary(&mut l, VectorId::U, ClosureOrder::Linear);
        let b = &l.boxes()[0];
        assert_eq!(b.get(VectorId::U, -1, 3, 3), -1.0);
        assert_eq!(b.get(VectorId::U, 8, 3, 3), -8.0);
        assert_eq!(b.get(VectorId::U, 3, -1, 3), -4.0);
    }

    #[test]
    fn periodic_levels_are_untouched() {
        let mut l = level(BoundaryKind::Periodic);
        l.fill_cells_indexed(VectorId::U, |_| 1.0);
        apply_boundary(&mut l, VectorId::U, ClosureOrder::Quartic);
        assert_eq!(l.boxes()[0].get(VectorId::U, -1, 0, 0), 0.0);
    }

    #[test]
    fn betas_copy_outward() {
        let mut l = level(BoundaryKind::Dirichlet);
        l.fill_faces(0, |x, y, _| 1.0 + x + 10.0 * y);
        extrapolate_betas(&mut l);
        let b = &l.boxes()[0];
        let at = |i, j, k| b.get(VectorId::BETA_I, i, j, k);
        assert_eq!(at(9, 2, 2), at(8, 2, 2));
        assert_eq!(at(-2, 2, 2), at(0, 2, 2));
        assert_eq!(at(3, -1, 2), at(3, 0, 2));
        assert_eq!(at(3, 8, 2), at(3, 7, 2));
    }
}
