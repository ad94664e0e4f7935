//! Per-box storage: one dense ghost-padded array per grid vector.

use crate::data::vector_id::VectorId;
use crate::operators::tensor::BatchBuffers;
use crate::topology::partition::BoxSpec;

/// Index arithmetic shared by every vector of a box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub dim: usize,
    pub ghosts: usize,
    pub jstride: usize,
    pub kstride: usize,
}

impl Layout {
    #[inline(always)]
    pub fn index(&self, i: isize, j: isize, k: isize) -> usize {
        let g = self.ghosts as isize;
        ((i + g) + (j + g) * self.jstride as isize + (k + g) * self.kstride as isize) as usize
    }

    /// Offset of interior cell `(0, j, k)`.
    #[inline(always)]
    pub fn row(&self, j: usize, k: usize) -> usize {
        self.index(0, j as isize, k as isize)
    }
}

/// A cubic subdomain owned by this rank.
///
/// Every vector of the box shares one layout: cell `(i, j, k)` with each
/// coordinate in `[-ghosts, dim + ghosts)` lives at
/// `(i + g) + (j + g) * jstride + (k + g) * kstride`.
#[derive(Debug, Clone)]
pub struct GridBox {
    pub(crate) global_index: usize,
    pub(crate) low: [usize; 3],
    pub(crate) dim: usize,
    pub(crate) ghosts: usize,
    pub(crate) jstride: usize,
    pub(crate) kstride: usize,
    pub(crate) vectors: Vec<Vec<f64>>,
    pub(crate) batch: BatchBuffers,
}

impl GridBox {
    pub(crate) fn new(global_index: usize, spec: &BoxSpec, ghosts: usize, num_vectors: usize) -> Self {
        let jstride = spec.dim + 2 * ghosts;
        let kstride = jstride * jstride;
        let volume = kstride * jstride;
        Self {
            global_index,
            low: spec.low,
            dim: spec.dim,
            ghosts,
            jstride,
            kstride,
            vectors: vec![vec![0.0; volume]; num_vectors],
            batch: BatchBuffers::default(),
        }
    }

    /// Global box number in the level's partition.
    pub fn global_index(&self) -> usize {
        self.global_index
    }

    /// Global index of interior cell `(0, 0, 0)`.
    pub fn low(&self) -> [usize; 3] {
        self.low
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn ghosts(&self) -> usize {
        self.ghosts
    }

    pub fn jstride(&self) -> usize {
        self.jstride
    }

    pub fn kstride(&self) -> usize {
        self.kstride
    }

    pub fn layout(&self) -> Layout {
        Layout {
            dim: self.dim,
            ghosts: self.ghosts,
            jstride: self.jstride,
            kstride: self.kstride,
        }
    }

    /// Flat offset of a (possibly ghost) cell.
    #[inline(always)]
    pub fn index(&self, i: isize, j: isize, k: isize) -> usize {
        self.layout().index(i, j, k)
    }

    pub fn vector(&self, id: VectorId) -> &[f64] {
        &self.vectors[id.get()]
    }

    pub fn vector_mut(&mut self, id: VectorId) -> &mut [f64] {
        &mut self.vectors[id.get()]
    }

    /// Value at interior or ghost cell `(i, j, k)`.
    pub fn get(&self, id: VectorId, i: isize, j: isize, k: isize) -> f64 {
        self.vectors[id.get()][self.index(i, j, k)]
    }

    /// Run `f` with `dst` borrowed mutably and the rest of the box shared.
    ///
    /// While `f` runs, `self.vector(dst)` is empty; the kernel sees the
    /// previous contents of `dst` only through its first argument.
    pub(crate) fn with_split<R>(&mut self, dst: VectorId, f: impl FnOnce(&mut [f64], &GridBox) -> R) -> R {
        let mut out = std::mem::take(&mut self.vectors[dst.get()]);
        let r = f(&mut out, self);
        self.vectors[dst.get()] = out;
        r
    }

    /// Flat offset of the first interior cell of every row, `k` slowest.
    pub(crate) fn rows(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        let d = self.dim;
        (0..d).flat_map(move |k| {
            (0..d).map(move |j| (self.index(0, j as isize, k as isize), j, k))
        })
    }

    /// Global coordinate of interior cell `(i, j, k)`.
    #[inline]
    pub(crate) fn global_cell(&self, i: usize, j: usize, k: usize) -> [usize; 3] {
        [self.low[0] + i, self.low[1] + j, self.low[2] + k]
    }

    /// Visit every interior cell with its flat offset.
    pub(crate) fn for_each_interior(&self, mut f: impl FnMut(usize, [usize; 3])) {
        for (row, j, k) in self.rows() {
            for i in 0..self.dim {
                f(row + i, [i, j, k]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_strides() {
        let spec = BoxSpec { low: [4, 0, 8], dim: 4, owner: 0 };
        let b = GridBox::new(3, &spec, 2, 2);
        assert_eq!(b.jstride(), 8);
        assert_eq!(b.kstride(), 64);
        assert_eq!(b.vector(VectorId::U).len(), 512);
        assert_eq!(b.index(-2, -2, -2), 0);
        assert_eq!(b.index(0, 0, 0), 2 + 16 + 128);
        assert_eq!(b.index(1, 0, 0) - b.index(0, 0, 0), 1);
        assert_eq!(b.global_cell(1, 2, 3), [5, 2, 11]);
    }

    #[test]
    fn split_sees_old_destination() {
        let spec = BoxSpec { low: [0, 0, 0], dim: 2, owner: 0 };
        let mut b = GridBox::new(0, &spec, 2, 2);
        b.vector_mut(VectorId::F).fill(1.0);
        b.vector_mut(VectorId::U).fill(2.0);
        b.with_split(VectorId::U, |u, rest| {
            assert!(rest.vector(VectorId::U).is_empty());
            for (x, f) in u.iter_mut().zip(rest.vector(VectorId::F)) {
                *x += f;
            }
        });
        assert!(b.vector(VectorId::U).iter().all(|&x| x == 3.0));
    }

    #[test]
    fn interior_visit_count() {
        let spec = BoxSpec { low: [0, 0, 0], dim: 3, owner: 0 };
        let b = GridBox::new(0, &spec, 2, 1);
        let mut n = 0;
        b.for_each_interior(|_, _| n += 1);
        assert_eq!(n, 27);
    }
}
