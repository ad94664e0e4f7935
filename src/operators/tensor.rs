//! Tensor-product contractions over batches of elements.
//!
//! A 3-D tensor-product basis applies one 1-D matrix (Q x P) along each
//! axis, `B_i x B_j x B_k`; isotropic bases use the same matrix for all three.
//! Element data is laid out as `[dof][k][j][i][element]`, element
//! fastest, so that one contraction step is a small matrix product whose
//! inner dimension runs over a contiguous batch of elements.
//!
//! Two implementations exist:
//! - [`contract_scalar`]: any batch size, any shape.
//! - `contract_batched::<NE, DOF, P, Q>`: fixed shapes, accumulating in
//!   `[f64; LANES]` registers. Summation order equals the scalar path.
//!
//! [`KernelTable`] maps `(batch, dof, P, Q)` to the batched function when one
//! was instantiated and is consulted once per level at hierarchy build.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

/// Width of the lane accumulators in the batched path.
pub const LANES: usize = 8;
const_assert_eq!(16 % LANES, 0);
const_assert_eq!(8 % LANES, 0);

/// Direction of a contraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorMode {
    /// `y += (B_k x B_j x B_i) x`, P points in, Q points out per axis.
    Eval,
    /// `y += (B_k^T x B_j^T x B_i^T) x`, Q points in, P points out per axis.
    Transpose,
}

/// One 1-D basis matrix per axis, all of the same shape.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorBasis {
    p: usize,
    q: usize,
    dof: usize,
    /// Row-major Q x P, indexed by axis `i, j, k`.
    interp: [Vec<f64>; 3],
    /// Row-major P x Q.
    interp_t: [Vec<f64>; 3],
}

impl TensorBasis {
    /// The same matrix on every axis; `interp` is row-major with `q` rows
    /// and `p` columns.
    pub fn new(p: usize, q: usize, dof: usize, interp: Vec<f64>) -> Self {
        Self::per_axis(p, q, dof, [interp.clone(), interp.clone(), interp])
    }

    /// A separate `q x p` matrix along each of the `i, j, k` axes.
    pub fn per_axis(p: usize, q: usize, dof: usize, interp: [Vec<f64>; 3]) -> Self {
        for m in &interp {
            assert_eq!(m.len(), p * q, "basis matrix must be {q} x {p}");
        }
        let interp_t = [0, 1, 2].map(|axis| {
            let m = &interp[axis];
            let mut t = vec![0.0; p * q];
            for r in 0..q {
                for c in 0..p {
                    t[c * q + r] = m[r * p + c];
                }
            }
            t
        });
        Self { p, q, dof, interp, interp_t }
    }

    /// Linear cell-average prolongation: 3 coarse cells to 2 children.
    pub fn linear_prolongation() -> Self {
        Self::new(3, 2, 1, vec![0.25, 0.75, 0.0, 0.0, 0.75, 0.25])
    }

    /// Fourth-order cell-average prolongation: 5 coarse cells to 2 children.
    pub fn quartic_prolongation() -> Self {
        let c2 = -3.0 / 128.0;
        let c1 = 22.0 / 128.0;
        Self::new(5, 2, 1, vec![c2, c1, 1.0, -c1, -c2, -c2, -c1, 1.0, c1, c2])
    }

    pub fn p(&self) -> usize {
        self.p
    }

    pub fn q(&self) -> usize {
        self.q
    }

    pub fn dof(&self) -> usize {
        self.dof
    }

    /// Input and output lengths per element for `mode`.
    pub fn sizes(&self, mode: TensorMode) -> (usize, usize) {
        let (pin, pout) = match mode {
            TensorMode::Eval => (self.p, self.q),
            TensorMode::Transpose => (self.q, self.p),
        };
        (self.dof * pin.pow(3), self.dof * pout.pow(3))
    }

    /// Row-major `q x p` matrix of `axis`.
    pub fn axis_matrix(&self, axis: usize) -> &[f64] {
        &self.interp[axis]
    }

    pub fn is_isotropic(&self) -> bool {
        self.interp[0] == self.interp[1] && self.interp[1] == self.interp[2]
    }

    fn matrix(&self, mode: TensorMode, axis: usize) -> (&[f64], usize, usize) {
        match mode {
            TensorMode::Eval => (&self.interp[axis], self.p, self.q),
            TensorMode::Transpose => (&self.interp_t[axis], self.q, self.p),
        }
    }
}

/// Work buffers for the intermediate stages of one contraction.
#[derive(Clone, Debug, Default)]
pub struct TensorScratch {
    stage1: Vec<f64>,
    stage2: Vec<f64>,
    stage3: Vec<f64>,
}

impl TensorScratch {
    /// Buffers large enough for `basis` over batches of `ne` elements.
    pub fn for_basis(basis: &TensorBasis, ne: usize) -> Self {
        let m = basis.p.max(basis.q);
        let per_stage = basis.dof * m.pow(3) * ne;
        Self {
            stage1: vec![0.0; per_stage],
            stage2: vec![0.0; per_stage],
            stage3: vec![0.0; per_stage],
        }
    }

    fn stages(&mut self, len: usize) -> (&mut [f64], &mut [f64], &mut [f64]) {
        for buf in [&mut self.stage1, &mut self.stage2, &mut self.stage3] {
            if buf.len() < len {
                buf.resize(len, 0.0);
            }
        }
        (&mut self.stage1[..len], &mut self.stage2[..len], &mut self.stage3[..len])
    }
}

/// Gather and scatter buffers for one batch plus contraction scratch.
#[derive(Clone, Debug, Default)]
pub struct BatchBuffers {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub scratch: TensorScratch,
}

impl BatchBuffers {
    pub fn for_kernel(kernel: &TensorKernel) -> Self {
        let (len_in, len_out) = kernel.basis.sizes(TensorMode::Eval);
        let n = len_in.max(len_out) * kernel.ne;
        Self {
            x: vec![0.0; n],
            y: vec![0.0; n],
            scratch: kernel.scratch(),
        }
    }
}

/// Signature shared by every contraction implementation.
pub type ContractFn = fn(usize, &TensorBasis, TensorMode, &[f64], &mut [f64], &mut TensorScratch);

/// One 1-D contraction: `out[a][r][c] = sum_s m[r][s] * inp[a][s][c]`.
#[inline]
fn axis_scalar(pre: usize, n_in: usize, n_out: usize, stride: usize, m: &[f64], inp: &[f64], out: &mut [f64]) {
    for a in 0..pre {
        let src = &inp[a * n_in * stride..(a + 1) * n_in * stride];
        let dst = &mut out[a * n_out * stride..(a + 1) * n_out * stride];
        for r in 0..n_out {
            let row = &m[r * n_in..(r + 1) * n_in];
            for c in 0..stride {
                let mut acc = 0.0;
                for (s, w) in row.iter().enumerate() {
                    acc += w * src[s * stride + c];
                }
                dst[r * stride + c] = acc;
            }
        }
    }
}

#[inline(always)]
fn axis_lanes(pre: usize, n_in: usize, n_out: usize, stride: usize, m: &[f64], inp: &[f64], out: &mut [f64]) {
    debug_assert_eq!(stride % LANES, 0);
    for a in 0..pre {
        let src = &inp[a * n_in * stride..(a + 1) * n_in * stride];
        let dst = &mut out[a * n_out * stride..(a + 1) * n_out * stride];
        for r in 0..n_out {
            let row = &m[r * n_in..(r + 1) * n_in];
            for c0 in (0..stride).step_by(LANES) {
                let mut acc = [0.0f64; LANES];
                for (s, &w) in row.iter().enumerate() {
                    let lane = &src[s * stride + c0..s * stride + c0 + LANES];
                    for l in 0..LANES {
                        acc[l] += w * lane[l];
                    }
                }
                dst[r * stride + c0..r * stride + c0 + LANES].copy_from_slice(&acc);
            }
        }
    }
}

#[inline(always)]
fn contract_with<F>(
    axis: F,
    ne: usize,
    basis: &TensorBasis,
    mode: TensorMode,
    x: &[f64],
    y: &mut [f64],
    scratch: &mut TensorScratch,
) where
    F: Fn(usize, usize, usize, usize, &[f64], &[f64], &mut [f64]),
{
    let (mi, a, b) = basis.matrix(mode, 0);
    let (mj, _, _) = basis.matrix(mode, 1);
    let (mk, _, _) = basis.matrix(mode, 2);
    let dof = basis.dof;
    let (len_in, len_out) = basis.sizes(mode);
    debug_assert!(x.len() >= len_in * ne);
    debug_assert!(y.len() >= len_out * ne);
    let (t1, t2, t3) = scratch.stages(dof * a.max(b).pow(3) * ne);
    // [dof][a][a][a] -> [dof][a][a][b] -> [dof][a][b][b] -> [dof][b][b][b]
    axis(dof * a * a, a, b, ne, mi, x, t1);
    axis(dof * a, a, b, b * ne, mj, t1, t2);
    axis(dof, a, b, b * b * ne, mk, t2, t3);
    for (y, t) in y[..len_out * ne].iter_mut().zip(t3.iter()) {
        *y += t;
    }
}

/// Reference contraction for any batch size; accumulates into `y`.
pub fn contract_scalar(
    ne: usize,
    basis: &TensorBasis,
    mode: TensorMode,
    x: &[f64],
    y: &mut [f64],
    scratch: &mut TensorScratch,
) {
    contract_with(axis_scalar, ne, basis, mode, x, y, scratch);
}

/// Lane-batched contraction for a fixed shape; accumulates into `y`.
pub fn contract_batched<const NE: usize, const DOF: usize, const P: usize, const Q: usize>(
    ne: usize,
    basis: &TensorBasis,
    mode: TensorMode,
    x: &[f64],
    y: &mut [f64],
    scratch: &mut TensorScratch,
) {
    debug_assert_eq!(ne, NE);
    debug_assert_eq!((basis.dof, basis.p, basis.q), (DOF, P, Q));
    contract_with(axis_lanes, NE, basis, mode, x, y, scratch);
}

/// Dispatch table from `(batch, dof, P, Q)` to a batched contraction.
#[derive(Clone)]
pub struct KernelTable {
    entries: HashMap<(usize, usize, usize, usize), ContractFn>,
}

macro_rules! register {
    ($map:ident; $( ($ne:literal, $dof:literal, $p:literal, $q:literal) ),* $(,)?) => {
        $( $map.insert(($ne, $dof, $p, $q), contract_batched::<$ne, $dof, $p, $q> as ContractFn); )*
    };
}

impl KernelTable {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        register!(entries;
            (8, 1, 2, 2), (8, 3, 2, 2), (16, 1, 2, 2), (16, 3, 2, 2),
            (8, 1, 3, 3), (8, 3, 3, 3), (16, 1, 3, 3), (16, 3, 3, 3),
            (8, 1, 3, 2), (16, 1, 3, 2),
            (8, 1, 5, 2), (16, 1, 5, 2),
        );
        Self { entries }
    }

    pub fn lookup(&self, ne: usize, dof: usize, p: usize, q: usize) -> Option<ContractFn> {
        self.entries.get(&(ne, dof, p, q)).copied()
    }

    /// Every instantiated `(batch, dof, P, Q)`, sorted.
    pub fn shapes(&self) -> Vec<(usize, usize, usize, usize)> {
        let mut keys: Vec<_> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick the contraction for `elements` elements of `basis`.
    ///
    /// The batched path is used when the element count divides into
    /// batches of 16 or 8 and that shape was instantiated.
    pub fn select(&self, basis: TensorBasis, elements: usize, vectorize: bool) -> TensorKernel {
        let batched = [16, 8].into_iter().find_map(|ne| {
            (vectorize && elements > 0 && elements % ne == 0)
                .then(|| self.lookup(ne, basis.dof, basis.p, basis.q).map(|f| (ne, f)))
                .flatten()
        });
        let (ne, func, vectorized) = match batched {
            Some((ne, f)) => (ne, f, true),
            None => (elements.max(1), contract_scalar as ContractFn, false),
        };
        TensorKernel { basis, ne, func, vectorized }
    }
}

impl Default for KernelTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A basis bound to its selected contraction and batch size.
#[derive(Clone)]
pub struct TensorKernel {
    basis: TensorBasis,
    ne: usize,
    func: ContractFn,
    vectorized: bool,
}

impl TensorKernel {
    pub fn basis(&self) -> &TensorBasis {
        &self.basis
    }

    /// Elements per call.
    pub fn batch(&self) -> usize {
        self.ne
    }

    pub fn is_vectorized(&self) -> bool {
        self.vectorized
    }

    /// Scratch sized for one batch of this kernel.
    pub fn scratch(&self) -> TensorScratch {
        TensorScratch::for_basis(&self.basis, self.ne)
    }

    /// Contract one batch: `y += op(x)`.
    #[inline]
    pub fn apply(&self, mode: TensorMode, x: &[f64], y: &mut [f64], scratch: &mut TensorScratch) {
        (self.func)(self.ne, &self.basis, mode, x, y, scratch);
    }
}

impl std::fmt::Debug for TensorKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorKernel")
            .field("p", &self.basis.p)
            .field("q", &self.basis.q)
            .field("dof", &self.basis.dof)
            .field("batch", &self.ne)
            .field("vectorized", &self.vectorized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prolongation_rows_sum_to_one() {
        for b in [TensorBasis::linear_prolongation(), TensorBasis::quartic_prolongation()] {
            for r in 0..b.q() {
                let s: f64 = b.axis_matrix(0)[r * b.p()..(r + 1) * b.p()].iter().sum();
                assert!((s - 1.0).abs() < 1e-15);
            }
        }
    }

    fn anisotropic() -> TensorBasis {
        TensorBasis::per_axis(
            2,
            3,
            1,
            [
                vec![1.0, 0.0, 0.5, 0.5, 0.0, 1.0],
                vec![2.0, -1.0, 0.0, 3.0, 1.0, 1.0],
                vec![0.25, 0.75, -0.5, 2.0, 1.5, 0.0],
            ],
        )
    }

    #[test]
    fn each_axis_uses_its_own_matrix() {
        let b = anisotropic();
        assert!(!b.is_isotropic());
        assert!(TensorBasis::linear_prolongation().is_isotropic());
        let (p, q) = (b.p(), b.q());
        let ne = 3;
        let x: Vec<f64> = (0..p * p * p * ne).map(|n| (n as f64 * 0.61).sin()).collect();
        let mut y = vec![0.0; q * q * q * ne];
        contract_scalar(ne, &b, TensorMode::Eval, &x, &mut y, &mut TensorScratch::default());

        let [mi, mj, mk] = [0, 1, 2].map(|a| b.axis_matrix(a));
        for (kk, jj, ii, e) in itertools::iproduct!(0..q, 0..q, 0..q, 0..ne) {
            let mut want = 0.0;
            for (k, j, i) in itertools::iproduct!(0..p, 0..p, 0..p) {
                let w = mk[kk * p + k] * mj[jj * p + j] * mi[ii * p + i];
                want += w * x[((k * p + j) * p + i) * ne + e];
            }
            let got = y[((kk * q + jj) * q + ii) * ne + e];
            assert!((got - want).abs() < 1e-12, "({ii}, {jj}, {kk}) element {e}: {got} vs {want}");
        }
    }

    #[test]
    fn anisotropic_transpose_is_adjoint() {
        let b = anisotropic();
        let ne = 2;
        let x: Vec<f64> = (0..8 * ne).map(|n| (n as f64 * 0.29).cos()).collect();
        let w: Vec<f64> = (0..27 * ne).map(|n| (n as f64 * 0.53).sin()).collect();
        let mut bx = vec![0.0; 27 * ne];
        let mut btw = vec![0.0; 8 * ne];
        let mut s = TensorScratch::for_basis(&b, ne);
        contract_scalar(ne, &b, TensorMode::Eval, &x, &mut bx, &mut s);
        contract_scalar(ne, &b, TensorMode::Transpose, &w, &mut btw, &mut s);
        let lhs: f64 = bx.iter().zip(&w).map(|(a, b)| a * b).sum();
        let rhs: f64 = x.iter().zip(&btw).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-12 * lhs.abs().max(1.0));
    }

    #[test]
    fn constant_field_prolongates_to_constant() {
        let table = KernelTable::new();
        let k = table.select(TensorBasis::quartic_prolongation(), 8, true);
        assert!(k.is_vectorized());
        let x = vec![2.5; 125 * 8];
        let mut y = vec![0.0; 8 * 8];
        let mut s = k.scratch();
        k.apply(TensorMode::Eval, &x, &mut y, &mut s);
        assert!(y.iter().all(|v| (v - 2.5).abs() < 1e-13));
    }

    #[test]
    fn odd_element_counts_use_the_scalar_path() {
        let table = KernelTable::new();
        let k = table.select(TensorBasis::linear_prolongation(), 27, true);
        assert!(!k.is_vectorized());
        assert_eq!(k.batch(), 27);
        let k = table.select(TensorBasis::linear_prolongation(), 64, false);
        assert!(!k.is_vectorized());
    }

    #[test]
    fn transpose_is_adjoint_of_eval() {
        let b = TensorBasis::new(3, 2, 1, vec![0.1, 0.7, 0.2, 0.3, -0.4, 1.1]);
        let ne = 2;
        let x: Vec<f64> = (0..27 * ne).map(|n| (n as f64 * 0.37).sin()).collect();
        let w: Vec<f64> = (0..8 * ne).map(|n| (n as f64 * 0.91).cos()).collect();
        let mut bx = vec![0.0; 8 * ne];
        let mut btw = vec![0.0; 27 * ne];
        let mut s = TensorScratch::default();
        contract_scalar(ne, &b, TensorMode::Eval, &x, &mut bx, &mut s);
        contract_scalar(ne, &b, TensorMode::Transpose, &w, &mut btw, &mut s);
        let lhs: f64 = bx.iter().zip(&w).map(|(a, b)| a * b).sum();
        let rhs: f64 = x.iter().zip(&btw).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-12 * lhs.abs().max(1.0));
    }
}
