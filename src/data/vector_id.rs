//! Named grid vectors.

use serde::{Deserialize, Serialize};

/// Index of a grid vector within every box of a level.
///
/// The first [`VectorId::COUNT`] ids exist on every level; Krylov work
/// vectors are appended after them on the coarsest level only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct VectorId(pub usize);

impl VectorId {
    /// Solution (or correction on coarse levels).
    pub const U: VectorId = VectorId(0);
    /// Right-hand side as provided by the caller.
    pub const F: VectorId = VectorId(1);
    /// Right-hand side seen by the cycle: the residual on coarse levels.
    pub const F_MINUS_AV: VectorId = VectorId(2);
    pub const TEMP: VectorId = VectorId(3);
    pub const ALPHA: VectorId = VectorId(4);
    pub const BETA_I: VectorId = VectorId(5);
    pub const BETA_J: VectorId = VectorId(6);
    pub const BETA_K: VectorId = VectorId(7);
    /// Inverse of the operator diagonal.
    pub const DINV: VectorId = VectorId(8);
    pub const SCRATCH: VectorId = VectorId(9);

    /// Number of vectors allocated on every level.
    pub const COUNT: usize = 10;

    /// Face coefficient for `axis` (0 = i, 1 = j, 2 = k).
    pub const fn beta(axis: usize) -> VectorId {
        VectorId(Self::BETA_I.0 + axis)
    }

    /// The `n`-th extra work vector above the common set.
    pub const fn extra(n: usize) -> VectorId {
        VectorId(Self::COUNT + n)
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for VectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            VectorId::U => "u",
            VectorId::F => "f",
            VectorId::F_MINUS_AV => "f-Av",
            VectorId::TEMP => "temp",
            VectorId::ALPHA => "alpha",
            VectorId::BETA_I => "beta_i",
            VectorId::BETA_J => "beta_j",
            VectorId::BETA_K => "beta_k",
            VectorId::DINV => "Dinv",
            VectorId::SCRATCH => "scratch",
            VectorId(n) => return write!(f, "work{}", n - Self::COUNT),
        };
        f.write_str(name)
    }
}
