//! Domain boundary conditions and the Dirichlet ghost closures.
//!
//! Ghost values outside a homogeneous Dirichlet face are polynomial
//! extrapolations of the interior cell averages, chosen so that the
//! reconstructed solution vanishes on the face. The weights below give the
//! ghost at depth 1 and depth 2 as combinations of the first `n` interior
//! cells counted inward from the face.

use serde::{Deserialize, Serialize};

/// Boundary condition applied on all six faces of the global domain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundaryKind {
    /// Homogeneous Dirichlet (u = 0 on the boundary).
    #[default]
    Dirichlet,
    /// Periodic wrap-around in every direction.
    Periodic,
}

impl BoundaryKind {
    pub fn is_periodic(self) -> bool {
        matches!(self, BoundaryKind::Periodic)
    }
}

/// Order of the Dirichlet ghost extrapolation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClosureOrder {
    /// Reflect through zero using one interior cell.
    Linear,
    /// Quartic fit through up to four interior cells, matching the operator.
    Quartic,
}

const W1: [[f64; 4]; 4] = [
    [-1.0, 0.0, 0.0, 0.0],
    [-5.0 / 2.0, 1.0 / 2.0, 0.0, 0.0],
    [-13.0 / 3.0, 5.0 / 3.0, -1.0 / 3.0, 0.0],
    [-77.0 / 12.0, 43.0 / 12.0, -17.0 / 12.0, 1.0 / 4.0],
];

const W2: [[f64; 4]; 4] = [
    [-3.0, 0.0, 0.0, 0.0],
    [-21.0 / 2.0, 5.0 / 2.0, 0.0, 0.0],
    [-70.0 / 3.0, 32.0 / 3.0, -7.0 / 3.0, 0.0],
    [-505.0 / 12.0, 335.0 / 12.0, -145.0 / 12.0, 9.0 / 4.0],
];

/// Extrapolation weights for one closure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirichletClosure {
    /// Number of interior cells the closure reads.
    pub points: usize,
    /// `weights[d - 1][m]` multiplies interior cell `m` for the ghost at depth `d`.
    pub weights: [[f64; 4]; 2],
}

impl DirichletClosure {
    /// Closure of the requested order, degraded to the number of interior
    /// cells actually available along the axis.
    pub fn new(order: ClosureOrder, available: usize) -> Self {
        let wanted = match order {
            ClosureOrder::Linear => 1,
            ClosureOrder::Quartic => 4,
        };
        let points = wanted.min(available).max(1);
        Self {
            points,
            weights: [W1[points - 1], W2[points - 1]],
        }
    }

    /// Ghost value at `depth` (1 or 2) from interior values ordered inward.
    #[inline]
    pub fn ghost(&self, depth: usize, interior: &[f64]) -> f64 {
        let w = &self.weights[depth.clamp(1, 2) - 1];
        interior
            .iter()
            .take(self.points)
            .zip(w)
            .map(|(x, w)| x * w)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exact cell averages of `p` over `[a, b]`.
    fn average(p: impl Fn(f64) -> f64, a: f64, b: f64) -> f64 {
        // Simpson is exact for cubics; split for quartics.
        let m = 0.5 * (a + b);
        let s = |a: f64, b: f64| (b - a) / 6.0 * (p(a) + 4.0 * p(0.5 * (a + b)) + p(b));
        (s(a, m) + s(m, b)) / (b - a)
    }

    #[test]
    fn linear_closure_reflects() {
        let c = DirichletClosure::new(ClosureOrder::Linear, 8);
        assert_eq!(c.ghost(1, &[2.0]), -2.0);
        assert_eq!(c.ghost(2, &[2.0]), -6.0);
    }

    #[test]
    fn cubic_vanishing_on_face_is_reproduced() {
        let p = |x: f64| x * (1.0 + 2.0 * x - x * x);
        let interior: Vec<f64> = (0..4).map(|m| average(p, m as f64, m as f64 + 1.0)).collect();
        let c = DirichletClosure::new(ClosureOrder::Quartic, 16);
        let g1 = average(p, -1.0, 0.0);
        let g2 = average(p, -2.0, -1.0);
        assert!((c.ghost(1, &interior) - g1).abs() < 1e-10);
        assert!((c.ghost(2, &interior) - g2).abs() < 1e-10);
    }

    #[test]
    fn closure_degrades_with_few_cells() {
        assert_eq!(DirichletClosure::new(ClosureOrder::Quartic, 2).points, 2);
        assert_eq!(DirichletClosure::new(ClosureOrder::Quartic, 0).points, 1);
    }
}
