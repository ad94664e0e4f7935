//! Relaxation schemes used on every level of a cycle.
//!
//! Every smoother performs one fixed amount of work per call, reads the
//! diagonal from `DINV` and uses `TEMP` and `SCRATCH` as work vectors, so
//! neither may be passed as the solution or the right-hand side.

pub mod chebyshev;
pub mod gsrb;
pub mod jacobi;

use serde::{Deserialize, Serialize};

use crate::algs::communicator::Communicator;
use crate::config::MgConfig;
use crate::data::level::Level;
use crate::data::vector_id::VectorId;
use crate::mg_error::MgError;
use crate::operators::OperatorKind;

pub use chebyshev::Chebyshev;
pub use gsrb::Gsrb;
pub use jacobi::Jacobi;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SmootherKind {
    /// Red-black Gauss-Seidel on the parity of the global cell index.
    #[default]
    Gsrb,
    Jacobi,
    Chebyshev,
}

impl SmootherKind {
    /// Sweeps per call when none are configured.
    pub fn default_sweeps(self) -> usize {
        match self {
            SmootherKind::Gsrb => 3,
            SmootherKind::Jacobi => 6,
            SmootherKind::Chebyshev => 1,
        }
    }
}

/// One smoothing call: improve `u` towards `A u = f` on `level`.
pub trait Relaxation {
    fn relax<C: Communicator>(
        &self,
        level: &mut Level,
        comm: &C,
        op: OperatorKind,
        u: VectorId,
        f: VectorId,
    ) -> Result<(), MgError>;
}

/// The smoother chosen at build time.
#[derive(Clone, Debug, PartialEq)]
pub enum Smoother {
    Gsrb(Gsrb),
    Jacobi(Jacobi),
    Chebyshev(Chebyshev),
}

impl Smoother {
    pub fn from_config(config: &MgConfig) -> Self {
        let sweeps = config.smoother_sweeps.unwrap_or(config.smoother.default_sweeps());
        match config.smoother {
            SmootherKind::Gsrb => Smoother::Gsrb(Gsrb { sweeps }),
            SmootherKind::Jacobi => Smoother::Jacobi(Jacobi {
                sweeps,
                weight: config.jacobi_weight,
            }),
            SmootherKind::Chebyshev => Smoother::Chebyshev(Chebyshev {
                degree: config.chebyshev_degree,
                sweeps,
            }),
        }
    }

    pub fn kind(&self) -> SmootherKind {
        match self {
            Smoother::Gsrb(_) => SmootherKind::Gsrb,
            Smoother::Jacobi(_) => SmootherKind::Jacobi,
            Smoother::Chebyshev(_) => SmootherKind::Chebyshev,
        }
    }
}

impl Default for Smoother {
    fn default() -> Self {
        Smoother::from_config(&MgConfig::default())
    }
}

impl Relaxation for Smoother {
    fn relax<C: Communicator>(
        &self,
        level: &mut Level,
        comm: &C,
        op: OperatorKind,
        u: VectorId,
        f: VectorId,
    ) -> Result<(), MgError> {
        match self {
            Smoother::Gsrb(s) => s.relax(level, comm, op, u, f),
            Smoother::Jacobi(s) => s.relax(level, comm, op, u, f),
            Smoother::Chebyshev(s) => s.relax(level, comm, op, u, f),
        }
    }
}

pub(crate) fn check_vectors(u: VectorId, f: VectorId) -> Result<(), MgError> {
    let reserved = [VectorId::TEMP, VectorId::SCRATCH];
    if reserved.contains(&u) || reserved.contains(&f) || u == f {
        return Err(MgError::Unsupported(format!(
            "cannot smooth {u} against {f}: smoothers work in {} and {}",
            VectorId::TEMP,
            VectorId::SCRATCH
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::reduction;
    use crate::operators::{rebuild::rebuild_operator, residual};
    use crate::topology::{BoundaryKind, BoxPartition};

    /// A rebuilt Poisson level with a rough initial guess and zero RHS.
    pub fn rough_level(boundary: BoundaryKind, op: OperatorKind) -> Level {
        let p = BoxPartition::uniform(2, 4, 1).unwrap();
        let mut l = Level::new(0, p, 2, boundary, 0, VectorId::COUNT).unwrap();
        l.fill_cells(VectorId::ALPHA, |_, _, _| 1.0);
        for axis in 0..3 {
            l.fill_faces(axis, |x, y, z| 1.0 + 0.25 * (x * y + z));
        }
        rebuild_operator(&mut l, None, &NoComm, op, 1.0, 1.0).unwrap();
        l.fill_cells_indexed(VectorId::U, |g| if (g[0] + 2 * g[1] + g[2]) % 3 == 0 { 1.0 } else { -0.5 });
        reduction::zero(&mut l, VectorId::F);
        l
    }

    pub fn residual_norm(l: &mut Level, op: OperatorKind) -> f64 {
        residual(l, &NoComm, op, VectorId::F_MINUS_AV, VectorId::U, VectorId::F).unwrap();
        reduction::norm_inf(l, &NoComm, VectorId::F_MINUS_AV).unwrap()
    }
}
