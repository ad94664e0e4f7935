#![cfg_attr(docsrs, feature(doc_cfg))]
//! # gmg-boxes
//!
//! gmg-boxes is a distributed geometric multigrid solver for
//! `a alpha u - b div(beta grad u) = f` on the unit cube, discretized with
//! 4th-order finite volumes on a grid split into cubic boxes. Boxes are
//! spread over ranks; each rank stores its boxes with a ghost border and
//! exchanges halos with its neighbours.
//!
//! ## Features
//! - Variable- and constant-coefficient operators with a black-box rebuild
//!   of `D^-1` and the spectral bounds Chebyshev smoothing needs
//! - Gauss-Seidel red-black, weighted Jacobi and Chebyshev smoothers
//! - CG, BiCGStab and their communication-avoiding s-step variants as
//!   bottom solvers
//! - V-cycle and F-cycle (FMG) solves with max-norm convergence tests
//! - Pluggable communication: single rank, ranks as threads, or MPI
//!   behind the `mpi-support` feature
//!
//! ## Usage
//!
//! ```no_run
//! use gmg_boxes::prelude::*;
//!
//! # fn main() -> Result<(), MgError> {
//! let partition = BoxPartition::uniform(2, 16, 1)?;
//! let mut mg = Hierarchy::build(partition, 2, BoundaryKind::Dirichlet, NoComm, MgConfig::default())?;
//! let fine = mg.level_mut(0)?;
//! fine.fill_cells(VectorId::ALPHA, |_, _, _| 1.0);
//! for axis in 0..3 {
//!     fine.fill_faces(axis, |_, _, _| 1.0);
//! }
//! fine.fill_cells(VectorId::F, |x, y, z| x * y * z);
//! let mut telemetry = Telemetry::new();
//! let outcome = mg.solve(0, VectorId::U, VectorId::F, 0.0, 1.0, 0.0, 1e-10, &mut telemetry)?;
//! telemetry.log_summary();
//! assert!(outcome.converged);
//! # Ok(())
//! # }
//! ```
//!
//! ## Determinism
//!
//! Reductions add per-box partials in box order and combine ranks in rank
//! order, so repeated runs on the same decomposition give identical results
//! regardless of the thread count.

pub mod algs;
pub mod config;
pub mod data;
pub mod debug_invariants;
pub mod krylov;
pub mod mg;
pub mod mg_error;
pub mod operators;
pub mod smoothers;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::interpolation::InterpolationOrder;
    pub use crate::algs::restriction::RestrictionMode;
    pub use crate::config::MgConfig;
    pub use crate::data::level::Level;
    pub use crate::data::vector_id::VectorId;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::krylov::{BottomSolver, BottomSolverKind};
    pub use crate::mg::{Hierarchy, RichardsonReport, SolveOutcome, Telemetry};
    pub use crate::mg_error::MgError;
    pub use crate::operators::OperatorKind;
    pub use crate::smoothers::{Relaxation, Smoother, SmootherKind};
    pub use crate::topology::{BoundaryKind, BoxPartition};
}
