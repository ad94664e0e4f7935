//! Topology of the structured domain.
//!
//! This module provides:
//! - [`partition`]: the box decomposition of the global grid and its coarsening.
//! - [`boundary`]: boundary kinds and Dirichlet ghost closures.
//! - [`shape`]: the ghost-region shapes understood by halo exchange.

pub mod boundary;
pub mod partition;
pub mod shape;

pub use boundary::{BoundaryKind, ClosureOrder, DirichletClosure};
pub use partition::{BoxPartition, BoxSpec};
pub use shape::StencilShape;
