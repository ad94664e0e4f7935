//! MgError: unified error type for gmg-boxes public APIs
//!
//! Every fallible entry point (hierarchy build, operator rebuild, halo
//! exchange, transfers, solves) reports failures through this enum.
//! Non-convergence is *not* an error; it is reported through
//! [`SolveOutcome`](crate::mg::cycle::SolveOutcome) and the telemetry object.

use thiserror::Error;

/// Unified error type for multigrid operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MgError {
    /// The ghost border is narrower than the active stencil reaches.
    #[error("ghost width {ghosts} is smaller than the stencil radius {radius}")]
    GhostWidthTooSmall { ghosts: usize, radius: usize },
    /// The box list does not tile the global domain.
    #[error("box partition does not tile the domain: {0}")]
    PartitionMismatch(String),
    /// A box names a rank outside the communicator.
    #[error("box {box_index} is owned by rank {owner}, but only {ranks} ranks exist")]
    OwnerOutOfRange {
        box_index: usize,
        owner: usize,
        ranks: usize,
    },
    /// Box extents must be a power of two.
    #[error("box dimension {0} is not a power of two")]
    InvalidBoxDim(usize),
    /// Coarsening stopped above the configured maximum coarse dimension.
    #[error("coarsest level has global dimension {dim}, above the configured maximum {max}")]
    CoarseDimTooLarge { dim: usize, max: usize },
    /// A level index outside the hierarchy was requested.
    #[error("level {level} does not exist (hierarchy has {levels} levels)")]
    UnknownLevel { level: usize, levels: usize },
    /// A configuration the solver refuses to run.
    #[error("unsupported configuration: {0}")]
    Unsupported(String),
    /// A ghost cell maps to a global cell that no box covers.
    #[error("level {level}: no box covers global cell {cell:?} needed by box {box_index}")]
    MissingNeighbor {
        level: usize,
        box_index: usize,
        cell: [i64; 3],
    },
    /// A point-to-point or collective operation failed.
    #[error("communication with rank {peer} failed: {detail}")]
    Communication { peer: usize, detail: String },
    /// The operator diagonal vanished (or is not finite) on a level.
    #[error("level {level}: operator diagonal is {value} at global cell {cell:?}")]
    ZeroDiagonal {
        level: usize,
        cell: [i64; 3],
        value: f64,
    },
}

impl MgError {
    /// Errors detected while validating inputs, before any compute begins.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MgError::GhostWidthTooSmall { .. }
                | MgError::PartitionMismatch(_)
                | MgError::OwnerOutOfRange { .. }
                | MgError::InvalidBoxDim(_)
                | MgError::CoarseDimTooLarge { .. }
                | MgError::UnknownLevel { .. }
                | MgError::Unsupported(_)
        )
    }

    /// Errors raised by neighbor topology or message passing.
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            MgError::MissingNeighbor { .. } | MgError::Communication { .. }
        )
    }
}
