//! The multigrid controller.
//!
//! - [`hierarchy`]: building the levels and moving data between them.
//! - [`cycle`]: V-cycles, F-cycles and the convergence loop.
//! - [`richardson`]: observed order of accuracy across three levels.
//! - [`telemetry`]: per-level counters and timers.

pub mod cycle;
pub mod hierarchy;
pub mod richardson;
pub mod telemetry;

pub use cycle::SolveOutcome;
pub use hierarchy::Hierarchy;
pub use richardson::RichardsonReport;
pub use telemetry::{LevelCounters, Telemetry};
