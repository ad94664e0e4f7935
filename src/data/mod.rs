//! Grid storage: vectors, boxes and levels.

pub mod grid_box;
pub mod level;
pub mod vector_id;

pub use grid_box::{GridBox, Layout};
pub use level::{Level, OperatorState, Prolongation};
pub use vector_id::VectorId;
