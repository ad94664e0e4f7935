//! Communication and level-wide algorithms.

pub mod boundary;
pub mod communicator;
pub mod exchange;
pub mod interpolation;
pub mod reduction;
pub mod restriction;
pub mod transfer;

pub use exchange::exchange;
pub use interpolation::{InterpolationOrder, interpolate};
pub use restriction::{RestrictionMode, restrict};
