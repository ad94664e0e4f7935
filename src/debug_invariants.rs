//! Structural checks on partitions and levels.
//!
//! A [`BoxPartition`](crate::topology::BoxPartition) must tile the global
//! cube with equal boxes, each owned by a valid rank; a
//! [`Level`](crate::data::level::Level) must hold exactly the boxes its rank
//! owns, every one of them carrying the same number of vectors with room for
//! the ghost layers. Both are checked after construction and coarsening.

use crate::mg_error::MgError;

pub trait DebugInvariants {
    /// Panic on a broken layout, but only in debug builds or with the
    /// `strict-invariants` feature.
    fn debug_assert_invariants(&self);
    /// First broken rule of the layout, if any.
    fn validate_invariants(&self) -> Result<(), MgError>;
}

/// Run a layout check and panic with `what` on failure when invariant
/// checking is compiled in; a no-op otherwise.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($what:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("broken ", $($what)*, " layout: {}"), e);
        }
    };
}
