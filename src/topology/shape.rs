//! Ghost-region shapes used by halo exchange.

use serde::{Deserialize, Serialize};

/// Which part of the ghost shell an exchange fills.
///
/// A ghost cell lies outside the box along one, two or three axes (face,
/// edge or corner region).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StencilShape {
    /// Face regions only: enough for star stencils.
    Faces,
    /// Faces and edges: the variable-coefficient operator's footprint.
    NoCorners,
    /// The full shell. Needed by interpolation and by the beta coefficients.
    Box,
}

impl StencilShape {
    pub const ALL: [StencilShape; 3] = [StencilShape::Faces, StencilShape::NoCorners, StencilShape::Box];

    /// Whether a ghost cell outside the box along `axes_outside` axes belongs to this shape.
    #[inline]
    pub fn includes(self, axes_outside: usize) -> bool {
        match self {
            StencilShape::Faces => axes_outside <= 1,
            StencilShape::NoCorners => axes_outside <= 2,
            StencilShape::Box => true,
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            StencilShape::Faces => 0,
            StencilShape::NoCorners => 1,
            StencilShape::Box => 2,
        }
    }
}
