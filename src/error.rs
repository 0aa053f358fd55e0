use thiserror::Error;

use crate::geometry::Coord;

/// Errors returned by the evaluation functions of a [`SpatialIndex`](crate::SpatialIndex).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocateError {
    /// No element of the mesh contains the point within the search radius.
    #[error("Cannot locate zeta {zeta:?}")]
    NotFound {
        /// The coordinate that could not be located.
        zeta: Coord,
    },
    /// The element containing the point has no position stored for the requested timestep.
    #[error("No position is stored for timestep {t}")]
    TimestepUnavailable {
        /// The requested timestep.
        t: usize,
    },
    /// The derivative of the position with respect to the intrinsic coordinate is only
    /// defined element by element, not for the mesh as a whole.
    #[error("The derivative of the position is not implemented for a mesh seen as a geometric object")]
    DerivativeNotImplemented,
}
