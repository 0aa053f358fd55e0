use rayon::prelude::*;

use crate::geometry::Coord;
use crate::mesh::ElementId;

/// The result of a successful point location.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    /// The element containing the point.
    pub element: ElementId,
    /// Local coordinate of the point within the element.
    pub s: Coord,
}

/// A trait to locate one or several query points within a mesh.
pub trait PointLocator {
    /// Locates one query point, given by its intrinsic coordinate, within a mesh.
    ///
    /// Returns [`None`] if the query point does not lie in any element of the mesh.
    fn locate_one(&self, zeta: &[f64]) -> Option<Location>;

    /// Locates several query points within a mesh.
    fn locate_many<P: AsRef<[f64]>>(&self, points: &[P]) -> Vec<Option<Location>> {
        points
            .iter()
            .map(|point| self.locate_one(point.as_ref()))
            .collect()
    }

    /// Locates several query points within a mesh in parallel.
    fn par_locate_many<P: AsRef<[f64]> + Sync>(&self, points: &[P]) -> Vec<Option<Location>>
    where
        Self: std::marker::Sync,
    {
        points
            .par_iter()
            .map(|point| self.locate_one(point.as_ref()))
            .collect()
    }
}
