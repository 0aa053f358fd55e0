use crate::element::Element;
use crate::mesh::Mesh;
use crate::point_locator::{Location, PointLocator};

/// A point locator that tries every element of the mesh in turn.
///
/// Each element is asked to locate the point starting from the centroid of its reference
/// domain. This is *O*(*n*) per query and mostly useful as a reference to check and benchmark
/// the [`SpatialIndex`](crate::SpatialIndex).
pub struct LinearScanLocator<'a, E> {
    mesh: &'a Mesh<E>,
}

impl<'a, E: Element> LinearScanLocator<'a, E> {
    /// Creates a locator over `mesh`.
    pub fn new(mesh: &'a Mesh<E>) -> Self {
        Self { mesh }
    }
}

impl<E: Element> PointLocator for LinearScanLocator<'_, E> {
    fn locate_one(&self, zeta: &[f64]) -> Option<Location> {
        self.mesh.elements().find_map(|(element, e)| {
            let guess = e.sample_local_coordinates(1).swap_remove(0);
            e.locate_zeta(zeta, &guess).map(|s| Location { element, s })
        })
    }
}
