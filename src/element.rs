//! The capabilities the spatial index needs from a mesh element, and a few ready-made
//! element types.
//!
//! The index never looks at element geometry directly. It only needs to:
//! - enumerate the nodes of an element (to compute the extents of the mesh),
//! - map local coordinates to intrinsic coordinates (to sample the element),
//! - invert that map at a target point, starting from an initial guess (the containment oracle),
//! - evaluate the physical position at a local coordinate and timestep.

use anyhow::Result;
use itertools::Itertools;
use smallvec::smallvec;

use crate::geometry::Coord;

mod lagrange;
mod triangle;

pub use lagrange::QElement;
pub use triangle::Triangle;

/// Tolerance on local coordinates when deciding whether a point lies inside the reference
/// domain of an element.
pub const LOCATE_TOLERANCE: f64 = 1e-10;

/// A finite element seen as a geometric sub-object of a mesh.
pub trait Element {
    /// Dimension of the local (and intrinsic) coordinates.
    fn lagrangian_dim(&self) -> usize;

    /// Dimension of the physical position.
    fn eulerian_dim(&self) -> usize;

    /// Number of nodes.
    fn node_count(&self) -> usize;

    /// Intrinsic coordinate of the `n`-th node.
    fn node_zeta(&self, n: usize) -> Coord;

    /// Intrinsic coordinate at local coordinate `s`.
    fn interpolated_zeta(&self, s: &[f64]) -> Coord;

    /// Finds the local coordinate at which the intrinsic coordinate equals `zeta`, using
    /// `initial_guess` as a starting point for iterative methods.
    ///
    /// Returns [`None`] if `zeta` is not inside the element.
    fn locate_zeta(&self, zeta: &[f64], initial_guess: &[f64]) -> Option<Coord>;

    /// Physical position at local coordinate `s` at timestep `t` (`0` is the current time,
    /// `t > 0` are previous timesteps).
    ///
    /// Returns [`None`] if no position is stored for timestep `t`.
    fn position(&self, t: usize, s: &[f64]) -> Option<Coord>;

    /// Deterministic set of local coordinates strictly inside the reference domain, with
    /// `n_per_axis` points along each local axis.
    ///
    /// The default implementation samples the midpoints of a uniform tensor-product
    /// subdivision of `[-1, 1]^d`.
    fn sample_local_coordinates(&self, n_per_axis: usize) -> Vec<Coord> {
        tensor_samples(self.lagrangian_dim(), n_per_axis)
    }
}

/// An element type that can be built from the coordinates of its nodes.
pub trait FromNodes: Sized {
    /// Builds an element from nodal coordinates, used both as intrinsic coordinates and as
    /// current positions.
    fn from_nodes(nodes: &[Coord]) -> Result<Self>;
}

/// Midpoints of a uniform `n_per_axis^dim` subdivision of `[-1, 1]^dim`.
pub(crate) fn tensor_samples(dim: usize, n_per_axis: usize) -> Vec<Coord> {
    if dim == 0 {
        return vec![smallvec![]];
    }
    let n = n_per_axis.max(1);
    let h = 2. / n as f64;
    (0..dim)
        .map(|_| 0..n)
        .multi_cartesian_product()
        .map(|idx| idx.iter().map(|&i| -1. + (i as f64 + 0.5) * h).collect())
        .collect()
}
