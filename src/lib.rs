//! Point location in finite element meshes seen as geometric objects.
//!
//! A [`Mesh`] is a collection of elements, each parametrised by an intrinsic coordinate
//! `zeta`. A [`SpatialIndex`] sorts sample points of every element into a uniform grid of bins,
//! so that the element containing a given `zeta` (and the local coordinate of `zeta` within
//! that element) can be found by searching a handful of bins around it instead of the whole
//! mesh.
//!
//! ```
//! use meshloc::{IndexOptions, Mesh, PointLocator, SpatialIndex};
//!
//! let mesh = Mesh::triangulated_grid(0., 1., 0., 1., 20, 20)?;
//! let index = SpatialIndex::with_options(&mesh, IndexOptions::default().with_samples_per_axis(3))?;
//!
//! let points = vec![[0.1, 0.2], [0.7, 0.9], [1.5, 0.5]];
//! let locations = index.par_locate_many(&points);
//!
//! assert!(locations[0].is_some());
//! assert!(locations[1].is_some());
//! assert!(locations[2].is_none());
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! When the mesh is distributed over several processes, build the index with
//! [`SpatialIndex::with_group`] so that all processes agree on the bin grid. The `mpi` feature
//! provides a [`ProcessGroup`] over an MPI communicator.

pub mod bins;
pub mod config;
pub mod element;
mod error;
pub mod geometry;
mod linear_scan;
mod mesh;
mod point_locator;
pub mod process_group;
mod spatial_index;

pub use bins::{BinGrid, Candidate};
pub use config::IndexOptions;
pub use element::{Element, FromNodes, QElement, Triangle};
pub use error::LocateError;
pub use geometry::{BoundingBox, Coord};
pub use linear_scan::LinearScanLocator;
pub use mesh::{ElementId, Mesh};
pub use point_locator::{Location, PointLocator};
pub use process_group::{ProcessGroup, SingleProcess};
pub use spatial_index::{ShapeDependency, SpatialIndex};
