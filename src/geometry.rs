//! Coordinates and axis-aligned extents.

use std::fmt::Display;

use anyhow::{ensure, Result};
use itertools::Itertools;
use smallvec::SmallVec;

use crate::element::Element;
use crate::mesh::Mesh;
use crate::process_group::ProcessGroup;

/// Maximum number of spatial axes handled by the bin grid.
pub const MAX_DIM: usize = 3;

/// A coordinate with up to [`MAX_DIM`] components, stored inline.
pub type Coord = SmallVec<[f64; MAX_DIM]>;

/// Euclidean distance between two points of the same dimension.
pub(crate) fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Solves the dense `n`-by-`n` system `a x = b` in place using Gaussian elimination with
/// partial pivoting. On success the solution is stored in `b`.
///
/// Returns [`None`] if the matrix is singular.
pub(crate) fn solve_linear_system(
    a: &mut [[f64; MAX_DIM]; MAX_DIM],
    b: &mut [f64; MAX_DIM],
    n: usize,
) -> Option<()> {
    for col in 0..n {
        let pivot_row = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        let pivot = a[pivot_row][col];
        if !pivot.is_finite() || pivot.abs() < f64::MIN_POSITIVE {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);
        for row in col + 1..n {
            let factor = a[row][col] / pivot;
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * b[k]).sum();
        b[row] = (b[row] - tail) / a[row][row];
    }
    Some(())
}

/// An axis-aligned box described by its per-axis `[min, max]` extents.
///
/// A freshly created box is "empty": its minima are `+inf` and its maxima `-inf`, so that
/// including points and reducing across processes are plain element-wise min/max operations.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub(crate) min: Coord,
    pub(crate) max: Coord,
}

impl BoundingBox {
    /// Creates a bounding box from explicit extents.
    ///
    /// Fails if the two corners do not have the same dimension, if the dimension is larger
    /// than [`MAX_DIM`], or if `min > max` along any axis.
    pub fn new(min: &[f64], max: &[f64]) -> Result<Self> {
        ensure!(
            min.len() == max.len(),
            "Corners have different dimensions ({} and {}).",
            min.len(),
            max.len()
        );
        ensure!(
            min.len() <= MAX_DIM,
            "At most {} dimensions are supported, got {}.",
            MAX_DIM,
            min.len()
        );
        ensure!(
            min.iter().zip(max).all(|(lo, hi)| lo <= hi),
            "The lower corner {:?} is not below the upper corner {:?}.",
            min,
            max
        );
        Ok(Self {
            min: min.into(),
            max: max.into(),
        })
    }

    /// Creates an empty bounding box in `dim` dimensions.
    pub fn empty(dim: usize) -> Self {
        Self {
            min: SmallVec::from_elem(f64::INFINITY, dim),
            max: SmallVec::from_elem(f64::NEG_INFINITY, dim),
        }
    }

    /// Computes the extents of the intrinsic coordinates of all the nodes of a mesh.
    ///
    /// Only the first `dim` components of each nodal coordinate are taken into account.
    pub fn from_mesh<E: Element>(mesh: &Mesh<E>, dim: usize) -> Self {
        let mut bbox = Self::empty(dim);
        for (_, element) in mesh.elements() {
            for n in 0..element.node_count() {
                bbox.include(&element.node_zeta(n));
            }
        }
        bbox
    }

    /// Number of axes.
    pub fn dim(&self) -> usize {
        self.min.len()
    }

    /// Lower corner.
    pub fn min(&self) -> &[f64] {
        &self.min
    }

    /// Upper corner.
    pub fn max(&self) -> &[f64] {
        &self.max
    }

    /// Returns `true` if no point has been included along at least one axis.
    pub fn is_empty(&self) -> bool {
        self.min.iter().zip(&self.max).any(|(lo, hi)| lo > hi)
    }

    /// Grows the box so that it contains `point`.
    pub fn include(&mut self, point: &[f64]) {
        for ((lo, hi), &x) in self.min.iter_mut().zip(self.max.iter_mut()).zip(point) {
            *lo = lo.min(x);
            *hi = hi.max(x);
        }
    }

    /// Replaces the extents with their union over all the processes of `group`.
    ///
    /// This is a collective operation: every process of the group must call it.
    pub fn reduce<G: ProcessGroup + ?Sized>(&mut self, group: &G) {
        group.all_reduce_min(&mut self.min);
        group.all_reduce_max(&mut self.max);
    }

    /// Returns a copy of the box enlarged by `fraction` of its length along each axis, on both
    /// sides.
    ///
    /// Empty axes are collapsed to the degenerate interval `[0, 0]`.
    pub fn padded(&self, fraction: f64) -> Self {
        let (min, max) = self
            .min
            .iter()
            .zip(&self.max)
            .map(|(&lo, &hi)| {
                if lo > hi {
                    (0., 0.)
                } else {
                    let pad = fraction * (hi - lo);
                    (lo - pad, hi + pad)
                }
            })
            .unzip();
        Self { min, max }
    }

    /// Length of the box along each axis.
    pub fn lengths(&self) -> Coord {
        self.min
            .iter()
            .zip(&self.max)
            .map(|(lo, hi)| hi - lo)
            .collect()
    }

    /// Returns `true` if `point` lies inside the box (boundary included).
    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.dim()
            && izip_bounds(self)
                .zip(point)
                .all(|((lo, hi), x)| lo <= x && x <= hi)
    }
}

fn izip_bounds(bbox: &BoundingBox) -> impl Iterator<Item = (&f64, &f64)> {
    bbox.min.iter().zip(&bbox.max)
}

impl Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let axes = ["x", "y", "z"];
        let extents = izip_bounds(self)
            .zip(axes)
            .map(|((lo, hi), axis)| format!("{axis}: [{lo}, {hi}]"))
            .join(", ");
        write!(f, "({})", extents)
    }
}
