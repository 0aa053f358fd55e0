//! A uniform grid of bins over the extents of a mesh.
//!
//! Each bin holds a list of [`Candidate`]s: sample points of the elements, stored as the
//! element handle and the local coordinate of the sample. Bins are numbered in row-major order
//! with the first axis varying fastest, i.e. the bin with per-axis indices `(i, j, k)` has
//! number `i + nx * (j + ny * k)`.

use std::sync::OnceLock;

use itertools::Itertools;
use smallvec::SmallVec;

use crate::geometry::{distance, BoundingBox, Coord, MAX_DIM};
use crate::mesh::ElementId;

type BinIndex = SmallVec<[usize; MAX_DIM]>;

/// A sample point of an element, stored in a bin.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// The element that was sampled.
    pub element: ElementId,
    /// Local coordinate of the sample in the element, used as the initial guess when trying to
    /// locate a point in the element.
    pub s: Coord,
}

#[derive(Debug, Default)]
pub(crate) struct Bin {
    candidates: Vec<Candidate>,
    // Permutation of `candidates` sorted by distance from the first query that searched this bin.
    order: OnceLock<Vec<usize>>,
    // Filled by diffusion rather than by sampling.
    diffused: bool,
}

impl Bin {
    /// Candidates in order of increasing `distance`.
    ///
    /// The order is computed on the first call and memoised: later calls ignore `distance`.
    /// The sort is stable, so ties keep their insertion order.
    pub(crate) fn sorted_by<F>(&self, distance: F) -> impl Iterator<Item = &Candidate> + '_
    where
        F: Fn(&Candidate) -> f64,
    {
        let order = self.order.get_or_init(|| {
            let keys = self.candidates.iter().map(distance).collect_vec();
            let mut order = (0..self.candidates.len()).collect_vec();
            order.sort_by(|&a, &b| keys[a].total_cmp(&keys[b]));
            order
        });
        order.iter().map(move |&idx| &self.candidates[idx])
    }

    fn push(&mut self, candidate: Candidate) {
        self.candidates.push(candidate);
        self.order = OnceLock::new();
    }
}

/// A uniform rectangular grid of bins in up to three dimensions.
#[derive(Debug)]
pub struct BinGrid {
    extents: BoundingBox,
    nbin: BinIndex,
    bins: Vec<Bin>,
}

impl BinGrid {
    /// Creates a grid with `nbin[i]` bins along axis `i` covering `extents`. The bins are not
    /// allocated until [`BinGrid::allocate`] is called.
    pub(crate) fn new(extents: BoundingBox, nbin: &[usize]) -> Self {
        debug_assert_eq!(extents.dim(), nbin.len());
        debug_assert!(nbin.iter().all(|&n| n > 0));
        Self {
            extents,
            nbin: nbin.into(),
            bins: Vec::new(),
        }
    }

    /// Allocates empty bins, dropping any previous content. Returns the number of bins.
    pub(crate) fn allocate(&mut self) -> usize {
        let count = self.bin_count();
        self.bins = (0..count).map(|_| Bin::default()).collect();
        count
    }

    /// Drops all the bins. Returns the number of bins that were allocated.
    pub(crate) fn flush(&mut self) -> usize {
        let count = self.bins.len();
        self.bins = Vec::new();
        count
    }

    /// Returns `true` if the bins are allocated.
    pub fn is_allocated(&self) -> bool {
        self.dim() > 0 && !self.bins.is_empty()
    }

    /// Number of axes.
    pub fn dim(&self) -> usize {
        self.nbin.len()
    }

    /// Number of bins along each axis.
    pub fn nbin(&self) -> &[usize] {
        &self.nbin
    }

    /// Total number of bins in the grid (allocated or not).
    pub fn bin_count(&self) -> usize {
        if self.dim() == 0 {
            0
        } else {
            self.nbin.iter().product()
        }
    }

    /// Extents covered by the grid.
    pub fn extents(&self) -> &BoundingBox {
        &self.extents
    }

    /// Number of allocated bins holding at least one candidate.
    pub fn non_empty_count(&self) -> usize {
        self.bins
            .iter()
            .filter(|bin| !bin.candidates.is_empty())
            .count()
    }

    /// Candidates stored in bin `bin`, in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the bins are not allocated or if `bin` is out of range.
    pub fn content(&self, bin: usize) -> &[Candidate] {
        &self.bins[bin].candidates
    }

    pub(crate) fn bin(&self, bin: usize) -> &Bin {
        &self.bins[bin]
    }

    pub(crate) fn push(&mut self, bin: usize, candidate: Candidate) {
        self.bins[bin].push(candidate);
    }

    fn bin_width(&self, axis: usize) -> f64 {
        (self.extents.max[axis] - self.extents.min[axis]) / self.nbin[axis] as f64
    }

    fn axis_index(&self, axis: usize, x: f64) -> usize {
        let width = self.bin_width(axis);
        if width.is_nan() || width <= 0. || !x.is_finite() {
            return 0;
        }
        let idx = ((x - self.extents.min[axis]) / width).floor();
        // The float-to-int cast saturates, so points far outside the grid end up in edge bins.
        (idx.max(0.) as usize).min(self.nbin[axis] - 1)
    }

    fn flatten(&self, idx: &[usize]) -> usize {
        idx.iter()
            .zip(&self.nbin)
            .rev()
            .fold(0, |bin, (&i, &n)| bin * n + i)
    }

    fn unflatten(&self, mut bin: usize) -> BinIndex {
        self.nbin
            .iter()
            .map(|&n| {
                let i = bin % n;
                bin /= n;
                i
            })
            .collect()
    }

    /// Number of the bin containing `zeta`, clamped to the nearest bin if `zeta` lies outside
    /// the grid.
    pub fn home_bin(&self, zeta: &[f64]) -> usize {
        let idx: BinIndex = (0..self.dim())
            .map(|axis| self.axis_index(axis, zeta[axis]))
            .collect();
        self.flatten(&idx)
    }

    /// Number of the bin containing `zeta`, or [`None`] if `zeta` lies outside the grid.
    pub fn get_bin(&self, zeta: &[f64]) -> Option<usize> {
        (self.dim() > 0 && self.extents.contains(zeta)).then(|| self.home_bin(zeta))
    }

    /// Largest spiral level around `bin` that still contains bins of the grid.
    pub fn max_level(&self, bin: usize) -> usize {
        self.unflatten(bin)
            .iter()
            .zip(&self.nbin)
            .map(|(&i, &n)| i.max(n - 1 - i))
            .max()
            .unwrap_or(0)
    }

    /// Bins at Chebyshev distance exactly `level` from `bin`, clipped to the grid.
    ///
    /// Level `0` is `bin` itself.
    pub fn shell(&self, bin: usize, level: usize) -> Vec<usize> {
        let center = self.unflatten(bin);
        if center.is_empty() {
            return Vec::new();
        }
        let ranges = center
            .iter()
            .zip(&self.nbin)
            .map(|(&i, &n)| i.saturating_sub(level)..=(i + level).min(n - 1))
            .collect_vec();
        // Enumerate the last axis in the outer loop so that bins come out in increasing order.
        ranges
            .into_iter()
            .rev()
            .multi_cartesian_product()
            .filter_map(|mut idx| {
                idx.reverse();
                let on_shell = idx
                    .iter()
                    .zip(&center)
                    .map(|(&i, &c)| i.abs_diff(c))
                    .max()
                    == Some(level);
                on_shell.then(|| self.flatten(&idx))
            })
            .collect()
    }

    /// Coordinates of the `2^d` vertices of bin `bin`, with the first axis varying fastest.
    pub fn bin_vertices(&self, bin: usize) -> Vec<Coord> {
        let idx = self.unflatten(bin);
        (0..1usize << self.dim())
            .map(|corner| {
                (0..self.dim())
                    .map(|axis| {
                        let i = idx[axis] + ((corner >> axis) & 1);
                        self.extents.min[axis] + i as f64 * self.bin_width(axis)
                    })
                    .collect()
            })
            .collect()
    }

    /// Smallest distance between `zeta` and the vertices of bin `bin`.
    pub fn min_distance(&self, bin: usize, zeta: &[f64]) -> f64 {
        self.bin_vertices(bin)
            .iter()
            .map(|vertex| distance(vertex, zeta))
            .fold(f64::INFINITY, f64::min)
    }

    /// Copies into every empty bin the content of the nearest bin, within `radius` spiral
    /// levels, that was populated by sampling. Returns the number of bins filled.
    ///
    /// Bins filled by a previous diffusion are never used as sources, which makes the operation
    /// idempotent.
    pub(crate) fn fill_by_diffusion(&mut self, radius: usize) -> usize {
        let is_source = self
            .bins
            .iter()
            .map(|bin| !bin.candidates.is_empty() && !bin.diffused)
            .collect_vec();
        let mut fills = Vec::new();
        for (bin, content) in self.bins.iter().enumerate() {
            if !content.candidates.is_empty() {
                continue;
            }
            let max_level = radius.min(self.max_level(bin));
            let source = (1..=max_level)
                .flat_map(|level| self.shell(bin, level))
                .find(|&neighbour| is_source[neighbour]);
            if let Some(source) = source {
                fills.push((bin, source));
            }
        }
        for &(bin, source) in &fills {
            let candidates = self.bins[source].candidates.clone();
            self.bins[bin] = Bin {
                candidates,
                order: OnceLock::new(),
                diffused: true,
            };
        }
        fills.len()
    }
}
