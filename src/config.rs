//! Options of a spatial index, and process-wide bookkeeping of allocated bins.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::warn;

use crate::geometry::BoundingBox;

/// Options controlling how a [`SpatialIndex`](crate::SpatialIndex) is built and searched.
///
/// The defaults search the whole bin grid, sample each element at `5^d` points and size the
/// grid automatically.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOptions {
    /// Bins whose closest vertex is further than this from the query point are not searched.
    pub max_search_radius: f64,
    /// Number of sample points along each local axis of an element.
    pub samples_per_axis: usize,
    /// Number of bins along each axis. Computed from the number of samples if `None`.
    pub bins_per_axis: Option<Vec<usize>>,
    /// Upper bound on the automatically computed number of bins along each axis.
    pub max_bins_per_axis: usize,
    /// Fraction of the mesh extent added on each side of the bin grid.
    pub extent_padding: f64,
    /// If `true`, each process builds a bin grid spanning only its own elements.
    pub suppress_synchronisation_of_bins: bool,
    /// If `false`, the extents of the bin grid are taken from [`IndexOptions::extents`]
    /// instead of being computed from the nodes of the mesh.
    pub compute_extreme_bin_coords: bool,
    /// Caller-supplied extents, used when `compute_extreme_bin_coords` is `false`.
    pub extents: Option<BoundingBox>,
    /// Radius of the diffusion fill applied right after populating the bins, if any.
    pub diffusion_radius: Option<usize>,
    /// Number of spiral levels searched by a nested (`called_within_spiral`) search.
    pub nested_spiral_levels: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            max_search_radius: f64::INFINITY,
            samples_per_axis: 5,
            bins_per_axis: None,
            max_bins_per_axis: 100,
            extent_padding: 0.01,
            suppress_synchronisation_of_bins: false,
            compute_extreme_bin_coords: true,
            extents: None,
            diffusion_radius: None,
            nested_spiral_levels: 1,
        }
    }
}

impl IndexOptions {
    /// Sets the maximum search radius.
    pub fn with_max_search_radius(mut self, radius: f64) -> Self {
        self.max_search_radius = radius;
        self
    }

    /// Sets the number of sample points along each local axis of an element.
    pub fn with_samples_per_axis(mut self, n: usize) -> Self {
        self.samples_per_axis = n;
        self
    }

    /// Sets the number of bins along each axis.
    pub fn with_bins(mut self, bins_per_axis: &[usize]) -> Self {
        self.bins_per_axis = Some(bins_per_axis.to_vec());
        self
    }

    /// Uses the given extents instead of computing them from the mesh.
    pub fn with_extents(mut self, extents: BoundingBox) -> Self {
        self.compute_extreme_bin_coords = false;
        self.extents = Some(extents);
        self
    }

    /// Builds bins spanning only the elements of the calling process.
    pub fn with_suppressed_synchronisation(mut self) -> Self {
        self.suppress_synchronisation_of_bins = true;
        self
    }

    /// Fills empty bins by diffusion right after populating them.
    pub fn with_diffusion(mut self, radius: usize) -> Self {
        self.diffusion_radius = Some(radius);
        self
    }
}

static TOTAL_NBIN_CELLS: AtomicUsize = AtomicUsize::new(0);
static WARNING_THRESHOLD: AtomicUsize = AtomicUsize::new(50_000_000);
static SUPPRESS_WARNING: AtomicBool = AtomicBool::new(false);
static ALREADY_WARNED: AtomicBool = AtomicBool::new(false);

/// Total number of bins currently allocated by all the spatial indices of the process.
pub fn total_bin_cells() -> usize {
    TOTAL_NBIN_CELLS.load(Ordering::Relaxed)
}

/// Number of allocated bins above which a warning is logged.
pub fn bin_cell_warning_threshold() -> usize {
    WARNING_THRESHOLD.load(Ordering::Relaxed)
}

/// Sets the number of allocated bins above which a warning is logged.
pub fn set_bin_cell_warning_threshold(threshold: usize) {
    WARNING_THRESHOLD.store(threshold, Ordering::Relaxed);
}

/// Enables or disables the warning about a large total number of bins.
pub fn suppress_bin_cell_warning(suppress: bool) {
    SUPPRESS_WARNING.store(suppress, Ordering::Relaxed);
}

/// Returns `true` once the warning about a large total number of bins has been logged.
pub fn bin_cell_warning_issued() -> bool {
    ALREADY_WARNED.load(Ordering::Relaxed)
}

pub(crate) fn register_bin_cells(count: usize) {
    let total = TOTAL_NBIN_CELLS.fetch_add(count, Ordering::Relaxed) + count;
    if total > bin_cell_warning_threshold()
        && !SUPPRESS_WARNING.load(Ordering::Relaxed)
        && !ALREADY_WARNED.swap(true, Ordering::Relaxed)
    {
        warn!(
            "{} bins are allocated across all spatial indices, more than the threshold of {}. \
             Consider reducing the number of bins per index or flushing unused indices.",
            total,
            bin_cell_warning_threshold()
        );
    }
}

pub(crate) fn release_bin_cells(count: usize) {
    TOTAL_NBIN_CELLS.fetch_sub(count, Ordering::Relaxed);
}
