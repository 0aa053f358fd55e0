use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{ensure, Context, Result};
use itertools::Itertools;
use log::{debug, trace};

use crate::bins::{BinGrid, Candidate};
use crate::config::{register_bin_cells, release_bin_cells, IndexOptions};
use crate::element::Element;
use crate::error::LocateError;
use crate::geometry::{distance, BoundingBox, Coord, MAX_DIM};
use crate::mesh::Mesh;
use crate::point_locator::{Location, PointLocator};
use crate::process_group::{ProcessGroup, SingleProcess};

/// Handle to an external data item that influences the shape of the elements of the mesh.
///
/// The index only records these handles on behalf of its caller; it never reads or modifies
/// the data they refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeDependency(pub usize);

/// A mesh seen as a single geometric object, with a bin-based spatial index to find the element
/// containing a given intrinsic coordinate.
///
/// The intrinsic coordinates of the sample points of every element are sorted into a uniform
/// grid of bins. To locate a point, the bins are searched in concentric shells ("spirals")
/// around the bin containing the point, and each element sampled in these bins is asked whether
/// it contains the point, using the local coordinate of the sample as an initial guess. The
/// first element that contains the point wins: if elements overlap, which one is returned
/// depends on the order of the samples.
///
/// The index borrows the mesh, so the mesh cannot change while the index is alive. After the
/// mesh has been modified, build a new index.
///
/// ```
/// use meshloc::{Mesh, SpatialIndex};
///
/// let mesh = Mesh::grid(0., 1., 0., 1., 10, 10)?;
/// let index = SpatialIndex::new(&mesh)?;
///
/// let location = index.locate_zeta(&[0.55, 0.05]).unwrap();
/// assert_eq!(location.element.0, 5);
/// assert!(index.locate_zeta(&[2., 2.]).is_none());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct SpatialIndex<'a, E> {
    mesh: &'a Mesh<E>,
    lagrangian_dim: usize,
    eulerian_dim: usize,
    options: IndexOptions,
    grid: BinGrid,
    geom_data: Vec<ShapeDependency>,
    min_spiral_level: AtomicUsize,
    max_spiral_level: AtomicUsize,
}

impl<'a, E: Element> SpatialIndex<'a, E> {
    /// Builds an index over `mesh` with the default options.
    pub fn new(mesh: &'a Mesh<E>) -> Result<Self> {
        Self::with_options(mesh, IndexOptions::default())
    }

    /// Builds an index over `mesh` on a single process.
    pub fn with_options(mesh: &'a Mesh<E>, options: IndexOptions) -> Result<Self> {
        Self::with_group(mesh, &SingleProcess, options)
    }

    /// Builds an index over the part of a distributed mesh owned by the calling process.
    ///
    /// Unless `options.suppress_synchronisation_of_bins` is set, the extents and bin counts of
    /// the grid are reduced over `group`, so that every process ends up with the same bin
    /// geometry. This is a collective operation: all the processes of the group must call it
    /// with the same options.
    pub fn with_group<G: ProcessGroup + ?Sized>(
        mesh: &'a Mesh<E>,
        group: &G,
        options: IndexOptions,
    ) -> Result<Self> {
        ensure!(
            options.max_search_radius >= 0.,
            "The maximum search radius must be non-negative."
        );
        ensure!(
            options.extent_padding >= 0.,
            "The extent padding must be non-negative."
        );
        let synchronise = group.size() > 1 && !options.suppress_synchronisation_of_bins;

        let (mut lagrangian_dim, mut eulerian_dim) = mesh
            .elements()
            .next()
            .map(|(_, element)| (element.lagrangian_dim(), element.eulerian_dim()))
            .unwrap_or((0, 0));
        if synchronise {
            // Processes without elements still need to know the dimensions.
            let mut dims = [lagrangian_dim as f64, eulerian_dim as f64];
            group.all_reduce_max(&mut dims);
            lagrangian_dim = dims[0] as usize;
            eulerian_dim = dims[1] as usize;
        }
        ensure!(
            lagrangian_dim <= MAX_DIM,
            "Elements of dimension {} are not supported (at most {}).",
            lagrangian_dim,
            MAX_DIM
        );

        let extents = if options.compute_extreme_bin_coords {
            let mut extents = BoundingBox::from_mesh(mesh, lagrangian_dim);
            if synchronise {
                extents.reduce(group);
            }
            extents.padded(options.extent_padding)
        } else {
            let extents = options
                .extents
                .clone()
                .context("Extents must be provided when they are not computed from the mesh.")?;
            ensure!(
                extents.dim() == lagrangian_dim,
                "The extents have {} dimensions but the elements have {}.",
                extents.dim(),
                lagrangian_dim
            );
            extents
        };

        let nbin = match &options.bins_per_axis {
            Some(nbin) => {
                ensure!(
                    nbin.len() == lagrangian_dim && nbin.iter().all(|&n| n > 0),
                    "Expected {} positive bin counts, got {:?}.",
                    lagrangian_dim,
                    nbin
                );
                nbin.clone()
            }
            None => {
                let nbin = Self::bins_per_axis(mesh, lagrangian_dim, &options);
                if synchronise {
                    let mut counts = nbin.iter().map(|&n| n as f64).collect_vec();
                    group.all_reduce_max(&mut counts);
                    counts.iter().map(|&n| n as usize).collect()
                } else {
                    nbin
                }
            }
        };
        debug!(
            "Bin grid with {:?} bins over {} ({} elements, synchronised: {})",
            nbin,
            extents,
            mesh.element_count(),
            synchronise
        );

        let mut index = Self {
            mesh,
            lagrangian_dim,
            eulerian_dim,
            options,
            grid: BinGrid::new(extents, &nbin),
            geom_data: Vec::new(),
            min_spiral_level: AtomicUsize::new(usize::MAX),
            max_spiral_level: AtomicUsize::new(0),
        };
        index.create_bins_of_objects();
        Ok(index)
    }

    /// Aims for about one sample per bin, with at most `options.max_bins_per_axis` bins along
    /// each axis.
    fn bins_per_axis(mesh: &Mesh<E>, dim: usize, options: &IndexOptions) -> Vec<usize> {
        if dim == 0 {
            return Vec::new();
        }
        let samples_per_element = options.samples_per_axis.max(1).pow(dim as u32);
        let samples = (mesh.element_count() * samples_per_element).max(1);
        let n = (samples as f64).powf(1. / dim as f64).ceil() as usize;
        vec![n.clamp(1, options.max_bins_per_axis.max(1)); dim]
    }

    /// Allocates the bins and fills them with the sample points of all the elements.
    ///
    /// Any previous content is flushed first. The extents and bin counts are those computed at
    /// construction, so rebuilding over an unchanged mesh reproduces the same bins.
    pub fn create_bins_of_objects(&mut self) {
        self.flush_bins_of_objects();
        if self.lagrangian_dim == 0 {
            return;
        }
        register_bin_cells(self.grid.allocate());

        let mut samples = 0;
        for (id, element) in self.mesh.elements() {
            if element.lagrangian_dim() != self.lagrangian_dim {
                debug!(
                    "Skipping element {} of dimension {} in a {}D index",
                    id.0,
                    element.lagrangian_dim(),
                    self.lagrangian_dim
                );
                continue;
            }
            for s in element.sample_local_coordinates(self.options.samples_per_axis) {
                let zeta = element.interpolated_zeta(&s);
                if zeta.iter().any(|z| !z.is_finite()) {
                    continue;
                }
                let bin = self.grid.home_bin(&zeta);
                self.grid.push(bin, Candidate { element: id, s });
                samples += 1;
            }
        }
        debug!(
            "Sorted {} samples into {} bins ({} non-empty)",
            samples,
            self.grid.bin_count(),
            self.grid.non_empty_count()
        );

        if let Some(radius) = self.options.diffusion_radius {
            self.fill_bin_by_diffusion(radius);
        }
    }

    /// Drops the content of all bins and releases them from the process-wide bin count.
    pub fn flush_bins_of_objects(&mut self) {
        release_bin_cells(self.grid.flush());
    }

    /// Fills every empty bin with the content of the nearest bin populated by sampling, found
    /// within `radius` spiral levels. Returns the number of bins filled.
    ///
    /// This bounds the number of empty shells a search has to go through in sparse regions of
    /// the mesh. Running it again with the same radius has no effect.
    pub fn fill_bin_by_diffusion(&mut self, radius: usize) -> usize {
        let filled = self.grid.fill_by_diffusion(radius);
        debug!("Filled {} empty bins by diffusion (radius {})", filled, radius);
        filled
    }

    /// Finds the element containing the intrinsic coordinate `zeta`, and the local coordinate
    /// of `zeta` in that element.
    ///
    /// Returns [`None`] if no element contains `zeta` within the maximum search radius.
    pub fn locate_zeta(&self, zeta: &[f64]) -> Option<Location> {
        self.spiraling_locate_zeta(zeta, false)
    }

    /// Same as [`SpatialIndex::locate_zeta`], but if `called_within_spiral` is `true` only the
    /// first `options.nested_spiral_levels` shells around the home bin are searched.
    pub fn spiraling_locate_zeta(
        &self,
        zeta: &[f64],
        called_within_spiral: bool,
    ) -> Option<Location> {
        if !self.grid.is_allocated() || zeta.len() != self.lagrangian_dim {
            return None;
        }
        let home = self.grid.home_bin(zeta);
        let mut max_level = self.grid.max_level(home);
        if called_within_spiral {
            max_level = max_level.min(self.options.nested_spiral_levels);
        }

        let mut level = 0;
        let mut shell = vec![home];
        loop {
            for &bin in &shell {
                if let Some(location) = self.search_bin(bin, zeta) {
                    trace!("Located {:?} in bin {} at spiral level {}", zeta, bin, level);
                    self.record_spiral_level(level);
                    return Some(location);
                }
            }
            if level == max_level {
                break;
            }
            let next = self.grid.shell(home, level + 1);
            let closest = next
                .iter()
                .map(|&bin| self.grid.min_distance(bin, zeta))
                .fold(f64::INFINITY, f64::min);
            if closest > self.options.max_search_radius {
                trace!(
                    "Giving up on {:?} at spiral level {}: next shell is {} away",
                    zeta,
                    level,
                    closest
                );
                break;
            }
            shell = next;
            level += 1;
        }
        self.record_spiral_level(level);
        None
    }

    fn search_bin(&self, bin: usize, zeta: &[f64]) -> Option<Location> {
        let mesh = self.mesh;
        self.grid
            .bin(bin)
            .sorted_by(|candidate| {
                distance(
                    &mesh[candidate.element].interpolated_zeta(&candidate.s),
                    zeta,
                )
            })
            .find_map(|candidate| {
                mesh[candidate.element]
                    .locate_zeta(zeta, &candidate.s)
                    .map(|s| Location {
                        element: candidate.element,
                        s,
                    })
            })
    }

    fn record_spiral_level(&self, level: usize) {
        self.min_spiral_level.fetch_min(level, Ordering::Relaxed);
        self.max_spiral_level.fetch_max(level, Ordering::Relaxed);
    }

    /// Position at the current timestep of the point with intrinsic coordinate `zeta`.
    pub fn position(&self, zeta: &[f64]) -> Result<Coord, LocateError> {
        self.position_at(0, zeta)
    }

    /// Position at timestep `t` (`0` is the current time) of the point with intrinsic
    /// coordinate `zeta`.
    ///
    /// Fails if `zeta` cannot be located: falling back to a nearby element would silently give
    /// a wrong position.
    pub fn position_at(&self, t: usize, zeta: &[f64]) -> Result<Coord, LocateError> {
        let Location { element, s } = self.locate_zeta(zeta).ok_or(LocateError::NotFound {
            zeta: zeta.into(),
        })?;
        self.mesh[element]
            .position(t, &s)
            .ok_or(LocateError::TimestepUnavailable { t })
    }

    /// Derivative of the position with respect to the intrinsic coordinate.
    ///
    /// This is only defined element by element, so it always fails.
    pub fn dposition(&self, _zeta: &[f64]) -> Result<Vec<Coord>, LocateError> {
        Err(LocateError::DerivativeNotImplemented)
    }

    /// Dimension of the intrinsic coordinates (zero for an empty mesh).
    pub fn nlagrangian(&self) -> usize {
        self.lagrangian_dim
    }

    /// Dimension of the positions (zero for an empty mesh).
    pub fn neulerian(&self) -> usize {
        self.eulerian_dim
    }

    /// The underlying bin grid.
    pub fn grid(&self) -> &BinGrid {
        &self.grid
    }

    /// Number of bins along each axis.
    pub fn nbin(&self) -> &[usize] {
        self.grid.nbin()
    }

    /// Number of bins along the x axis.
    pub fn nbin_x(&self) -> Option<usize> {
        self.nbin().first().copied()
    }

    /// Number of bins along the y axis.
    pub fn nbin_y(&self) -> Option<usize> {
        self.nbin().get(1).copied()
    }

    /// Number of bins along the z axis.
    pub fn nbin_z(&self) -> Option<usize> {
        self.nbin().get(2).copied()
    }

    /// Extents of the bin grid.
    pub fn extents(&self) -> &BoundingBox {
        self.grid.extents()
    }

    /// Lower extent of the bin grid along the x axis.
    pub fn x_min(&self) -> Option<f64> {
        self.extents().min().first().copied()
    }

    /// Upper extent of the bin grid along the x axis.
    pub fn x_max(&self) -> Option<f64> {
        self.extents().max().first().copied()
    }

    /// Lower extent of the bin grid along the y axis.
    pub fn y_min(&self) -> Option<f64> {
        self.extents().min().get(1).copied()
    }

    /// Upper extent of the bin grid along the y axis.
    pub fn y_max(&self) -> Option<f64> {
        self.extents().max().get(1).copied()
    }

    /// Lower extent of the bin grid along the z axis.
    pub fn z_min(&self) -> Option<f64> {
        self.extents().min().get(2).copied()
    }

    /// Upper extent of the bin grid along the z axis.
    pub fn z_max(&self) -> Option<f64> {
        self.extents().max().get(2).copied()
    }

    /// Bins whose closest vertex is further than this from a query point are not searched.
    pub fn max_search_radius(&self) -> f64 {
        self.options.max_search_radius
    }

    /// Sets the maximum search radius.
    pub fn set_max_search_radius(&mut self, radius: f64) {
        self.options.max_search_radius = radius;
    }

    /// Smallest and largest spiral levels at which queries have terminated so far, or [`None`]
    /// if no query has been made.
    pub fn spiral_levels(&self) -> Option<(usize, usize)> {
        let min = self.min_spiral_level.load(Ordering::Relaxed);
        (min != usize::MAX).then(|| (min, self.max_spiral_level.load(Ordering::Relaxed)))
    }

    /// Smallest spiral level at which a query has terminated so far.
    pub fn current_min_spiral_level(&self) -> Option<usize> {
        self.spiral_levels().map(|(min, _)| min)
    }

    /// Largest spiral level at which a query has terminated so far.
    pub fn current_max_spiral_level(&self) -> Option<usize> {
        self.spiral_levels().map(|(_, max)| max)
    }

    /// Number of the bin containing `zeta`, or [`None`] if `zeta` lies outside the grid.
    pub fn get_bin(&self, zeta: &[f64]) -> Option<usize> {
        (zeta.len() == self.lagrangian_dim)
            .then(|| self.grid.get_bin(zeta))
            .flatten()
    }

    /// Candidates stored in bin `bin`, in insertion order.
    ///
    /// Returns an empty slice if the bins have been flushed or `bin` is out of range.
    pub fn bin_content(&self, bin: usize) -> &[Candidate] {
        if self.grid.is_allocated() && bin < self.grid.bin_count() {
            self.grid.content(bin)
        } else {
            &[]
        }
    }

    /// Coordinates of the vertices of bin `bin`, with the first axis varying fastest.
    pub fn get_bin_vertices(&self, bin: usize) -> Vec<Coord> {
        self.grid.bin_vertices(bin)
    }

    /// Smallest distance between `zeta` and the vertices of bin `bin`.
    pub fn min_distance(&self, bin: usize, zeta: &[f64]) -> f64 {
        self.grid.min_distance(bin, zeta)
    }

    /// Bins at spiral level `level` around bin `bin`.
    pub fn neighbouring_bins(&self, bin: usize, level: usize) -> Vec<usize> {
        self.grid.shell(bin, level)
    }

    /// Records an external data item the shape of the mesh depends on.
    pub fn add_geom_data(&mut self, data: ShapeDependency) {
        self.geom_data.push(data);
    }

    /// Number of data items the shape of the mesh depends on.
    pub fn ngeom_data(&self) -> usize {
        self.geom_data.len()
    }

    /// The `j`-th data item the shape of the mesh depends on.
    pub fn geom_data(&self, j: usize) -> Option<ShapeDependency> {
        self.geom_data.get(j).copied()
    }

    /// Writes the vertices of every bin as a Tecplot zone, each vertex followed by its
    /// distance to `zeta`.
    pub fn output_bin_vertices<W: Write>(&self, out: &mut W, zeta: &[f64]) -> Result<()> {
        let headers = ["ZONE I=2", "ZONE I=2, J=2", "ZONE I=2, J=2, K=2"];
        let Some(header) = self.lagrangian_dim.checked_sub(1).map(|d| headers[d]) else {
            return Ok(());
        };
        for bin in 0..self.grid.bin_count() {
            writeln!(out, "{}", header)?;
            for vertex in self.grid.bin_vertices(bin) {
                writeln!(
                    out,
                    "{} {}",
                    vertex.iter().join(" "),
                    distance(&vertex, zeta)
                )?;
            }
        }
        Ok(())
    }

    /// Writes, for every candidate of every bin, the intrinsic coordinate of the sample point
    /// followed by the bin number.
    pub fn output_bins<W: Write>(&self, out: &mut W) -> Result<()> {
        if !self.grid.is_allocated() {
            return Ok(());
        }
        for bin in 0..self.grid.bin_count() {
            for candidate in self.grid.content(bin) {
                let zeta = self.mesh[candidate.element].interpolated_zeta(&candidate.s);
                writeln!(out, "{} {}", zeta.iter().join(" "), bin)?;
            }
        }
        Ok(())
    }

    /// Writes the output of [`SpatialIndex::output_bins`] to a file.
    pub fn output_bins_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Cannot create bin output file {}", path.display()))?;
        let mut out = BufWriter::new(file);
        self.output_bins(&mut out)?;
        out.flush()?;
        Ok(())
    }
}

impl<E> Drop for SpatialIndex<'_, E> {
    fn drop(&mut self) {
        release_bin_cells(self.grid.flush());
    }
}

impl<E: Element> PointLocator for SpatialIndex<'_, E> {
    fn locate_one(&self, zeta: &[f64]) -> Option<Location> {
        self.locate_zeta(zeta)
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use super::*;
    use crate::element::{QElement, Triangle};
    use crate::linear_scan::LinearScanLocator;
    use crate::mesh::ElementId;
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use smallvec::smallvec;

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        assert!(distance(a, b) < 1e-10, "{:?} != {:?}", a, b);
    }

    fn square_extents(min: f64, max: f64) -> BoundingBox {
        BoundingBox::new(&[min, min], &[max, max]).unwrap()
    }

    fn contents<E: Element>(index: &SpatialIndex<E>) -> Vec<Vec<Candidate>> {
        (0..index.grid().bin_count())
            .map(|bin| index.bin_content(bin).to_vec())
            .collect()
    }

    #[test]
    fn locate_in_four_element_square() -> Result<()> {
        let mesh = Mesh::grid(-1., 1., -1., 1., 2, 2)?;
        let index = SpatialIndex::new(&mesh)?;

        let location = index.locate_zeta(&[0.5, 0.5]).unwrap();

        assert_eq!(location.element, ElementId(3));
        assert_close(&location.s, &[0., 0.]);
        assert_eq!(index.locate_zeta(&[2., 2.]), None);

        Ok(())
    }

    #[test]
    fn geometry_of_the_grid() -> Result<()> {
        let mesh = Mesh::grid(-1., 1., -1., 1., 2, 2)?;
        let index = SpatialIndex::new(&mesh)?;

        // 100 samples
        assert_eq!(index.nbin(), &[10, 10]);
        assert_eq!(index.nbin_x(), Some(10));
        assert_eq!(index.nbin_z(), None);
        assert_eq!(index.nlagrangian(), 2);
        assert_eq!(index.neulerian(), 2);
        assert!((index.x_min().unwrap() + 1.02).abs() < 1e-12);
        assert!((index.y_max().unwrap() - 1.02).abs() < 1e-12);
        assert_eq!(index.z_min(), None);
        assert_eq!(index.get_bin(&[-1.01, -1.01]), Some(0));
        assert_eq!(index.get_bin(&[5., 0.]), None);
        assert_eq!(index.get_bin(&[0.]), None);
        assert_eq!(index.neighbouring_bins(0, 1), vec![1, 10, 11]);
        assert_eq!(index.get_bin_vertices(0).len(), 4);
        assert_eq!(index.min_distance(0, &[-1.02, -1.02]), 0.);

        Ok(())
    }

    #[test]
    fn bins_are_populated_with_all_the_samples() -> Result<()> {
        let mesh = Mesh::grid(0., 1., 0., 1., 3, 3)?;
        let options = IndexOptions::default().with_samples_per_axis(2);
        let index = SpatialIndex::with_options(&mesh, options)?;

        let total: usize = contents(&index).iter().map(Vec::len).sum();

        assert_eq!(total, 9 * 4);
        for bin in 0..index.grid().bin_count() {
            for candidate in index.bin_content(bin) {
                let zeta = mesh[candidate.element].interpolated_zeta(&candidate.s);
                assert_eq!(index.get_bin(&zeta), Some(bin));
            }
        }

        Ok(())
    }

    #[test]
    fn empty_mesh() -> Result<()> {
        let mesh = Mesh::<QElement>::default();
        let index = SpatialIndex::new(&mesh)?;

        assert_eq!(index.nlagrangian(), 0);
        assert!(index.nbin().is_empty());
        assert_eq!(index.nbin_x(), None);
        assert_eq!(index.grid().bin_count(), 0);
        assert_eq!(index.locate_zeta(&[]), None);
        assert_eq!(index.locate_zeta(&[0.5]), None);
        assert!(index.bin_content(0).is_empty());

        Ok(())
    }

    #[test]
    fn invalid_options_are_rejected() -> Result<()> {
        let mesh = Mesh::grid(0., 1., 0., 1., 2, 2)?;

        let no_extents = IndexOptions {
            compute_extreme_bin_coords: false,
            ..Default::default()
        };
        assert!(SpatialIndex::with_options(&mesh, no_extents).is_err());

        let wrong_dim = IndexOptions::default().with_extents(BoundingBox::new(&[0.], &[1.])?);
        assert!(SpatialIndex::with_options(&mesh, wrong_dim).is_err());

        let wrong_bins = IndexOptions::default().with_bins(&[2, 2, 2]);
        assert!(SpatialIndex::with_options(&mesh, wrong_bins).is_err());

        let zero_bins = IndexOptions::default().with_bins(&[2, 0]);
        assert!(SpatialIndex::with_options(&mesh, zero_bins).is_err());

        let negative_radius = IndexOptions::default().with_max_search_radius(-1.);
        assert!(SpatialIndex::with_options(&mesh, negative_radius).is_err());

        Ok(())
    }

    fn single_element_in_3x3_bins() -> Result<Mesh<QElement>> {
        Mesh::grid(1., 2., 1., 2., 1, 1)
    }

    #[test]
    fn diffusion_fills_the_empty_bins() -> Result<()> {
        let mesh = single_element_in_3x3_bins()?;
        let options = IndexOptions::default()
            .with_extents(square_extents(0., 3.))
            .with_bins(&[3, 3]);
        let mut index = SpatialIndex::with_options(&mesh, options)?;
        assert_eq!(index.grid().non_empty_count(), 1);
        assert_eq!(index.bin_content(4).len(), 25);

        let filled = index.fill_bin_by_diffusion(1);

        assert_eq!(filled, 8);
        for bin in 0..9 {
            assert_eq!(index.bin_content(bin), index.bin_content(4));
        }
        assert_eq!(index.locate_zeta(&[1.5, 1.5]).unwrap().element, ElementId(0));
        assert_eq!(index.locate_zeta(&[0.5, 0.5]), None);

        Ok(())
    }

    #[test]
    fn diffusion_is_idempotent() -> Result<()> {
        let mesh = single_element_in_3x3_bins()?;
        let options = IndexOptions::default()
            .with_extents(square_extents(0., 3.))
            .with_bins(&[3, 3])
            .with_diffusion(1);
        let mut index = SpatialIndex::with_options(&mesh, options)?;
        let once = contents(&index);

        assert_eq!(index.fill_bin_by_diffusion(1), 0);

        assert_eq!(contents(&index), once);
        assert_eq!(index.grid().non_empty_count(), 9);

        Ok(())
    }

    #[test]
    fn flush_and_rebuild() -> Result<()> {
        let mesh = Mesh::triangulated_grid(0., 1., 0., 2., 3, 4)?;
        let mut index = SpatialIndex::new(&mesh)?;
        let before = contents(&index);
        let nbin = index.nbin().to_vec();

        index.flush_bins_of_objects();
        assert!(!index.grid().is_allocated());
        assert!(index.bin_content(0).is_empty());
        assert_eq!(index.locate_zeta(&[0.5, 0.5]), None);

        index.create_bins_of_objects();
        assert_eq!(index.nbin(), &nbin[..]);
        assert_eq!(contents(&index), before);
        assert!(index.locate_zeta(&[0.5, 0.5]).is_some());

        Ok(())
    }

    fn one_element_in_4x4_bins(radius: f64) -> IndexOptions {
        IndexOptions::default()
            .with_samples_per_axis(1)
            .with_extents(square_extents(0., 4.))
            .with_bins(&[4, 4])
            .with_max_search_radius(radius)
    }

    #[test]
    fn search_stops_at_the_maximum_radius() -> Result<()> {
        let mesh = Mesh::grid(0., 4., 0., 4., 1, 1)?;
        let index = SpatialIndex::with_options(&mesh, one_element_in_4x4_bins(0.5))?;
        // The only sample is at the centre of the element
        assert_eq!(index.bin_content(10).len(), 1);

        assert_eq!(index.locate_zeta(&[0.25, 0.25]), None);
        assert_eq!(index.spiral_levels(), Some((0, 0)));

        Ok(())
    }

    #[test]
    fn unbounded_search_spirals_outwards() -> Result<()> {
        let mesh = Mesh::grid(0., 4., 0., 4., 1, 1)?;
        let index = SpatialIndex::with_options(&mesh, one_element_in_4x4_bins(f64::INFINITY))?;
        assert_eq!(index.current_min_spiral_level(), None);

        let location = index.locate_zeta(&[0.25, 0.25]).unwrap();

        assert_eq!(location.element, ElementId(0));
        assert_close(&location.s, &[-0.875, -0.875]);
        assert_eq!(index.current_max_spiral_level(), Some(2));

        index.locate_zeta(&[2.5, 2.5]).unwrap();
        assert_eq!(index.spiral_levels(), Some((0, 2)));

        Ok(())
    }

    #[test]
    fn nested_search_is_limited_to_the_first_levels() -> Result<()> {
        let mesh = Mesh::grid(0., 4., 0., 4., 1, 1)?;
        let index = SpatialIndex::with_options(&mesh, one_element_in_4x4_bins(f64::INFINITY))?;

        assert_eq!(index.spiraling_locate_zeta(&[0.25, 0.25], true), None);
        assert!(index.spiraling_locate_zeta(&[1.25, 1.25], true).is_some());

        Ok(())
    }

    #[test]
    fn changing_the_search_radius() -> Result<()> {
        let mesh = Mesh::grid(0., 4., 0., 4., 1, 1)?;
        let mut index = SpatialIndex::with_options(&mesh, one_element_in_4x4_bins(0.5))?;
        assert_eq!(index.max_search_radius(), 0.5);

        index.set_max_search_radius(f64::INFINITY);

        assert!(index.locate_zeta(&[0.25, 0.25]).is_some());

        Ok(())
    }

    #[test]
    fn positions_at_previous_timesteps() -> Result<()> {
        let mut mesh = Mesh::grid(0., 1., 0., 1., 1, 1)?;
        let shifted = (0..4)
            .map(|node| {
                let zeta = mesh[ElementId(0)].node_zeta(node);
                smallvec![zeta[0] + 10., zeta[1]]
            })
            .collect();
        mesh.get_mut(ElementId(0)).unwrap().push_positions(shifted)?;
        let index = SpatialIndex::new(&mesh)?;

        assert_close(&index.position(&[0.5, 0.25])?, &[10.5, 0.25]);
        assert_close(&index.position_at(1, &[0.5, 0.25])?, &[0.5, 0.25]);
        assert_eq!(
            index.position_at(2, &[0.5, 0.25]),
            Err(LocateError::TimestepUnavailable { t: 2 })
        );
        assert_eq!(
            index.position(&[5., 5.]),
            Err(LocateError::NotFound {
                zeta: smallvec![5., 5.]
            })
        );

        Ok(())
    }

    #[test]
    fn derivative_is_not_available() -> Result<()> {
        let mesh = Mesh::grid(0., 1., 0., 1., 1, 1)?;
        let index = SpatialIndex::new(&mesh)?;

        assert_eq!(
            index.dposition(&[0.5, 0.5]),
            Err(LocateError::DerivativeNotImplemented)
        );

        Ok(())
    }

    #[test]
    fn locate_in_a_cube() -> Result<()> {
        let mesh = Mesh::cube_grid([0.; 3], [1.; 3], [2, 2, 2])?;
        let index = SpatialIndex::new(&mesh)?;

        let location = index.locate_zeta(&[0.75, 0.25, 0.75]).unwrap();

        assert_eq!(location.element, ElementId(5));
        assert_close(&location.s, &[0., 0., 0.]);
        assert!(index.nbin_z().is_some());
        assert!((index.z_max().unwrap() - 1.01).abs() < 1e-12);
        assert_eq!(index.locate_zeta(&[0.5, 0.5, 1.5]), None);

        Ok(())
    }

    #[test]
    fn curve_parametrised_by_arc_length() -> Result<()> {
        let n = 8;
        let angle = |i: usize| 2. * PI * i as f64 / n as f64;
        let point = |a: f64| [a.cos(), a.sin()];
        let elements = (0..n)
            .map(|i| {
                let (a, b) = (angle(i), angle(i + 1));
                QElement::segment([a, b], &point(a), &point(b))
            })
            .collect::<Result<_>>()?;
        let mesh = Mesh::new(elements);
        let index = SpatialIndex::new(&mesh)?;

        let zeta = PI / 8.;
        let position = index.position(&[zeta])?;

        assert_eq!(index.nlagrangian(), 1);
        assert_eq!(index.neulerian(), 2);
        assert_eq!(index.locate_zeta(&[zeta]).unwrap().element, ElementId(0));
        let chord_midpoint = [(1. + (PI / 4.).cos()) / 2., (PI / 4.).sin() / 2.];
        assert_close(&position, &chord_midpoint);
        assert_eq!(index.locate_zeta(&[7.]), None);

        Ok(())
    }

    #[test]
    fn parallel_and_sequential_queries_agree() -> Result<()> {
        let mesh = Mesh::triangulated_grid(0., 1., 0., 1., 10, 10)?;
        let index = SpatialIndex::new(&mesh)?;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let points: Vec<[f64; 2]> = (0..500).map(|_| [rng.gen(), rng.gen()]).collect();

        let elements = |locations: Vec<Option<Location>>| -> Vec<Option<ElementId>> {
            locations.into_iter().map(|l| l.map(|l| l.element)).collect()
        };
        let parallel = elements(index.par_locate_many(&points));
        let sequential = elements(index.locate_many(&points));

        assert_eq!(parallel, sequential);
        assert!(sequential.iter().all(Option::is_some));

        Ok(())
    }

    #[test]
    fn output_bin_vertices() -> Result<()> {
        let mesh = Mesh::grid(0., 1., 0., 1., 2, 2)?;
        let options = IndexOptions::default().with_bins(&[2, 2]);
        let index = SpatialIndex::with_options(&mesh, options)?;
        let mut out = Vec::new();

        index.output_bin_vertices(&mut out, &[0., 0.])?;

        let out = String::from_utf8(out)?;
        let lines = out.lines().collect_vec();
        assert_eq!(lines.len(), 4 * 5);
        assert_eq!(lines[0], "ZONE I=2, J=2");
        assert_eq!(lines[1].split_whitespace().count(), 3);

        Ok(())
    }

    #[test]
    fn output_bins() -> Result<()> {
        let mesh = Mesh::grid(0., 1., 0., 1., 2, 2)?;
        let options = IndexOptions::default()
            .with_bins(&[2, 2])
            .with_samples_per_axis(2);
        let index = SpatialIndex::with_options(&mesh, options)?;
        let mut out = Vec::new();

        index.output_bins(&mut out)?;

        let out = String::from_utf8(out)?;
        assert_eq!(out.lines().count(), 16);
        for line in out.lines() {
            let fields = line.split_whitespace().collect_vec();
            assert_eq!(fields.len(), 3);
            let zeta = [fields[0].parse::<f64>()?, fields[1].parse::<f64>()?];
            assert_eq!(index.get_bin(&zeta), Some(fields[2].parse::<usize>()?));
        }

        Ok(())
    }

    #[test]
    fn output_bins_to_a_missing_directory_fails() -> Result<()> {
        let mesh = Mesh::grid(0., 1., 0., 1., 1, 1)?;
        let index = SpatialIndex::new(&mesh)?;

        assert!(index
            .output_bins_to_file("/nonexistent-directory/bins.dat")
            .is_err());

        Ok(())
    }

    #[test]
    fn geom_data() -> Result<()> {
        let mesh = Mesh::grid(0., 1., 0., 1., 1, 1)?;
        let mut index = SpatialIndex::new(&mesh)?;
        assert_eq!(index.ngeom_data(), 0);

        index.add_geom_data(ShapeDependency(7));
        index.add_geom_data(ShapeDependency(3));

        assert_eq!(index.ngeom_data(), 2);
        assert_eq!(index.geom_data(1), Some(ShapeDependency(3)));
        assert_eq!(index.geom_data(2), None);

        Ok(())
    }

    #[test]
    fn elements_of_another_dimension_are_skipped() -> Result<()> {
        let mesh = Mesh::new(vec![
            QElement::new(vec![
                smallvec![0., 0.],
                smallvec![1., 0.],
                smallvec![0., 1.],
                smallvec![1., 1.],
            ])?,
            QElement::new(vec![smallvec![0.], smallvec![1.]])?,
        ]);
        let index = SpatialIndex::new(&mesh)?;

        let total: usize = contents(&index).iter().map(Vec::len).sum();

        assert_eq!(total, 25);

        Ok(())
    }

    proptest! {
        #[test]
        fn located_element_contains_the_point(x in 0.0..1.0f64, y in 0.0..1.0f64) {
            let mesh = Mesh::triangulated_grid(0., 1., 0., 1., 6, 4).unwrap();
            let index = SpatialIndex::new(&mesh).unwrap();
            let reference = LinearScanLocator::new(&mesh);

            let location = index.locate_zeta(&[x, y]).unwrap();

            prop_assert!(reference.locate_one(&[x, y]).is_some());
            let element: &Triangle = &mesh[location.element];
            prop_assert!(element.locate_zeta(&[x, y], &location.s).is_some());
            prop_assert!(distance(&element.interpolated_zeta(&location.s), &[x, y]) < 1e-10);
        }
    }
}
