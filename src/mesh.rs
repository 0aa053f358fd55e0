use std::ops::Index;

use anyhow::{anyhow, ensure, Result};
use itertools::Itertools;
use smallvec::smallvec;

use crate::element::{Element, FromNodes, QElement, Triangle};
use crate::geometry::Coord;

/// Handle to an element of a [`Mesh`].
///
/// This is a plain index into the element storage of the mesh: it does not own the element
/// and is only meaningful for the mesh that handed it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(pub usize);

/// A collection of elements.
///
/// The mesh owns its elements. Spatial indices borrow the mesh, so a mesh cannot be modified
/// while an index built on it is alive.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh<E> {
    elements: Vec<E>,
}

impl<E> Default for Mesh<E> {
    fn default() -> Self {
        Self {
            elements: Vec::new(),
        }
    }
}

impl<E: Element> Mesh<E> {
    /// Creates a mesh from a vector of elements.
    pub fn new(elements: Vec<E>) -> Self {
        Self { elements }
    }

    /// Adds an element and returns its handle.
    pub fn push(&mut self, element: E) -> ElementId {
        self.elements.push(element);
        ElementId(self.elements.len() - 1)
    }

    /// Number of elements.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Returns `true` if the mesh has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Returns the element with handle `id`, if it exists.
    pub fn get(&self, id: ElementId) -> Option<&E> {
        self.elements.get(id.0)
    }

    /// Returns a mutable reference to the element with handle `id`, if it exists.
    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut E> {
        self.elements.get_mut(id.0)
    }

    /// An iterator over the elements and their handles.
    pub fn elements(&self) -> impl Iterator<Item = (ElementId, &E)> + '_ {
        self.elements
            .iter()
            .enumerate()
            .map(|(idx, element)| (ElementId(idx), element))
    }
}

impl<E> Index<ElementId> for Mesh<E> {
    type Output = E;

    fn index(&self, id: ElementId) -> &Self::Output {
        &self.elements[id.0]
    }
}

impl<E: Element + FromNodes> Mesh<E> {
    /// Creates a mesh from nodal coordinates and a connectivity array in which every element
    /// has `stride` nodes.
    ///
    /// Fails if the connectivity is not a whole number of elements, if it refers to a
    /// non-existent node, or if an element cannot be built from its nodes.
    pub fn with_stride<P: AsRef<[f64]>>(
        points: &[P],
        cells: &[usize],
        stride: usize,
    ) -> Result<Self> {
        ensure!(stride > 0, "The stride must be positive.");
        ensure!(
            cells.len() % stride == 0,
            "The connectivity has {} entries, which is not a multiple of the stride {}.",
            cells.len(),
            stride
        );
        Self::with_offsets(
            points,
            cells,
            &(0..=cells.len()).step_by(stride).collect_vec(),
        )
    }

    /// Creates a mesh from nodal coordinates and a connectivity array in which element `i`
    /// uses the nodes `cells[offsets[i]..offsets[i + 1]]`.
    pub fn with_offsets<P: AsRef<[f64]>>(
        points: &[P],
        cells: &[usize],
        offsets: &[usize],
    ) -> Result<Self> {
        ensure!(
            offsets.first() == Some(&0) && offsets.last() == Some(&cells.len()),
            "Offsets must start at 0 and end at the length of the connectivity."
        );
        ensure!(
            offsets.iter().tuple_windows().all(|(a, b)| a < b),
            "Offsets must be strictly increasing."
        );
        let elements = offsets
            .iter()
            .tuple_windows()
            .map(|(&start, &end)| {
                let nodes = cells[start..end]
                    .iter()
                    .map(|&idx| {
                        points
                            .get(idx)
                            .map(|p| Coord::from_slice(p.as_ref()))
                            .ok_or(anyhow!("Node with index {} does not exist.", idx))
                    })
                    .collect::<Result<Vec<_>>>()?;
                E::from_nodes(&nodes)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(elements))
    }
}

fn breakpoints(min: f64, max: f64, n: usize) -> Vec<f64> {
    let h = (max - min) / n as f64;
    (0..=n).map(|i| min + i as f64 * h).collect()
}

impl Mesh<QElement> {
    /// Creates a mesh of `n` segments uniformly covering `[min, max]`.
    pub fn line(min: f64, max: f64, n: usize) -> Result<Self> {
        ensure!(n > 0 && min < max, "Invalid line parameters.");
        let x = breakpoints(min, max, n);
        let elements = x
            .iter()
            .tuple_windows()
            .map(|(&a, &b)| QElement::new(vec![smallvec![a], smallvec![b]]))
            .collect::<Result<_>>()?;
        Ok(Self::new(elements))
    }

    /// Creates a structured mesh of `nx * ny` quadrilaterals covering
    /// `[xmin, xmax] x [ymin, ymax]`.
    ///
    /// The elements are numbered first from left to right, and then from bottom to top, i.e.
    /// element `0` is the bottom-left one and element `nx * ny - 1` the top-right one.
    pub fn grid(xmin: f64, xmax: f64, ymin: f64, ymax: f64, nx: usize, ny: usize) -> Result<Self> {
        ensure!(
            nx > 0 && ny > 0 && xmin < xmax && ymin < ymax,
            "Invalid grid parameters."
        );
        let x = breakpoints(xmin, xmax, nx);
        let y = breakpoints(ymin, ymax, ny);
        let mut elements = Vec::with_capacity(nx * ny);
        for (y0, y1) in y.iter().tuple_windows() {
            for (x0, x1) in x.iter().tuple_windows() {
                elements.push(QElement::new(vec![
                    smallvec![*x0, *y0],
                    smallvec![*x1, *y0],
                    smallvec![*x0, *y1],
                    smallvec![*x1, *y1],
                ])?);
            }
        }
        Ok(Self::new(elements))
    }

    /// Creates a structured mesh of `n[0] * n[1] * n[2]` hexahedra covering the box
    /// `[min, max]`, numbered with `x` varying fastest and `z` slowest.
    pub fn cube_grid(min: [f64; 3], max: [f64; 3], n: [usize; 3]) -> Result<Self> {
        ensure!(
            (0..3).all(|axis| n[axis] > 0 && min[axis] < max[axis]),
            "Invalid grid parameters."
        );
        let ticks: Vec<_> = (0..3)
            .map(|axis| breakpoints(min[axis], max[axis], n[axis]))
            .collect();
        let mut elements = Vec::with_capacity(n.iter().product());
        for k in 0..n[2] {
            for j in 0..n[1] {
                for i in 0..n[0] {
                    let nodes = (0..8)
                        .map(|node: usize| {
                            let corner = [i + (node & 1), j + ((node >> 1) & 1), k + (node >> 2)];
                            (0..3).map(|axis| ticks[axis][corner[axis]]).collect()
                        })
                        .collect();
                    elements.push(QElement::new(nodes)?);
                }
            }
        }
        Ok(Self::new(elements))
    }
}

impl Mesh<Triangle> {
    /// Creates a structured mesh of `2 * nx * ny` triangles covering
    /// `[xmin, xmax] x [ymin, ymax]`, each rectangle of the grid being split along its
    /// diagonal from bottom-left to top-right.
    pub fn triangulated_grid(
        xmin: f64,
        xmax: f64,
        ymin: f64,
        ymax: f64,
        nx: usize,
        ny: usize,
    ) -> Result<Self> {
        ensure!(
            nx > 0 && ny > 0 && xmin < xmax && ymin < ymax,
            "Invalid grid parameters."
        );
        let x = breakpoints(xmin, xmax, nx);
        let y = breakpoints(ymin, ymax, ny);
        let mut elements = Vec::with_capacity(2 * nx * ny);
        for (&y0, &y1) in y.iter().tuple_windows() {
            for (&x0, &x1) in x.iter().tuple_windows() {
                elements.push(Triangle::new([[x0, y0], [x1, y0], [x1, y1]]));
                elements.push(Triangle::new([[x0, y0], [x1, y1], [x0, y1]]));
            }
        }
        Ok(Self::new(elements))
    }
}
