use anyhow::{ensure, Result};
use smallvec::{smallvec, SmallVec};

use super::{Element, FromNodes, LOCATE_TOLERANCE};
use crate::geometry::Coord;

/// A linear (three-node) triangle.
///
/// Local coordinates `(s0, s1)` live in the reference triangle `s0 >= 0`, `s1 >= 0`,
/// `s0 + s1 <= 1`, and the shape functions are `s0`, `s1` and `1 - s0 - s1` for nodes `0`, `1`
/// and `2` respectively. The intrinsic coordinates are two-dimensional; the physical positions
/// may be two- or three-dimensional (a facet of a surface mesh).
#[derive(Debug, Clone, PartialEq)]
pub struct Triangle {
    zeta: [[f64; 2]; 3],
    positions: Vec<[Coord; 3]>,
}

impl Triangle {
    /// Creates a triangle whose positions coincide with its intrinsic coordinates.
    pub fn new(zeta: [[f64; 2]; 3]) -> Self {
        let positions = zeta.map(|z| Coord::from_slice(&z));
        Self {
            zeta,
            positions: vec![positions],
        }
    }

    /// Creates a triangle with distinct intrinsic coordinates and physical positions.
    pub fn with_positions(zeta: [[f64; 2]; 3], positions: [Coord; 3]) -> Result<Self> {
        let eulerian_dim = positions[0].len();
        ensure!(
            (2..=3).contains(&eulerian_dim) && positions.iter().all(|x| x.len() == eulerian_dim),
            "Triangle positions must all be two- or three-dimensional."
        );
        Ok(Self {
            zeta,
            positions: vec![positions],
        })
    }

    /// Makes `positions` the current nodal positions, shifting the previous ones one timestep
    /// back into the history.
    pub fn push_positions(&mut self, positions: [Coord; 3]) -> Result<()> {
        let eulerian_dim = self.eulerian_dim();
        ensure!(
            positions.iter().all(|x| x.len() == eulerian_dim),
            "Expected nodal positions of dimension {}.",
            eulerian_dim
        );
        self.positions.insert(0, positions);
        Ok(())
    }

    fn shape(s: &[f64]) -> [f64; 3] {
        [s[0], s[1], 1. - s[0] - s[1]]
    }
}

impl FromNodes for Triangle {
    fn from_nodes(nodes: &[Coord]) -> Result<Self> {
        ensure!(
            nodes.len() == 3 && nodes.iter().all(|x| x.len() == 2),
            "A triangle needs three two-dimensional nodes."
        );
        Ok(Self::new([
            [nodes[0][0], nodes[0][1]],
            [nodes[1][0], nodes[1][1]],
            [nodes[2][0], nodes[2][1]],
        ]))
    }
}

impl Element for Triangle {
    fn lagrangian_dim(&self) -> usize {
        2
    }

    fn eulerian_dim(&self) -> usize {
        self.positions[0][0].len()
    }

    fn node_count(&self) -> usize {
        3
    }

    fn node_zeta(&self, n: usize) -> Coord {
        Coord::from_slice(&self.zeta[n])
    }

    fn interpolated_zeta(&self, s: &[f64]) -> Coord {
        let psi = Self::shape(s);
        (0..2)
            .map(|i| psi.iter().zip(&self.zeta).map(|(p, z)| p * z[i]).sum())
            .collect()
    }

    /// The map is affine, so the initial guess is not needed.
    fn locate_zeta(&self, zeta: &[f64], _initial_guess: &[f64]) -> Option<Coord> {
        if zeta.len() != 2 {
            return None;
        }
        let [z0, z1, z2] = self.zeta;
        let (a, b) = (z0[0] - z2[0], z1[0] - z2[0]);
        let (c, d) = (z0[1] - z2[1], z1[1] - z2[1]);
        let det = a * d - b * c;
        if det == 0. || !det.is_finite() {
            return None;
        }
        let (rx, ry) = (zeta[0] - z2[0], zeta[1] - z2[1]);
        let s0 = (d * rx - b * ry) / det;
        let s1 = (a * ry - c * rx) / det;
        let inside =
            s0 >= -LOCATE_TOLERANCE && s1 >= -LOCATE_TOLERANCE && s0 + s1 <= 1. + LOCATE_TOLERANCE;
        inside.then(|| smallvec![s0, s1])
    }

    fn position(&self, t: usize, s: &[f64]) -> Option<Coord> {
        let nodal = self.positions.get(t)?;
        let psi = Self::shape(s);
        let mut x: Coord = SmallVec::from_elem(0., nodal[0].len());
        for (p, node) in psi.iter().zip(nodal) {
            for (xi, ni) in x.iter_mut().zip(node) {
                *xi += p * ni;
            }
        }
        Some(x)
    }

    /// Centroids of the `n_per_axis^2` sub-triangles pointing the same way as the reference
    /// triangle, which lie strictly inside it.
    fn sample_local_coordinates(&self, n_per_axis: usize) -> Vec<Coord> {
        let n = n_per_axis.max(1);
        let h = 1. / n as f64;
        (0..n)
            .flat_map(|i| (0..n - i).map(move |j| (i, j)))
            .map(|(i, j)| smallvec![(i as f64 + 1. / 3.) * h, (j as f64 + 1. / 3.) * h])
            .collect()
    }
}
