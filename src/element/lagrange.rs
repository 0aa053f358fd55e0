use anyhow::{anyhow, ensure, Result};
use smallvec::SmallVec;

use super::{Element, FromNodes, LOCATE_TOLERANCE};
use crate::geometry::{distance, solve_linear_system, Coord, MAX_DIM};

const MAX_NODES: usize = 1 << MAX_DIM;
const MAX_NEWTON_ITERATIONS: usize = 20;
const NEWTON_TOLERANCE: f64 = 1e-12;
// Give up on Newton iterations that wander this far outside the reference domain.
const DIVERGENCE_BOUND: f64 = 10.;

/// A multilinear (Q1) tensor-product Lagrange element with `2^d` nodes, `d` in `1..=3`.
///
/// The local coordinates live in `[-1, 1]^d`. Nodes are numbered in tensor order: bit `i` of
/// the node number is set if the node sits at `s_i = +1`. In 2D this means
///
/// ```text
///     2 ----- 3
///     |       |
///     |       |
///     0 ----- 1
/// ```
///
/// The intrinsic coordinates of the nodes are fixed at construction. Physical positions are
/// stored separately, with a history of previous timesteps, and may live in a space of higher
/// dimension (e.g. a segment parametrising a curve in the plane).
#[derive(Debug, Clone, PartialEq)]
pub struct QElement {
    dim: usize,
    zeta: Vec<Coord>,
    positions: Vec<Vec<Coord>>,
}

impl QElement {
    /// Creates an element whose nodal positions coincide with its intrinsic coordinates.
    ///
    /// Fails if the number of nodes is not `2^d` with `d` in `1..=3`, or if some node does not
    /// have exactly `d` coordinates.
    pub fn new(nodes: Vec<Coord>) -> Result<Self> {
        Self::with_positions(nodes.clone(), nodes)
    }

    /// Creates an element with distinct intrinsic coordinates and physical positions.
    ///
    /// The positions must all have the same dimension, at least the dimension of the element.
    pub fn with_positions(zeta: Vec<Coord>, positions: Vec<Coord>) -> Result<Self> {
        let dim = match zeta.len() {
            2 => 1,
            4 => 2,
            8 => 3,
            n => return Err(anyhow!("A Q1 element needs 2, 4 or 8 nodes, got {}.", n)),
        };
        ensure!(
            zeta.iter().all(|z| z.len() == dim),
            "All intrinsic coordinates of a {}D element must have {} components.",
            dim,
            dim
        );
        ensure!(
            positions.len() == zeta.len(),
            "Expected {} nodal positions, got {}.",
            zeta.len(),
            positions.len()
        );
        let eulerian_dim = positions[0].len();
        ensure!(
            eulerian_dim >= dim && positions.iter().all(|x| x.len() == eulerian_dim),
            "Nodal positions must all have the same dimension, at least {}.",
            dim
        );
        Ok(Self {
            dim,
            zeta,
            positions: vec![positions],
        })
    }

    /// Creates a two-node segment with scalar intrinsic coordinates `zeta` whose end points are
    /// at positions `x0` and `x1`.
    pub fn segment(zeta: [f64; 2], x0: &[f64], x1: &[f64]) -> Result<Self> {
        Self::with_positions(
            vec![Coord::from_slice(&zeta[..1]), Coord::from_slice(&zeta[1..])],
            vec![x0.into(), x1.into()],
        )
    }

    /// Makes `positions` the current nodal positions, shifting the previous ones one timestep
    /// back into the history.
    pub fn push_positions(&mut self, positions: Vec<Coord>) -> Result<()> {
        let eulerian_dim = self.eulerian_dim();
        ensure!(
            positions.len() == self.zeta.len() && positions.iter().all(|x| x.len() == eulerian_dim),
            "Expected {} nodal positions of dimension {}.",
            self.zeta.len(),
            eulerian_dim
        );
        self.positions.insert(0, positions);
        Ok(())
    }

    /// Number of timesteps for which positions are stored (current one included).
    pub fn timestep_count(&self) -> usize {
        self.positions.len()
    }

    fn sign(node: usize, axis: usize) -> f64 {
        if (node >> axis) & 1 == 1 {
            1.
        } else {
            -1.
        }
    }

    fn shape(&self, s: &[f64]) -> SmallVec<[f64; MAX_NODES]> {
        (0..self.zeta.len())
            .map(|node| {
                (0..self.dim)
                    .map(|axis| 0.5 * (1. + Self::sign(node, axis) * s[axis]))
                    .product()
            })
            .collect()
    }

    fn dshape(&self, s: &[f64]) -> SmallVec<[[f64; MAX_DIM]; MAX_NODES]> {
        (0..self.zeta.len())
            .map(|node| {
                let mut ds = [0.; MAX_DIM];
                for (k, dk) in ds.iter_mut().enumerate().take(self.dim) {
                    *dk = (0..self.dim)
                        .map(|axis| {
                            let sign = Self::sign(node, axis);
                            if axis == k {
                                0.5 * sign
                            } else {
                                0.5 * (1. + sign * s[axis])
                            }
                        })
                        .product();
                }
                ds
            })
            .collect()
    }

    fn interpolate(&self, nodal: &[Coord], s: &[f64]) -> Coord {
        let psi = self.shape(s);
        let mut value: Coord = SmallVec::from_elem(0., nodal[0].len());
        for (x, p) in nodal.iter().zip(psi) {
            for (v, xi) in value.iter_mut().zip(x) {
                *v += p * xi;
            }
        }
        value
    }

    fn diameter(&self) -> f64 {
        let first = &self.zeta[0];
        self.zeta
            .iter()
            .map(|z| distance(first, z))
            .fold(0., f64::max)
    }
}

impl FromNodes for QElement {
    fn from_nodes(nodes: &[Coord]) -> Result<Self> {
        Self::new(nodes.to_vec())
    }
}

impl Element for QElement {
    fn lagrangian_dim(&self) -> usize {
        self.dim
    }

    fn eulerian_dim(&self) -> usize {
        self.positions[0][0].len()
    }

    fn node_count(&self) -> usize {
        self.zeta.len()
    }

    fn node_zeta(&self, n: usize) -> Coord {
        self.zeta[n].clone()
    }

    fn interpolated_zeta(&self, s: &[f64]) -> Coord {
        self.interpolate(&self.zeta, s)
    }

    /// Newton iterations on the multilinear map, started from `initial_guess`.
    fn locate_zeta(&self, zeta: &[f64], initial_guess: &[f64]) -> Option<Coord> {
        let n = self.dim;
        if zeta.len() != n || initial_guess.len() != n {
            return None;
        }
        let tolerance = NEWTON_TOLERANCE * self.diameter().max(1.);
        let mut s: Coord = initial_guess.into();
        let mut converged = false;
        for _ in 0..MAX_NEWTON_ITERATIONS {
            let current = self.interpolated_zeta(&s);
            let mut residual = [0.; MAX_DIM];
            for i in 0..n {
                residual[i] = zeta[i] - current[i];
            }
            if distance(&residual[..n], &[0.; MAX_DIM][..n]) < tolerance {
                converged = true;
                break;
            }
            let mut jacobian = [[0.; MAX_DIM]; MAX_DIM];
            for (z, dpsi) in self.zeta.iter().zip(self.dshape(&s)) {
                for i in 0..n {
                    for k in 0..n {
                        jacobian[i][k] += z[i] * dpsi[k];
                    }
                }
            }
            solve_linear_system(&mut jacobian, &mut residual, n)?;
            for (si, dsi) in s.iter_mut().zip(residual) {
                *si += dsi;
            }
            if s.iter().any(|si| !si.is_finite() || si.abs() > DIVERGENCE_BOUND) {
                return None;
            }
        }
        let inside = s.iter().all(|si| si.abs() <= 1. + LOCATE_TOLERANCE);
        (converged && inside).then_some(s)
    }

    fn position(&self, t: usize, s: &[f64]) -> Option<Coord> {
        let nodal = self.positions.get(t)?;
        Some(self.interpolate(nodal, s))
    }
}
