//! Half neighbor lists for the real-space sum.
//!
//! Candidates come from a uniform cell grid over every resident particle
//! (locals and ghosts) with cells at least one cutoff wide, so the 3×3×3
//! block of cells around a particle holds all of its neighbors. The grid is
//! not periodic: periodic images are already present as ghosts.
//!
//! Only local particles get a list. A resident `j` appears in the list of
//! local `i` iff `(id_i, [0,0,0]) < (id_j, image_j)`, which selects each
//! physical pair exactly once across all ranks, including pairs between a
//! particle and its own periodic images.

use rayon::prelude::*;

use crate::solver::SolverError;
use crate::types::ParticleView;

/// Upper bound on cells per axis; past it cells simply grow.
const MAX_CELLS_PER_AXIS: usize = 128;

/// Neighbor indices of every local particle in CSR layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborList {
    offsets: Vec<usize>,
    indices: Vec<usize>,
    cutoff: f64,
}

impl NeighborList {
    /// Build the half list of all pairs closer than `cutoff` (inclusive).
    pub fn build(view: &ParticleView<'_>, cutoff: f64) -> Result<Self, SolverError> {
        if !cutoff.is_finite() || cutoff <= 0.0 {
            return Err(SolverError::InvalidParameter(format!(
                "neighbor cutoff must be positive, got {}",
                cutoff
            )));
        }
        let grid = CellGrid::new(view.positions, cutoff);
        let cutoff_sq = cutoff * cutoff;

        let lists: Vec<Vec<usize>> = (0..view.n_local)
            .into_par_iter()
            .map(|i| {
                let key_i = (view.ids[i], [0i32; 3]);
                let pi = view.positions[i];
                let mut list = Vec::new();
                grid.for_each_candidate(pi, |j| {
                    if j == i || key_i >= view.pair_key(j) {
                        return;
                    }
                    let pj = view.positions[j];
                    let d2 = (pj[0] - pi[0]).powi(2)
                        + (pj[1] - pi[1]).powi(2)
                        + (pj[2] - pi[2]).powi(2);
                    if d2 <= cutoff_sq {
                        list.push(j);
                    }
                });
                list.sort_unstable();
                list
            })
            .collect();

        let mut offsets = Vec::with_capacity(lists.len() + 1);
        offsets.push(0);
        let mut indices = Vec::with_capacity(lists.iter().map(Vec::len).sum());
        for list in lists {
            indices.extend_from_slice(&list);
            offsets.push(indices.len());
        }
        log::debug!(
            "neighbor list: {} local particles, {} pairs within {:.4}",
            view.n_local,
            indices.len(),
            cutoff
        );
        Ok(Self {
            offsets,
            indices,
            cutoff,
        })
    }

    /// Number of particles with a list.
    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_neighbors(&self, i: usize) -> usize {
        self.offsets[i + 1] - self.offsets[i]
    }

    /// `k`-th neighbor of particle `i`.
    pub fn neighbor(&self, i: usize, k: usize) -> usize {
        self.indices[self.offsets[i] + k]
    }

    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.indices[self.offsets[i]..self.offsets[i + 1]]
    }

    pub fn total_pairs(&self) -> usize {
        self.indices.len()
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }
}

/// Uniform grid binning particle indices by cell.
struct CellGrid {
    origin: [f64; 3],
    cell_size: [f64; 3],
    dims: [usize; 3],
    cell_offsets: Vec<usize>,
    sorted: Vec<usize>,
}

impl CellGrid {
    fn new(positions: &[[f64; 3]], cutoff: f64) -> Self {
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for p in positions {
            for d in 0..3 {
                lo[d] = lo[d].min(p[d]);
                hi[d] = hi[d].max(p[d]);
            }
        }
        if positions.is_empty() {
            lo = [0.0; 3];
            hi = [0.0; 3];
        }

        let mut dims = [1usize; 3];
        let mut cell_size = [cutoff; 3];
        for d in 0..3 {
            let extent = hi[d] - lo[d];
            let n = ((extent / cutoff).ceil() as usize).clamp(1, MAX_CELLS_PER_AXIS);
            dims[d] = n;
            cell_size[d] = (extent / n as f64).max(cutoff);
        }

        let mut grid = Self {
            origin: lo,
            cell_size,
            dims,
            cell_offsets: Vec::new(),
            sorted: Vec::new(),
        };

        // Counting sort of particle indices by cell.
        let total = dims[0] * dims[1] * dims[2];
        let cells: Vec<usize> = positions
            .iter()
            .map(|&p| grid.flat(grid.cell_of(p)))
            .collect();
        let mut counts = vec![0usize; total + 1];
        for &c in &cells {
            counts[c + 1] += 1;
        }
        for c in 0..total {
            counts[c + 1] += counts[c];
        }
        let mut heads = counts.clone();
        let mut sorted = vec![0usize; positions.len()];
        for (i, &c) in cells.iter().enumerate() {
            sorted[heads[c]] = i;
            heads[c] += 1;
        }
        grid.cell_offsets = counts;
        grid.sorted = sorted;
        grid
    }

    fn cell_of(&self, p: [f64; 3]) -> [usize; 3] {
        let mut c = [0usize; 3];
        for d in 0..3 {
            let f = ((p[d] - self.origin[d]) / self.cell_size[d]).floor();
            c[d] = f.max(0.0).min((self.dims[d] - 1) as f64) as usize;
        }
        c
    }

    fn flat(&self, c: [usize; 3]) -> usize {
        c[0] + c[1] * self.dims[0] + c[2] * self.dims[0] * self.dims[1]
    }

    /// Visit every particle in the 3×3×3 block of cells around `p`.
    fn for_each_candidate<F: FnMut(usize)>(&self, p: [f64; 3], mut f: F) {
        let c = self.cell_of(p);
        let range = |d: usize| c[d].saturating_sub(1)..=(c[d] + 1).min(self.dims[d] - 1);
        for z in range(2) {
            for y in range(1) {
                for x in range(0) {
                    let cell = self.flat([x, y, z]);
                    for &j in &self.sorted[self.cell_offsets[cell]..self.cell_offsets[cell + 1]] {
                        f(j);
                    }
                }
            }
        }
    }
}
