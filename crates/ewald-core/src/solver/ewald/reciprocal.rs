//! Reciprocal-space sum over explicit wave vectors.
//!
//! For wave vectors $\mathbf{k} = 2\pi (n_x/L_x, n_y/L_y, n_z/L_z)$ with
//! $0 < |\mathbf{k}| \le k_{max}$ the structure factor
//! $S(\mathbf{k}) = \sum_i q_i e^{i \mathbf{k}\cdot\mathbf{r}_i}$ gives
//!
//! $$ E_{rec} = \frac{1}{2} \frac{4\pi}{V} \sum_{\mathbf{k}}
//!    \frac{e^{-k^2/4\alpha^2}}{k^2} |S(\mathbf{k})|^2 . $$
//!
//! Each rank sums `Re S` and `Im S` over its own particles; the partial sums
//! are then all-reduced so every rank holds the global structure factor.

use ewald_compute::Communicator;
use rayon::prelude::*;

use crate::periodic::Domain;
use crate::solver::SolverError;
use crate::types::{Contributions, EwaldParams, ParticleView};

/// Precomputed wave vectors and their Gaussian weights.
#[derive(Debug, Clone)]
pub struct WaveVectors {
    vectors: Vec<[f64; 3]>,
    /// $e^{-k^2/4\alpha^2} / k^2$ per vector.
    weights: Vec<f64>,
    /// $4\pi / V$.
    coeff: f64,
    bounds: [i64; 3],
}

impl WaveVectors {
    pub fn new(params: &EwaldParams, domain: &Domain) -> Self {
        let lengths = domain.lengths();
        let two_pi = 2.0 * std::f64::consts::PI;
        let mut bounds = [0i64; 3];
        for d in 0..3 {
            bounds[d] = (params.k_max * lengths[d] / two_pi).ceil() as i64;
        }

        let k_max_sq = params.k_max * params.k_max;
        let inv_4a2 = 1.0 / (4.0 * params.alpha * params.alpha);
        let mut vectors = Vec::new();
        let mut weights = Vec::new();
        for nx in -bounds[0]..=bounds[0] {
            for ny in -bounds[1]..=bounds[1] {
                for nz in -bounds[2]..=bounds[2] {
                    if nx == 0 && ny == 0 && nz == 0 {
                        continue;
                    }
                    let k = [
                        two_pi * nx as f64 / lengths[0],
                        two_pi * ny as f64 / lengths[1],
                        two_pi * nz as f64 / lengths[2],
                    ];
                    let k2 = k[0] * k[0] + k[1] * k[1] + k[2] * k[2];
                    if k2 > k_max_sq {
                        continue;
                    }
                    vectors.push(k);
                    weights.push((-k2 * inv_4a2).exp() / k2);
                }
            }
        }
        log::debug!(
            "{} wave vectors within |k| <= {:.4} (bounds {:?})",
            vectors.len(),
            params.k_max,
            bounds
        );
        Self {
            vectors,
            weights,
            coeff: 4.0 * std::f64::consts::PI / domain.volume(),
            bounds,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Largest integer index per axis.
    pub fn bounds(&self) -> [i64; 3] {
        self.bounds
    }

    /// Structure factor partial sums over the local particles, flattened as
    /// `[Re₀, Im₀, Re₁, Im₁, ...]`.
    pub fn structure_factor(&self, view: &ParticleView<'_>) -> Vec<f64> {
        let n_k = self.len();
        (0..view.n_local)
            .into_par_iter()
            .fold(
                || vec![0.0; 2 * n_k],
                |mut sums, i| {
                    let r = view.positions[i];
                    let q = view.charges[i];
                    for (kk, k) in self.vectors.iter().enumerate() {
                        let (s, c) = dot(k, &r).sin_cos();
                        sums[2 * kk] += q * c;
                        sums[2 * kk + 1] += q * s;
                    }
                    sums
                },
            )
            .reduce(
                || vec![0.0; 2 * n_k],
                |mut a, b| {
                    a.iter_mut().zip(&b).for_each(|(x, y)| *x += y);
                    a
                },
            )
    }

    /// Evaluate the reciprocal sum for the local particles.
    ///
    /// Blocks in an all-reduce of the structure factor. Returns the local
    /// contributions and the global reciprocal energy, in vacuum units.
    pub fn compute(
        &self,
        view: &ParticleView<'_>,
        comm: &dyn Communicator,
    ) -> Result<(Contributions, f64), SolverError> {
        let mut sums = self.structure_factor(view);
        comm.all_reduce_sum(&mut sums)?;

        let energy = 0.5
            * self.coeff
            * self
                .weights
                .iter()
                .enumerate()
                .map(|(kk, w)| w * (sums[2 * kk].powi(2) + sums[2 * kk + 1].powi(2)))
                .sum::<f64>();

        let per_particle: Vec<(f64, [f64; 3])> = (0..view.n_local)
            .into_par_iter()
            .map(|i| {
                let r = view.positions[i];
                let q = view.charges[i];
                let mut phi = 0.0;
                let mut f = [0.0; 3];
                for (kk, k) in self.vectors.iter().enumerate() {
                    let (s, c) = dot(k, &r).sin_cos();
                    let re = sums[2 * kk];
                    let im = sums[2 * kk + 1];
                    let w = self.weights[kk];
                    phi += w * (re * c + im * s);
                    let g = w * (re * s - im * c);
                    f[0] += g * k[0];
                    f[1] += g * k[1];
                    f[2] += g * k[2];
                }
                (
                    0.5 * self.coeff * q * phi,
                    [self.coeff * q * f[0], self.coeff * q * f[1], self.coeff * q * f[2]],
                )
            })
            .collect();

        let mut contributions = Contributions::zeros(view.n_local);
        for (i, (phi, f)) in per_particle.into_iter().enumerate() {
            contributions.add_potential(i, phi);
            contributions.add_force(i, f);
        }
        Ok((contributions, energy))
    }
}

#[inline]
fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}
