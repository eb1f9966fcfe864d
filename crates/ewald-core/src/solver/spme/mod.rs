//! Smooth particle mesh Ewald (SPME).
//!
//! The reciprocal sum is evaluated on a regular mesh instead of over explicit
//! wave vectors:
//!
//! 1. Spread charges onto a $K^3$ mesh with centred cubic B-splines.
//! 2. Inverse FFT the mesh charge $Q \to \tilde Q$.
//! 3. $E_{rec} = \frac{1}{2}\sum_m BC(m)\,|\tilde Q(m)|^2$.
//! 4. Forward FFT $BC \cdot \tilde Q$; its real part is the potential mesh
//!    $\theta$.
//! 5. Gather potentials and forces back at the particles from $\theta$ with
//!    the same B-splines and their derivatives.
//!
//! Every rank spreads its own particles; the mesh charge is all-reduced so
//! each rank holds the full mesh and transforms it locally.

pub mod bspline;
pub mod mesh;

use std::sync::Arc;

use ewald_compute::{create_fft_backend, Communicator, FftPlan};
use num_complex::Complex64;
use rayon::prelude::*;

use super::{EnergyBreakdown, LongRangeSolver, Pipeline, SolverError, SolverOptions};
use crate::periodic::Domain;
use crate::tuning;
use crate::types::{Contributions, EwaldParams, ParticleSystem, ParticleView};
use mesh::{InfluenceFunction, Mesh, MIN_WIDTH};

/// Ewald summation with a mesh-based reciprocal sum. Requires a cubic domain.
pub struct SpmeSolver {
    pipeline: Pipeline,
    width: usize,
    influence: InfluenceFunction,
    plan: Box<dyn FftPlan>,
    device: String,
}

impl SpmeSolver {
    /// Build a solver for fixed parameters.
    ///
    /// # Arguments
    ///
    /// * `params` - Screening parameter and cutoffs. `k_max` is not used by
    ///   the mesh sum; the mesh width bounds the reciprocal sum instead.
    /// * `domain` - Global periodic box; must be cubic.
    /// * `options` - Half neighbor list flag, mesh width and FFT backend.
    /// * `comm` - Collectives over the participating ranks.
    pub fn new(
        params: EwaldParams,
        domain: Domain,
        options: SolverOptions,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, SolverError> {
        let length = domain.cubic_length()?;
        let pipeline = Pipeline::new(params, domain, &options, comm)?;

        let width = options.mesh_width.unwrap_or_else(|| {
            Mesh::suggested_width(params.alpha, length, tuning::implied_accuracy(&params))
        });
        if !(MIN_WIDTH..=tuning::MAX_MESH_WIDTH).contains(&width) {
            return Err(SolverError::InvalidParameter(format!(
                "mesh width must lie in {}..={}, got {}",
                MIN_WIDTH,
                tuning::MAX_MESH_WIDTH,
                width
            )));
        }

        let backend = create_fft_backend(options.fft_backend)?;
        let device = backend.device_info().name;
        let plan = backend.plan(width)?;
        let influence = InfluenceFunction::new(width, length, params.alpha);
        log::info!(
            "SPME solver: α = {:.6}, r_max = {:.6}, mesh {}³ (h = {:.4}) on {}",
            params.alpha,
            params.r_max,
            width,
            length / width as f64,
            device
        );
        Ok(Self {
            pipeline,
            width,
            influence,
            plan,
            device,
        })
    }

    /// Build a solver with parameters tuned for `accuracy` and `n` particles.
    ///
    /// Without an explicit mesh width in `options` the width is derived from
    /// the same accuracy.
    pub fn tuned(
        accuracy: f64,
        n: usize,
        domain: Domain,
        options: SolverOptions,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, SolverError> {
        let params = tuning::tune(accuracy, n, &domain)?;
        let length = domain.cubic_length()?;
        let options = SolverOptions {
            mesh_width: options
                .mesh_width
                .or_else(|| Some(Mesh::suggested_width(params.alpha, length, accuracy))),
            ..options
        };
        Self::new(params, domain, options, comm)
    }

    pub fn mesh_width(&self) -> usize {
        self.width
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Spread, transform, convolve and gather for the local particles.
    fn reciprocal(&self, view: &ParticleView<'_>) -> Result<(Contributions, f64), SolverError> {
        let domain = self.pipeline.domain();
        let mut mesh = Mesh::new(domain, self.width)?;
        mesh.spread(view);
        self.pipeline.comm().all_reduce_sum(&mut mesh.charge)?;
        log::debug!(
            "spread {} charges onto {}³ mesh (net {:.3e})",
            view.n_local,
            self.width,
            mesh.total_charge()
        );

        mesh.amplitude = mesh.charge.iter().map(|&q| Complex64::new(q, 0.0)).collect();
        self.plan.inverse(&mut mesh.amplitude)?;
        let energy = self.influence.energy(&mesh.amplitude);
        self.influence.apply(&mut mesh.amplitude);
        self.plan.forward(&mut mesh.amplitude)?;
        let theta: Vec<f64> = mesh.amplitude.iter().map(|a| a.re).collect();

        let inv_h = 1.0 / mesh.spacing();
        let per_particle: Vec<(f64, [f64; 3])> = (0..view.n_local)
            .into_par_iter()
            .map(|i| {
                let q = view.charges[i];
                let mut phi = 0.0;
                let mut grad = [0.0; 3];
                mesh.for_each_stencil_point(view.positions[i], |idx, w, dw| {
                    let t = theta[idx];
                    phi += t * w;
                    grad[0] += t * dw[0];
                    grad[1] += t * dw[1];
                    grad[2] += t * dw[2];
                });
                let s = -q * inv_h;
                (0.5 * q * phi, [s * grad[0], s * grad[1], s * grad[2]])
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

impl LongRangeSolver for SpmeSolver {
    fn compute(&self, system: &mut ParticleSystem) -> Result<EnergyBreakdown, SolverError> {
        self.pipeline.domain().cubic_length()?;
        self.pipeline.evaluate(system, |view| self.reciprocal(view))
    }

    fn name(&self) -> &str {
        "SPME"
    }

    fn params(&self) -> &EwaldParams {
        self.pipeline.params()
    }
}
