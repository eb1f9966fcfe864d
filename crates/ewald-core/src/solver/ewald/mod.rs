//! Classical Ewald solver with an explicit reciprocal-lattice sum.
//!
//! Accurate for any orthorhombic box; cost grows with the number of wave
//! vectors inside the $k_{max}$ sphere, so it suits small systems and serves
//! as the reference for the mesh solver.

pub mod reciprocal;

use std::sync::Arc;

use ewald_compute::Communicator;

use super::{EnergyBreakdown, LongRangeSolver, Pipeline, SolverError, SolverOptions};
use crate::periodic::Domain;
use crate::tuning;
use crate::types::{EwaldParams, ParticleSystem};
use reciprocal::WaveVectors;

/// Ewald summation with direct reciprocal sum.
pub struct EwaldSolver {
    pipeline: Pipeline,
    waves: WaveVectors,
}

impl EwaldSolver {
    /// Build a solver for fixed parameters.
    ///
    /// # Arguments
    ///
    /// * `params` - Screening parameter and cutoffs.
    /// * `domain` - Global periodic box.
    /// * `options` - Must request a half neighbor list.
    /// * `comm` - Collectives over the participating ranks.
    pub fn new(
        params: EwaldParams,
        domain: Domain,
        options: SolverOptions,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, SolverError> {
        let pipeline = Pipeline::new(params, domain, &options, comm)?;
        let waves = WaveVectors::new(&params, &domain);
        log::info!(
            "Ewald solver: α = {:.6}, r_max = {:.6}, k_max = {:.6}, {} wave vectors",
            params.alpha,
            params.r_max,
            params.k_max,
            waves.len()
        );
        Ok(Self { pipeline, waves })
    }

    /// Build a solver with parameters tuned for `accuracy` and `n` particles.
    pub fn tuned(
        accuracy: f64,
        n: usize,
        domain: Domain,
        options: SolverOptions,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, SolverError> {
        let params = tuning::tune(accuracy, n, &domain)?;
        Self::new(params, domain, options, comm)
    }

    pub fn domain(&self) -> &Domain {
        self.pipeline.domain()
    }

    pub fn num_wave_vectors(&self) -> usize {
        self.waves.len()
    }
}

impl LongRangeSolver for EwaldSolver {
    fn compute(&self, system: &mut ParticleSystem) -> Result<EnergyBreakdown, SolverError> {
        let comm = self.pipeline.comm();
        self.pipeline
            .evaluate(system, |view| self.waves.compute(view, comm))
    }

    fn name(&self) -> &str {
        "Ewald"
    }

    fn params(&self) -> &EwaldParams {
        self.pipeline.params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ewald_compute::SingleProcess;

    #[test]
    fn test_potentials_sum_to_total_energy() {
        let params = EwaldParams::new(0.8, 4.0, 6.0).unwrap();
        let domain = Domain::cubic(5.0).unwrap();
        let solver =
            EwaldSolver::new(params, domain, SolverOptions::default(), Arc::new(SingleProcess)).unwrap();
        let mut system = ParticleSystem::from_parts(
            vec![[0.5, 0.5, 0.5], [2.0, 3.0, 1.0], [4.5, 4.0, 2.5], [1.0, 4.8, 4.0]],
            vec![1.0, -1.0, 0.5, -0.5],
        )
        .unwrap();
        let energy = solver.compute(&mut system).unwrap();
        assert_eq!(system.n_max(), system.n_local());
        assert_relative_eq!(system.total_potential(), energy.total(), max_relative = 1e-10);

        let net: [f64; 3] = system.forces().iter().fold([0.0; 3], |acc, f| {
            [acc[0] + f[0], acc[1] + f[1], acc[2] + f[2]]
        });
        for d in 0..3 {
            assert!(net[d].abs() < 1e-10, "net force {:?}", net);
        }
    }

    #[test]
    fn test_permittivity_scales_everything() {
        let domain = Domain::cubic(5.0).unwrap();
        let positions = vec![[1.0, 1.0, 1.0], [2.0, 1.5, 1.0]];
        let charges = vec![1.0, -1.0];
        let run = |eps_r: f64| {
            let params = EwaldParams::new(0.8, 4.0, 6.0).unwrap().with_eps_r(eps_r).unwrap();
            let solver =
                EwaldSolver::new(params, domain, SolverOptions::default(), Arc::new(SingleProcess)).unwrap();
            let mut system = ParticleSystem::from_parts(positions.clone(), charges.clone()).unwrap();
            let energy = solver.compute(&mut system).unwrap();
            (energy, system.force(0))
        };
        let (vacuum, f_vacuum) = run(1.0);
        let (water, f_water) = run(80.0);
        assert_relative_eq!(water.total() * 80.0, vacuum.total(), max_relative = 1e-12);
        assert_relative_eq!(f_water[0] * 80.0, f_vacuum[0], max_relative = 1e-12);
    }

    #[test]
    fn test_repeated_evaluations_do_not_accumulate() {
        let params = EwaldParams::new(0.8, 4.0, 6.0).unwrap();
        let domain = Domain::cubic(5.0).unwrap();
        let solver =
            EwaldSolver::new(params, domain, SolverOptions::default(), Arc::new(SingleProcess)).unwrap();
        let mut system =
            ParticleSystem::from_parts(vec![[1.0; 3], [3.0, 2.0, 1.0]], vec![1.0, -1.0]).unwrap();
        let first = solver.compute(&mut system).unwrap();
        let f_first = system.force(1);
        let second = solver.compute(&mut system).unwrap();
        assert_relative_eq!(first.total(), second.total(), max_relative = 1e-12);
        for d in 0..3 {
            assert_relative_eq!(f_first[d], system.force(1)[d], epsilon = 1e-12);
        }
    }
}
