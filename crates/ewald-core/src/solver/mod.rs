//! Long-range electrostatic solvers.
//!
//! The [`LongRangeSolver`] trait defines the interface every Ewald variant
//! implements: one call evaluates the total Coulomb energy of a periodic
//! system and accumulates per-particle potentials and forces. Two variants
//! ship with the crate, selected at configuration time through
//! [`SolverKind`]:
//!
//! - [`ewald::EwaldSolver`]: explicit sum over reciprocal lattice vectors,
//!   $O(N \cdot N_k)$.
//! - [`spme::SpmeSolver`]: smooth particle mesh Ewald, $O(N + K^3 \log K)$.
//!
//! Both share the real-space and self-energy stages; only the reciprocal
//! kernel differs.

pub mod ewald;
pub mod real_space;
pub mod self_energy;
pub mod spme;

use std::sync::Arc;

use ewald_compute::{BackendType, Communicator, ComputeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decomposition::CartesianTopology;
use crate::halo::{CartesianHalo, HaloExchange};
use crate::neighbor::NeighborList;
use crate::periodic::Domain;
use crate::types::{Contributions, EwaldParams, ParticleSystem, ParticleView};

/// Net charge above which a warning is logged.
const NEUTRALITY_TOLERANCE: f64 = 1e-8;

/// Errors that can occur while configuring or running a solver.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Domain is not cubic (edge lengths {lengths:?})")]
    NonCubicDomain { lengths: [f64; 3] },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Post-condition violated: {0}")]
    PostCondition(String),

    #[error("Compute backend error: {0}")]
    Compute(#[from] ComputeError),
}

/// The core trait all periodic Coulomb solvers implement.
///
/// `compute` resets the potentials and forces of the local particles, then
/// accumulates the real-space, reciprocal and self-energy contributions.
/// After it returns the sum of local potentials over all ranks equals the
/// returned total energy.
pub trait LongRangeSolver: Send + Sync {
    /// Evaluate energy, potentials and forces for one configuration.
    fn compute(&self, system: &mut ParticleSystem) -> Result<EnergyBreakdown, SolverError>;

    /// Human-readable name of the method.
    fn name(&self) -> &str;

    /// Split parameters in use.
    fn params(&self) -> &EwaldParams;
}

/// Energy terms of one evaluation, summed over all ranks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyBreakdown {
    pub real: f64,
    pub reciprocal: f64,
    pub self_energy: f64,
}

impl EnergyBreakdown {
    pub fn total(&self) -> f64 {
        self.real + self.reciprocal + self.self_energy
    }
}

/// Construction options shared by both solvers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// Must be `true`: the real-space kernel applies Newton's third law and
    /// only accepts half neighbor lists.
    pub half_neighbor_list: bool,
    /// Mesh points per axis for SPME; derived from the parameters when `None`.
    pub mesh_width: Option<usize>,
    /// FFT backend for SPME.
    pub fft_backend: BackendType,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            half_neighbor_list: true,
            mesh_width: None,
            fft_backend: BackendType::Cpu,
        }
    }
}

/// Which reciprocal-space method to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    Ewald,
    Spme,
}

impl SolverKind {
    /// Parse a method name (`"ewald"` or `"spme"`).
    pub fn from_name(name: &str) -> Result<Self, SolverError> {
        match name.to_ascii_lowercase().as_str() {
            "ewald" => Ok(SolverKind::Ewald),
            "spme" => Ok(SolverKind::Spme),
            other => Err(SolverError::Configuration(format!(
                "Unknown method '{}'. Valid values: ewald, spme",
                other
            ))),
        }
    }
}

/// Build the solver selected by `kind`.
pub fn create_solver(
    kind: SolverKind,
    params: EwaldParams,
    domain: Domain,
    options: SolverOptions,
    comm: Arc<dyn Communicator>,
) -> Result<Box<dyn LongRangeSolver>, SolverError> {
    let solver: Box<dyn LongRangeSolver> = match kind {
        SolverKind::Ewald => Box::new(ewald::EwaldSolver::new(params, domain, options, comm)?),
        SolverKind::Spme => Box::new(spme::SpmeSolver::new(params, domain, options, comm)?),
    };
    Ok(solver)
}

// ─── Shared evaluation pipeline ─────────────────────────────────────────────

/// Real-space, self-energy and bookkeeping stages common to every solver.
///
/// The reciprocal kernel is passed in per evaluation; everything else
/// (halo exchange, neighbor list, scaling by 1/ε_r, energy reduction) lives
/// here.
pub(crate) struct Pipeline {
    params: EwaldParams,
    domain: Domain,
    halo: CartesianHalo,
    comm: Arc<dyn Communicator>,
}

impl Pipeline {
    pub(crate) fn new(
        params: EwaldParams,
        domain: Domain,
        options: &SolverOptions,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, SolverError> {
        params.validate()?;
        if !options.half_neighbor_list {
            return Err(SolverError::Configuration(
                "the real-space kernel requires a half neighbor list".into(),
            ));
        }
        let topology = CartesianTopology::new(comm.size(), comm.rank(), domain)?;
        let halo = CartesianHalo::new(topology, Arc::clone(&comm))?;
        Ok(Self {
            params,
            domain,
            halo,
            comm,
        })
    }

    pub(crate) fn params(&self) -> &EwaldParams {
        &self.params
    }

    pub(crate) fn domain(&self) -> &Domain {
        &self.domain
    }

    pub(crate) fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    /// Run one evaluation. `reciprocal` receives the local particles and
    /// returns their contributions together with the global reciprocal
    /// energy (both unscaled).
    pub(crate) fn evaluate<F>(
        &self,
        system: &mut ParticleSystem,
        reciprocal: F,
    ) -> Result<EnergyBreakdown, SolverError>
    where
        F: FnOnce(&ParticleView<'_>) -> Result<(Contributions, f64), SolverError>,
    {
        if system.n_max() != system.n_local() {
            return Err(SolverError::Configuration(
                "evaluation started with ghosts resident".into(),
            ));
        }
        system.accumulator().reset();

        let scale = self.params.coulomb_scale();
        let (recip, reciprocal_energy) = reciprocal(&system.view())?;
        let (self_terms, self_local) = self_energy::compute(&system.view(), self.params.alpha);

        let real_local = self.with_ghosts(system, |system| {
            let (real, real_local) = {
                let view = system.view();
                let list = NeighborList::build(&view, self.params.r_max)?;
                real_space::compute(&view, &list, &self.params)?
            };
            let mut acc = system.accumulator();
            for mut c in [real, recip, self_terms] {
                c.scale(scale);
                acc.apply(&c)?;
            }
            Ok(real_local)
        })?;

        let mut sums = [real_local, self_local, system.total_charge()];
        self.comm.all_reduce_sum(&mut sums)?;
        if sums[2].abs() > NEUTRALITY_TOLERANCE {
            log::warn!(
                "system carries net charge {:.3e}; energies include the uniform background implicitly",
                sums[2]
            );
        }

        let energy = EnergyBreakdown {
            real: scale * sums[0],
            reciprocal: scale * reciprocal_energy,
            self_energy: scale * sums[1],
        };
        log::debug!(
            "energy: real {:.10}, reciprocal {:.10}, self {:.10}",
            energy.real,
            energy.reciprocal,
            energy.self_energy
        );
        Ok(energy)
    }

    /// Run `stage` with the halo filled, then return ghost results to their
    /// owners.
    ///
    /// The container holds only its locals again when this returns, whether
    /// `stage`, the exchange or the scatter-back failed or not.
    fn with_ghosts<T, F>(&self, system: &mut ParticleSystem, stage: F) -> Result<T, SolverError>
    where
        F: FnOnce(&mut ParticleSystem) -> Result<T, SolverError>,
    {
        let result = self
            .halo
            .gather(system, self.params.r_max)
            .and_then(|map| {
                let value = stage(system)?;
                self.halo.scatter(system, map)?;
                Ok(value)
            });
        if result.is_err() {
            system.truncate_ghosts();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ewald_compute::SingleProcess;

    #[test]
    fn test_solver_kind_parsing() {
        assert_eq!(SolverKind::from_name("SPME").unwrap(), SolverKind::Spme);
        assert_eq!(SolverKind::from_name("ewald").unwrap(), SolverKind::Ewald);
        assert!(SolverKind::from_name("p3m").is_err());
    }

    #[test]
    fn test_full_neighbor_list_rejected() {
        let params = EwaldParams::new(0.5, 4.0, 3.0).unwrap();
        let domain = Domain::cubic(10.0).unwrap();
        let options = SolverOptions {
            half_neighbor_list: false,
            ..SolverOptions::default()
        };
        for kind in [SolverKind::Ewald, SolverKind::Spme] {
            let result = create_solver(kind, params, domain, options, Arc::new(SingleProcess));
            assert!(matches!(result, Err(SolverError::Configuration(_))));
        }
    }

    #[test]
    fn test_failed_stage_leaves_only_locals() {
        let params = EwaldParams::new(0.5, 4.0, 3.0).unwrap();
        let domain = Domain::cubic(10.0).unwrap();
        let pipeline =
            Pipeline::new(params, domain, &SolverOptions::default(), Arc::new(SingleProcess)).unwrap();
        let mut system =
            ParticleSystem::from_parts(vec![[3.0, 5.0, 5.0], [5.0, 5.0, 5.0]], vec![1.0, -1.0])
                .unwrap();

        let err = pipeline
            .with_ghosts(&mut system, |system| -> Result<(), SolverError> {
                assert!(system.n_max() > system.n_local());
                Err(SolverError::PostCondition("stage failed".into()))
            })
            .unwrap_err();
        assert!(matches!(err, SolverError::PostCondition(_)));
        assert_eq!(system.n_max(), system.n_local());

        // The container stays usable for the next evaluation.
        let energy = pipeline
            .evaluate(&mut system, |view| Ok((Contributions::zeros(view.n_local()), 0.0)))
            .unwrap();
        assert!(energy.real < 0.0);
        assert_eq!(system.n_max(), system.n_local());
    }

    #[test]
    fn test_energy_breakdown_total() {
        let e = EnergyBreakdown {
            real: 1.0,
            reciprocal: 0.5,
            self_energy: -2.0,
        };
        assert_eq!(e.total(), -0.5);
    }
}
