//! # Ewald Core
//!
//! Long-range Coulomb electrostatics for periodic particle systems. The
//! conditionally convergent lattice sum
//!
//! $$ E = \frac{1}{2} \sum_{\mathbf{n}} {\sum_{i,j}}' \frac{q_i q_j}{|\mathbf{r}_{ij} + \mathbf{n}L|} $$
//!
//! is split by a Gaussian screening parameter $\alpha$ into a short-range
//! real-space sum, a smooth reciprocal-space sum and a self-energy
//! correction, each of which converges exponentially.
//!
//! ## Architecture
//!
//! All solvers implement the [`solver::LongRangeSolver`] trait. The
//! reciprocal part is evaluated either directly over wave vectors
//! ([`solver::ewald::EwaldSolver`]) or on a mesh with FFTs
//! ([`solver::spme::SpmeSolver`]). Ranks cooperate through the
//! `ewald_compute::Communicator` trait; ghost particles are exchanged
//! explicitly by [`halo`].
//!
//! ## Modules
//!
//! - [`types`]: Particle container, accumulation buffers, parameters.
//! - [`periodic`]: Periodic box geometry.
//! - [`decomposition`]: Cartesian process grid and subdomains.
//! - [`halo`]: Ghost gather and scatter-back.
//! - [`neighbor`]: Half neighbor lists for the real-space sum.
//! - [`solver`]: Solver trait, kernels and both Ewald variants.
//! - [`tuning`]: Accuracy-driven parameter selection.

pub mod decomposition;
pub mod halo;
pub mod neighbor;
pub mod periodic;
pub mod solver;
pub mod tuning;
pub mod types;

pub use periodic::Domain;
pub use solver::{
    create_solver, EnergyBreakdown, LongRangeSolver, SolverError, SolverKind, SolverOptions,
};
pub use types::{EwaldParams, ParticleSystem};
