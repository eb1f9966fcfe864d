//! Core types shared across the solver pipeline.
//!
//! This module defines the particle container, the accumulation buffers the
//! kernels produce, and the solver parameters.

use serde::{Deserialize, Serialize};

use crate::solver::SolverError;

/// Parameters of one Ewald split.
///
/// Immutable for the lifetime of a solver; re-tuning means building a new
/// solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EwaldParams {
    /// Gaussian screening parameter α (1/length).
    pub alpha: f64,
    /// Real-space cutoff radius (length).
    pub r_max: f64,
    /// Largest wave-vector magnitude kept in the reciprocal sum (1/length).
    pub k_max: f64,
    /// Relative permittivity of the medium. Energies and forces scale by 1/ε_r.
    #[serde(default = "default_eps_r")]
    pub eps_r: f64,
}

fn default_eps_r() -> f64 {
    1.0
}

impl EwaldParams {
    /// Create a parameter set with ε_r = 1.
    pub fn new(alpha: f64, r_max: f64, k_max: f64) -> Result<Self, SolverError> {
        let params = Self {
            alpha,
            r_max,
            k_max,
            eps_r: 1.0,
        };
        params.validate()?;
        Ok(params)
    }

    /// Replace the relative permittivity.
    pub fn with_eps_r(self, eps_r: f64) -> Result<Self, SolverError> {
        let params = Self { eps_r, ..self };
        params.validate()?;
        Ok(params)
    }

    /// Initialise coefficients from configuration arguments
    /// `alpha r_max k_max [eps_r]`.
    pub fn init_coeff(args: &[&str]) -> Result<Self, SolverError> {
        if args.len() < 3 || args.len() > 4 {
            return Err(SolverError::InvalidParameter(format!(
                "expected 'alpha r_max k_max [eps_r]', got {} arguments",
                args.len()
            )));
        }
        let parse = |name: &str, raw: &str| -> Result<f64, SolverError> {
            raw.trim().parse::<f64>().map_err(|_| {
                SolverError::InvalidParameter(format!("{} is not a number: '{}'", name, raw))
            })
        };
        let params = Self::new(
            parse("alpha", args[0])?,
            parse("r_max", args[1])?,
            parse("k_max", args[2])?,
        )?;
        match args.get(3) {
            Some(raw) => params.with_eps_r(parse("eps_r", raw)?),
            None => Ok(params),
        }
    }

    /// Check that every parameter is finite and strictly positive.
    pub fn validate(&self) -> Result<(), SolverError> {
        for (name, value) in [
            ("alpha", self.alpha),
            ("r_max", self.r_max),
            ("k_max", self.k_max),
            ("eps_r", self.eps_r),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(SolverError::InvalidParameter(format!(
                    "{} must be finite and positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Prefactor applied to every energy, potential and force.
    pub fn coulomb_scale(&self) -> f64 {
        1.0 / self.eps_r
    }
}

/// Per-particle output record, as written by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub id: u64,
    pub position: [f64; 3],
    pub charge: f64,
    pub potential: f64,
    pub force: [f64; 3],
}

/// Particle container in structure-of-arrays layout.
///
/// The first `n_local` entries are owned by this rank; entries past them are
/// ghosts (halo copies of particles owned elsewhere, or periodic images).
/// Ghosts are appended by the halo exchange and removed again by its
/// scatter-back, after which `n_max() == n_local()`.
#[derive(Debug, Clone, Default)]
pub struct ParticleSystem {
    positions: Vec<[f64; 3]>,
    charges: Vec<f64>,
    ids: Vec<u64>,
    images: Vec<[i32; 3]>,
    potentials: Vec<f64>,
    forces: Vec<[f64; 3]>,
    n_local: usize,
}

impl ParticleSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a container of local particles with ids `0..n`.
    pub fn from_parts(positions: Vec<[f64; 3]>, charges: Vec<f64>) -> Result<Self, SolverError> {
        if positions.len() != charges.len() {
            return Err(SolverError::InvalidParameter(format!(
                "{} positions but {} charges",
                positions.len(),
                charges.len()
            )));
        }
        let n = positions.len();
        Ok(Self {
            positions,
            charges,
            ids: (0..n as u64).collect(),
            images: vec![[0; 3]; n],
            potentials: vec![0.0; n],
            forces: vec![[0.0; 3]; n],
            n_local: n,
        })
    }

    /// Add a locally owned particle.
    ///
    /// Fails while ghosts are resident, since locals must stay contiguous at
    /// the front of the arrays.
    pub fn push(&mut self, position: [f64; 3], charge: f64, id: u64) -> Result<(), SolverError> {
        if self.n_max() != self.n_local {
            return Err(SolverError::Configuration(
                "cannot add local particles while ghosts are resident".into(),
            ));
        }
        self.push_entry(position, charge, id, [0; 3]);
        self.n_local += 1;
        Ok(())
    }

    /// Append a ghost copy of particle `id`, shifted by `image` box lengths.
    pub fn push_ghost(&mut self, position: [f64; 3], charge: f64, id: u64, image: [i32; 3]) {
        self.push_entry(position, charge, id, image);
    }

    fn push_entry(&mut self, position: [f64; 3], charge: f64, id: u64, image: [i32; 3]) {
        self.positions.push(position);
        self.charges.push(charge);
        self.ids.push(id);
        self.images.push(image);
        self.potentials.push(0.0);
        self.forces.push([0.0; 3]);
    }

    /// Drop every ghost, compacting the arrays back to `n_local`.
    pub fn truncate_ghosts(&mut self) {
        let n = self.n_local;
        self.positions.truncate(n);
        self.charges.truncate(n);
        self.ids.truncate(n);
        self.images.truncate(n);
        self.potentials.truncate(n);
        self.forces.truncate(n);
    }

    /// Number of locally owned particles.
    pub fn n_local(&self) -> usize {
        self.n_local
    }

    /// Number of resident particles, ghosts included.
    pub fn n_max(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_local == 0
    }

    pub fn position(&self, i: usize) -> [f64; 3] {
        self.positions[i]
    }

    pub fn charge(&self, i: usize) -> f64 {
        self.charges[i]
    }

    pub fn id(&self, i: usize) -> u64 {
        self.ids[i]
    }

    pub fn image(&self, i: usize) -> [i32; 3] {
        self.images[i]
    }

    pub fn potential(&self, i: usize) -> f64 {
        self.potentials[i]
    }

    pub fn force(&self, i: usize) -> [f64; 3] {
        self.forces[i]
    }

    pub fn positions(&self) -> &[[f64; 3]] {
        &self.positions
    }

    pub fn charges(&self) -> &[f64] {
        &self.charges
    }

    pub fn potentials(&self) -> &[f64] {
        &self.potentials
    }

    pub fn forces(&self) -> &[[f64; 3]] {
        &self.forces
    }

    /// Net charge of the local particles.
    pub fn total_charge(&self) -> f64 {
        self.charges[..self.n_local].iter().sum()
    }

    /// Sum of the local accumulated potentials.
    pub fn total_potential(&self) -> f64 {
        self.potentials[..self.n_local].iter().sum()
    }

    /// Borrow read-only particle data for the kernels.
    pub fn view(&self) -> ParticleView<'_> {
        ParticleView {
            positions: &self.positions,
            charges: &self.charges,
            ids: &self.ids,
            images: &self.images,
            n_local: self.n_local,
        }
    }

    /// Acquire exclusive write-accumulate access to potentials and forces.
    ///
    /// The guard borrows the container mutably, so no second evaluation can
    /// run on it until the guard is dropped.
    pub fn accumulator(&mut self) -> Accumulator<'_> {
        Accumulator {
            potentials: &mut self.potentials,
            forces: &mut self.forces,
        }
    }

    /// Snapshot of the local particles for output.
    pub fn records(&self) -> Vec<ParticleRecord> {
        (0..self.n_local)
            .map(|i| ParticleRecord {
                id: self.ids[i],
                position: self.positions[i],
                charge: self.charges[i],
                potential: self.potentials[i],
                force: self.forces[i],
            })
            .collect()
    }
}

/// Read-only borrow of particle data, shared by all workers of a kernel.
#[derive(Debug, Clone, Copy)]
pub struct ParticleView<'a> {
    pub positions: &'a [[f64; 3]],
    pub charges: &'a [f64],
    pub ids: &'a [u64],
    pub images: &'a [[i32; 3]],
    pub n_local: usize,
}

impl<'a> ParticleView<'a> {
    pub fn n_local(&self) -> usize {
        self.n_local
    }

    pub fn n_max(&self) -> usize {
        self.positions.len()
    }

    /// Ordering key used by the half neighbor list.
    pub fn pair_key(&self, i: usize) -> (u64, [i32; 3]) {
        (self.ids[i], self.images[i])
    }
}

/// Scoped write access to a container's potentials and forces.
pub struct Accumulator<'a> {
    potentials: &'a mut [f64],
    forces: &'a mut [[f64; 3]],
}

impl<'a> Accumulator<'a> {
    /// Zero every potential and force, ghosts included.
    pub fn reset(&mut self) {
        self.potentials.iter_mut().for_each(|p| *p = 0.0);
        self.forces.iter_mut().for_each(|f| *f = [0.0; 3]);
    }

    /// Add a contribution buffer. The buffer may be shorter than the
    /// container (e.g. local particles only) but never longer.
    pub fn apply(&mut self, contributions: &Contributions) -> Result<(), SolverError> {
        if contributions.len() > self.potentials.len() {
            return Err(SolverError::PostCondition(format!(
                "contribution buffer for {} particles applied to a container of {}",
                contributions.len(),
                self.potentials.len()
            )));
        }
        for (p, c) in self.potentials.iter_mut().zip(&contributions.potential) {
            *p += c;
        }
        for (f, c) in self.forces.iter_mut().zip(&contributions.force) {
            f[0] += c[0];
            f[1] += c[1];
            f[2] += c[2];
        }
        Ok(())
    }

    pub fn add_potential(&mut self, i: usize, value: f64) {
        self.potentials[i] += value;
    }

    pub fn add_force(&mut self, i: usize, force: [f64; 3]) {
        for d in 0..3 {
            self.forces[i][d] += force[d];
        }
    }
}

/// Per-particle potential and force increments produced by one kernel.
///
/// Buffers form a commutative monoid under [`merge`](Self::merge)
/// (element-wise addition, identity [`zeros`](Self::zeros)), so kernels build
/// one buffer per worker and reduce them in any order.
#[derive(Debug, Clone, PartialEq)]
pub struct Contributions {
    pub potential: Vec<f64>,
    pub force: Vec<[f64; 3]>,
}

impl Contributions {
    pub fn zeros(n: usize) -> Self {
        Self {
            potential: vec![0.0; n],
            force: vec![[0.0; 3]; n],
        }
    }

    pub fn len(&self) -> usize {
        self.potential.len()
    }

    pub fn is_empty(&self) -> bool {
        self.potential.is_empty()
    }

    pub fn add_potential(&mut self, i: usize, value: f64) {
        self.potential[i] += value;
    }

    pub fn add_force(&mut self, i: usize, force: [f64; 3]) {
        let f = &mut self.force[i];
        f[0] += force[0];
        f[1] += force[1];
        f[2] += force[2];
    }

    /// Element-wise sum of two buffers of equal length.
    pub fn merge(mut self, other: Self) -> Self {
        debug_assert_eq!(self.len(), other.len());
        for (a, b) in self.potential.iter_mut().zip(&other.potential) {
            *a += b;
        }
        for (a, b) in self.force.iter_mut().zip(&other.force) {
            a[0] += b[0];
            a[1] += b[1];
            a[2] += b[2];
        }
        self
    }

    /// Multiply every entry by `factor`.
    pub fn scale(&mut self, factor: f64) {
        self.potential.iter_mut().for_each(|p| *p *= factor);
        self.force.iter_mut().for_each(|f| {
            f[0] *= factor;
            f[1] *= factor;
            f[2] *= factor;
        });
    }

    pub fn total_potential(&self) -> f64 {
        self.potential.iter().sum()
    }
}
