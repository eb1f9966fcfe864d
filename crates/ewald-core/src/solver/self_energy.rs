//! Self-energy correction.
//!
//! The reciprocal sum includes the interaction of every screening Gaussian
//! with its own point charge. Removing it subtracts
//! $\frac{\alpha}{\sqrt{\pi}} q_i^2$ per particle. Purely local: no
//! communication and no forces.

use crate::types::{Contributions, ParticleView};

/// Self-energy terms of the local particles, in vacuum units.
///
/// Returns the per-particle potential corrections and their sum.
pub fn compute(view: &ParticleView<'_>, alpha: f64) -> (Contributions, f64) {
    let prefactor = alpha / std::f64::consts::PI.sqrt();
    let mut contributions = Contributions::zeros(view.n_local);
    let mut energy = 0.0;
    for (i, &q) in view.charges[..view.n_local].iter().enumerate() {
        let term = -prefactor * q * q;
        contributions.add_potential(i, term);
        energy += term;
    }
    (contributions, energy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParticleSystem;
    use approx::assert_relative_eq;

    #[test]
    fn test_self_energy_of_identical_charges() {
        let n = 5;
        let q: f64 = -1.5;
        let alpha = 0.8;
        let mut system = ParticleSystem::from_parts(vec![[0.0; 3]; n], vec![q; n]).unwrap();
        system.push_ghost([1.0; 3], q, 99, [1, 0, 0]);

        let (c, energy) = compute(&system.view(), alpha);
        let expected = -(n as f64) * alpha / std::f64::consts::PI.sqrt() * q * q;
        assert_relative_eq!(energy, expected, max_relative = 1e-14);
        assert_eq!(c.len(), n);
        assert_relative_eq!(c.total_potential(), expected, max_relative = 1e-14);
        assert!(c.force.iter().all(|f| *f == [0.0; 3]));
    }
}
