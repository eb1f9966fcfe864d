//! Real-space (short-range) part of the Ewald sum.
//!
//! Each pair within the cutoff interacts through the screened Coulomb
//! potential
//!
//! $$ U(d) = q_i q_j \frac{\operatorname{erfc}(\alpha d)}{d} $$
//!
//! split evenly between the potentials of both particles. The force is its
//! exact negative gradient,
//!
//! $$ \mathbf{F}_i = q_i q_j \left[ \frac{\operatorname{erfc}(\alpha d)}{d^2}
//!    + \frac{2\alpha}{\sqrt{\pi}} \frac{e^{-\alpha^2 d^2}}{d} \right]
//!    \hat{\mathbf{d}}, \qquad \mathbf{F}_j = -\mathbf{F}_i $$
//!
//! with $\hat{\mathbf{d}}$ pointing from $j$ to $i$.

use rayon::prelude::*;
use statrs::function::erf::erfc;

use crate::neighbor::NeighborList;
use crate::solver::SolverError;
use crate::types::{Contributions, EwaldParams, ParticleView};

/// Separations below this are treated as coincident and skipped.
pub const MIN_SEPARATION: f64 = 1e-12;

const FRAC_2_SQRT_PI: f64 = std::f64::consts::FRAC_2_SQRT_PI;

/// Pair energy and force on `i` for separation `delta = r_i - r_j`.
///
/// Returns `None` for coincident particles and pairs beyond `r_max`.
pub fn pair_interaction(
    qi: f64,
    qj: f64,
    delta: [f64; 3],
    alpha: f64,
    r_max: f64,
) -> Option<(f64, [f64; 3])> {
    let d2 = delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2];
    let d = d2.sqrt();
    if d < MIN_SEPARATION || d > r_max {
        return None;
    }
    let inv_d = 1.0 / d;
    let screened = erfc(alpha * d);
    let qq = qi * qj;
    let energy = qq * screened * inv_d;
    let magnitude =
        qq * (screened * inv_d * inv_d + FRAC_2_SQRT_PI * alpha * (-alpha * alpha * d2).exp() * inv_d);
    let f = magnitude * inv_d;
    Some((energy, [f * delta[0], f * delta[1], f * delta[2]]))
}

/// Accumulate the real-space sum over a half neighbor list.
///
/// Output covers all `n_max` resident slots, ghosts included, so that ghost
/// shares can be returned to their owners. Buffers are built per worker and
/// merged, so the result does not depend on scheduling.
///
/// Returns the contributions and the summed pair energy, both in vacuum units.
pub fn compute(
    view: &ParticleView<'_>,
    list: &NeighborList,
    params: &EwaldParams,
) -> Result<(Contributions, f64), SolverError> {
    if list.len() != view.n_local {
        return Err(SolverError::Configuration(format!(
            "neighbor list covers {} particles but {} are local",
            list.len(),
            view.n_local
        )));
    }
    let n_max = view.n_max();
    let alpha = params.alpha;
    let r_max = params.r_max;

    let (contributions, energy) = (0..view.n_local)
        .into_par_iter()
        .fold(
            || (Contributions::zeros(n_max), 0.0),
            |(mut acc, mut energy), i| {
                let pi = view.positions[i];
                let qi = view.charges[i];
                for &j in list.neighbors(i) {
                    let pj = view.positions[j];
                    let delta = [pi[0] - pj[0], pi[1] - pj[1], pi[2] - pj[2]];
                    if let Some((u, f)) = pair_interaction(qi, view.charges[j], delta, alpha, r_max) {
                        acc.add_potential(i, 0.5 * u);
                        acc.add_potential(j, 0.5 * u);
                        acc.add_force(i, f);
                        acc.add_force(j, [-f[0], -f[1], -f[2]]);
                        energy += u;
                    }
                }
                (acc, energy)
            },
        )
        .reduce(
            || (Contributions::zeros(n_max), 0.0),
            |(a, ea), (b, eb)| (a.merge(b), ea + eb),
        );
    Ok((contributions, energy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParticleSystem;
    use approx::assert_relative_eq;

    #[test]
    fn test_pair_potential_split_evenly() {
        let params = EwaldParams::new(0.4, 5.0, 1.0).unwrap();
        let system =
            ParticleSystem::from_parts(vec![[1.0, 1.0, 1.0], [2.5, 1.0, 1.0]], vec![1.0, -2.0]).unwrap();
        let view = system.view();
        let list = NeighborList::build(&view, params.r_max).unwrap();
        let (c, energy) = compute(&view, &list, &params).unwrap();

        let expected = -2.0 * erfc(0.4 * 1.5) / 1.5;
        assert_relative_eq!(energy, expected, max_relative = 1e-14);
        assert_relative_eq!(c.potential[0], 0.5 * expected, max_relative = 1e-14);
        assert_relative_eq!(c.potential[1], 0.5 * expected, max_relative = 1e-14);
    }

    #[test]
    fn test_forces_antisymmetric_with_analytic_magnitude() {
        let alpha = 0.7;
        let d: f64 = 1.3;
        let (_, f) = pair_interaction(1.0, 1.0, [d, 0.0, 0.0], alpha, 10.0).unwrap();
        let expected = erfc(alpha * d) / (d * d)
            + 2.0 * alpha / std::f64::consts::PI.sqrt() * (-alpha * alpha * d * d).exp() / d;
        assert_relative_eq!(f[0], expected, max_relative = 1e-13);
        assert_eq!(f[1], 0.0);

        let params = EwaldParams::new(alpha, 10.0, 1.0).unwrap();
        let system =
            ParticleSystem::from_parts(vec![[0.0; 3], [0.4, 0.9, -0.6]], vec![1.0, 1.0]).unwrap();
        let view = system.view();
        let list = NeighborList::build(&view, params.r_max).unwrap();
        let (c, _) = compute(&view, &list, &params).unwrap();
        for k in 0..3 {
            assert_relative_eq!(c.force[0][k], -c.force[1][k], max_relative = 1e-14);
        }
        // Like charges repel: particle 0 is pushed away from particle 1.
        assert!(c.force[0][1] < 0.0);
    }

    #[test]
    fn test_force_is_negative_gradient() {
        let alpha = 0.9;
        let h = 1e-6;
        let delta = [0.7, -0.3, 0.5];
        let (_, f) = pair_interaction(1.5, -0.5, delta, alpha, 10.0).unwrap();
        for k in 0..3 {
            let mut plus = delta;
            let mut minus = delta;
            plus[k] += h;
            minus[k] -= h;
            let up = pair_interaction(1.5, -0.5, plus, alpha, 10.0).unwrap().0;
            let um = pair_interaction(1.5, -0.5, minus, alpha, 10.0).unwrap().0;
            assert_relative_eq!(f[k], -(up - um) / (2.0 * h), max_relative = 1e-6);
        }
    }

    #[test]
    fn test_coincident_and_distant_pairs_skipped() {
        assert!(pair_interaction(1.0, 1.0, [0.0; 3], 1.0, 5.0).is_none());
        assert!(pair_interaction(1.0, 1.0, [6.0, 0.0, 0.0], 1.0, 5.0).is_none());
    }
}
