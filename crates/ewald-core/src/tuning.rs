//! Accuracy-driven choice of the Ewald split.
//!
//! Uses Fincham's estimates: for a target relative accuracy $\varepsilon$
//! set $p = -\ln\varepsilon$ and balance real-space against reciprocal cost
//! with a fixed time ratio $R$,
//!
//! $$ r_{max} = R^{1/6} \sqrt{p/\pi}\, N^{-1/6} L, \qquad
//!    \alpha = \sqrt{p} / r_{max}, \qquad k_{max} = 2\sqrt{p}\,\alpha. $$
//!
//! Both truncation errors then scale as $e^{-p} = \varepsilon$.

use crate::periodic::Domain;
use crate::solver::SolverError;
use crate::types::EwaldParams;

/// Assumed cost ratio of one reciprocal-space to one real-space term.
pub const TIME_RATIO: f64 = 2.0;

/// Smallest mesh width proposed for SPME.
pub const MIN_MESH_WIDTH: usize = 8;

/// Largest mesh width accepted for SPME (256³ points, ~0.3 GB per mesh copy).
pub const MAX_MESH_WIDTH: usize = 256;

/// Choose α, r_max and k_max for `n` particles in a cubic `domain`.
///
/// # Arguments
///
/// * `accuracy` - Target relative accuracy ε, strictly inside (0, 1).
/// * `n` - Global number of particles.
/// * `domain` - Periodic box; must be cubic.
pub fn tune(accuracy: f64, n: usize, domain: &Domain) -> Result<EwaldParams, SolverError> {
    let length = domain.cubic_length()?;
    if !(accuracy > 0.0 && accuracy < 1.0) {
        return Err(SolverError::InvalidParameter(format!(
            "accuracy must lie in (0, 1), got {}",
            accuracy
        )));
    }
    if n == 0 {
        return Err(SolverError::InvalidParameter(
            "cannot tune for an empty system".into(),
        ));
    }

    let p = -accuracy.ln();
    let r_max = TIME_RATIO.powf(1.0 / 6.0) * (p / std::f64::consts::PI).sqrt()
        / (n as f64).powf(1.0 / 6.0)
        * length;
    let alpha = p.sqrt() / r_max;
    let k_max = 2.0 * p.sqrt() * alpha;
    log::info!(
        "tuned for ε = {:.1e}, N = {}, L = {}: α = {:.6}, r_max = {:.6}, k_max = {:.6}",
        accuracy,
        n,
        length,
        alpha,
        r_max,
        k_max
    );
    EwaldParams::new(alpha, r_max, k_max)
}

/// Mesh points per axis so that the SPME reciprocal truncation error stays
/// below `accuracy`.
///
/// The largest mesh wave number $K/2L$ must satisfy
/// $\pi^2 m^2/\alpha^2 \ge p$, i.e. $K \ge 2L\alpha\sqrt{p}/\pi$. The result
/// is rounded up to an even number and kept within
/// [`MIN_MESH_WIDTH`]..=[`MAX_MESH_WIDTH`].
pub fn suggested_mesh_width(alpha: f64, length: f64, accuracy: f64) -> usize {
    let p = -accuracy.clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON).ln();
    let k = (2.0 * length * alpha * p.sqrt() / std::f64::consts::PI).ceil();
    if k > MAX_MESH_WIDTH as f64 {
        log::warn!(
            "accuracy {:.1e} with α = {} over L = {} wants a {:.0}³ mesh; capping at {}³",
            accuracy,
            alpha,
            length,
            k,
            MAX_MESH_WIDTH
        );
        return MAX_MESH_WIDTH;
    }
    let k = k as usize;
    let even = k + k % 2;
    even.clamp(MIN_MESH_WIDTH, MAX_MESH_WIDTH)
}

/// Accuracy implied by an existing split, $\varepsilon = e^{-(\alpha r_{max})^2}$.
pub fn implied_accuracy(params: &EwaldParams) -> f64 {
    let x = params.alpha * params.r_max;
    (-x * x).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_tuning_is_idempotent() {
        let domain = Domain::cubic(10.0).unwrap();
        let a = tune(1e-5, 1000, &domain).unwrap();
        let b = tune(1e-5, 1000, &domain).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_tuned_values() {
        let domain = Domain::cubic(10.0).unwrap();
        let params = tune(1e-5, 2, &domain).unwrap();
        let p = -(1e-5f64).ln();
        assert_relative_eq!(params.alpha * params.r_max, p.sqrt(), max_relative = 1e-12);
        assert_relative_eq!(params.k_max, 2.0 * p.sqrt() * params.alpha, max_relative = 1e-12);
        assert_relative_eq!(
            params.r_max,
            (p / std::f64::consts::PI).sqrt() * 10.0,
            max_relative = 1e-12
        );
        assert_relative_eq!(implied_accuracy(&params), 1e-5, max_relative = 1e-9);
    }

    #[test]
    fn test_tuning_rejects_bad_input() {
        let cube = Domain::cubic(10.0).unwrap();
        let slab = Domain::from_lengths([10.0, 10.0, 20.0]).unwrap();
        assert!(matches!(
            tune(1e-5, 10, &slab),
            Err(SolverError::NonCubicDomain { .. })
        ));
        assert!(tune(0.0, 10, &cube).is_err());
        assert!(tune(1.0, 10, &cube).is_err());
        assert!(tune(1e-5, 0, &cube).is_err());
    }

    #[test]
    fn test_suggested_mesh_width() {
        // 2·10·0.5·√(ln 1e5)/π ≈ 10.8 → 11 → 12.
        assert_eq!(suggested_mesh_width(0.5, 10.0, 1e-5), 12);
        assert_eq!(suggested_mesh_width(0.01, 10.0, 1e-5), MIN_MESH_WIDTH);
        assert_eq!(suggested_mesh_width(1.0, 10.0, 1e-5) % 2, 0);
    }

    #[test]
    fn test_mesh_width_is_capped() {
        // A long explicit cutoff implies an accuracy that underflows to zero.
        let params = EwaldParams::new(2.0, 40.0, 10.0).unwrap();
        assert_eq!(implied_accuracy(&params), 0.0);
        assert_eq!(
            suggested_mesh_width(params.alpha, 10.0, implied_accuracy(&params)),
            MAX_MESH_WIDTH
        );
        assert_eq!(suggested_mesh_width(50.0, 1000.0, 1e-5), MAX_MESH_WIDTH);
    }
}
