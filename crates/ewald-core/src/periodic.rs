//! Periodic simulation domain.
//!
//! The domain is an axis-aligned box $[\mathbf{lo}, \mathbf{hi})$ replicated
//! infinitely in all three directions. Every Ewald sum in this crate runs over
//! the images $\mathbf{r} + \mathbf{n} \odot \mathbf{L}$, $\mathbf{n} \in
//! \mathbb{Z}^3$, of the particles inside it.

use serde::{Deserialize, Serialize};

use crate::solver::SolverError;

/// Relative tolerance used when comparing edge lengths.
const CUBIC_TOLERANCE: f64 = 1e-12;

/// Axis-aligned periodic box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub lo: [f64; 3],
    pub hi: [f64; 3],
}

impl Domain {
    /// Create a domain from its lower and upper corners.
    pub fn new(lo: [f64; 3], hi: [f64; 3]) -> Result<Self, SolverError> {
        for d in 0..3 {
            if !lo[d].is_finite() || !hi[d].is_finite() || hi[d] <= lo[d] {
                return Err(SolverError::InvalidParameter(format!(
                    "domain axis {} has invalid bounds [{}, {})",
                    d, lo[d], hi[d]
                )));
            }
        }
        Ok(Self { lo, hi })
    }

    /// Box `[0, L)³`.
    pub fn cubic(length: f64) -> Result<Self, SolverError> {
        Self::new([0.0; 3], [length; 3])
    }

    /// Box `[0, lengths)`.
    pub fn from_lengths(lengths: [f64; 3]) -> Result<Self, SolverError> {
        Self::new([0.0; 3], lengths)
    }

    pub fn lengths(&self) -> [f64; 3] {
        [
            self.hi[0] - self.lo[0],
            self.hi[1] - self.lo[1],
            self.hi[2] - self.lo[2],
        ]
    }

    pub fn volume(&self) -> f64 {
        let l = self.lengths();
        l[0] * l[1] * l[2]
    }

    /// Whether all three edges agree to a relative tolerance of 1e-12.
    pub fn is_cubic(&self) -> bool {
        let l = self.lengths();
        let scale = l[0].max(l[1]).max(l[2]);
        (l[0] - l[1]).abs() <= CUBIC_TOLERANCE * scale
            && (l[0] - l[2]).abs() <= CUBIC_TOLERANCE * scale
    }

    /// Edge length of a cubic domain.
    pub fn cubic_length(&self) -> Result<f64, SolverError> {
        if self.is_cubic() {
            Ok(self.lengths()[0])
        } else {
            Err(SolverError::NonCubicDomain {
                lengths: self.lengths(),
            })
        }
    }

    /// Half-open containment test.
    pub fn contains(&self, p: [f64; 3]) -> bool {
        (0..3).all(|d| p[d] >= self.lo[d] && p[d] < self.hi[d])
    }

    /// Map a point into `[lo, hi)` by whole box translations.
    pub fn wrap(&self, p: [f64; 3]) -> [f64; 3] {
        let l = self.lengths();
        let mut out = p;
        for d in 0..3 {
            let shifted = (p[d] - self.lo[d]).rem_euclid(l[d]);
            // rem_euclid can round up to exactly l for tiny negative inputs.
            out[d] = if shifted >= l[d] { self.lo[d] } else { self.lo[d] + shifted };
        }
        out
    }

    /// Shortest periodic image of a separation vector.
    pub fn minimum_image(&self, delta: [f64; 3]) -> [f64; 3] {
        let l = self.lengths();
        let mut out = delta;
        for d in 0..3 {
            out[d] -= l[d] * (delta[d] / l[d]).round();
        }
        out
    }

    /// Distance from `p` to the closed box, zero inside.
    pub fn distance_to(&self, p: [f64; 3]) -> f64 {
        let mut sq = 0.0;
        for d in 0..3 {
            let gap = (self.lo[d] - p[d]).max(p[d] - self.hi[d]).max(0.0);
            sq += gap * gap;
        }
        sq.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_invalid_bounds_rejected() {
        assert!(Domain::new([0.0; 3], [1.0, 0.0, 1.0]).is_err());
        assert!(Domain::cubic(-1.0).is_err());
        assert!(Domain::cubic(f64::INFINITY).is_err());
    }

    #[test]
    fn test_cubic_detection() {
        let cube = Domain::new([-5.0; 3], [5.0; 3]).unwrap();
        assert!(cube.is_cubic());
        assert_eq!(cube.cubic_length().unwrap(), 10.0);
        assert_abs_diff_eq!(cube.volume(), 1000.0);

        let slab = Domain::from_lengths([10.0, 10.0, 12.0]).unwrap();
        assert!(!slab.is_cubic());
        assert!(matches!(
            slab.cubic_length(),
            Err(SolverError::NonCubicDomain { .. })
        ));
    }

    #[test]
    fn test_wrap_into_box() {
        let domain = Domain::new([1.0; 3], [3.0; 3]).unwrap();
        let p = domain.wrap([3.5, 0.25, -7.0]);
        assert_abs_diff_eq!(p[0], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(p[1], 2.25, epsilon = 1e-12);
        assert_abs_diff_eq!(p[2], 1.0, epsilon = 1e-12);
        assert!(domain.contains(p));
        assert!(!domain.contains([3.0, 2.0, 2.0]));
    }

    #[test]
    fn test_minimum_image() {
        let domain = Domain::cubic(10.0).unwrap();
        let d = domain.minimum_image([9.0, -6.0, 4.0]);
        assert_abs_diff_eq!(d[0], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d[1], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d[2], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_distance_to_box() {
        let domain = Domain::cubic(2.0).unwrap();
        assert_eq!(domain.distance_to([1.0, 1.0, 1.0]), 0.0);
        assert_abs_diff_eq!(domain.distance_to([5.0, 1.0, 1.0]), 3.0);
        assert_abs_diff_eq!(domain.distance_to([3.0, 3.0, 1.0]), 2f64.sqrt());
    }
}
