//! Cartesian domain decomposition.
//!
//! The global domain is cut into a periodic grid of equal subdomains, one per
//! rank. Each rank owns the particles inside its subdomain and sees copies of
//! everything within the halo width around it (see [`crate::halo`]).

use crate::periodic::Domain;
use crate::solver::SolverError;
use crate::types::ParticleSystem;

/// Periodic 3D process grid and this rank's place in it.
#[derive(Debug, Clone, PartialEq)]
pub struct CartesianTopology {
    dims: [usize; 3],
    rank: usize,
    coords: [usize; 3],
    domain: Domain,
}

impl CartesianTopology {
    /// Factor `n_ranks` into a balanced grid and locate `rank` in it.
    ///
    /// # Arguments
    ///
    /// * `n_ranks` - Size of the process group.
    /// * `rank` - This process's rank in `0..n_ranks`.
    /// * `domain` - Global periodic domain to partition.
    pub fn new(n_ranks: usize, rank: usize, domain: Domain) -> Result<Self, SolverError> {
        if n_ranks == 0 {
            return Err(SolverError::Configuration(
                "decomposition requires at least one rank".into(),
            ));
        }
        if rank >= n_ranks {
            return Err(SolverError::Configuration(format!(
                "rank {} outside a group of {}",
                rank, n_ranks
            )));
        }
        let dims = balanced_dims(n_ranks);
        let coords = coords_of(rank, dims);
        log::debug!(
            "rank {} of {}: grid {:?}, coords {:?}",
            rank,
            n_ranks,
            dims,
            coords
        );
        Ok(Self {
            dims,
            rank,
            coords,
            domain,
        })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn coords(&self) -> [usize; 3] {
        self.coords
    }

    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Rank at grid coordinates `coords`, wrapped periodically.
    pub fn rank_of(&self, coords: [i64; 3]) -> usize {
        let mut wrapped = [0usize; 3];
        for d in 0..3 {
            wrapped[d] = coords[d].rem_euclid(self.dims[d] as i64) as usize;
        }
        (wrapped[0] * self.dims[1] + wrapped[1]) * self.dims[2] + wrapped[2]
    }

    /// Neighboring rank `shift` steps along `axis` (periodic).
    pub fn neighbor(&self, axis: usize, shift: i64) -> usize {
        let mut c = [
            self.coords[0] as i64,
            self.coords[1] as i64,
            self.coords[2] as i64,
        ];
        c[axis] += shift;
        self.rank_of(c)
    }

    /// Subdomain owned by rank at `coords`.
    pub fn subdomain_of(&self, coords: [usize; 3]) -> Domain {
        let l = self.domain.lengths();
        let mut lo = [0.0; 3];
        let mut hi = [0.0; 3];
        for d in 0..3 {
            let step = l[d] / self.dims[d] as f64;
            lo[d] = self.domain.lo[d] + step * coords[d] as f64;
            // The last slab ends exactly on the global boundary.
            hi[d] = if coords[d] + 1 == self.dims[d] {
                self.domain.hi[d]
            } else {
                self.domain.lo[d] + step * (coords[d] + 1) as f64
            };
        }
        Domain { lo, hi }
    }

    /// Subdomain owned by this rank.
    pub fn subdomain(&self) -> Domain {
        self.subdomain_of(self.coords)
    }

    /// Rank owning the (wrapped) point `p`.
    pub fn owner_of(&self, p: [f64; 3]) -> usize {
        let p = self.domain.wrap(p);
        let l = self.domain.lengths();
        let mut c = [0i64; 3];
        for d in 0..3 {
            let frac = (p[d] - self.domain.lo[d]) / l[d];
            let cell = (frac * self.dims[d] as f64).floor() as i64;
            c[d] = cell.clamp(0, self.dims[d] as i64 - 1);
        }
        self.rank_of(c)
    }

    /// Select the particles this rank owns from a global configuration.
    ///
    /// Positions are wrapped into the domain and particle `i` keeps id `i`,
    /// so ids stay unique across ranks.
    pub fn local_system(
        &self,
        positions: &[[f64; 3]],
        charges: &[f64],
    ) -> Result<ParticleSystem, SolverError> {
        if positions.len() != charges.len() {
            return Err(SolverError::InvalidParameter(format!(
                "{} positions but {} charges",
                positions.len(),
                charges.len()
            )));
        }
        let mut system = ParticleSystem::new();
        for (i, (&p, &q)) in positions.iter().zip(charges).enumerate() {
            let p = self.domain.wrap(p);
            if self.owner_of(p) == self.rank {
                system.push(p, q, i as u64)?;
            }
        }
        Ok(system)
    }
}

/// Spread the prime factors of `n` over three axes, largest first, always
/// into the currently smallest axis; returned non-increasing.
fn balanced_dims(n: usize) -> [usize; 3] {
    let mut factors = Vec::new();
    let mut rest = n;
    let mut p = 2;
    while p * p <= rest {
        while rest % p == 0 {
            factors.push(p);
            rest /= p;
        }
        p += 1;
    }
    if rest > 1 {
        factors.push(rest);
    }
    factors.sort_unstable_by(|a, b| b.cmp(a));

    let mut dims = [1usize; 3];
    for f in factors {
        let smallest = (0..3).min_by_key(|&d| dims[d]).unwrap_or(0);
        dims[smallest] *= f;
    }
    dims.sort_unstable_by(|a, b| b.cmp(a));
    dims
}

fn coords_of(rank: usize, dims: [usize; 3]) -> [usize; 3] {
    let z = rank % dims[2];
    let y = (rank / dims[2]) % dims[1];
    let x = rank / (dims[1] * dims[2]);
    [x, y, z]
}
