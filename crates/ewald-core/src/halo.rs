//! Ghost-particle halo exchange.
//!
//! Before the real-space sum every rank needs copies of all particles (and
//! their periodic images) within the cutoff of its subdomain. Afterwards the
//! potential and force accumulated on those copies belong to their owners
//! and are sent back.
//!
//! The exchange is explicit: [`HaloExchange::gather`] appends ghosts and
//! returns the [`GhostMap`] describing them, [`HaloExchange::scatter`] consumes
//! that map, adds ghost results onto the owners and removes the ghosts.

use std::sync::Arc;

use ewald_compute::Communicator;

use crate::decomposition::CartesianTopology;
use crate::solver::SolverError;
use crate::types::ParticleSystem;

/// Values per particle in the gather payload: id (high and low 32 bits),
/// x, y, z, q, owner index.
const GATHER_STRIDE: usize = 7;
/// Values per ghost in the scatter payload: owner rank, owner index, φ, fx, fy, fz.
const SCATTER_STRIDE: usize = 6;

/// Relative slack when checking that locals sit inside their subdomain.
const OWNERSHIP_TOLERANCE: f64 = 1e-9;

/// Origin of one ghost slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GhostOrigin {
    pub owner_rank: usize,
    pub owner_index: usize,
}

/// Ghosts resident after a gather, in slot order starting at `n_local`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GhostMap {
    n_local: usize,
    origins: Vec<GhostOrigin>,
}

impl GhostMap {
    pub fn n_local(&self) -> usize {
        self.n_local
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn origin(&self, ghost: usize) -> GhostOrigin {
        self.origins[ghost]
    }
}

/// Fill and drain the ghost region of a particle container.
pub trait HaloExchange: Send + Sync {
    /// Append ghosts for everything within `width` of this rank's subdomain.
    fn gather(&self, system: &mut ParticleSystem, width: f64) -> Result<GhostMap, SolverError>;

    /// Add ghost potentials and forces onto their owners and drop the ghosts.
    ///
    /// Fails with [`SolverError::PostCondition`] if the container does not
    /// match `map`. The ghosts are removed on every return path.
    fn scatter(&self, system: &mut ParticleSystem, map: GhostMap) -> Result<(), SolverError>;
}

/// Halo exchange over a Cartesian process grid.
///
/// Every rank publishes its locals with an all-gather, then keeps the images
/// that fall inside its own ghost region. Scatter-back is a second
/// all-gather of ghost results, from which each rank takes the records
/// addressed to it.
pub struct CartesianHalo {
    topology: CartesianTopology,
    comm: Arc<dyn Communicator>,
}

impl CartesianHalo {
    pub fn new(topology: CartesianTopology, comm: Arc<dyn Communicator>) -> Result<Self, SolverError> {
        if topology.size() != comm.size() || topology.rank() != comm.rank() {
            return Err(SolverError::Configuration(format!(
                "topology rank {}/{} does not match communicator rank {}/{}",
                topology.rank(),
                topology.size(),
                comm.rank(),
                comm.size()
            )));
        }
        Ok(Self { topology, comm })
    }

    pub fn topology(&self) -> &CartesianTopology {
        &self.topology
    }

    fn check_ownership(&self, system: &ParticleSystem) -> Result<(), SolverError> {
        let sub = self.topology.subdomain();
        let scale = self.topology.domain().lengths().iter().cloned().fold(0.0, f64::max);
        for i in 0..system.n_local() {
            let p = system.position(i);
            if sub.distance_to(p) > OWNERSHIP_TOLERANCE * scale {
                return Err(SolverError::Configuration(format!(
                    "particle {} at {:?} lies outside the subdomain of rank {}",
                    system.id(i),
                    p,
                    self.topology.rank()
                )));
            }
        }
        Ok(())
    }
}

impl HaloExchange for CartesianHalo {
    fn gather(&self, system: &mut ParticleSystem, width: f64) -> Result<GhostMap, SolverError> {
        if system.n_max() != system.n_local() {
            return Err(SolverError::Configuration(
                "halo gather called while ghosts are already resident".into(),
            ));
        }
        self.check_ownership(system)?;

        let mut payload = Vec::with_capacity(system.n_local() * GATHER_STRIDE);
        for i in 0..system.n_local() {
            let p = system.position(i);
            let [id_hi, id_lo] = split_id(system.id(i));
            payload.extend_from_slice(&[id_hi, id_lo, p[0], p[1], p[2], system.charge(i), i as f64]);
        }
        let gathered = self.comm.all_gather(payload)?;

        let domain = self.topology.domain();
        let lengths = domain.lengths();
        let region = self.topology.subdomain();
        let me = self.topology.rank();
        let mut shells = [0i32; 3];
        for d in 0..3 {
            shells[d] = (width / lengths[d]).ceil() as i32 + 1;
        }

        let mut origins = Vec::new();
        for (owner_rank, records) in gathered.iter().enumerate() {
            for record in records.chunks_exact(GATHER_STRIDE) {
                let id = join_id(record[0], record[1]);
                let base = [record[2], record[3], record[4]];
                let charge = record[5];
                let owner_index = record[6] as usize;
                for nx in -shells[0]..=shells[0] {
                    for ny in -shells[1]..=shells[1] {
                        for nz in -shells[2]..=shells[2] {
                            let image = [nx, ny, nz];
                            if owner_rank == me && image == [0, 0, 0] {
                                continue;
                            }
                            let p = [
                                base[0] + nx as f64 * lengths[0],
                                base[1] + ny as f64 * lengths[1],
                                base[2] + nz as f64 * lengths[2],
                            ];
                            if region.distance_to(p) <= width {
                                system.push_ghost(p, charge, id, image);
                                origins.push(GhostOrigin {
                                    owner_rank,
                                    owner_index,
                                });
                            }
                        }
                    }
                }
            }
        }
        log::debug!(
            "rank {}: {} locals, {} ghosts within {:.4}",
            me,
            system.n_local(),
            origins.len(),
            width
        );
        Ok(GhostMap {
            n_local: system.n_local(),
            origins,
        })
    }

    fn scatter(&self, system: &mut ParticleSystem, map: GhostMap) -> Result<(), SolverError> {
        let returned = self.return_ghost_results(system, &map);
        system.truncate_ghosts();
        returned?;
        if system.n_max() != system.n_local() {
            return Err(SolverError::PostCondition(format!(
                "{} ghosts remain after scatter-back",
                system.n_max() - system.n_local()
            )));
        }
        Ok(())
    }
}

impl CartesianHalo {
    /// Send ghost potentials and forces to their owners and add the ones
    /// addressed to this rank.
    fn return_ghost_results(&self, system: &mut ParticleSystem, map: &GhostMap) -> Result<(), SolverError> {
        if map.n_local != system.n_local() || system.n_max() != map.n_local + map.len() {
            return Err(SolverError::PostCondition(format!(
                "ghost map for {} locals + {} ghosts does not match container with {} locals and {} resident",
                map.n_local,
                map.len(),
                system.n_local(),
                system.n_max()
            )));
        }

        let mut payload = Vec::with_capacity(map.len() * SCATTER_STRIDE);
        for (k, origin) in map.origins.iter().enumerate() {
            let slot = map.n_local + k;
            let f = system.force(slot);
            payload.extend_from_slice(&[
                origin.owner_rank as f64,
                origin.owner_index as f64,
                system.potential(slot),
                f[0],
                f[1],
                f[2],
            ]);
        }
        let gathered = self.comm.all_gather(payload)?;

        let me = self.topology.rank();
        let n_local = system.n_local();
        {
            let mut acc = system.accumulator();
            for records in &gathered {
                for record in records.chunks_exact(SCATTER_STRIDE) {
                    if record[0] as usize != me {
                        continue;
                    }
                    let index = record[1] as usize;
                    if index >= n_local {
                        return Err(SolverError::PostCondition(format!(
                            "ghost result addressed to local {} but rank {} owns {}",
                            index, me, n_local
                        )));
                    }
                    acc.add_potential(index, record[2]);
                    acc.add_force(index, [record[3], record[4], record[5]]);
                }
            }
        }
        Ok(())
    }
}

/// Split an id into two exactly representable halves.
fn split_id(id: u64) -> [f64; 2] {
    [(id >> 32) as f64, (id & 0xffff_ffff) as f64]
}

fn join_id(hi: f64, lo: f64) -> u64 {
    ((hi as u64) << 32) | lo as u64
}
