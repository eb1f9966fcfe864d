//! Generators for periodic charged configurations.
//!
//! Each generator fills a cubic box `[0, L)³` and returns the box edge with
//! the particles, so the configuration can be handed straight to a periodic
//! solver.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::parsers::ParsedParticle;

/// Madelung constant of the rock-salt structure, referred to the
/// nearest-neighbour distance.
pub const ROCK_SALT_MADELUNG: f64 = 1.747_564_594_633_182;

/// Particles in a cubic periodic box.
#[derive(Debug, Clone)]
pub struct ChargedConfiguration {
    pub particles: Vec<ParsedParticle>,
    pub box_length: f64,
}

impl ChargedConfiguration {
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn positions(&self) -> Vec<[f64; 3]> {
        self.particles.iter().map(|p| p.position).collect()
    }

    pub fn charges(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.charge).collect()
    }

    pub fn net_charge(&self) -> f64 {
        self.particles.iter().map(|p| p.charge).sum()
    }
}

/// Rock-salt crystal of `cells³` conventional cells.
///
/// Ions sit on a simple cubic grid of pitch `spacing` (the nearest-neighbour
/// distance) with alternating charges ±`charge`, so each conventional cell of
/// edge `2·spacing` holds four cations and four anions.
///
/// # Arguments
///
/// * `cells` - Conventional cells per axis.
/// * `spacing` - Nearest-neighbour distance.
/// * `charge` - Magnitude of the ionic charge.
pub fn rock_salt(cells: usize, spacing: f64, charge: f64) -> ChargedConfiguration {
    let n = 2 * cells;
    let mut particles = Vec::with_capacity(n * n * n);
    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                let cation = (i + j + k) % 2 == 0;
                particles.push(ParsedParticle {
                    position: [i as f64 * spacing, j as f64 * spacing, k as f64 * spacing],
                    charge: if cation { charge } else { -charge },
                    label: if cation { "Na" } else { "Cl" }.to_string(),
                });
            }
        }
    }
    ChargedConfiguration {
        particles,
        box_length: n as f64 * spacing,
    }
}

/// Exact Coulomb energy of a rock-salt configuration from [`rock_salt`].
pub fn rock_salt_energy(config: &ChargedConfiguration, spacing: f64, charge: f64) -> f64 {
    -(config.len() as f64) / 2.0 * ROCK_SALT_MADELUNG * charge * charge / spacing
}

/// Neutral gas of `pairs` cation/anion pairs at uniformly random positions.
///
/// Deterministic for a given `seed`.
pub fn random_gas(pairs: usize, box_length: f64, charge: f64, seed: u64) -> ChargedConfiguration {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut particles = Vec::with_capacity(2 * pairs);
    for idx in 0..2 * pairs {
        let position = [
            rng.gen_range(0.0..box_length),
            rng.gen_range(0.0..box_length),
            rng.gen_range(0.0..box_length),
        ];
        let cation = idx % 2 == 0;
        particles.push(ParsedParticle {
            position,
            charge: if cation { charge } else { -charge },
            label: if cation { "+" } else { "-" }.to_string(),
        });
    }
    log::debug!("random gas: {} ions in a box of {}", particles.len(), box_length);
    ChargedConfiguration {
        particles,
        box_length,
    }
}
