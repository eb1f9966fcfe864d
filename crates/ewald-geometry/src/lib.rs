//! # Ewald Geometry
//!
//! Particle configurations for the Ewald solvers. This crate provides:
//!
//! - **File parsers** ([`parsers`]): Read charged particles from `.xyz`
//!   files.
//! - **Lattices** ([`lattice`]): Generate ionic crystals and random neutral
//!   gases inside a periodic box.
//!
//! Everything here is plain data (positions and charges); the solver crate
//! builds its particle container from it.

pub mod lattice;
pub mod parsers;

pub use lattice::ChargedConfiguration;
pub use parsers::{ParseError, ParsedParticle};
