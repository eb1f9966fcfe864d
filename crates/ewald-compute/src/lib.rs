//! # Ewald Compute
//!
//! Backend abstractions for the Ewald solvers. This crate isolates the
//! physics in `ewald-core` from device and process details:
//!
//! - [`FftBackend`](backend::FftBackend): 3D transform plans for the mesh
//!   solver, selected at runtime.
//! - [`Communicator`](distributed::Communicator): blocking collectives over
//!   a periodic grid of cooperating ranks.
//!
//! ## Available backends
//!
//! | Backend | Status |
//! |---------|--------|
//! | Host FFT (rustfft + Rayon) | Implemented |
//! | Accelerator FFT | Reported unavailable |
//! | Single process | Implemented |
//! | In-process rank group | Implemented |

pub mod backend;
pub mod cpu;
pub mod distributed;

pub use backend::{create_fft_backend, BackendType, ComputeError, DeviceInfo, FftBackend, FftPlan};
pub use cpu::CpuFft;
pub use distributed::{Communicator, LocalGroup, LocalRank, SingleProcess};
