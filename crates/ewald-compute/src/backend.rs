//! FFT backend trait and device abstraction.
//!
//! The [`FftBackend`] trait abstracts over the execution environment of the
//! 3D transforms used by the mesh solver (host threads, accelerator), so the
//! physics code in `ewald-core` never branches on the device at compile time.
//! The concrete backend is chosen at runtime with [`create_fft_backend`].

use num_complex::Complex64;
use thiserror::Error;

/// Errors originating from compute backends and communicators.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Backend not available: {0}")]
    Unavailable(String),

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("Dimension mismatch: expected {expected} elements, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Describes the capabilities of a compute backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub memory_bytes: Option<usize>,
    pub compute_units: Option<usize>,
}

/// The type of compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Cpu,
    Gpu,
}

impl BackendType {
    /// Parse a backend preference string (`"cpu"`, `"gpu"`, `"auto"`).
    ///
    /// `"auto"` resolves to the host backend, the only one compiled into
    /// this build.
    pub fn from_preference(preference: &str) -> Result<Self, ComputeError> {
        match preference {
            "cpu" | "auto" => Ok(BackendType::Cpu),
            "gpu" => Ok(BackendType::Gpu),
            other => Err(ComputeError::Unavailable(format!(
                "Unknown backend '{}'. Valid values: auto, cpu, gpu",
                other
            ))),
        }
    }
}

/// A planned 3D complex-to-complex transform over a cubic mesh.
///
/// Data is laid out with the x index fastest: `idx = x + y·K + z·K²`.
/// Both directions are unnormalised, matching FFTW conventions:
///
/// - forward: $\hat{a}_m = \sum_j a_j e^{-2\pi i\, m \cdot j / K}$
/// - inverse: $a_j = \sum_m \hat{a}_m e^{+2\pi i\, m \cdot j / K}$
///
/// so `inverse(forward(a)) = K³ · a`. Dropping the plan releases it.
pub trait FftPlan: Send + Sync {
    /// Number of mesh points along each axis.
    fn width(&self) -> usize;

    /// Execute the forward transform in place.
    fn forward(&self, data: &mut [Complex64]) -> Result<(), ComputeError>;

    /// Execute the inverse transform in place.
    fn inverse(&self, data: &mut [Complex64]) -> Result<(), ComputeError>;
}

/// Abstraction over FFT backends.
///
/// The mesh solver only ever asks for a plan; transform buffers are owned by
/// the caller for the duration of one evaluation.
pub trait FftBackend: Send + Sync {
    /// Return information about the device.
    fn device_info(&self) -> DeviceInfo;

    /// Build a 3D plan for a cubic mesh of `width` points per axis.
    fn plan(&self, width: usize) -> Result<Box<dyn FftPlan>, ComputeError>;
}

/// Check that a buffer holds exactly `width³` elements.
pub(crate) fn check_len(data: &[Complex64], width: usize) -> Result<(), ComputeError> {
    let expected = width * width * width;
    if data.len() != expected {
        return Err(ComputeError::DimensionMismatch {
            expected,
            found: data.len(),
        });
    }
    Ok(())
}

/// Create an FFT backend of the requested type.
///
/// - `Cpu`: host transforms via `rustfft`, parallelised with Rayon.
/// - `Gpu`: no accelerator transform is compiled into this build; the
///   request is reported rather than silently served by the host.
pub fn create_fft_backend(
    backend_type: BackendType,
) -> Result<std::sync::Arc<dyn FftBackend>, ComputeError> {
    match backend_type {
        BackendType::Cpu => Ok(std::sync::Arc::new(crate::cpu::CpuFft::new())),
        BackendType::Gpu => Err(ComputeError::Unavailable(
            "accelerator FFT requested but this build only provides the host backend".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_parsing() {
        assert_eq!(BackendType::from_preference("auto").unwrap(), BackendType::Cpu);
        assert_eq!(BackendType::from_preference("cpu").unwrap(), BackendType::Cpu);
        assert_eq!(BackendType::from_preference("gpu").unwrap(), BackendType::Gpu);
        assert!(BackendType::from_preference("tpu").is_err());
    }

    #[test]
    fn test_gpu_backend_reported_unavailable() {
        match create_fft_backend(BackendType::Gpu) {
            Err(ComputeError::Unavailable(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("accelerator backend should not be available"),
        }
    }

    #[test]
    fn test_check_len() {
        let data = vec![Complex64::new(0.0, 0.0); 27];
        assert!(check_len(&data, 3).is_ok());
        match check_len(&data, 4) {
            Err(ComputeError::DimensionMismatch { expected, found }) => {
                assert_eq!(expected, 64);
                assert_eq!(found, 27);
            }
            other => panic!("expected dimension mismatch, got {:?}", other.map(|_| ())),
        }
    }
}
