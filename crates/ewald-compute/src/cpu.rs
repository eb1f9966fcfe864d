//! Host FFT backend using `rustfft` with Rayon for shared-memory parallelism.
//!
//! A 3D transform is three passes of 1D transforms: rows along x are
//! contiguous, lines along y are gathered per z-slab, and lines along z go
//! through a transposed scratch copy so every pass runs over independent,
//! contiguous chunks.

use std::sync::Arc;

use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};

use crate::backend::{check_len, BackendType, ComputeError, DeviceInfo, FftBackend, FftPlan};

/// Host backend that parallelises 1D transforms across threads via Rayon.
pub struct CpuFft {
    num_threads: usize,
}

impl CpuFft {
    /// Create a new host backend using all available threads.
    pub fn new() -> Self {
        Self {
            num_threads: rayon::current_num_threads(),
        }
    }
}

impl Default for CpuFft {
    fn default() -> Self {
        Self::new()
    }
}

impl FftBackend for CpuFft {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("CPU ({} threads)", self.num_threads),
            backend_type: BackendType::Cpu,
            memory_bytes: None,
            compute_units: Some(self.num_threads),
        }
    }

    fn plan(&self, width: usize) -> Result<Box<dyn FftPlan>, ComputeError> {
        if width == 0 {
            return Err(ComputeError::DeviceError(
                "cannot plan a transform over an empty mesh".into(),
            ));
        }
        let mut planner = FftPlanner::<f64>::new();
        log::debug!("planning {}³ host FFT", width);
        Ok(Box::new(CpuFftPlan {
            width,
            forward: planner.plan_fft_forward(width),
            inverse: planner.plan_fft_inverse(width),
        }))
    }
}

/// Forward and inverse 1D plans of one length, reused along all three axes.
struct CpuFftPlan {
    width: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl FftPlan for CpuFftPlan {
    fn width(&self) -> usize {
        self.width
    }

    fn forward(&self, data: &mut [Complex64]) -> Result<(), ComputeError> {
        check_len(data, self.width)?;
        transform_3d(data, self.width, &self.forward);
        Ok(())
    }

    fn inverse(&self, data: &mut [Complex64]) -> Result<(), ComputeError> {
        check_len(data, self.width)?;
        transform_3d(data, self.width, &self.inverse);
        Ok(())
    }
}

/// Apply `fft` along x, y and z of a `k³` array laid out x-fastest.
///
/// Each Rayon worker allocates its line and scratch buffers once and reuses
/// them for every line it transforms.
fn transform_3d(data: &mut [Complex64], k: usize, fft: &Arc<dyn Fft<f64>>) {
    let plane = k * k;
    let zero = Complex64::new(0.0, 0.0);
    let scratch_len = fft.get_inplace_scratch_len();

    // 1) Lines along x are contiguous rows; a whole slab is k of them.
    data.par_chunks_mut(plane).for_each_init(
        || vec![zero; scratch_len],
        |scratch, slab| fft.process_with_scratch(slab, scratch),
    );

    // 2) Lines along y: gather each column of a z-slab.
    data.par_chunks_mut(plane).for_each_init(
        || (vec![zero; k], vec![zero; scratch_len]),
        |(line, scratch), slab| {
            for x in 0..k {
                for y in 0..k {
                    line[y] = slab[x + y * k];
                }
                fft.process_with_scratch(line, scratch);
                for y in 0..k {
                    slab[x + y * k] = line[y];
                }
            }
        },
    );

    // 3) Lines along z: transpose so z is fastest, transform, transpose back.
    let mut tmp = vec![zero; data.len()];
    {
        let src: &[Complex64] = &*data;
        tmp.par_chunks_mut(plane).enumerate().for_each_init(
            || vec![zero; scratch_len],
            |scratch, (block, lines)| {
                for (offset, line) in lines.chunks_mut(k).enumerate() {
                    let xy = block * k + offset;
                    for z in 0..k {
                        line[z] = src[xy + z * plane];
                    }
                }
                fft.process_with_scratch(lines, scratch);
            },
        );
    }
    let tmp_ro: &[Complex64] = &tmp;
    data.par_chunks_mut(plane)
        .enumerate()
        .for_each(|(z, slab)| {
            for xy in 0..plane {
                slab[xy] = tmp_ro[xy * k + z];
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn sample(k: usize) -> Vec<Complex64> {
        (0..k * k * k)
            .map(|i| Complex64::new((i as f64 * 0.37).sin(), (i as f64 * 0.11).cos()))
            .collect()
    }

    /// Brute-force 3D DFT with sign `sign` (−1 forward, +1 inverse).
    fn naive_dft(data: &[Complex64], k: usize, sign: f64) -> Vec<Complex64> {
        let mut out = vec![Complex64::new(0.0, 0.0); data.len()];
        for mz in 0..k {
            for my in 0..k {
                for mx in 0..k {
                    let mut acc = Complex64::new(0.0, 0.0);
                    for z in 0..k {
                        for y in 0..k {
                            for x in 0..k {
                                let phase = sign * 2.0 * PI
                                    * ((mx * x + my * y + mz * z) as f64)
                                    / k as f64;
                                acc += data[x + y * k + z * k * k]
                                    * Complex64::new(phase.cos(), phase.sin());
                            }
                        }
                    }
                    out[mx + my * k + mz * k * k] = acc;
                }
            }
        }
        out
    }

    #[test]
    fn test_forward_matches_naive_dft() {
        let k = 4;
        let backend = CpuFft::new();
        let plan = backend.plan(k).unwrap();
        let input = sample(k);
        let expected = naive_dft(&input, k, -1.0);

        let mut data = input.clone();
        plan.forward(&mut data).unwrap();
        for (a, b) in data.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-10);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_inverse_matches_naive_dft() {
        let k = 5;
        let plan = CpuFft::new().plan(k).unwrap();
        let input = sample(k);
        let expected = naive_dft(&input, k, 1.0);

        let mut data = input.clone();
        plan.inverse(&mut data).unwrap();
        for (a, b) in data.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-10);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_forward_inverse_is_scaled_identity() {
        let k = 8;
        let plan = CpuFft::new().plan(k).unwrap();
        let input = sample(k);
        let mut data = input.clone();
        plan.forward(&mut data).unwrap();
        plan.inverse(&mut data).unwrap();
        let scale = (k * k * k) as f64;
        for (a, b) in data.iter().zip(input.iter()) {
            assert_abs_diff_eq!(a.re / scale, b.re, epsilon = 1e-12);
            assert_abs_diff_eq!(a.im / scale, b.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_wrong_buffer_length_rejected() {
        let plan = CpuFft::new().plan(4).unwrap();
        let mut data = vec![Complex64::new(0.0, 0.0); 60];
        assert!(plan.forward(&mut data).is_err());
    }

    #[test]
    fn test_device_info() {
        let info = CpuFft::new().device_info();
        assert_eq!(info.backend_type, BackendType::Cpu);
        assert!(info.name.starts_with("CPU"));
    }
}
