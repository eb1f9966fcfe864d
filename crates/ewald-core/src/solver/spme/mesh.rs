//! Charge mesh and the reciprocal-space influence function.

use ndarray::Array3;
use num_complex::Complex64;
use rayon::prelude::*;

use super::bspline::{self, STENCIL};
use crate::periodic::Domain;
use crate::solver::SolverError;
use crate::tuning;
use crate::types::ParticleView;

/// Smallest usable mesh: the stencil must not wrap onto itself.
pub const MIN_WIDTH: usize = STENCIL;

/// Cubic mesh of `width³` points spanning a cubic domain.
///
/// Point `(x, y, z)` sits at `origin + h·(x, y, z)` and is stored at flat
/// index `x + y·K + z·K²`.
#[derive(Debug, Clone)]
pub struct Mesh {
    width: usize,
    spacing: f64,
    origin: [f64; 3],
    pub charge: Vec<f64>,
    pub amplitude: Vec<Complex64>,
}

impl Mesh {
    pub fn new(domain: &Domain, width: usize) -> Result<Self, SolverError> {
        let length = domain.cubic_length()?;
        if width < MIN_WIDTH {
            return Err(SolverError::InvalidParameter(format!(
                "mesh width must be at least {}, got {}",
                MIN_WIDTH, width
            )));
        }
        let n = width * width * width;
        Ok(Self {
            width,
            spacing: length / width as f64,
            origin: domain.lo,
            charge: vec![0.0; n],
            amplitude: vec![Complex64::new(0.0, 0.0); n],
        })
    }

    /// See [`tuning::suggested_mesh_width`].
    pub fn suggested_width(alpha: f64, length: f64, accuracy: f64) -> usize {
        tuning::suggested_mesh_width(alpha, length, accuracy)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    pub fn len(&self) -> usize {
        self.charge.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charge.is_empty()
    }

    /// Flat index of (possibly out-of-range) mesh coordinates, wrapped.
    pub fn index(&self, x: i64, y: i64, z: i64) -> usize {
        let k = self.width as i64;
        let (x, y, z) = (x.rem_euclid(k), y.rem_euclid(k), z.rem_euclid(k));
        (x + y * k + z * k * k) as usize
    }

    /// Cartesian position of mesh point `idx`.
    #[cfg(test)]
    fn position(&self, idx: usize) -> [f64; 3] {
        let k = self.width;
        let (x, y, z) = (idx % k, (idx / k) % k, idx / (k * k));
        [
            self.origin[0] + self.spacing * x as f64,
            self.origin[1] + self.spacing * y as f64,
            self.origin[2] + self.spacing * z as f64,
        ]
    }

    /// Fractional mesh coordinate of `p` along each axis.
    pub fn mesh_coordinates(&self, p: [f64; 3]) -> [f64; 3] {
        [
            (p[0] - self.origin[0]) / self.spacing,
            (p[1] - self.origin[1]) / self.spacing,
            (p[2] - self.origin[2]) / self.spacing,
        ]
    }

    /// Interpolate the local charges onto the mesh, replacing its contents.
    ///
    /// Each worker spreads into a private mesh; the meshes are summed
    /// afterwards, so the result is independent of scheduling.
    pub fn spread(&mut self, view: &ParticleView<'_>) {
        let n = self.len();
        let this = &*self;
        let charge = (0..view.n_local)
            .into_par_iter()
            .fold(
                || vec![0.0; n],
                |mut mesh, i| {
                    let q = view.charges[i];
                    this.for_each_stencil_point(view.positions[i], |idx, w, _| {
                        mesh[idx] += q * w;
                    });
                    mesh
                },
            )
            .reduce(
                || vec![0.0; n],
                |mut a, b| {
                    a.iter_mut().zip(&b).for_each(|(x, y)| *x += y);
                    a
                },
            );
        self.charge = charge;
    }

    /// Visit the 4×4×4 stencil around `p` with the point's flat index, its
    /// weight $W_x W_y W_z$, and the weight gradient in mesh units.
    pub fn for_each_stencil_point<F>(&self, p: [f64; 3], mut f: F)
    where
        F: FnMut(usize, f64, [f64; 3]),
    {
        let u = self.mesh_coordinates(p);
        let (fx, xs) = bspline::stencil(u[0]);
        let (fy, ys) = bspline::stencil(u[1]);
        let (fz, zs) = bspline::stencil(u[2]);
        let wx = xs.map(bspline::weight);
        let wy = ys.map(bspline::weight);
        let wz = zs.map(bspline::weight);
        let dx = xs.map(bspline::weight_derivative);
        let dy = ys.map(bspline::weight_derivative);
        let dz = zs.map(bspline::weight_derivative);
        for c in 0..STENCIL {
            for b in 0..STENCIL {
                for a in 0..STENCIL {
                    let idx = self.index(fx + a as i64, fy + b as i64, fz + c as i64);
                    let w = wx[a] * wy[b] * wz[c];
                    let grad = [
                        dx[a] * wy[b] * wz[c],
                        wx[a] * dy[b] * wz[c],
                        wx[a] * wy[b] * dz[c],
                    ];
                    f(idx, w, grad);
                }
            }
        }
    }

    pub fn total_charge(&self) -> f64 {
        self.charge.iter().sum()
    }
}

/// Precomputed $B \cdot C$ array, one real value per mesh wave index.
///
/// $$ BC(\mathbf{m}) = \prod_d |b(m_d)|^2 \;
///    \frac{e^{-\pi^2 \tilde m^2/\alpha^2}}{\pi V \tilde m^2}, \qquad
///    \tilde{\mathbf m} = \mathbf{m}_{shifted} / L $$
///
/// with indices shifted into $[-K/2, K/2)$ and zero at the origin.
#[derive(Debug, Clone)]
pub struct InfluenceFunction {
    values: Array3<f64>,
}

impl InfluenceFunction {
    pub fn new(width: usize, length: f64, alpha: f64) -> Self {
        let volume = length * length * length;
        let pi = std::f64::consts::PI;
        let shift = |k: usize| -> f64 {
            if k < width / 2 || (width % 2 == 1 && k == width / 2) {
                k as f64
            } else {
                k as f64 - width as f64
            }
        };
        let euler: Vec<f64> = (0..width).map(|k| bspline::euler_factor(k, width)).collect();
        // Indexed [z, y, x] so that standard layout matches the flat mesh order.
        let values = Array3::from_shape_fn((width, width, width), |(z, y, x)| {
            if x == 0 && y == 0 && z == 0 {
                return 0.0;
            }
            let m = [shift(x) / length, shift(y) / length, shift(z) / length];
            let m2 = m[0] * m[0] + m[1] * m[1] + m[2] * m[2];
            euler[x] * euler[y] * euler[z] * (-pi * pi * m2 / (alpha * alpha)).exp() / (pi * volume * m2)
        });
        Self { values }
    }

    pub fn width(&self) -> usize {
        self.values.dim().0
    }

    /// Value at flat mesh index `idx`.
    pub fn get(&self, idx: usize) -> f64 {
        let k = self.width();
        self.values[[idx / (k * k), (idx / k) % k, idx % k]]
    }

    /// Multiply `amplitude` element-wise by the influence function.
    pub fn apply(&self, amplitude: &mut [Complex64]) {
        // Logical iteration order of a [z, y, x] array is the flat mesh order.
        for (a, bc) in amplitude.iter_mut().zip(self.values.iter()) {
            *a *= *bc;
        }
    }

    /// $\frac{1}{2}\sum_m BC(m)\,|\tilde Q(m)|^2$.
    pub fn energy(&self, amplitude: &[Complex64]) -> f64 {
        0.5 * amplitude
            .iter()
            .zip(self.values.iter())
            .map(|(a, bc)| bc * a.norm_sqr())
            .sum::<f64>()
    }
}
