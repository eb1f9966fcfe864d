//! Centred cubic B-spline used to interpolate charges onto the mesh.
//!
//! In mesh units the weight of a point at distance $x$ is
//! $W(x) = M_4(2 - |x|)$, supported on $|x| < 2$, with the half-spline
//!
//! $$ M_4(t) = \begin{cases} t^3/6 & 0 \le t < 1 \\
//!    -t^3/2 + 2t^2 - 2t + 2/3 & 1 \le t \le 2 \end{cases} $$
//!
//! The weights of the four nearest mesh points always sum to one.

/// Mesh points touched per axis.
pub const STENCIL: usize = 4;

/// Half-spline $M_4$ on $[0, 2]$, zero elsewhere.
pub fn spline(t: f64) -> f64 {
    if (0.0..1.0).contains(&t) {
        t * t * t / 6.0
    } else if (1.0..=2.0).contains(&t) {
        -0.5 * t * t * t + 2.0 * t * t - 2.0 * t + 2.0 / 3.0
    } else {
        0.0
    }
}

/// Interpolation weight at signed mesh distance `x`.
pub fn weight(x: f64) -> f64 {
    if x.abs() >= 2.0 {
        0.0
    } else {
        spline(2.0 - x.abs())
    }
}

/// Analytic derivative $dW/dx$, odd in `x`.
pub fn weight_derivative(x: f64) -> f64 {
    let a = x.abs();
    if a < 1.0 {
        -2.0 * x + 1.5 * x * a
    } else if a < 2.0 {
        let t = 2.0 - a;
        -x.signum() * 0.5 * t * t
    } else {
        0.0
    }
}

/// Squared-modulus correction $|b(k)|^2$ for wave index `k` on a mesh of
/// `width` points: $1 / ((2 + \cos(2\pi k/K))/3)^2$.
pub fn euler_factor(k: usize, width: usize) -> f64 {
    let theta = 2.0 * std::f64::consts::PI * k as f64 / width as f64;
    let s = (2.0 + theta.cos()) / 3.0;
    1.0 / (s * s)
}

/// First mesh index of the stencil around fractional coordinate `u`, and the
/// four signed distances `u - j` to the stencil points.
pub fn stencil(u: f64) -> (i64, [f64; STENCIL]) {
    let first = u.floor() as i64 - 1;
    let mut x = [0.0; STENCIL];
    for (o, xo) in x.iter_mut().enumerate() {
        *xo = u - (first + o as i64) as f64;
    }
    (first, x)
}
