use nalgebra as na;
use num_traits::Float;

/// Least-squares line `y = k·x + b`, returns `[k, b]`.
pub fn linear_ls<T: na::RealField + Float>(x: &[T], y: &[T]) -> Option<na::Vector2<T>> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }

    let n = <T as num_traits::NumCast>::from(x.len())?;
    let s_x = x.iter().fold(T::zero(), |acc, &v| acc + v);
    let s_x2 = x.iter().fold(T::zero(), |acc, &v| acc + v * v);
    let s_xy = x.iter().zip(y).fold(T::zero(), |acc, (&a, &b)| acc + a * b);
    let s_y = y.iter().fold(T::zero(), |acc, &v| acc + v);

    // degenerate when every x is the same
    let det = s_x2 * n - s_x * s_x;
    if Float::abs(det) <= <T as Float>::epsilon() * Float::max(s_x2 * n, T::one()) {
        return None;
    }

    let a = na::Matrix2::new(s_x2, s_x, s_x, n);
    let b = na::Vector2::new(s_xy, s_y);

    let qr_result = a.qr();
    let qty = qr_result.q().transpose() * b;

    qr_result.r().solve_upper_triangular(&qty)
}

pub fn gauss(x: f32, c: f32) -> f32 {
    (-((x * x) / (2.0 * c * c))).exp()
}

/// Linear interpolation of `y` at `at` on a polyline sorted by `x`.
pub fn interpolate_at(xs: &[f64], ys: &[f64], at: f64) -> Option<f64> {
    if xs.len() != ys.len() || xs.is_empty() {
        return None;
    }

    if at < xs[0] || at > xs[xs.len() - 1] {
        return None;
    }

    for i in 1..xs.len() {
        let (x0, x1) = (xs[i - 1], xs[i]);
        if at >= x0 && at <= x1 {
            let span = x1 - x0;
            if span.abs() < f64::EPSILON {
                return Some(ys[i]);
            }
            let t = (at - x0) / span;
            return Some(ys[i - 1] + (ys[i] - ys[i - 1]) * t);
        }
    }

    Some(ys[xs.len() - 1])
}
