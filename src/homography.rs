//! Planar homography from point correspondences: normalized DLT.

use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};

use crate::error::Error;

/// `H · [x, y, 1]ᵀ`, dehomogenized. `None` on points at infinity.
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> Option<[f64; 2]> {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-12 {
        return None;
    }

    Some([p[0] / p[2], p[1] / p[2]])
}

pub fn from_row_major(m: &[f64; 9]) -> Matrix3<f64> {
    Matrix3::from_row_slice(m)
}

/// Centroid to the origin, mean distance to √2.
fn normalize(pts: &[[f64; 2]]) -> Result<(Matrix3<f64>, Vec<[f64; 2]>), Error> {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;

    let mean_dist = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    if !(mean_dist > 1e-12) {
        return Err(Error::Homography("points coincide".into()));
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts
        .iter()
        .map(|p| [s * (p[0] - cx), s * (p[1] - cy)])
        .collect();

    Ok((t, normalized))
}

/// Estimates `H` with `dst ≈ project(H, src)` from four or more pairs.
pub fn estimate(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Result<Matrix3<f64>, Error> {
    let n = src.len();
    if n != dst.len() {
        return Err(Error::Homography(format!(
            "{} source points but {} destination points",
            n,
            dst.len()
        )));
    }
    if n < 4 {
        return Err(Error::Homography(format!("need 4 points, got {}", n)));
    }
    if src.iter().chain(dst).flatten().any(|v| !v.is_finite()) {
        return Err(Error::Homography("non-finite coordinate".into()));
    }

    let (t_src, src_n) = normalize(src)?;
    let (t_dst, dst_n) = normalize(dst)?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for i in 0..n {
        let [sx, sy] = src_n[i];
        let [dx, dy] = dst_n[i];

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // h is the eigenvector of AᵀA with the smallest eigenvalue
    let eig = SymmetricEigen::new(a.transpose() * &a);
    let min_idx = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.abs().total_cmp(&y.1.abs()))
        .map(|(i, _)| i)
        .ok_or_else(|| Error::Homography("empty eigen decomposition".into()))?;

    let h = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    // unit-norm in normalized coordinates, so an absolute bound is meaningful
    let det = h_norm.determinant();
    if !det.is_finite() || det.abs() < 1e-8 {
        return Err(Error::Homography("degenerate configuration".into()));
    }

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| Error::Homography("normalization not invertible".into()))?;
    let mut h = t_dst_inv * h_norm * t_src;

    let scale = h[(2, 2)];
    if scale.abs() > 1e-12 {
        h /= scale;
    }

    Ok(h)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: [f64; 2], b: [f64; 2], tol: f64) {
        assert!(
            (a[0] - b[0]).abs() < tol && (a[1] - b[1]).abs() < tol,
            "{:?} vs {:?}",
            a,
            b
        );
    }

    #[test]
    fn recovers_known_homography() {
        let truth = Matrix3::new(1.2, 0.1, 30.0, -0.05, 0.9, 12.0, 0.0004, -0.0002, 1.0);
        let src = [
            [0.0, 0.0],
            [100.0, 0.0],
            [100.0, 80.0],
            [0.0, 80.0],
            [50.0, 40.0],
            [20.0, 70.0],
        ];
        let dst: Vec<[f64; 2]> = src
            .iter()
            .map(|p| project(&truth, p[0], p[1]).unwrap())
            .collect();

        let h = estimate(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            assert_close(project(&h, s[0], s[1]).unwrap(), *d, 1e-6);
        }
        assert_close(
            project(&h, 75.0, 10.0).unwrap(),
            project(&truth, 75.0, 10.0).unwrap(),
            1e-6,
        );
    }

    #[test]
    fn trapezoid_to_rectangle() {
        let src = [[100.0, 900.0], [700.0, 900.0], [500.0, 100.0], [300.0, 100.0]];
        let dst = [[1.0, 0.0], [39.0, 0.0], [39.0, 60.0], [1.0, 60.0]];

        let h = estimate(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            assert_close(project(&h, s[0], s[1]).unwrap(), *d, 1e-6);
        }
    }

    #[test]
    fn too_few_or_collinear_points() {
        let src = [[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]];
        assert!(estimate(&src, &src).is_err());

        let line = [[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let square = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        assert!(estimate(&line, &square).is_err());

        let same = [[5.0, 5.0]; 4];
        assert!(matches!(estimate(&same, &square), Err(Error::Homography(_))));
    }

    #[test]
    fn row_major_layout() {
        let m = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let h = from_row_major(&m);
        assert_eq!(h[(0, 2)], 3.0);
        assert_eq!(h[(2, 0)], 7.0);
        assert_eq!(h[(1, 1)], 5.0);
    }
}
