//! Weighted least squares solver.
//!
//! Every local polynomial fit in this crate solves
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! on a small design (a handful of columns, at most a few thousand rows).
//!
//! Implementation choices:
//! - Rows are scaled by `sqrt(w_i)` and the scaled design is decomposed with SVD.
//!   The singular values give the rank check for free, and
//!   `(X'WX)^{-1} = V Σ^{-2} V'` is needed anyway by the variance estimators.
//! - Callers pass designs in normalized units (`u = (x - c) / h`) so columns are
//!   of comparable magnitude and a relative tolerance is meaningful.
//! - A rank-deficient design yields `None`; the caller knows which side of the
//!   cutoff it was fitting and reports the error.

use nalgebra::{DMatrix, DVector};

/// Solution of a weighted least squares problem.
#[derive(Debug, Clone)]
pub struct WlsSolution {
    pub beta: DVector<f64>,
    /// `(X'WX)^{-1}`.
    pub inv_gram: DMatrix<f64>,
}

/// `(X'WX)^{-1}`, or `None` when `sqrt(W) X` has a singular value below
/// `tol * σ_max` (or fewer rows than columns).
pub fn weighted_gram_inverse(x: &DMatrix<f64>, w: &[f64], tol: f64) -> Option<DMatrix<f64>> {
    let k = x.ncols();
    if k == 0 || x.nrows() < k || w.len() != x.nrows() {
        return None;
    }

    let mut xw = x.clone();
    for (i, &wi) in w.iter().enumerate() {
        xw.row_mut(i).scale_mut(wi.max(0.0).sqrt());
    }

    let svd = xw.svd(false, true);
    let v_t = svd.v_t?;
    let sv = svd.singular_values;

    let s_max = sv.iter().copied().fold(0.0_f64, f64::max);
    if !(s_max.is_finite() && s_max > 0.0) {
        return None;
    }
    if sv.iter().any(|&s| s <= tol * s_max) {
        return None;
    }

    let mut scaled = v_t.transpose();
    for (j, &s) in sv.iter().enumerate() {
        scaled.column_mut(j).scale_mut(1.0 / (s * s));
    }
    let inv_gram = scaled * v_t;

    if inv_gram.iter().all(|v| v.is_finite()) {
        Some(inv_gram)
    } else {
        None
    }
}

/// `X' W v`.
pub fn weighted_cross(x: &DMatrix<f64>, w: &[f64], v: &[f64]) -> DVector<f64> {
    let mut out = DVector::<f64>::zeros(x.ncols());
    for i in 0..x.nrows() {
        let scale = w[i] * v[i];
        for j in 0..x.ncols() {
            out[j] += x[(i, j)] * scale;
        }
    }
    out
}

/// Solve a weighted least squares problem.
///
/// Returns `None` if the weighted design is rank deficient.
pub fn solve_weighted_least_squares(
    x: &DMatrix<f64>,
    w: &[f64],
    y: &[f64],
    tol: f64,
) -> Option<WlsSolution> {
    let inv_gram = weighted_gram_inverse(x, w, tol)?;
    let beta = &inv_gram * weighted_cross(x, w, y);
    if beta.iter().all(|v| v.is_finite()) {
        Some(WlsSolution { beta, inv_gram })
    } else {
        None
    }
}

/// Build a row-major design matrix from per-row slices.
pub fn design_from_rows(rows: &[Vec<f64>], ncols: usize) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), ncols, |i, j| rows[i][j])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = [2.0, 5.0, 8.0];

        let sol = solve_weighted_least_squares(&x, &[1.0, 1.0, 1.0], &y, 1e-10).unwrap();
        assert!((sol.beta[0] - 2.0).abs() < 1e-10);
        assert!((sol.beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn weights_pull_the_fit_towards_heavy_rows() {
        // Intercept-only fit is the weighted mean.
        let x = DMatrix::from_element(3, 1, 1.0);
        let sol = solve_weighted_least_squares(&x, &[1.0, 1.0, 2.0], &[0.0, 0.0, 4.0], 1e-10).unwrap();
        assert!((sol.beta[0] - 2.0).abs() < 1e-12);
        assert!((sol.inv_gram[(0, 0)] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn collinear_columns_are_rejected() {
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 3.0, 1.0, 3.0, 1.0, 3.0, 1.0, 3.0]);
        assert!(weighted_gram_inverse(&x, &[1.0; 4], 1e-10).is_none());
    }

    #[test]
    fn zero_weight_rows_do_not_count() {
        // Two distinct x values carry weight; the third row has zero weight,
        // so a quadratic is not identified.
        let x = DMatrix::from_row_slice(3, 3, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 2.0, 4.0]);
        assert!(weighted_gram_inverse(&x, &[1.0, 1.0, 0.0], 1e-10).is_none());
        assert!(weighted_gram_inverse(&x, &[1.0, 1.0, 1.0], 1e-10).is_some());
    }
}
