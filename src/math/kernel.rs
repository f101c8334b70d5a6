//! Kernel weights and local polynomial design rows.
//!
//! Kernels are evaluated at the normalized distance `u = (score - cutoff) / h`:
//!
//! - uniform: `K(u) = 1/2`
//! - triangular: `K(u) = 1 - |u|`
//! - Epanechnikov: `K(u) = 3/4 (1 - u^2)`
//!
//! for `|u| <= 1`, and `0` outside. The constant factors do not affect any
//! estimate (they cancel in every weighted least squares solve), but keeping
//! the normalized forms makes the weights comparable across kernels.

use crate::domain::Kernel;

/// Kernel weight at normalized distance `u`.
pub fn kernel_weight(kernel: Kernel, u: f64) -> f64 {
    let a = u.abs();
    if !(a <= 1.0) {
        return 0.0;
    }
    match kernel {
        Kernel::Uniform => 0.5,
        Kernel::Triangular => 1.0 - a,
        Kernel::Epanechnikov => 0.75 * (1.0 - u * u),
    }
}

/// Fill `out` with `[1, u, u^2, ..., u^(out.len()-1)]`.
pub fn fill_poly_row(u: f64, out: &mut [f64]) {
    let mut term = 1.0;
    for slot in out.iter_mut() {
        *slot = term;
        term *= u;
    }
}

/// Polynomial row of degree `order`.
pub fn poly_row(u: f64, order: usize) -> Vec<f64> {
    let mut row = vec![0.0; order + 1];
    fill_poly_row(u, &mut row);
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernels_vanish_outside_support() {
        for kernel in [Kernel::Uniform, Kernel::Triangular, Kernel::Epanechnikov] {
            assert_eq!(kernel_weight(kernel, 1.0001), 0.0);
            assert_eq!(kernel_weight(kernel, -3.0), 0.0);
            assert_eq!(kernel_weight(kernel, f64::NAN), 0.0);
            for &u in &[0.0, 0.25, 0.5, 0.9] {
                let w = kernel_weight(kernel, u);
                assert!(w > 0.0, "{kernel:?} weight at {u} should be positive");
                assert_eq!(w, kernel_weight(kernel, -u), "{kernel:?} should be symmetric");
            }
        }
    }

    #[test]
    fn uniform_includes_the_boundary_and_triangular_zeroes_it() {
        assert_eq!(kernel_weight(Kernel::Uniform, -1.0), 0.5);
        assert_eq!(kernel_weight(Kernel::Triangular, -1.0), 0.0);
        assert_eq!(kernel_weight(Kernel::Epanechnikov, 1.0), 0.0);
    }

    #[test]
    fn poly_row_powers() {
        assert_eq!(poly_row(2.0, 3), vec![1.0, 2.0, 4.0, 8.0]);
        assert_eq!(poly_row(-0.5, 0), vec![1.0]);
    }
}
