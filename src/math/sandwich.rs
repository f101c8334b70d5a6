//! Sandwich variance of a linear functional of the outcomes.
//!
//! Every quantity whose variance we need (an intercept, a bias-corrected
//! intercept, one coefficient of a pilot fit) is linear in the outcomes:
//! `θ = Σ ℓ_i y_i`. Given per-observation residuals `e_i` the heteroskedasticity
//! robust variance is `Σ (ℓ_i e_i)^2`; with clusters the scores are summed
//! within each cluster first (Liang–Zeger):
//!
//! ```text
//! V = c · Σ_g (Σ_{i ∈ g} ℓ_i e_i)^2,   c = G/(G-1) · (N-1)/(N-K)
//! ```

use std::collections::BTreeMap;

/// Sandwich variance of `Σ ℓ_i y_i`.
///
/// `n_params` is the column count of the regression the functional comes
/// from; it only enters the cluster small-sample correction.
pub fn sandwich_variance(
    influence: &[f64],
    residuals: &[f64],
    clusters: Option<&[u64]>,
    n_params: usize,
) -> f64 {
    match clusters {
        None => influence
            .iter()
            .zip(residuals)
            .map(|(l, e)| (l * e) * (l * e))
            .sum(),
        Some(ids) => {
            let mut scores: BTreeMap<u64, f64> = BTreeMap::new();
            for ((l, e), id) in influence.iter().zip(residuals).zip(ids) {
                *scores.entry(*id).or_insert(0.0) += l * e;
            }
            let meat: f64 = scores.values().map(|s| s * s).sum();

            let n = influence.len() as f64;
            let k = n_params as f64;
            let g = scores.len() as f64;
            let correction = if g > 1.0 && n > k {
                (g / (g - 1.0)) * ((n - 1.0) / (n - k))
            } else {
                1.0
            };
            meat * correction
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heteroskedastic_sum_of_squares() {
        let v = sandwich_variance(&[1.0, 2.0], &[3.0, -1.0], None, 1);
        assert!((v - (9.0 + 4.0)).abs() < 1e-12);
    }

    #[test]
    fn singleton_clusters_match_robust_up_to_correction() {
        let l = [0.5, -0.25, 1.0, 0.1];
        let e = [1.0, 2.0, -1.0, 0.5];
        let robust = sandwich_variance(&l, &e, None, 2);
        let clustered = sandwich_variance(&l, &e, Some(&[1, 2, 3, 4]), 2);
        let correction = (4.0 / 3.0) * (3.0 / 2.0);
        assert!((clustered - robust * correction).abs() < 1e-12);
    }

    #[test]
    fn cluster_scores_are_summed_before_squaring() {
        // Two observations in one cluster with opposite scores cancel.
        let v = sandwich_variance(&[1.0, 1.0, 1.0], &[1.0, -1.0, 2.0], Some(&[7, 7, 9]), 1);
        let correction = 2.0 * (2.0 / 2.0);
        assert!((v - 4.0 * correction).abs() < 1e-12);
    }
}
