//! Residual estimators feeding the sandwich variance.
//!
//! Two families are supported:
//!
//! - **Nearest neighbour** (`Nn`): for each observation, the outcomes of its
//!   closest neighbours by score (on the same side of the cutoff) stand in for
//!   the conditional mean. The residual is
//!   `sqrt(J / (J + 1)) * (y_i - mean(y_neighbours))` where `J` is the number of
//!   neighbours actually used. Ties in the score are matched as whole blocks, so
//!   `J` can exceed the configured number of matches.
//! - **Heteroskedasticity-consistent** (`Hc0`..`Hc3`): regression residuals from
//!   the fitted local polynomial, optionally rescaled by a degrees-of-freedom
//!   factor or by the leverage `h_ii`.

use crate::domain::VarianceEstimator;

/// Nearest-neighbour residuals for observations sorted by `x`.
pub fn nn_residuals(x: &[f64], y: &[f64], matches: usize) -> Vec<f64> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }

    // Size of each tie block and the (1-based) rank within it.
    let mut dups = vec![0usize; n];
    let mut rank = vec![0usize; n];
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && x[end] == x[start] {
            end += 1;
        }
        for i in start..end {
            dups[i] = end - start;
            rank[i] = i - start + 1;
        }
        start = end;
    }

    let target = matches.min(n - 1);
    let mut out = Vec::with_capacity(n);
    for pos in 0..n {
        let mut right = dups[pos] - rank[pos];
        let mut left = rank[pos] - 1;

        while left + right < target {
            let has_left = pos > left;
            let has_right = pos + right + 1 < n;
            match (has_left, has_right) {
                (false, false) => break,
                (false, true) => right += dups[pos + right + 1],
                (true, false) => left += dups[pos - left - 1],
                (true, true) => {
                    let dl = x[pos] - x[pos - left - 1];
                    let dr = x[pos + right + 1] - x[pos];
                    if dl > dr {
                        right += dups[pos + right + 1];
                    } else if dl < dr {
                        left += dups[pos - left - 1];
                    } else {
                        right += dups[pos + right + 1];
                        left += dups[pos - left - 1];
                    }
                }
            }
        }

        let lo = pos - left;
        let hi = (pos + right).min(n - 1);
        let j = hi - lo;
        if j == 0 {
            out.push(0.0);
            continue;
        }
        let neighbour_sum: f64 = y[lo..=hi].iter().sum::<f64>() - y[pos];
        let jf = j as f64;
        out.push((jf / (jf + 1.0)).sqrt() * (y[pos] - neighbour_sum / jf));
    }
    out
}

/// Regression residuals rescaled according to `kind`.
///
/// `n_params` is the column count of the fit that produced `fitted`; only
/// `Hc1` uses it. `Nn` is not a regression residual and returns the raw
/// residuals unchanged.
pub fn hc_residuals(
    kind: VarianceEstimator,
    y: &[f64],
    fitted: &[f64],
    leverage: &[f64],
    n_params: usize,
) -> Vec<f64> {
    let n = y.len() as f64;
    let k = n_params as f64;
    y.iter()
        .zip(fitted)
        .zip(leverage)
        .map(|((yi, fi), &hii)| {
            let e = yi - fi;
            // Leverage of a fully determined point is 1; keep the residual finite.
            let one_minus_h = (1.0 - hii).max(1e-12);
            match kind {
                VarianceEstimator::Nn | VarianceEstimator::Hc0 => e,
                VarianceEstimator::Hc1 => {
                    if n > k {
                        e * (n / (n - k)).sqrt()
                    } else {
                        e
                    }
                }
                VarianceEstimator::Hc2 => e / one_minus_h.sqrt(),
                VarianceEstimator::Hc3 => e / one_minus_h,
            }
        })
        .collect()
}
