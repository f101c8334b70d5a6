//! Local polynomial estimation at the cutoff.
//!
//! On each side we solve a kernel-weighted least squares problem
//!
//! ```text
//! minimize Σ K((x_i - c) / h) (y_i - Σ_j β_j (x_i - c)^j)^2
//! ```
//!
//! and report `β_0(right) - β_0(left)` as the discontinuity estimate.
//!
//! Designs are built in normalized units `u = (x - c) / h`; coefficients are
//! converted back to powers of `x - c` only when reported. With covariates the
//! outcome is first residualised on `Z` using a coefficient vector `γ` shared
//! by both sides and estimated jointly with side-specific polynomials.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::config::RdConfig;
use crate::domain::{Bandwidths, Kernel, Observations, Side, VarianceEstimator};
use crate::error::{RdError, Result};
use crate::fit::residuals::{hc_residuals, nn_residuals};
use crate::fit::window::{SideSample, Window};
use crate::math::{fill_poly_row, solve_weighted_least_squares, weighted_gram_inverse, WlsSolution};

/// Inputs of a single local polynomial estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPolyRequest {
    pub cutoff: f64,
    pub bandwidths: Bandwidths,
    pub kernel: Kernel,
    pub order: usize,
    /// Residualise the outcome on the observation covariates (if any).
    pub use_covariates: bool,
}

impl LocalPolyRequest {
    pub fn new(cutoff: f64, bandwidths: Bandwidths, kernel: Kernel, order: usize) -> Self {
        Self {
            cutoff,
            bandwidths,
            kernel,
            order,
            use_covariates: true,
        }
    }
}

/// One observation that entered a side's regression.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitRow {
    /// Row in the caller's observation table.
    pub index: usize,
    pub score: f64,
    pub outcome: f64,
    /// Outcome net of the covariate index (equal to `outcome` without covariates).
    pub adjusted_outcome: f64,
    pub weight: f64,
    pub fitted: f64,
    pub residual: f64,
    pub leverage: f64,
    pub cluster: Option<u64>,
}

/// Local polynomial fit on one side of the cutoff.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideFit {
    pub side: Side,
    pub bandwidth: f64,
    /// `β_j` in powers of `score - cutoff`; `coefficients[0]` is the boundary intercept.
    pub coefficients: Vec<f64>,
    /// Observations with `|score - cutoff| <= h`.
    pub n: usize,
    /// Observations with positive kernel weight.
    pub n_effective: usize,
    /// Positively weighted observations, sorted by score.
    pub rows: Vec<FitRow>,
}

impl SideFit {
    pub fn intercept(&self) -> f64 {
        self.coefficients[0]
    }

    /// Rows grouped by cluster id, or `None` for unclustered data.
    pub fn rows_by_cluster(&self) -> Option<BTreeMap<u64, Vec<&FitRow>>> {
        let mut groups: BTreeMap<u64, Vec<&FitRow>> = BTreeMap::new();
        for row in &self.rows {
            groups.entry(row.cluster?).or_default().push(row);
        }
        Some(groups)
    }
}

/// Result of [`estimate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalPolyFit {
    /// `right.intercept() - left.intercept()`.
    pub estimate: f64,
    pub left: SideFit,
    pub right: SideFit,
    /// Covariate coefficients shared by both sides (empty without covariates).
    pub gamma: Vec<f64>,
}

impl LocalPolyFit {
    pub fn side(&self, side: Side) -> &SideFit {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

/// Estimate the discontinuity at `req.cutoff` by local polynomial regression.
pub fn estimate(obs: &Observations, req: &LocalPolyRequest, config: &RdConfig) -> Result<LocalPolyFit> {
    req.bandwidths.validate()?;
    let (left, right) = SideSample::split(obs, req.cutoff)?;
    estimate_split(&left, &right, req, config)
}

pub(crate) fn estimate_split(
    left: &SideSample,
    right: &SideSample,
    req: &LocalPolyRequest,
    config: &RdConfig,
) -> Result<LocalPolyFit> {
    let gamma = if req.use_covariates && left.n_covariates() > 0 {
        pooled_gamma(left, right, req, config.rank_tolerance)?
    } else {
        Vec::new()
    };

    let left_fit = side_fit(left, &gamma, req, config)?;
    let right_fit = side_fit(right, &gamma, req, config)?;
    let estimate = right_fit.intercept() - left_fit.intercept();

    log::debug!(
        "local poly: p={} h=({:.6}, {:.6}) n_eff=({}, {}) estimate={:.6}",
        req.order,
        req.bandwidths.left,
        req.bandwidths.right,
        left_fit.n_effective,
        right_fit.n_effective,
        estimate
    );

    Ok(LocalPolyFit {
        estimate,
        left: left_fit,
        right: right_fit,
        gamma,
    })
}

fn side_fit(sample: &SideSample, gamma: &[f64], req: &LocalPolyRequest, config: &RdConfig) -> Result<SideFit> {
    let h = req.bandwidths.get(sample.side);
    let y = sample.adjusted_outcome(gamma);
    let fit = LocalFit::new(sample, &y, h, req.kernel, req.order, config.rank_tolerance)?;

    let fitted = fit.fitted();
    let leverage = fit.leverage();
    let rows = fit
        .window
        .positions
        .iter()
        .enumerate()
        .map(|(i, &pos)| FitRow {
            index: sample.index[pos],
            score: sample.dist[pos] + req.cutoff,
            outcome: sample.outcome[pos],
            adjusted_outcome: y[pos],
            weight: fit.window.weights[i],
            fitted: fitted[i],
            residual: y[pos] - fitted[i],
            leverage: leverage[i],
            cluster: sample.clusters.as_ref().map(|ids| ids[pos]),
        })
        .collect();

    Ok(SideFit {
        side: sample.side,
        bandwidth: h,
        coefficients: fit.raw_coefficients(),
        n: fit.window.n_in_window,
        n_effective: fit.window.n_effective(),
        rows,
    })
}

/// Joint regression of the outcome on side-specific polynomials and shared
/// covariates; returns the covariate block of the coefficients.
fn pooled_gamma(left: &SideSample, right: &SideSample, req: &LocalPolyRequest, tol: f64) -> Result<Vec<f64>> {
    let k = req.order + 1;
    let n_cov = left.n_covariates();
    let ncols = 2 * k + n_cov;

    let wl = checked_window(left, req.bandwidths.left, req.kernel, k)?;
    let wr = checked_window(right, req.bandwidths.right, req.kernel, k)?;

    let nrows = wl.n_effective() + wr.n_effective();
    let mut x = DMatrix::<f64>::zeros(nrows, ncols);
    let mut w = Vec::with_capacity(nrows);
    let mut y = Vec::with_capacity(nrows);

    let mut row = 0;
    for (sample, window, offset) in [(left, &wl, 0), (right, &wr, k)] {
        for (i, &pos) in window.positions.iter().enumerate() {
            let mut poly = vec![0.0; k];
            fill_poly_row(sample.dist[pos] / window.h, &mut poly);
            for (j, v) in poly.into_iter().enumerate() {
                x[(row, offset + j)] = v;
            }
            for (j, z) in sample.covariates[pos].iter().enumerate() {
                x[(row, 2 * k + j)] = *z;
            }
            w.push(window.weights[i]);
            y.push(sample.outcome[pos]);
            row += 1;
        }
    }

    match solve_weighted_least_squares(&x, &w, &y, tol) {
        Some(sol) => Ok(sol.beta.iter().skip(2 * k).copied().collect()),
        None => {
            // Locate the side whose own [polynomial, Z] block is deficient.
            let side = [(left, &wl), (right, &wr)]
                .into_iter()
                .find(|(sample, window)| {
                    let block = covariate_design(sample, window, req.order);
                    weighted_gram_inverse(&block, &window.weights, tol).is_none()
                })
                .map_or(Side::Left, |(sample, _)| sample.side);
            let n_effective = if side == Side::Left { wl.n_effective() } else { wr.n_effective() };
            Err(RdError::RankDeficiency { side, n_effective })
        }
    }
}

/// Design `[1, u, .., u^order, z_1, .., z_m]` over a window.
fn covariate_design(sample: &SideSample, window: &Window, order: usize) -> DMatrix<f64> {
    let k = order + 1;
    let n_cov = sample.n_covariates();
    let mut x = DMatrix::<f64>::zeros(window.n_effective(), k + n_cov);
    for (i, &pos) in window.positions.iter().enumerate() {
        let mut poly = vec![0.0; k];
        fill_poly_row(sample.dist[pos] / window.h, &mut poly);
        for (j, v) in poly.into_iter().enumerate() {
            x[(i, j)] = v;
        }
        for (j, z) in sample.covariates[pos].iter().enumerate() {
            x[(i, k + j)] = *z;
        }
    }
    x
}

/// Covariate coefficients from a single side's `[polynomial, Z]` regression.
pub(crate) fn side_gamma(sample: &SideSample, h: f64, kernel: Kernel, order: usize, tol: f64) -> Result<Vec<f64>> {
    let window = checked_window(sample, h, kernel, order + 1)?;
    let x = covariate_design(sample, &window, order);
    let y: Vec<f64> = window.positions.iter().map(|&p| sample.outcome[p]).collect();
    let sol = solve_weighted_least_squares(&x, &window.weights, &y, tol).ok_or(RdError::RankDeficiency {
        side: sample.side,
        n_effective: window.n_effective(),
    })?;
    Ok(sol.beta.iter().skip(order + 1).copied().collect())
}

fn checked_window(sample: &SideSample, h: f64, kernel: Kernel, required: usize) -> Result<Window> {
    let window = sample.window(h, kernel);
    if window.n_effective() < required {
        return Err(RdError::InsufficientData {
            side: sample.side,
            available: window.n_effective(),
            required,
        });
    }
    Ok(window)
}

/// A weighted polynomial fit of order `order` at bandwidth `h` on one side,
/// in normalized units.
#[derive(Debug, Clone)]
pub(crate) struct LocalFit {
    pub order: usize,
    pub window: Window,
    /// Rows `[1, u, .., u^order]` of the positively weighted observations.
    pub design: DMatrix<f64>,
    pub solution: WlsSolution,
    /// Normalized distances `u_i` of the positively weighted observations.
    pub u: Vec<f64>,
    /// Outcomes of the positively weighted observations.
    pub y: Vec<f64>,
}

impl LocalFit {
    pub fn new(sample: &SideSample, y: &[f64], h: f64, kernel: Kernel, order: usize, tol: f64) -> Result<Self> {
        let window = checked_window(sample, h, kernel, order + 1)?;
        let k = order + 1;
        let mut design = DMatrix::<f64>::zeros(window.n_effective(), k);
        let mut row = vec![0.0; k];
        let u: Vec<f64> = window.positions.iter().map(|&p| sample.dist[p] / h).collect();
        for (i, &ui) in u.iter().enumerate() {
            fill_poly_row(ui, &mut row);
            for (j, v) in row.iter().enumerate() {
                design[(i, j)] = *v;
            }
        }
        let y_win: Vec<f64> = window.positions.iter().map(|&p| y[p]).collect();
        let solution = solve_weighted_least_squares(&design, &window.weights, &y_win, tol).ok_or(
            RdError::RankDeficiency {
                side: sample.side,
                n_effective: window.n_effective(),
            },
        )?;
        Ok(Self {
            order,
            window,
            design,
            solution,
            u,
            y: y_win,
        })
    }

    pub fn h(&self) -> f64 {
        self.window.h
    }

    pub fn n_params(&self) -> usize {
        self.order + 1
    }

    /// `ℓ_i` such that `β_j = Σ ℓ_i y_i` (normalized units), one per window row.
    pub fn influence(&self, j: usize) -> Vec<f64> {
        let g = &self.solution.inv_gram;
        (0..self.design.nrows())
            .map(|i| {
                let r = self.design.row(i);
                let gr: f64 = (0..r.len()).map(|m| g[(j, m)] * r[m]).sum();
                gr * self.window.weights[i]
            })
            .collect()
    }

    pub fn fitted(&self) -> Vec<f64> {
        (&self.design * &self.solution.beta).iter().copied().collect()
    }

    /// Diagonal of the weighted hat matrix, `w_i r_i' (X'WX)^{-1} r_i`.
    pub fn leverage(&self) -> Vec<f64> {
        let g = &self.solution.inv_gram;
        (0..self.design.nrows())
            .map(|i| {
                let mut quad = 0.0;
                for a in 0..self.n_params() {
                    for b in 0..self.n_params() {
                        quad += self.design[(i, a)] * g[(a, b)] * self.design[(i, b)];
                    }
                }
                self.window.weights[i] * quad
            })
            .collect()
    }

    /// `Σ w_i r_i u_i^power` over the window.
    pub fn moment(&self, power: usize) -> DVector<f64> {
        let mut out = DVector::<f64>::zeros(self.n_params());
        for i in 0..self.design.nrows() {
            let scale = self.window.weights[i] * self.u[i].powi(power as i32);
            for j in 0..self.n_params() {
                out[j] += self.design[(i, j)] * scale;
            }
        }
        out
    }

    /// Residuals for the sandwich variance, one per window row.
    pub fn variance_residuals(&self, sample: &SideSample, config: &RdConfig) -> Vec<f64> {
        match config.variance {
            VarianceEstimator::Nn => {
                let x: Vec<f64> = self.window.positions.iter().map(|&p| sample.dist[p]).collect();
                nn_residuals(&x, &self.y, config.nn_matches)
            }
            kind => hc_residuals(kind, &self.y, &self.fitted(), &self.leverage(), self.n_params()),
        }
    }

    /// Coefficients in powers of `score - cutoff`.
    pub fn raw_coefficients(&self) -> Vec<f64> {
        let h = self.h();
        self.solution
            .beta
            .iter()
            .enumerate()
            .map(|(j, b)| b / h.powi(j as i32))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_sample() -> Observations {
        let score: Vec<f64> = (-10..10).map(f64::from).collect();
        let outcome = score.iter().map(|&s| if s < 0.0 { 0.0 } else { 5.0 }).collect();
        Observations::new(score, outcome).unwrap()
    }

    fn linear_sample(n: usize) -> Observations {
        let score: Vec<f64> = (0..n).map(|i| -1.0 + 2.0 * (i as f64 + 0.5) / n as f64).collect();
        let outcome = score
            .iter()
            .map(|&x| if x < 0.0 { 1.0 + 2.0 * x } else { 4.0 + 0.5 * x })
            .collect();
        Observations::new(score, outcome).unwrap()
    }

    #[test]
    fn step_function_recovers_jump_exactly() {
        let req = LocalPolyRequest::new(0.0, Bandwidths::common(10.0), Kernel::Uniform, 0);
        let fit = estimate(&step_sample(), &req, &RdConfig::default()).unwrap();
        assert!((fit.estimate - 5.0).abs() < 1e-10, "estimate {}", fit.estimate);
        assert_eq!(fit.left.n, 10);
        assert_eq!(fit.right.n_effective, 10);
        assert!(fit.gamma.is_empty());
    }

    #[test]
    fn empty_left_window_is_insufficient() {
        let req = LocalPolyRequest::new(0.0, Bandwidths::new(0.5, 10.0), Kernel::Uniform, 0);
        let err = estimate(&step_sample(), &req, &RdConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            RdError::InsufficientData { side: Side::Left, available: 0, required: 1 }
        ));
    }

    #[test]
    fn negative_bandwidth_is_rejected() {
        let req = LocalPolyRequest::new(0.0, Bandwidths::new(-1.0, 10.0), Kernel::Uniform, 0);
        let err = estimate(&step_sample(), &req, &RdConfig::default()).unwrap_err();
        assert!(matches!(err, RdError::InvalidBandwidth { side: Side::Left, .. }));
    }

    #[test]
    fn linear_sides_are_fitted_exactly() {
        let req = LocalPolyRequest::new(0.0, Bandwidths::common(2.0), Kernel::Triangular, 1);
        let fit = estimate(&linear_sample(40), &req, &RdConfig::default()).unwrap();
        assert!((fit.estimate - 3.0).abs() < 1e-9);
        assert!((fit.left.coefficients[1] - 2.0).abs() < 1e-9);
        assert!((fit.right.coefficients[1] - 0.5).abs() < 1e-9);
        assert!(fit.left.rows.iter().all(|r| r.residual.abs() < 1e-9));
    }

    #[test]
    fn noisy_linear_design_recovers_the_jump() {
        let obs = crate::simulate::RdDesign {
            n: 4000,
            jump: 1.0,
            left_poly: vec![0.0, 0.5],
            right_poly: vec![0.0, 0.5],
            noise_sd: 0.05,
            ..crate::simulate::RdDesign::default()
        }
        .generate()
        .unwrap();
        for order in [1, 2] {
            let req = LocalPolyRequest::new(0.0, Bandwidths::common(0.5), Kernel::Triangular, order);
            let fit = estimate(&obs, &req, &RdConfig::default()).unwrap();
            assert!(fit.left.n_effective >= 30 && fit.right.n_effective >= 30);
            assert!((fit.estimate - 1.0).abs() < 0.05, "p={order}: estimate {}", fit.estimate);
        }
    }

    #[test]
    fn noisy_design_without_a_jump_estimates_zero() {
        let noise_sd = 0.05;
        let obs = crate::simulate::RdDesign {
            n: 80_000,
            jump: 0.0,
            left_poly: vec![0.0, 0.5],
            right_poly: vec![0.0, 0.5],
            noise_sd,
            seed: 11,
            ..crate::simulate::RdDesign::default()
        }
        .generate()
        .unwrap();
        let req = LocalPolyRequest::new(0.0, Bandwidths::common(1.0), Kernel::Uniform, 1);
        let fit = estimate(&obs, &req, &RdConfig::default()).unwrap();
        assert!(fit.estimate.abs() < 0.05 * noise_sd, "estimate {}", fit.estimate);
    }

    #[test]
    fn uniform_kernel_matches_ols_inside_the_window() {
        let score: Vec<f64> = (0..60).map(|i| -3.0 + 0.1 * i as f64).collect();
        let outcome: Vec<f64> = score
            .iter()
            .enumerate()
            .map(|(i, &x)| x * x + (i as f64 * 1.7).sin() + if x >= 0.0 { 1.0 } else { 0.0 })
            .collect();
        let obs = Observations::new(score.clone(), outcome.clone()).unwrap();
        let h = 1.25;
        let req = LocalPolyRequest::new(0.0, Bandwidths::common(h), Kernel::Uniform, 2);
        let fit = estimate(&obs, &req, &RdConfig::default()).unwrap();

        let ols_intercept = |keep: &dyn Fn(f64) -> bool| {
            let rows: Vec<usize> = (0..score.len()).filter(|&i| keep(score[i])).collect();
            let x = DMatrix::from_fn(rows.len(), 3, |r, j| score[rows[r]].powi(j as i32));
            let y: Vec<f64> = rows.iter().map(|&i| outcome[i]).collect();
            let sol = solve_weighted_least_squares(&x, &vec![1.0; rows.len()], &y, 1e-12).unwrap();
            sol.beta[0]
        };
        let left = ols_intercept(&|x| x < 0.0 && x.abs() <= h);
        let right = ols_intercept(&|x| x >= 0.0 && x.abs() <= h);
        assert!((fit.left.intercept() - left).abs() < 1e-8);
        assert!((fit.right.intercept() - right).abs() < 1e-8);
    }

    #[test]
    fn order_exceeding_window_size_is_insufficient() {
        let obs = Observations::new(
            vec![-0.3, -0.2, -0.1, 0.1, 0.2, 0.3, 0.4, 0.5],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        )
        .unwrap();
        let req = LocalPolyRequest::new(0.0, Bandwidths::common(1.0), Kernel::Uniform, 3);
        let err = estimate(&obs, &req, &RdConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            RdError::InsufficientData { side: Side::Left, available: 3, required: 4 }
        ));
    }

    #[test]
    fn repeated_scores_make_a_quadratic_rank_deficient() {
        let obs = Observations::new(
            vec![-1.0, -1.0, -1.0, -0.5, -0.5, 0.1, 0.2, 0.3, 0.4],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        )
        .unwrap();
        let req = LocalPolyRequest::new(0.0, Bandwidths::common(2.0), Kernel::Uniform, 2);
        let err = estimate(&obs, &req, &RdConfig::default()).unwrap_err();
        assert!(matches!(err, RdError::RankDeficiency { side: Side::Left, n_effective: 5 }));
    }

    #[test]
    fn covariates_are_partialled_out_with_a_shared_gamma() {
        let n = 80;
        let score: Vec<f64> = (0..n).map(|i| -1.0 + 2.0 * (i as f64 + 0.5) / n as f64).collect();
        let z: Vec<f64> = (0..n).map(|i| (i as f64 * 0.37).sin()).collect();
        let outcome = score
            .iter()
            .zip(&z)
            .map(|(&x, &zi)| 1.0 + 0.5 * x + 2.0 * zi + if x >= 0.0 { 3.0 } else { 0.0 })
            .collect();
        let obs = Observations::new(score, outcome)
            .unwrap()
            .with_covariates(vec![z])
            .unwrap();

        let req = LocalPolyRequest::new(0.0, Bandwidths::common(1.5), Kernel::Triangular, 1);
        let fit = estimate(&obs, &req, &RdConfig::default()).unwrap();
        assert!((fit.gamma[0] - 2.0).abs() < 1e-8);
        assert!((fit.estimate - 3.0).abs() < 1e-8);

        let plain = LocalPolyRequest { use_covariates: false, ..req };
        let unadjusted = estimate(&obs, &plain, &RdConfig::default()).unwrap();
        assert!(unadjusted.gamma.is_empty());
    }

    #[test]
    fn constant_covariate_is_rank_deficient() {
        let obs = linear_sample(30).with_covariates(vec![vec![1.0; 30]]).unwrap();
        let req = LocalPolyRequest::new(0.0, Bandwidths::common(2.0), Kernel::Triangular, 1);
        let err = estimate(&obs, &req, &RdConfig::default()).unwrap_err();
        assert!(matches!(err, RdError::RankDeficiency { side: Side::Left, .. }));
    }

    #[test]
    fn rows_group_by_cluster() {
        let obs = step_sample().with_clusters((0..20).map(|i| i % 3).collect()).unwrap();
        let req = LocalPolyRequest::new(0.0, Bandwidths::common(10.0), Kernel::Uniform, 0);
        let fit = estimate(&obs, &req, &RdConfig::default()).unwrap();
        let groups = fit.left.rows_by_cluster().unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups.values().map(Vec::len).sum::<usize>(), 10);

        let unclustered = estimate(&step_sample(), &req, &RdConfig::default()).unwrap();
        assert!(unclustered.left.rows_by_cluster().is_none());
    }
}
