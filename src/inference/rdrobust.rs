//! End-to-end RD estimation: bandwidths, point estimate, bias correction,
//! standard errors and confidence intervals.
//!
//! The workflow is
//!
//! bandwidth selection (unless supplied) -> local polynomial fit at `h`
//! -> bias correction with the order `p + 1` fit at `b` -> inference rows
//!
//! Three rows are reported, matching the usual RD output table:
//!
//! - Conventional: point estimate, conventional standard error
//! - Bias-Corrected: bias-corrected estimate, conventional standard error
//! - Robust: bias-corrected estimate, robust standard error
//!
//! The headline `standard_error` and `confidence_interval` are the robust ones.

use rayon::join;
use rayon::prelude::*;

use crate::config::RdConfig;
use crate::domain::{
    BandwidthRule, BandwidthSet, Bandwidths, CriticalValue, InferenceMethod, InferenceRow, Kernel, Observations,
    RdEstimate, Side,
};
use crate::error::{RdError, Result};
use crate::fit::local_poly::estimate_split;
use crate::fit::window::SideSample;
use crate::fit::{LocalPolyRequest, SelectRequest, select};
use crate::inference::bias::side_inference;
use crate::math::{critical_value, two_sided_p_value};

/// Inputs of [`rdrobust`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RdRequest {
    pub cutoff: f64,
    /// Order `p` of the main fit; the bias-correction fit uses `p + 1`.
    pub order: usize,
    pub kernel: Kernel,
    /// Main bandwidth; selected with `rule` when `None`.
    pub h: Option<Bandwidths>,
    /// Bias bandwidth; defaults to the selected `b`, or to `h` when `h` is supplied.
    pub b: Option<Bandwidths>,
    pub rule: BandwidthRule,
    pub use_covariates: bool,
}

impl Default for RdRequest {
    fn default() -> Self {
        Self {
            cutoff: 0.0,
            order: 1,
            kernel: Kernel::Triangular,
            h: None,
            b: None,
            rule: BandwidthRule::Mserd,
            use_covariates: true,
        }
    }
}

/// Robust bias-corrected RD estimate.
pub fn rdrobust(obs: &Observations, req: &RdRequest, config: &RdConfig) -> Result<RdEstimate> {
    config.validate()?;

    // 1) Bandwidths.
    let (bandwidths, rule) = match req.h {
        Some(h) => {
            h.validate()?;
            let b = req.b.unwrap_or(h);
            b.validate()?;
            (BandwidthSet { h, b }, None)
        }
        None => {
            let select_req = SelectRequest {
                cutoff: req.cutoff,
                order: req.order,
                kernel: req.kernel,
                rule: req.rule,
                use_covariates: req.use_covariates,
            };
            let mut set = select(obs, &select_req, config)?;
            if let Some(b) = req.b {
                b.validate()?;
                set.b = b;
            }
            (set, Some(req.rule))
        }
    };

    // 2) Conventional fit at h (also estimates the covariate coefficients).
    let (left, right) = SideSample::split(obs, req.cutoff)?;
    let lp_req = LocalPolyRequest {
        cutoff: req.cutoff,
        bandwidths: bandwidths.h,
        kernel: req.kernel,
        order: req.order,
        use_covariates: req.use_covariates,
    };
    let fit = estimate_split(&left, &right, &lp_req, config)?;

    // 3) Bias correction and variances, one side per task.
    let (inf_left, inf_right) = join(
        || {
            let y = left.adjusted_outcome(&fit.gamma);
            side_inference(&left, &y, bandwidths.h.left, bandwidths.b.left, req.kernel, req.order, config)
        },
        || {
            let y = right.adjusted_outcome(&fit.gamma);
            side_inference(&right, &y, bandwidths.h.right, bandwidths.b.right, req.kernel, req.order, config)
        },
    );
    let (inf_left, inf_right) = (inf_left?, inf_right?);

    let tau_cl = fit.estimate;
    let tau_bc = inf_right.tau_bc - inf_left.tau_bc;
    let se_cl = (inf_left.var_cl + inf_right.var_cl).sqrt();
    let se_rb = (inf_left.var_rb + inf_right.var_rb).sqrt();

    // 4) Inference rows.
    let n_clusters = obs.n_clusters();
    let df = match n_clusters {
        Some(g) => g as f64 - 1.0,
        None => {
            (fit.left.n_effective + fit.right.n_effective) as f64
                - 2.0 * (req.order + 1) as f64
                - fit.gamma.len() as f64
        }
    };
    if config.critical_value == CriticalValue::StudentT && df <= 0.0 {
        let (side, available) = if fit.left.n_effective <= fit.right.n_effective {
            (Side::Left, fit.left.n_effective)
        } else {
            (Side::Right, fit.right.n_effective)
        };
        return Err(RdError::InsufficientData {
            side,
            available,
            required: available + (1.0 - df).ceil() as usize,
        });
    }
    let crit = critical_value(config.level, config.critical_value, df)?;
    let rows = vec![
        inference_row(InferenceMethod::Conventional, tau_cl, se_cl, crit, config.critical_value, df)?,
        inference_row(InferenceMethod::BiasCorrected, tau_bc, se_cl, crit, config.critical_value, df)?,
        inference_row(InferenceMethod::Robust, tau_bc, se_rb, crit, config.critical_value, df)?,
    ];

    log::info!(
        "rdrobust at c={}: tau={tau_cl:.6} tau_bc={tau_bc:.6} se_cl={se_cl:.6} se_rb={se_rb:.6} h=({:.6}, {:.6})",
        req.cutoff,
        bandwidths.h.left,
        bandwidths.h.right
    );

    Ok(RdEstimate {
        cutoff: req.cutoff,
        order: req.order,
        bias_order: req.order + 1,
        kernel: req.kernel,
        rule,
        variance: config.variance,
        critical_value: config.critical_value,
        level: config.level,
        point_estimate: tau_cl,
        bias_corrected_estimate: tau_bc,
        standard_error: se_rb,
        conventional_se: se_cl,
        confidence_interval: rows[2].interval,
        conventional_interval: rows[0].interval,
        bandwidth_used: bandwidths.h,
        bias_bandwidth: bandwidths.b,
        n_left: fit.left.n,
        n_right: fit.right.n,
        n_effective_left: fit.left.n_effective,
        n_effective_right: fit.right.n_effective,
        total_left: left.len(),
        total_right: right.len(),
        n_clusters,
        coef_left: fit.left.coefficients,
        coef_right: fit.right.coefficients,
        gamma: fit.gamma,
        rows,
    })
}

/// `rdrobust` for several outcome vectors sharing the scores, covariates and
/// clusters of `obs`. Runs in parallel; results are in input order.
pub fn rdrobust_many(
    obs: &Observations,
    outcomes: &[Vec<f64>],
    req: &RdRequest,
    config: &RdConfig,
) -> Vec<Result<RdEstimate>> {
    outcomes
        .par_iter()
        .map(|y| obs.with_outcome(y.clone()).and_then(|o| rdrobust(&o, req, config)))
        .collect()
}

fn inference_row(
    method: InferenceMethod,
    coefficient: f64,
    std_error: f64,
    crit: f64,
    kind: CriticalValue,
    df: f64,
) -> Result<InferenceRow> {
    let statistic = if std_error > 0.0 {
        coefficient / std_error
    } else if coefficient == 0.0 {
        0.0
    } else {
        coefficient.signum() * f64::INFINITY
    };
    Ok(InferenceRow {
        method,
        coefficient,
        std_error,
        statistic,
        p_value: two_sided_p_value(statistic, kind, df)?,
        interval: (coefficient - crit * std_error, coefficient + crit * std_error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VarianceEstimator;
    use crate::simulate::RdDesign;

    fn design() -> RdDesign {
        RdDesign {
            n: 5000,
            jump: 2.0,
            noise_sd: 0.1,
            ..RdDesign::default()
        }
    }

    #[test]
    fn recovers_the_jump_of_a_smooth_design() {
        let _ = env_logger::builder().is_test(true).try_init();
        let obs = design().generate().unwrap();
        let est = rdrobust(&obs, &RdRequest::default(), &RdConfig::default()).unwrap();

        assert!((est.point_estimate - 2.0).abs() < 0.1, "tau {}", est.point_estimate);
        assert!((est.bias_corrected_estimate - 2.0).abs() < 0.1, "tau_bc {}", est.bias_corrected_estimate);
        assert!(est.standard_error > 0.0 && est.conventional_se > 0.0);
        assert_eq!(est.rule, Some(BandwidthRule::Mserd));
        assert_eq!(est.bandwidth_used.left, est.bandwidth_used.right);
        assert_eq!(est.total_left + est.total_right, 5000);
        assert!(est.n_effective_left <= est.n_left);
    }

    #[test]
    fn rows_pair_estimates_with_the_right_standard_errors() {
        let obs = design().generate().unwrap();
        let est = rdrobust(&obs, &RdRequest::default(), &RdConfig::default()).unwrap();

        let methods: Vec<InferenceMethod> = est.rows.iter().map(|r| r.method).collect();
        assert_eq!(
            methods,
            vec![InferenceMethod::Conventional, InferenceMethod::BiasCorrected, InferenceMethod::Robust]
        );
        let conventional = est.row(InferenceMethod::Conventional).unwrap();
        let corrected = est.row(InferenceMethod::BiasCorrected).unwrap();
        let robust = est.row(InferenceMethod::Robust).unwrap();

        assert_eq!(conventional.coefficient, est.point_estimate);
        assert_eq!(corrected.coefficient, est.bias_corrected_estimate);
        assert_eq!(corrected.std_error, est.conventional_se);
        assert_eq!(robust.std_error, est.standard_error);
        assert_eq!(robust.interval, est.confidence_interval);
        assert_eq!(conventional.interval, est.conventional_interval);

        let half_width = (robust.interval.1 - robust.interval.0) / 2.0;
        assert!((half_width / robust.std_error - 1.959963984540054).abs() < 1e-6);
        assert!(robust.p_value < 1e-6);
    }

    #[test]
    fn manual_bandwidth_sets_bias_bandwidth_to_h() {
        let obs = design().generate().unwrap();
        let req = RdRequest {
            h: Some(Bandwidths::common(0.3)),
            ..RdRequest::default()
        };
        let est = rdrobust(&obs, &req, &RdConfig::default()).unwrap();
        assert_eq!(est.rule, None);
        assert_eq!(est.bias_bandwidth, Bandwidths::common(0.3));
        assert_eq!(est.bandwidth_used, Bandwidths::common(0.3));
    }

    #[test]
    fn step_function_has_exact_estimate_and_zero_error() {
        let score: Vec<f64> = (-10..10).map(f64::from).collect();
        let outcome = score.iter().map(|&s| if s < 0.0 { 0.0 } else { 5.0 }).collect();
        let obs = Observations::new(score, outcome).unwrap();
        let req = RdRequest {
            order: 0,
            kernel: Kernel::Uniform,
            h: Some(Bandwidths::common(10.0)),
            ..RdRequest::default()
        };
        let est = rdrobust(&obs, &req, &RdConfig::default()).unwrap();
        assert!((est.point_estimate - 5.0).abs() < 1e-10);
        assert!((est.bias_corrected_estimate - 5.0).abs() < 1e-9);
        assert_eq!(est.standard_error, 0.0);
        assert_eq!(est.rows[2].p_value, 0.0);
    }

    #[test]
    fn invalid_inputs_are_reported() {
        let obs = design().generate().unwrap();
        let bad_h = RdRequest {
            h: Some(Bandwidths::new(0.2, -1.0)),
            ..RdRequest::default()
        };
        assert!(matches!(
            rdrobust(&obs, &bad_h, &RdConfig::default()),
            Err(RdError::InvalidBandwidth { .. })
        ));

        let bad_cutoff = RdRequest {
            cutoff: 5.0,
            ..RdRequest::default()
        };
        assert!(matches!(
            rdrobust(&obs, &bad_cutoff, &RdConfig::default()),
            Err(RdError::InvalidCutoff { .. })
        ));

        let bad_level = RdConfig {
            level: 100.0,
            ..RdConfig::default()
        };
        assert!(matches!(
            rdrobust(&obs, &RdRequest::default(), &bad_level),
            Err(RdError::InvalidLevel(_))
        ));
    }

    #[test]
    fn student_t_without_residual_degrees_of_freedom_is_insufficient_data() {
        let obs = Observations::new(vec![-2.0, -0.4, 0.1, 2.0], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let req = RdRequest {
            order: 0,
            kernel: Kernel::Uniform,
            h: Some(Bandwidths::common(0.5)),
            b: Some(Bandwidths::common(3.0)),
            ..RdRequest::default()
        };
        let config = RdConfig {
            critical_value: CriticalValue::StudentT,
            variance: VarianceEstimator::Hc0,
            ..RdConfig::default()
        };
        let err = rdrobust(&obs, &req, &config).unwrap_err();
        assert!(
            matches!(err, RdError::InsufficientData { side: Side::Left, available: 1, required: 2 }),
            "got {err:?}"
        );

        // The same sample is fine with Normal critical values.
        let normal = RdConfig {
            critical_value: CriticalValue::Normal,
            ..config
        };
        assert!(rdrobust(&obs, &req, &normal).is_ok());
    }

    #[test]
    fn clustered_student_t_interval_uses_cluster_degrees_of_freedom() {
        let obs = RdDesign {
            n_clusters: Some(30),
            ..design()
        }
        .generate()
        .unwrap();
        let config = RdConfig {
            critical_value: CriticalValue::StudentT,
            ..RdConfig::default()
        };
        let est = rdrobust(&obs, &RdRequest::default(), &config).unwrap();
        assert_eq!(est.n_clusters, Some(30));

        let expected = critical_value(95.0, CriticalValue::StudentT, 29.0).unwrap();
        let half_width = (est.confidence_interval.1 - est.confidence_interval.0) / 2.0;
        assert!((half_width / est.standard_error - expected).abs() < 1e-9);
    }

    #[test]
    fn hc_variance_estimators_give_positive_errors() {
        let obs = design().generate().unwrap();
        for variance in [
            VarianceEstimator::Hc0,
            VarianceEstimator::Hc1,
            VarianceEstimator::Hc2,
            VarianceEstimator::Hc3,
        ] {
            let config = RdConfig {
                variance,
                ..RdConfig::default()
            };
            let est = rdrobust(&obs, &RdRequest::default(), &config).unwrap();
            assert!(est.standard_error.is_finite() && est.standard_error > 0.0, "{variance:?}");
            assert_eq!(est.variance, variance);
        }
    }

    #[test]
    fn covariate_adjustment_tightens_the_interval() {
        let obs = RdDesign {
            covariate_effect: Some(2.0),
            ..design()
        }
        .generate()
        .unwrap();
        let adjusted = rdrobust(&obs, &RdRequest::default(), &RdConfig::default()).unwrap();
        let plain = rdrobust(
            &obs,
            &RdRequest {
                use_covariates: false,
                ..RdRequest::default()
            },
            &RdConfig::default(),
        )
        .unwrap();
        assert_eq!(adjusted.gamma.len(), 1);
        assert!((adjusted.gamma[0] - 2.0).abs() < 0.05);
        assert!(adjusted.standard_error < plain.standard_error);
    }

    #[test]
    fn placebo_cutoff_and_donut_samples() {
        let obs = design().generate().unwrap();

        let treated = obs.subset(|i| obs.score()[i] >= 0.0);
        let placebo = RdRequest {
            cutoff: 0.5,
            ..RdRequest::default()
        };
        let est = rdrobust(&treated, &placebo, &RdConfig::default()).unwrap();
        assert!(est.bias_corrected_estimate.abs() < 0.3, "placebo {}", est.bias_corrected_estimate);

        let donut = obs.donut(0.0, 0.05);
        let est = rdrobust(&donut, &RdRequest::default(), &RdConfig::default()).unwrap();
        assert!(est.total_left + est.total_right < obs.len());
        assert!((est.bias_corrected_estimate - 2.0).abs() < 0.3);
    }

    #[test]
    fn many_outcomes_keep_input_order() {
        let obs = design().generate().unwrap();
        let doubled: Vec<f64> = obs.outcome().iter().map(|y| 2.0 * y).collect();
        let outcomes = vec![obs.outcome().to_vec(), doubled, vec![1.0; 3]];

        let results = rdrobust_many(&obs, &outcomes, &RdRequest::default(), &RdConfig::default());
        assert_eq!(results.len(), 3);
        let first = results[0].as_ref().unwrap();
        let second = results[1].as_ref().unwrap();
        assert!((second.point_estimate - 2.0 * first.point_estimate).abs() < 1e-8);
        assert!(matches!(results[2], Err(RdError::LengthMismatch { .. })));
    }
}
