//! Shared domain types.
//!
//! These types are small, `Copy` where possible, and serializable so results
//! can be exported by callers (printing, plotting, JSON dumps).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RdError, Result};

/// Side of the cutoff.
///
/// Control observations (`score < cutoff`) are on the left, treated
/// observations (`score >= cutoff`) on the right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn label(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kernel used to weight observations by their normalized distance to the cutoff.
///
/// All kernels are supported on `[-1, 1]` and zero outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    Uniform,
    #[default]
    Triangular,
    Epanechnikov,
}

impl Kernel {
    pub fn display_name(self) -> &'static str {
        match self {
            Kernel::Uniform => "Uniform",
            Kernel::Triangular => "Triangular",
            Kernel::Epanechnikov => "Epanechnikov",
        }
    }
}

impl FromStr for Kernel {
    type Err = RdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uniform" | "uni" => Ok(Kernel::Uniform),
            "triangular" | "tri" => Ok(Kernel::Triangular),
            "epanechnikov" | "epa" => Ok(Kernel::Epanechnikov),
            other => Err(RdError::InvalidConfig(format!("unknown kernel '{other}'"))),
        }
    }
}

/// Plug-in bandwidth selection rule.
///
/// `mse*` rules minimise an asymptotic mean squared error; `cer*` rules shrink
/// the MSE-optimal main bandwidth to target coverage error of the robust
/// confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandwidthRule {
    /// One common MSE-optimal bandwidth for the RD estimand.
    #[default]
    Mserd,
    /// Separate MSE-optimal bandwidths per side.
    Msetwo,
    /// One common MSE-optimal bandwidth for the sum of the two intercepts.
    Msesum,
    /// `min(mserd, msesum)`.
    Msecomb1,
    /// Per side `median(mserd, msetwo, msesum)`.
    Msecomb2,
    Cerrd,
    Certwo,
    Cersum,
    Cercomb1,
    Cercomb2,
}

impl BandwidthRule {
    pub const ALL: [BandwidthRule; 10] = [
        BandwidthRule::Mserd,
        BandwidthRule::Msetwo,
        BandwidthRule::Msesum,
        BandwidthRule::Msecomb1,
        BandwidthRule::Msecomb2,
        BandwidthRule::Cerrd,
        BandwidthRule::Certwo,
        BandwidthRule::Cersum,
        BandwidthRule::Cercomb1,
        BandwidthRule::Cercomb2,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BandwidthRule::Mserd => "mserd",
            BandwidthRule::Msetwo => "msetwo",
            BandwidthRule::Msesum => "msesum",
            BandwidthRule::Msecomb1 => "msecomb1",
            BandwidthRule::Msecomb2 => "msecomb2",
            BandwidthRule::Cerrd => "cerrd",
            BandwidthRule::Certwo => "certwo",
            BandwidthRule::Cersum => "cersum",
            BandwidthRule::Cercomb1 => "cercomb1",
            BandwidthRule::Cercomb2 => "cercomb2",
        }
    }

    pub fn is_cer(self) -> bool {
        matches!(
            self,
            BandwidthRule::Cerrd
                | BandwidthRule::Certwo
                | BandwidthRule::Cersum
                | BandwidthRule::Cercomb1
                | BandwidthRule::Cercomb2
        )
    }

    /// The MSE rule a CER rule is derived from (identity for MSE rules).
    pub fn mse_base(self) -> BandwidthRule {
        match self {
            BandwidthRule::Cerrd => BandwidthRule::Mserd,
            BandwidthRule::Certwo => BandwidthRule::Msetwo,
            BandwidthRule::Cersum => BandwidthRule::Msesum,
            BandwidthRule::Cercomb1 => BandwidthRule::Msecomb1,
            BandwidthRule::Cercomb2 => BandwidthRule::Msecomb2,
            other => other,
        }
    }
}

impl fmt::Display for BandwidthRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BandwidthRule {
    type Err = RdError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        BandwidthRule::ALL
            .into_iter()
            .find(|rule| rule.name() == lower)
            .ok_or_else(|| RdError::InvalidConfig(format!("unknown bandwidth rule '{s}'")))
    }
}

/// Residual construction used by the sandwich variance estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarianceEstimator {
    /// Nearest-neighbour residuals (matching on the score).
    #[default]
    Nn,
    Hc0,
    Hc1,
    Hc2,
    Hc3,
}

impl VarianceEstimator {
    pub fn display_name(self) -> &'static str {
        match self {
            VarianceEstimator::Nn => "NN",
            VarianceEstimator::Hc0 => "HC0",
            VarianceEstimator::Hc1 => "HC1",
            VarianceEstimator::Hc2 => "HC2",
            VarianceEstimator::Hc3 => "HC3",
        }
    }
}

/// Reference distribution for confidence intervals and p-values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriticalValue {
    #[default]
    Normal,
    StudentT,
}

/// A `(left, right)` bandwidth pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bandwidths {
    pub left: f64,
    pub right: f64,
}

impl Bandwidths {
    pub fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    /// Same bandwidth on both sides.
    pub fn common(h: f64) -> Self {
        Self { left: h, right: h }
    }

    pub fn get(&self, side: Side) -> f64 {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn max(&self) -> f64 {
        self.left.max(self.right)
    }

    /// Reject non-positive or non-finite bandwidths.
    pub fn validate(&self) -> Result<()> {
        for side in Side::BOTH {
            let value = self.get(side);
            if !(value.is_finite() && value > 0.0) {
                return Err(RdError::InvalidBandwidth { side, value });
            }
        }
        Ok(())
    }
}

/// Main (`h`) and bias (`b`) bandwidths returned by the selector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandwidthSet {
    pub h: Bandwidths,
    pub b: Bandwidths,
}

/// Which estimate / standard error pairing an inference row reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMethod {
    /// Point estimate with the conventional standard error.
    Conventional,
    /// Bias-corrected estimate with the conventional standard error.
    BiasCorrected,
    /// Bias-corrected estimate with the robust standard error.
    Robust,
}

impl InferenceMethod {
    pub fn display_name(self) -> &'static str {
        match self {
            InferenceMethod::Conventional => "Conventional",
            InferenceMethod::BiasCorrected => "Bias-Corrected",
            InferenceMethod::Robust => "Robust",
        }
    }
}

/// One row of the inference table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InferenceRow {
    pub method: InferenceMethod,
    pub coefficient: f64,
    pub std_error: f64,
    pub statistic: f64,
    pub p_value: f64,
    pub interval: (f64, f64),
}

/// Full output of a robust bias-corrected RD estimation.
#[derive(Debug, Clone, Serialize)]
pub struct RdEstimate {
    pub cutoff: f64,
    pub order: usize,
    pub bias_order: usize,
    pub kernel: Kernel,
    /// `None` when the caller supplied the bandwidths.
    pub rule: Option<BandwidthRule>,
    pub variance: VarianceEstimator,
    pub critical_value: CriticalValue,
    pub level: f64,

    /// Right intercept minus left intercept at the main bandwidth.
    pub point_estimate: f64,
    /// Point estimate minus the estimated leading bias.
    pub bias_corrected_estimate: f64,
    /// Robust standard error (accounts for the bias-correction step).
    pub standard_error: f64,
    pub conventional_se: f64,
    /// Robust interval centred at the bias-corrected estimate.
    pub confidence_interval: (f64, f64),
    /// Conventional interval centred at the point estimate.
    pub conventional_interval: (f64, f64),

    pub bandwidth_used: Bandwidths,
    pub bias_bandwidth: Bandwidths,

    /// Observations inside the main bandwidth window.
    pub n_left: usize,
    pub n_right: usize,
    /// Observations with positive kernel weight at the main bandwidth.
    pub n_effective_left: usize,
    pub n_effective_right: usize,
    /// All observations on each side of the cutoff.
    pub total_left: usize,
    pub total_right: usize,
    pub n_clusters: Option<usize>,

    /// Polynomial coefficients in powers of `score - cutoff`.
    pub coef_left: Vec<f64>,
    pub coef_right: Vec<f64>,
    /// Pooled covariate coefficients (empty without covariates).
    pub gamma: Vec<f64>,

    pub rows: Vec<InferenceRow>,
}

impl RdEstimate {
    pub fn row(&self, method: InferenceMethod) -> Option<&InferenceRow> {
        self.rows.iter().find(|r| r.method == method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_validation_names_the_side() {
        let err = Bandwidths::new(-1.0, 2.0).validate().unwrap_err();
        assert!(matches!(
            err,
            RdError::InvalidBandwidth {
                side: Side::Left,
                ..
            }
        ));

        let err = Bandwidths::new(1.0, f64::NAN).validate().unwrap_err();
        assert!(matches!(
            err,
            RdError::InvalidBandwidth {
                side: Side::Right,
                ..
            }
        ));

        assert!(Bandwidths::common(0.5).validate().is_ok());
    }

    #[test]
    fn parse_rules_and_kernels() {
        assert_eq!("cerrd".parse::<BandwidthRule>().unwrap(), BandwidthRule::Cerrd);
        assert_eq!("MSETWO".parse::<BandwidthRule>().unwrap(), BandwidthRule::Msetwo);
        assert!("mse".parse::<BandwidthRule>().is_err());
        assert_eq!("tri".parse::<Kernel>().unwrap(), Kernel::Triangular);
        assert_eq!("epanechnikov".parse::<Kernel>().unwrap(), Kernel::Epanechnikov);
    }

    #[test]
    fn cer_rules_map_to_mse_base() {
        for rule in BandwidthRule::ALL {
            assert!(!rule.mse_base().is_cer());
            assert_eq!(rule.is_cer(), rule.mse_base() != rule);
        }
    }
}
