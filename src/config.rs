//! Tuning constants for bandwidth selection and inference.
//!
//! Every constant the estimators use lives here rather than in the numerical
//! code, so a caller can reproduce a published configuration or experiment
//! with pilot constants without touching the algorithms. A config can be built
//! in code (`RdConfig::default()` plus field updates) or loaded from TOML; any
//! field missing from the TOML keeps its default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{CriticalValue, Kernel, VarianceEstimator};
use crate::error::{RdError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RdConfig {
    /// Rule-of-thumb pilot constant `C_K` for the uniform kernel.
    pub pilot_constant_uniform: f64,
    /// Rule-of-thumb pilot constant `C_K` for the triangular kernel.
    pub pilot_constant_triangular: f64,
    /// Rule-of-thumb pilot constant `C_K` for the Epanechnikov kernel.
    pub pilot_constant_epanechnikov: f64,

    /// Weight on the regularisation term in the bandwidth denominator.
    ///
    /// `0` drops the term and uses the pure bias/variance trade-off.
    pub regularization_scale: f64,
    /// Clip selected bandwidths to the range of scores on each side.
    pub restrict_to_support: bool,

    /// Neighbours matched by the nearest-neighbour residual estimator.
    pub nn_matches: usize,
    /// Relative singular-value tolerance below which a design is rank deficient.
    pub rank_tolerance: f64,

    /// Confidence level in percent.
    pub level: f64,
    pub variance: VarianceEstimator,
    pub critical_value: CriticalValue,
}

impl Default for RdConfig {
    fn default() -> Self {
        Self {
            pilot_constant_uniform: 1.843,
            pilot_constant_triangular: 2.576,
            pilot_constant_epanechnikov: 2.34,
            regularization_scale: 1.0,
            restrict_to_support: true,
            nn_matches: 3,
            rank_tolerance: 1e-10,
            level: 95.0,
            variance: VarianceEstimator::Nn,
            critical_value: CriticalValue::Normal,
        }
    }
}

impl RdConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RdConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn pilot_constant(&self, kernel: Kernel) -> f64 {
        match kernel {
            Kernel::Uniform => self.pilot_constant_uniform,
            Kernel::Triangular => self.pilot_constant_triangular,
            Kernel::Epanechnikov => self.pilot_constant_epanechnikov,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("pilot_constant_uniform", self.pilot_constant_uniform),
            ("pilot_constant_triangular", self.pilot_constant_triangular),
            ("pilot_constant_epanechnikov", self.pilot_constant_epanechnikov),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(RdError::InvalidConfig(format!("{name} must be > 0, got {value}")));
            }
        }
        if !(self.regularization_scale.is_finite() && self.regularization_scale >= 0.0) {
            return Err(RdError::InvalidConfig(format!(
                "regularization_scale must be >= 0, got {}",
                self.regularization_scale
            )));
        }
        if self.nn_matches == 0 {
            return Err(RdError::InvalidConfig("nn_matches must be >= 1".to_string()));
        }
        if !(self.rank_tolerance.is_finite() && self.rank_tolerance > 0.0) {
            return Err(RdError::InvalidConfig(format!(
                "rank_tolerance must be > 0, got {}",
                self.rank_tolerance
            )));
        }
        if !(self.level.is_finite() && self.level > 0.0 && self.level < 100.0) {
            return Err(RdError::InvalidLevel(self.level));
        }
        Ok(())
    }
}
