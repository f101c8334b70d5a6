//! `rd-robust` library crate.
//!
//! Local-polynomial regression discontinuity (RD) estimation:
//!
//! - `fit::estimate` fits one weighted polynomial per side of the cutoff and
//!   returns the jump in intercepts
//! - `fit::select` computes MSE- or CER-optimal plug-in bandwidths
//! - `inference::rdrobust` composes both into a bias-corrected estimate with
//!   robust standard errors and confidence intervals
//!
//! Everything is a pure function of an immutable `Observations` table and an
//! `RdConfig`; nothing is cached between calls.

pub mod config;
pub mod domain;
pub mod error;
pub mod fit;
pub mod inference;
pub mod math;
pub mod report;
pub mod simulate;

pub use config::RdConfig;
pub use domain::{
    BandwidthRule, BandwidthSet, Bandwidths, CriticalValue, InferenceMethod, InferenceRow, Kernel,
    Observations, RdEstimate, Side, VarianceEstimator,
};
pub use error::{RdError, Result};
pub use fit::{LocalPolyFit, LocalPolyRequest, SelectRequest, SideFit, estimate, select, select_all};
pub use inference::{RdRequest, rdrobust, rdrobust_many};
