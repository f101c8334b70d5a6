//! Domain types used throughout the estimator.
//!
//! This module defines:
//!
//! - the immutable observation table (`Observations`)
//! - estimation option enums (`Kernel`, `BandwidthRule`, `VarianceEstimator`, `CriticalValue`)
//! - bandwidth containers (`Bandwidths`, `BandwidthSet`)
//! - the fully enumerated estimation output (`RdEstimate`)

pub mod observations;
pub mod types;

pub use observations::*;
pub use types::*;
