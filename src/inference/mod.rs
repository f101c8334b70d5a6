//! Robust bias-corrected inference for the RD effect.

pub(crate) mod bias;
pub mod rdrobust;

pub use rdrobust::*;
