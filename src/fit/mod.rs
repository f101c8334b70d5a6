//! Local polynomial fitting and bandwidth selection.
//!
//! Responsibilities:
//!
//! - split observations at the cutoff and weight them by kernel distance
//! - fit one weighted polynomial per side (`estimate`)
//! - choose MSE/CER-optimal bandwidths with the three-stage plug-in (`select`)
//! - residuals for the sandwich variance (nearest neighbour or HC0-HC3)

pub mod bandwidth;
pub mod local_poly;
pub mod residuals;
pub(crate) mod window;

pub use bandwidth::*;
pub use local_poly::*;
pub use residuals::*;
