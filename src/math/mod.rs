//! Mathematical utilities: kernels, weighted least squares, sandwich variances
//! and distribution quantiles.

pub mod kernel;
pub mod sandwich;
pub mod stats;
pub mod wls;

pub use kernel::*;
pub use sandwich::*;
pub use stats::*;
pub use wls::*;
