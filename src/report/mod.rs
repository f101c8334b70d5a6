//! Plain-text reports of estimates and bandwidths.

pub mod format;

pub use format::*;
