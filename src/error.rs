//! Crate-wide error type.
//!
//! Every failure is reported as a distinct variant; nothing is coerced to NaN
//! or zero, and nothing is retried internally.

use thiserror::Error;

use crate::domain::Side;

#[derive(Debug, Error)]
pub enum RdError {
    #[error("Invalid bandwidth on the {side} side: {value} (must be finite and > 0).")]
    InvalidBandwidth { side: Side, value: f64 },

    #[error(
        "Insufficient data on the {side} side: {available} weighted observations, at least {required} required."
    )]
    InsufficientData {
        side: Side,
        available: usize,
        required: usize,
    },

    #[error("Rank-deficient design on the {side} side ({n_effective} weighted observations).")]
    RankDeficiency { side: Side, n_effective: usize },

    #[error("Cutoff {cutoff} leaves one side empty: scores span [{min}, {max}].")]
    InvalidCutoff { cutoff: f64, min: f64, max: f64 },

    #[error("Length mismatch for {what}: expected {expected}, found {found}.")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Non-finite value in {what} at row {index}.")]
    NonFinite { what: &'static str, index: usize },

    #[error("Invalid confidence level {0} (must be in (0, 100)).")]
    InvalidLevel(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, RdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_side() {
        let err = RdError::InsufficientData {
            side: Side::Left,
            available: 0,
            required: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("left"), "message should name the side: {msg}");
        assert!(msg.contains('2'));
    }
}
