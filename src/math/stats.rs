//! Descriptive statistics and reference-distribution quantiles.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

use crate::domain::CriticalValue;
use crate::error::{RdError, Result};

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (`n - 1` denominator).
pub fn sample_sd(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (ss / (n as f64 - 1.0)).sqrt()
}

/// Quantile with linear interpolation between order statistics
/// (`(n - 1) p` positioning).
pub fn quantile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = p.clamp(0.0, 1.0) * (sorted.len() as f64 - 1.0);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

pub fn interquartile_range(values: &[f64]) -> f64 {
    quantile(values, 0.75) - quantile(values, 0.25)
}

/// Median of three values.
pub fn median3(a: f64, b: f64, c: f64) -> f64 {
    a.max(b).min(a.min(b).max(c))
}

/// Two-sided critical value for a `level`% interval.
///
/// `df` is only used by the Student-t reference distribution.
pub fn critical_value(level: f64, kind: CriticalValue, df: f64) -> Result<f64> {
    if !(level.is_finite() && level > 0.0 && level < 100.0) {
        return Err(RdError::InvalidLevel(level));
    }
    let p = 1.0 - (1.0 - level / 100.0) / 2.0;
    match kind {
        CriticalValue::Normal => Ok(standard_normal()?.inverse_cdf(p)),
        CriticalValue::StudentT => Ok(students_t(df)?.inverse_cdf(p)),
    }
}

/// Two-sided p-value of a test statistic.
pub fn two_sided_p_value(statistic: f64, kind: CriticalValue, df: f64) -> Result<f64> {
    if statistic.is_nan() {
        return Ok(f64::NAN);
    }
    if statistic.is_infinite() {
        return Ok(0.0);
    }
    let tail = match kind {
        CriticalValue::Normal => standard_normal()?.cdf(-statistic.abs()),
        CriticalValue::StudentT => students_t(df)?.cdf(-statistic.abs()),
    };
    Ok((2.0 * tail).min(1.0))
}

fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| RdError::InvalidConfig(format!("normal distribution: {e}")))
}

fn students_t(df: f64) -> Result<StudentsT> {
    if !(df.is_finite() && df > 0.0) {
        return Err(RdError::InvalidConfig(format!(
            "Student-t critical values need positive degrees of freedom, got {df}"
        )));
    }
    StudentsT::new(0.0, 1.0, df)
        .map_err(|e| RdError::InvalidConfig(format!("Student-t distribution: {e}")))
}
