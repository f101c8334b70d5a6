//! The immutable observation table consumed by every estimator.
//!
//! Columns are validated once at construction (equal lengths, finite values)
//! so the numerical code downstream never has to re-check them.

use serde::{Deserialize, Serialize};

use crate::error::{RdError, Result};

/// Paired `(score, outcome)` observations with optional covariate columns and
/// cluster ids. Row order is irrelevant; duplicate scores are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observations {
    score: Vec<f64>,
    outcome: Vec<f64>,
    /// Covariates stored column by column, each of length `len()`.
    covariates: Vec<Vec<f64>>,
    clusters: Option<Vec<u64>>,
}

impl Observations {
    pub fn new(score: Vec<f64>, outcome: Vec<f64>) -> Result<Self> {
        if outcome.len() != score.len() {
            return Err(RdError::LengthMismatch {
                what: "outcome",
                expected: score.len(),
                found: outcome.len(),
            });
        }
        check_finite("score", &score)?;
        check_finite("outcome", &outcome)?;

        Ok(Self {
            score,
            outcome,
            covariates: Vec::new(),
            clusters: None,
        })
    }

    /// Attach covariate columns (each column has one value per observation).
    pub fn with_covariates(mut self, columns: Vec<Vec<f64>>) -> Result<Self> {
        for column in &columns {
            if column.len() != self.len() {
                return Err(RdError::LengthMismatch {
                    what: "covariate column",
                    expected: self.len(),
                    found: column.len(),
                });
            }
            check_finite("covariate", column)?;
        }
        self.covariates = columns;
        Ok(self)
    }

    pub fn with_clusters(mut self, ids: Vec<u64>) -> Result<Self> {
        if ids.len() != self.len() {
            return Err(RdError::LengthMismatch {
                what: "cluster ids",
                expected: self.len(),
                found: ids.len(),
            });
        }
        self.clusters = Some(ids);
        Ok(self)
    }

    /// Same scores, covariates and clusters with a different outcome column.
    pub fn with_outcome(&self, outcome: Vec<f64>) -> Result<Self> {
        if outcome.len() != self.len() {
            return Err(RdError::LengthMismatch {
                what: "outcome",
                expected: self.len(),
                found: outcome.len(),
            });
        }
        check_finite("outcome", &outcome)?;
        Ok(Self {
            outcome,
            ..self.clone()
        })
    }

    pub fn len(&self) -> usize {
        self.score.len()
    }

    pub fn is_empty(&self) -> bool {
        self.score.is_empty()
    }

    pub fn score(&self) -> &[f64] {
        &self.score
    }

    pub fn outcome(&self) -> &[f64] {
        &self.outcome
    }

    pub fn covariates(&self) -> &[Vec<f64>] {
        &self.covariates
    }

    pub fn n_covariates(&self) -> usize {
        self.covariates.len()
    }

    pub fn covariate(&self, row: usize, column: usize) -> f64 {
        self.covariates[column][row]
    }

    pub fn clusters(&self) -> Option<&[u64]> {
        self.clusters.as_deref()
    }

    /// Number of distinct cluster ids, if clustered.
    pub fn n_clusters(&self) -> Option<usize> {
        self.clusters.as_ref().map(|ids| {
            let mut ids = ids.clone();
            ids.sort_unstable();
            ids.dedup();
            ids.len()
        })
    }

    /// `(min, max)` of the score, or `None` for an empty table.
    pub fn score_range(&self) -> Option<(f64, f64)> {
        if self.is_empty() {
            return None;
        }
        let min = self.score.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.score.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some((min, max))
    }

    /// Keep the rows for which `keep(row)` is true.
    pub fn subset(&self, keep: impl Fn(usize) -> bool) -> Self {
        let rows: Vec<usize> = (0..self.len()).filter(|&i| keep(i)).collect();
        Self {
            score: rows.iter().map(|&i| self.score[i]).collect(),
            outcome: rows.iter().map(|&i| self.outcome[i]).collect(),
            covariates: self
                .covariates
                .iter()
                .map(|column| rows.iter().map(|&i| column[i]).collect())
                .collect(),
            clusters: self
                .clusters
                .as_ref()
                .map(|ids| rows.iter().map(|&i| ids[i]).collect()),
        }
    }

    /// Donut-hole sample: drop observations with `|score - cutoff| < radius`.
    pub fn donut(&self, cutoff: f64, radius: f64) -> Self {
        self.subset(|i| (self.score[i] - cutoff).abs() >= radius)
    }
}

fn check_finite(what: &'static str, values: &[f64]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(RdError::NonFinite { what, index }),
        None => Ok(()),
    }
}
