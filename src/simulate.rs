//! Synthetic RD samples with a known discontinuity.
//!
//! Scores are uniform on `score_range`; the outcome is a side-specific
//! polynomial in `score - cutoff`, plus the jump on the right, plus Gaussian
//! noise. Optional extras:
//!
//! - a standard normal covariate entering the outcome linearly
//! - cluster ids drawn uniformly from `0..n_clusters`, with a cluster-level
//!   shock added to the outcome
//!
//! Generation is deterministic in `seed`.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::Observations;
use crate::error::{RdError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct RdDesign {
    pub n: usize,
    pub cutoff: f64,
    /// True discontinuity at the cutoff.
    pub jump: f64,
    /// Polynomial coefficients in powers of `score - cutoff` (left side).
    pub left_poly: Vec<f64>,
    pub right_poly: Vec<f64>,
    pub noise_sd: f64,
    pub score_range: (f64, f64),
    pub n_clusters: Option<usize>,
    /// Coefficient on a standard normal covariate (`None` = no covariate).
    pub covariate_effect: Option<f64>,
    pub seed: u64,
}

impl Default for RdDesign {
    fn default() -> Self {
        Self {
            n: 1000,
            cutoff: 0.0,
            jump: 1.0,
            left_poly: vec![0.0, 1.0, 0.5],
            right_poly: vec![0.0, 1.5, -0.5],
            noise_sd: 0.3,
            score_range: (-1.0, 1.0),
            n_clusters: None,
            covariate_effect: None,
            seed: 7,
        }
    }
}

impl RdDesign {
    pub fn generate(&self) -> Result<Observations> {
        let (lo, hi) = self.score_range;
        if !(lo.is_finite() && hi.is_finite() && lo < self.cutoff && self.cutoff < hi) {
            return Err(RdError::InvalidCutoff {
                cutoff: self.cutoff,
                min: lo,
                max: hi,
            });
        }
        if !(self.noise_sd.is_finite() && self.noise_sd >= 0.0) {
            return Err(RdError::InvalidConfig(format!("noise_sd must be >= 0, got {}", self.noise_sd)));
        }
        if self.n_clusters == Some(0) {
            return Err(RdError::InvalidConfig("n_clusters must be >= 1".to_string()));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| RdError::InvalidConfig(format!("noise distribution error: {e}")))?;

        let shocks: Vec<f64> = (0..self.n_clusters.unwrap_or(0))
            .map(|_| 0.5 * self.noise_sd * normal.sample(&mut rng))
            .collect();

        let mut score = Vec::with_capacity(self.n);
        let mut outcome = Vec::with_capacity(self.n);
        let mut covariate = Vec::with_capacity(self.n);
        let mut clusters = Vec::with_capacity(self.n);

        for _ in 0..self.n {
            let x = rng.gen_range(lo..hi);
            let d = x - self.cutoff;
            let mut y = if d < 0.0 {
                horner(&self.left_poly, d)
            } else {
                horner(&self.right_poly, d) + self.jump
            };
            y += self.noise_sd * normal.sample(&mut rng);

            if let Some(effect) = self.covariate_effect {
                let z = normal.sample(&mut rng);
                y += effect * z;
                covariate.push(z);
            }
            if let Some(g) = self.n_clusters {
                let id = rng.gen_range(0..g);
                y += shocks[id];
                clusters.push(id as u64);
            }

            score.push(x);
            outcome.push(y);
        }

        let mut obs = Observations::new(score, outcome)?;
        if self.covariate_effect.is_some() {
            obs = obs.with_covariates(vec![covariate])?;
        }
        if self.n_clusters.is_some() {
            obs = obs.with_clusters(clusters)?;
        }
        Ok(obs)
    }
}

fn horner(coefs: &[f64], x: f64) -> f64 {
    coefs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}
