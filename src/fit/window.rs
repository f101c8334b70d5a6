//! Per-side views of the observation table.
//!
//! Each side of the cutoff is extracted once, sorted by score, and expressed in
//! distances `d = score - cutoff` (negative on the left, non-negative on the
//! right). All fits then work on positions into these sorted arrays, which is
//! what the nearest-neighbour residuals need.

use crate::domain::{Kernel, Observations, Side};
use crate::error::{RdError, Result};
use crate::math::kernel_weight;

/// Observations on one side of the cutoff, sorted by score.
#[derive(Debug, Clone)]
pub(crate) struct SideSample {
    pub side: Side,
    pub dist: Vec<f64>,
    pub outcome: Vec<f64>,
    /// Row-major covariates (one `Vec` per observation, possibly empty).
    pub covariates: Vec<Vec<f64>>,
    pub clusters: Option<Vec<u64>>,
    /// Row of each observation in the original table.
    pub index: Vec<usize>,
}

/// Observations receiving positive kernel weight at bandwidth `h`.
#[derive(Debug, Clone)]
pub(crate) struct Window {
    pub h: f64,
    /// Positions into the `SideSample`, ascending (hence sorted by score).
    pub positions: Vec<usize>,
    pub weights: Vec<f64>,
    /// Observations with `|d| <= h`, including those with zero weight.
    pub n_in_window: usize,
}

impl Window {
    pub fn n_effective(&self) -> usize {
        self.positions.len()
    }
}

impl SideSample {
    /// Split the table at `cutoff` into `(left, right)`.
    ///
    /// Fails with `InvalidCutoff` when the cutoff is non-finite or one side
    /// would be empty.
    pub fn split(obs: &Observations, cutoff: f64) -> Result<(SideSample, SideSample)> {
        let (min, max) = obs
            .score_range()
            .ok_or(RdError::InvalidCutoff { cutoff, min: f64::NAN, max: f64::NAN })?;
        if !(cutoff.is_finite() && cutoff > min && cutoff <= max) {
            return Err(RdError::InvalidCutoff { cutoff, min, max });
        }

        let mut order: Vec<usize> = (0..obs.len()).collect();
        order.sort_by(|&a, &b| {
            obs.score()[a]
                .partial_cmp(&obs.score()[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            order.into_iter().partition(|&i| obs.score()[i] < cutoff);

        Ok((
            Self::from_rows(obs, cutoff, Side::Left, &left_rows),
            Self::from_rows(obs, cutoff, Side::Right, &right_rows),
        ))
    }

    fn from_rows(obs: &Observations, cutoff: f64, side: Side, rows: &[usize]) -> SideSample {
        SideSample {
            side,
            dist: rows.iter().map(|&i| obs.score()[i] - cutoff).collect(),
            outcome: rows.iter().map(|&i| obs.outcome()[i]).collect(),
            covariates: rows
                .iter()
                .map(|&i| (0..obs.n_covariates()).map(|k| obs.covariate(i, k)).collect())
                .collect(),
            clusters: obs.clusters().map(|ids| rows.iter().map(|&i| ids[i]).collect()),
            index: rows.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.dist.len()
    }

    pub fn n_covariates(&self) -> usize {
        self.covariates.first().map_or(0, Vec::len)
    }

    /// Largest distance to the cutoff on this side.
    pub fn range(&self) -> f64 {
        self.dist.iter().fold(0.0_f64, |acc, d| acc.max(d.abs()))
    }

    pub fn window(&self, h: f64, kernel: Kernel) -> Window {
        let mut positions = Vec::new();
        let mut weights = Vec::new();
        let mut n_in_window = 0;
        for (pos, &d) in self.dist.iter().enumerate() {
            if d.abs() <= h {
                n_in_window += 1;
            }
            let w = kernel_weight(kernel, d / h);
            if w > 0.0 {
                positions.push(pos);
                weights.push(w);
            }
        }
        Window {
            h,
            positions,
            weights,
            n_in_window,
        }
    }

    /// Smallest bandwidth giving at least `needed` observations positive
    /// weight under any of the supported kernels, or `None` if the side has
    /// fewer observations.
    pub fn bandwidth_floor(&self, needed: usize) -> Option<f64> {
        if needed == 0 {
            return Some(0.0);
        }
        if self.len() < needed {
            return None;
        }
        let mut abs: Vec<f64> = self.dist.iter().map(|d| d.abs()).collect();
        abs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        // Triangular and Epanechnikov weights vanish at |u| = 1.
        Some(abs[needed - 1] * (1.0 + 1e-9))
    }

    /// Outcome minus the covariate index `z_i' γ` (plain outcome if `gamma` is empty).
    pub fn adjusted_outcome(&self, gamma: &[f64]) -> Vec<f64> {
        if gamma.is_empty() {
            return self.outcome.clone();
        }
        self.outcome
            .iter()
            .zip(&self.covariates)
            .map(|(y, z)| y - z.iter().zip(gamma).map(|(zk, gk)| zk * gk).sum::<f64>())
            .collect()
    }

    pub fn clusters_at(&self, positions: &[usize]) -> Option<Vec<u64>> {
        self.clusters
            .as_ref()
            .map(|ids| positions.iter().map(|&p| ids[p]).collect())
    }
}
