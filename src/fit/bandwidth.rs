//! Plug-in bandwidth selection.
//!
//! The selector estimates the constants of the asymptotic MSE expansion of the
//! side intercepts and solves for the bandwidth that balances squared bias
//! against variance. It runs three stages, each feeding the next:
//!
//! 1. `d`: pilot bandwidth for the derivative of order `q + 1` used in the bias
//!    of the bias-correction fit.
//! 2. `b`: bias bandwidth, MSE-optimal for derivative `p + 1` at order `q`.
//! 3. `h`: main bandwidth, MSE-optimal for the intercept at order `p`.
//!
//! Every stage computes, per side, a variance constant `V` (from a fit at the
//! rule-of-thumb pilot `c_bw`), a bias constant `B` (from a higher-order fit at
//! the previous stage's bandwidth), and an optional regularisation term `R`
//! guarding against a near-zero bias estimate. Sides are combined into
//!
//! ```text
//! rd  : ((V_l + V_r) / ((B_r - B_l)^2 + s (R_l + R_r)))^rate
//! sum : ((V_l + V_r) / ((B_r + B_l)^2 + s (R_l + R_r)))^rate
//! two : (V_side / (B_side^2 + s R_side))^rate            (per side)
//! ```
//!
//! and the ten public rules are assembled from these three families.

use rayon::join;

use crate::config::RdConfig;
use crate::domain::{BandwidthRule, BandwidthSet, Bandwidths, Kernel, Observations, Side};
use crate::error::{RdError, Result};
use crate::fit::local_poly::{side_gamma, LocalFit};
use crate::fit::window::SideSample;
use crate::math::{interquartile_range, median3, sample_sd, sandwich_variance};

/// Inputs of a bandwidth selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectRequest {
    pub cutoff: f64,
    /// Order `p` of the main fit; the bias-correction fit uses `p + 1`.
    pub order: usize,
    pub kernel: Kernel,
    pub rule: BandwidthRule,
    pub use_covariates: bool,
}

impl SelectRequest {
    pub fn new(cutoff: f64, order: usize, kernel: Kernel, rule: BandwidthRule) -> Self {
        Self {
            cutoff,
            order,
            kernel,
            rule,
            use_covariates: true,
        }
    }
}

impl Default for SelectRequest {
    fn default() -> Self {
        Self::new(0.0, 1, Kernel::Triangular, BandwidthRule::Mserd)
    }
}

/// Select `(h, b)` with `req.rule`.
///
/// Fit failures are propagated unchanged. The first fits run at the
/// rule-of-thumb pilot bandwidth with order `p + 2`, so a side whose pilot
/// window holds fewer than `p + 3` distinct scores fails here with
/// `RankDeficiency` (or `InsufficientData`) before any main fit is attempted.
pub fn select(obs: &Observations, req: &SelectRequest, config: &RdConfig) -> Result<BandwidthSet> {
    let selector = Selector::new(obs, req, config)?;
    let mut cache = FamilyCache::default();
    selector.rule_bandwidths(req.rule, &mut cache)
}

/// Bandwidths for every rule, in `BandwidthRule::ALL` order.
///
/// The three families are computed once and shared by all rules, so this is
/// about three times the cost of a single `select`.
pub fn select_all(
    obs: &Observations,
    req: &SelectRequest,
    config: &RdConfig,
) -> Result<Vec<(BandwidthRule, BandwidthSet)>> {
    let selector = Selector::new(obs, req, config)?;
    let mut cache = FamilyCache::default();
    BandwidthRule::ALL
        .into_iter()
        .map(|rule| Ok((rule, selector.rule_bandwidths(rule, &mut cache)?)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Rd,
    Sum,
    Two,
}

#[derive(Debug, Default)]
struct FamilyCache {
    rd: Option<BandwidthSet>,
    sum: Option<BandwidthSet>,
    two: Option<BandwidthSet>,
}

/// One side's MSE constants at one stage.
#[derive(Debug, Clone, Copy)]
struct StageConstants {
    variance: f64,
    bias: f64,
    regularization: f64,
    rate: f64,
}

#[derive(Debug, Clone, Copy)]
struct Stage {
    /// Polynomial order of the variance fit.
    order: usize,
    /// Derivative whose MSE is targeted.
    deriv: usize,
    /// Order of the fit estimating the leading bias derivative.
    bias_order: usize,
    bias_pilot: f64,
    regularize: bool,
}

struct Selector<'a> {
    left: SideSample,
    right: SideSample,
    req: &'a SelectRequest,
    config: &'a RdConfig,
    /// Rule-of-thumb pilot `c_bw` used by every variance fit.
    pilot: f64,
    /// Sample size entering the CER shrinkage (clusters when clustered).
    n_units: usize,
}

impl<'a> Selector<'a> {
    fn new(obs: &Observations, req: &'a SelectRequest, config: &'a RdConfig) -> Result<Self> {
        config.validate()?;
        let (left, right) = SideSample::split(obs, req.cutoff)?;

        let x = obs.score();
        let sd = sample_sd(x);
        let iqr = interquartile_range(x);
        let spread = if iqr > 0.0 { sd.min(iqr / 1.349) } else { sd };
        let bw_max = left.range().max(right.range());
        let pilot = (config.pilot_constant(req.kernel) * spread * (obs.len() as f64).powf(-0.2)).min(bw_max);
        if !(pilot.is_finite() && pilot > 0.0) {
            return Err(RdError::InvalidBandwidth {
                side: Side::Left,
                value: pilot,
            });
        }
        log::debug!("pilot bandwidth c_bw={pilot:.6} (sd={sd:.6}, iqr={iqr:.6}, n={})", obs.len());

        Ok(Self {
            left,
            right,
            req,
            config,
            pilot,
            n_units: obs.n_clusters().unwrap_or(obs.len()),
        })
    }

    fn sample(&self, side: Side) -> &SideSample {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    fn rule_bandwidths(&self, rule: BandwidthRule, cache: &mut FamilyCache) -> Result<BandwidthSet> {
        use BandwidthRule::*;

        let mut set = match rule {
            Mserd | Cerrd => self.family(Family::Rd, cache)?,
            Msetwo | Certwo => self.family(Family::Two, cache)?,
            Msesum | Cersum => self.family(Family::Sum, cache)?,
            Msecomb1 | Cercomb1 => {
                let rd = self.family(Family::Rd, cache)?;
                let sum = self.family(Family::Sum, cache)?;
                BandwidthSet {
                    h: Bandwidths::common(rd.h.left.min(sum.h.left)),
                    b: Bandwidths::common(rd.b.left.min(sum.b.left)),
                }
            }
            Msecomb2 | Cercomb2 => {
                let rd = self.family(Family::Rd, cache)?;
                let two = self.family(Family::Two, cache)?;
                let sum = self.family(Family::Sum, cache)?;
                let mid = |f: fn(&BandwidthSet) -> Bandwidths| {
                    let (a, b, c) = (f(&rd), f(&two), f(&sum));
                    Bandwidths::new(median3(a.left, b.left, c.left), median3(a.right, b.right, c.right))
                };
                BandwidthSet {
                    h: mid(|s| s.h),
                    b: mid(|s| s.b),
                }
            }
        };

        if rule.is_cer() {
            let p = self.req.order as f64;
            let shrink = (self.n_units as f64).powf(-p / ((3.0 + p) * (3.0 + 2.0 * p)));
            set.h.left *= shrink;
            set.h.right *= shrink;
        }

        let common = matches!(rule.mse_base(), Mserd | Msesum | Msecomb1);
        self.apply_floors(&mut set, common)?;

        log::info!(
            "bandwidth {rule}: h=({:.6}, {:.6}) b=({:.6}, {:.6})",
            set.h.left,
            set.h.right,
            set.b.left,
            set.b.right
        );
        Ok(set)
    }

    /// Enforce enough positively weighted points for the main (`p + 1`) and
    /// bias-correction (`q + 1`) fits.
    fn apply_floors(&self, set: &mut BandwidthSet, common: bool) -> Result<()> {
        let p = self.req.order;
        for (bandwidths, needed) in [(&mut set.h, p + 1), (&mut set.b, p + 2)] {
            let mut floors = [0.0; 2];
            for (slot, side) in floors.iter_mut().zip(Side::BOTH) {
                let sample = self.sample(side);
                *slot = sample.bandwidth_floor(needed).ok_or(RdError::InsufficientData {
                    side,
                    available: sample.len(),
                    required: needed,
                })?;
            }
            if common {
                let floor = floors[0].max(floors[1]);
                floors = [floor, floor];
            }
            for (value, floor, side) in [
                (&mut bandwidths.left, floors[0], Side::Left),
                (&mut bandwidths.right, floors[1], Side::Right),
            ] {
                if *value < floor {
                    log::warn!("{side} bandwidth {value:.6} widened to {floor:.6} to keep {needed} weighted points");
                    *value = floor;
                }
            }
        }
        Ok(())
    }

    fn family(&self, family: Family, cache: &mut FamilyCache) -> Result<BandwidthSet> {
        let slot = match family {
            Family::Rd => &mut cache.rd,
            Family::Sum => &mut cache.sum,
            Family::Two => &mut cache.two,
        };
        if let Some(set) = *slot {
            return Ok(set);
        }
        let set = self.compute_family(family)?;
        *slot = Some(set);
        Ok(set)
    }

    fn compute_family(&self, family: Family) -> Result<BandwidthSet> {
        let p = self.req.order;
        let q = p + 1;
        let scale = self.config.regularization_scale;
        let regularize = scale > 0.0;

        let (dl, dr) = self.stage_pair(|sample| Stage {
            order: q + 1,
            deriv: q + 1,
            bias_order: q + 2,
            bias_pilot: sample.range() * (1.0 + 1e-8),
            regularize: false,
        })?;
        let d = self.combine(family, &dl, &dr, 0.0, "d");

        let (bl, br) = self.stage_pair(|sample| Stage {
            order: q,
            deriv: p + 1,
            bias_order: q + 1,
            bias_pilot: d.get(sample.side),
            regularize,
        })?;
        let b = self.combine(family, &bl, &br, scale, "b");

        let (hl, hr) = self.stage_pair(|sample| Stage {
            order: p,
            deriv: 0,
            bias_order: q,
            bias_pilot: b.get(sample.side),
            regularize,
        })?;
        let h = self.combine(family, &hl, &hr, scale, "h");

        log::debug!(
            "{family:?} family: d=({:.6}, {:.6}) b=({:.6}, {:.6}) h=({:.6}, {:.6})",
            d.left,
            d.right,
            b.left,
            b.right,
            h.left,
            h.right
        );
        Ok(BandwidthSet { h, b })
    }

    fn stage_pair(&self, stage_for: impl Fn(&SideSample) -> Stage + Sync) -> Result<(StageConstants, StageConstants)> {
        let (left, right) = join(
            || self.stage(&self.left, &stage_for(&self.left)),
            || self.stage(&self.right, &stage_for(&self.right)),
        );
        Ok((left?, right?))
    }

    fn stage(&self, sample: &SideSample, stage: &Stage) -> Result<StageConstants> {
        let tol = self.config.rank_tolerance;
        let kernel = self.req.kernel;

        let y = if self.req.use_covariates && sample.n_covariates() > 0 {
            let gamma = side_gamma(sample, self.pilot, kernel, stage.order, tol)?;
            sample.adjusted_outcome(&gamma)
        } else {
            sample.outcome.clone()
        };

        let fit_v = LocalFit::new(sample, &y, self.pilot, kernel, stage.order, tol).inspect_err(|e| {
            log::warn!(
                "pilot fit of order {} at c_bw={:.6} failed on the {} side: {e}",
                stage.order,
                self.pilot,
                sample.side
            )
        })?;
        let residuals = fit_v.variance_residuals(sample, self.config);
        let clusters = sample.clusters_at(&fit_v.window.positions);
        let v_norm = sandwich_variance(
            &fit_v.influence(stage.deriv),
            &residuals,
            clusters.as_deref(),
            fit_v.n_params(),
        );
        let variance = (2 * stage.deriv + 1) as f64 * self.pilot * v_norm;

        // Leading bias of the `deriv` coefficient per unit of the next derivative.
        let bias_const = (&fit_v.solution.inv_gram * fit_v.moment(stage.order + 1))[stage.deriv];

        let next = stage.order + 1;
        let fit_b = LocalFit::new(sample, &y, stage.bias_pilot, kernel, stage.bias_order, tol)?;
        let scale_b = stage.bias_pilot.powi(next as i32);
        let next_deriv = fit_b.solution.beta[next] / scale_b;

        let reg = if stage.regularize {
            let residuals = fit_b.variance_residuals(sample, self.config);
            let clusters = sample.clusters_at(&fit_b.window.positions);
            let v_b = sandwich_variance(
                &fit_b.influence(next),
                &residuals,
                clusters.as_deref(),
                fit_b.n_params(),
            ) / (scale_b * scale_b);
            3.0 * bias_const * bias_const * v_b
        } else {
            0.0
        };

        let m = (next - stage.deriv) as f64;
        let constants = StageConstants {
            variance,
            bias: (2.0 * m).sqrt() * bias_const * next_deriv,
            regularization: 2.0 * m * reg,
            rate: 1.0 / (2 * stage.order + 3) as f64,
        };
        log::trace!("{} stage o={} nu={}: {constants:?}", sample.side, stage.order, stage.deriv);
        Ok(constants)
    }

    fn combine(&self, family: Family, l: &StageConstants, r: &StageConstants, scale: f64, what: &str) -> Bandwidths {
        let optimal = |v: f64, bias_sq: f64, reg: f64| (v / (bias_sq + scale * reg)).powf(l.rate);
        let common_limit = self.left.range().max(self.right.range());
        let pooled_v = l.variance + r.variance;
        let pooled_r = l.regularization + r.regularization;
        match family {
            Family::Rd => {
                let raw = optimal(pooled_v, (r.bias - l.bias).powi(2), pooled_r);
                Bandwidths::common(self.finalize(raw, common_limit, what))
            }
            Family::Sum => {
                let raw = optimal(pooled_v, (r.bias + l.bias).powi(2), pooled_r);
                Bandwidths::common(self.finalize(raw, common_limit, what))
            }
            Family::Two => Bandwidths::new(
                self.finalize(optimal(l.variance, l.bias.powi(2), l.regularization), self.left.range(), what),
                self.finalize(optimal(r.variance, r.bias.powi(2), r.regularization), self.right.range(), what),
            ),
        }
    }

    /// Fall back to `limit` for a degenerate solution; clip to it when
    /// restricting to the support.
    fn finalize(&self, value: f64, limit: f64, what: &str) -> f64 {
        if !(value.is_finite() && value > 0.0) {
            log::warn!("{what} bandwidth is not finite ({value}); using the support limit {limit:.6}");
            return limit;
        }
        if self.config.restrict_to_support && value > limit {
            log::debug!("{what} bandwidth {value:.6} clipped to the support limit {limit:.6}");
            limit
        } else {
            value
        }
    }
}
