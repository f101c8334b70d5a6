//! Formatted terminal output.
//!
//! We keep formatting code in one place so the estimators stay free of
//! presentation concerns and output changes are localized.

use std::fmt;

use crate::domain::{BandwidthRule, BandwidthSet, CriticalValue, RdEstimate};

const RULE: &str = "=============================================================================";

/// Summary of an estimate: sample counts, bandwidths and the inference table.
pub fn format_estimate(est: &RdEstimate) -> String {
    let mut out = String::new();

    out.push_str("Sharp RD estimates using local polynomial regression.\n\n");
    out.push_str(&format!("{:<22}{:>12}\n", "Number of Obs.", est.total_left + est.total_right));
    out.push_str(&format!(
        "{:<22}{:>12}\n",
        "BW type",
        est.rule.map_or("Manual", BandwidthRule::name)
    ));
    out.push_str(&format!("{:<22}{:>12}\n", "Kernel", est.kernel.display_name()));
    out.push_str(&format!("{:<22}{:>12}\n", "VCE method", est.variance.display_name()));
    if let Some(g) = est.n_clusters {
        out.push_str(&format!("{:<22}{:>12}\n", "Clusters", g));
    }
    out.push_str(&format!("{:<22}{:>12.3}\n\n", "Cutoff c", est.cutoff));

    out.push_str(&format!("{:<22}{:>12}{:>12}\n", "", "Left of c", "Right of c"));
    out.push_str(&format!("{:<22}{:>12}{:>12}\n", "Number of Obs.", est.total_left, est.total_right));
    out.push_str(&format!(
        "{:<22}{:>12}{:>12}\n",
        "Eff. Number of Obs.", est.n_effective_left, est.n_effective_right
    ));
    out.push_str(&format!("{:<22}{:>12}{:>12}\n", "Order est. (p)", est.order, est.order));
    out.push_str(&format!("{:<22}{:>12}{:>12}\n", "Order bias (q)", est.bias_order, est.bias_order));
    out.push_str(&format!(
        "{:<22}{:>12.3}{:>12.3}\n",
        "BW est. (h)", est.bandwidth_used.left, est.bandwidth_used.right
    ));
    out.push_str(&format!(
        "{:<22}{:>12.3}{:>12.3}\n\n",
        "BW bias (b)", est.bias_bandwidth.left, est.bias_bandwidth.right
    ));

    let (stat, p_label) = match est.critical_value {
        CriticalValue::Normal => ("z", "P>|z|"),
        CriticalValue::StudentT => ("t", "P>|t|"),
    };
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!(
        "{:>14}{:>10}{:>11}{:>9}{:>9}{:>24}\n",
        "Method",
        "Coef.",
        "Std. Err.",
        stat,
        p_label,
        format!("[ {}% C.I. ]", fmt_level(est.level))
    ));
    out.push_str(RULE);
    out.push('\n');
    for row in &est.rows {
        out.push_str(&format!(
            "{:>14}{:>10.3}{:>11.3}{:>9.3}{:>9.3}{:>24}\n",
            row.method.display_name(),
            row.coefficient,
            row.std_error,
            row.statistic,
            row.p_value,
            format!("[{:.3} , {:.3}]", row.interval.0, row.interval.1)
        ));
    }
    out.push_str(RULE);
    out.push('\n');

    if !est.gamma.is_empty() {
        out.push_str(&format!("Covariate coefficients: {}\n", fmt_vec(&est.gamma)));
    }

    out
}

/// Table of bandwidths, one line per rule.
pub fn format_bandwidths(rules: &[(BandwidthRule, BandwidthSet)]) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "{:<10}{:>12}{:>12}{:>12}{:>12}\n",
        "Method", "h (left)", "h (right)", "b (left)", "b (right)"
    ));
    out.push_str(&format!("{:-<10}{:->12}{:->12}{:->12}{:->12}\n", "", "", "", "", ""));
    for (rule, set) in rules {
        out.push_str(&format!(
            "{:<10}{:>12.3}{:>12.3}{:>12.3}{:>12.3}\n",
            rule.name(),
            set.h.left,
            set.h.right,
            set.b.left,
            set.b.right
        ));
    }

    out
}

impl fmt::Display for RdEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_estimate(self))
    }
}

fn fmt_level(level: f64) -> String {
    if level.fract() == 0.0 {
        format!("{level:.0}")
    } else {
        format!("{level}")
    }
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}
