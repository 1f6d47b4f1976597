//! Posterior summaries: means, highest-density intervals, and group
//! contrasts derived from the pooled post-warm-up draws.
//!
//! By convention `mu_diff` and `sigma_diff` always contrast group 1 against
//! group 2, regardless of how many groups exist; further contrasts are
//! caller-supplied.

use crate::error::{Error, Result};
use crate::sampler::SampleSet;

/// A linear combination of parameters, evaluated per draw.
#[derive(Debug, Clone)]
pub struct Contrast {
    pub name: String,
    /// `(parameter name, weight)` terms summed per draw.
    pub terms: Vec<(String, f64)>,
}

impl Contrast {
    /// `first - second` of two named parameters.
    pub fn difference(name: &str, first: &str, second: &str) -> Self {
        Self {
            name: name.to_string(),
            terms: vec![(first.to_string(), 1.0), (second.to_string(), -1.0)],
        }
    }
}

/// One summarized quantity: a raw parameter or a derived contrast.
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub hdi_low: f64,
    pub hdi_high: f64,
}

/// Posterior summary table.
#[derive(Debug, Clone)]
pub struct SummaryTable {
    pub rows: Vec<SummaryRow>,
    pub hdi_prob: f64,
}

impl SummaryTable {
    pub fn row(&self, name: &str) -> Option<&SummaryRow> {
        self.rows.iter().find(|r| r.name == name)
    }

    pub fn to_table(&self) -> String {
        let pct = self.hdi_prob * 100.0;
        let mut lines = Vec::new();
        lines.push(format!(
            "{:<12} {:>10} {:>10} {:>12} {:>12}",
            "quantity",
            "mean",
            "sd",
            format!("hdi_{:.0}%_lo", pct),
            format!("hdi_{:.0}%_hi", pct)
        ));
        lines.push("-".repeat(60));
        for r in &self.rows {
            lines.push(format!(
                "{:<12} {:>10.4} {:>10.4} {:>12.4} {:>12.4}",
                r.name, r.mean, r.sd, r.hdi_low, r.hdi_high
            ));
        }
        lines.join("\n")
    }
}

/// Summarize every parameter plus the built-in group-1-minus-group-2
/// contrasts (`mu_diff`, `sigma_diff`) and any extra caller contrasts.
///
/// Operates on the retained draws exactly as produced — no draw is filtered
/// implicitly.
pub fn summarize(set: &SampleSet, hdi_prob: f64, extra: &[Contrast]) -> Result<SummaryTable> {
    if !(hdi_prob > 0.0 && hdi_prob <= 1.0) {
        return Err(Error::InvalidConfig(format!(
            "hdi_prob must be in (0, 1], got {}",
            hdi_prob
        )));
    }
    if set.draws.iter().all(|c| c.is_empty()) {
        return Err(Error::InvalidInput("sample set holds no draws".into()));
    }

    let mut rows = Vec::new();
    for (pidx, name) in set.param_names.iter().enumerate() {
        rows.push(summarize_values(name, &set.pooled(pidx), hdi_prob));
    }

    let mut contrasts: Vec<Contrast> = Vec::new();
    // Fixed first-two-groups convention, even when G > 2.
    contrasts.push(Contrast::difference("mu_diff", "alpha[1]", "alpha[2]"));
    contrasts.push(Contrast::difference("sigma_diff", "gamma[1]", "gamma[2]"));
    contrasts.extend(extra.iter().cloned());

    for contrast in &contrasts {
        let values = evaluate_contrast(set, contrast)?;
        rows.push(summarize_values(&contrast.name, &values, hdi_prob));
    }

    Ok(SummaryTable { rows, hdi_prob })
}

/// Evaluate a linear contrast on every pooled draw.
fn evaluate_contrast(set: &SampleSet, contrast: &Contrast) -> Result<Vec<f64>> {
    let resolved: Vec<(usize, f64)> = contrast
        .terms
        .iter()
        .map(|(name, w)| {
            set.param_index(name)
                .map(|idx| (idx, *w))
                .ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "contrast {} references unknown parameter {}",
                        contrast.name, name
                    ))
                })
        })
        .collect::<Result<_>>()?;

    let mut values = Vec::new();
    for chain in &set.draws {
        for draw in chain {
            values.push(resolved.iter().map(|&(idx, w)| w * draw[idx]).sum());
        }
    }
    Ok(values)
}

fn summarize_values(name: &str, values: &[f64], hdi_prob: f64) -> SummaryRow {
    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;
    let sd = if n > 1 {
        let ss: f64 = values.iter().map(|&v| (v - mean) * (v - mean)).sum();
        (ss / (n - 1) as f64).sqrt()
    } else {
        f64::NAN
    };
    let (hdi_low, hdi_high) = hdi(values, hdi_prob);
    SummaryRow {
        name: name.to_string(),
        mean,
        sd,
        hdi_low,
        hdi_high,
    }
}

/// Highest-density interval: the shortest window containing `prob` of the
/// sorted draws. For unimodal posteriors this is the narrowest credible
/// interval at that probability.
pub fn hdi(values: &[f64], prob: f64) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    let window = ((prob * n as f64).ceil() as usize).clamp(1, n);
    if window == n {
        return (sorted[0], sorted[n - 1]);
    }

    let mut best = 0usize;
    let mut best_width = f64::INFINITY;
    for i in 0..=(n - window) {
        let width = sorted[i + window - 1] - sorted[i];
        if width < best_width {
            best_width = width;
            best = i;
        }
    }
    (sorted[best], sorted[best + window - 1])
}
