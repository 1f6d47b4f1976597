//! Post-hoc convergence diagnostics.
//!
//! Split R-hat and rank-normalized effective sample sizes follow
//! Vehtari et al. (2021), "Rank-normalization, folding, and localization:
//! An improved R-hat for assessing convergence of MCMC".
//!
//! Diagnostics are pure functions of the sample set: they never mutate
//! sampler state and never abort a run. Untrustworthy inference is flagged
//! through the warnings list (and `log::warn!`), leaving the judgment to the
//! caller.

use crate::sampler::SampleSet;
use statrs::function::erf::erf_inv;

/// R-hat above this is reported as possible non-convergence.
pub const RHAT_WARN: f64 = 1.01;
/// ESS below this is reported as poor mixing.
pub const ESS_WARN: f64 = 400.0;

/// Per-parameter diagnostic row.
#[derive(Debug, Clone)]
pub struct ParamDiagnostics {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub ess_bulk: f64,
    pub ess_tail: f64,
    pub r_hat: f64,
    pub mcse_mean: f64,
}

/// Full diagnostic report for a sampling run.
#[derive(Debug, Clone)]
pub struct DiagnosticsReport {
    pub params: Vec<ParamDiagnostics>,
    pub num_chains: usize,
    pub num_draws: usize,
    pub divergences: usize,
    pub nonfinite_evals: usize,
    pub max_depth_hits: usize,
    pub warnings: Vec<String>,
}

impl DiagnosticsReport {
    /// True when no warning was raised.
    pub fn converged(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Render the report as a formatted table.
    pub fn to_table(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "{} chains × {} draws per chain",
            self.num_chains, self.num_draws
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<12} {:>9} {:>9} {:>9} {:>9} {:>8} {:>10}",
            "parameter", "mean", "sd", "ess_bulk", "ess_tail", "r_hat", "mcse_mean"
        ));
        lines.push("-".repeat(72));
        for p in &self.params {
            lines.push(format!(
                "{:<12} {:>9.4} {:>9.4} {:>9.0} {:>9.0} {:>8.4} {:>10.6}",
                p.name, p.mean, p.sd, p.ess_bulk, p.ess_tail, p.r_hat, p.mcse_mean
            ));
        }
        lines.push("-".repeat(72));
        lines.push(format!(
            "divergences: {}  non-finite evals: {}  max-depth hits: {}",
            self.divergences, self.nonfinite_evals, self.max_depth_hits
        ));
        for w in &self.warnings {
            lines.push(format!("warning: {}", w));
        }
        lines.join("\n")
    }
}

/// Compute the full diagnostic report for a sample set.
pub fn compute(set: &SampleSet) -> DiagnosticsReport {
    let num_chains = set.num_chains();
    let num_draws = set.draws.first().map_or(0, |c| c.len());

    let mut params = Vec::with_capacity(set.param_names.len());
    for (pidx, name) in set.param_names.iter().enumerate() {
        let traces = set.traces(pidx);
        params.push(diagnose_param(name, &traces));
    }

    let divergences = set.total_divergences();
    let nonfinite_evals = set.total_nonfinite_evals();
    let max_depth_hits = set.chain_stats.iter().map(|s| s.max_depth_hits).sum();

    let mut warnings = Vec::new();
    for p in &params {
        if !p.r_hat.is_finite() || p.r_hat > RHAT_WARN {
            warnings.push(format!(
                "r_hat for {} is {:.4} (> {}); chains may not have converged",
                p.name, p.r_hat, RHAT_WARN
            ));
        }
    }
    if params
        .iter()
        .any(|p| p.ess_bulk < ESS_WARN || p.ess_tail < ESS_WARN)
    {
        warnings.push(format!(
            "effective sample size below {} for some parameters; consider more draws",
            ESS_WARN
        ));
    }
    if divergences > 0 {
        warnings.push(format!(
            "{} divergent transitions; posterior geometry may be difficult",
            divergences
        ));
    }
    if nonfinite_evals > 0 {
        warnings.push(format!(
            "{} non-finite log-density evaluations during sampling",
            nonfinite_evals
        ));
    }
    for w in &warnings {
        log::warn!("{}", w);
    }

    DiagnosticsReport {
        params,
        num_chains,
        num_draws,
        divergences,
        nonfinite_evals,
        max_depth_hits,
        warnings,
    }
}

fn diagnose_param(name: &str, traces: &[Vec<f64>]) -> ParamDiagnostics {
    let pooled: Vec<f64> = traces.iter().flat_map(|c| c.iter().copied()).collect();
    let mean = mean(&pooled);
    let sd = sd(&pooled, mean);
    let r_hat = split_r_hat(traces);
    let ess_bulk = ess_bulk(traces);
    let ess_tail = ess_tail(traces);
    let mcse_mean = if ess_bulk > 0.0 {
        sd / ess_bulk.sqrt()
    } else {
        f64::NAN
    };
    ParamDiagnostics {
        name: name.to_string(),
        mean,
        sd,
        ess_bulk,
        ess_tail,
        r_hat,
        mcse_mean,
    }
}

// ── R-hat and ESS internals ─────────────────────────────────────────

/// Split R-hat: halve every chain, compare between- and within-half variance.
pub fn split_r_hat(traces: &[Vec<f64>]) -> f64 {
    let traces = rectangular(traces);
    let halves = split_in_halves(&traces);
    if halves.is_empty() || halves[0].len() < 2 {
        return f64::NAN;
    }
    let m = halves.len() as f64;
    let n = halves[0].len() as f64;

    let half_means: Vec<f64> = halves.iter().map(|c| mean(c)).collect();
    let grand_mean = mean(&half_means);

    let between = n / (m - 1.0)
        * half_means
            .iter()
            .map(|&hm| (hm - grand_mean).powi(2))
            .sum::<f64>();
    let within = halves
        .iter()
        .map(|c| {
            let cm = mean(c);
            c.iter().map(|&x| (x - cm).powi(2)).sum::<f64>() / (n - 1.0)
        })
        .sum::<f64>()
        / m;

    if within < 1e-30 {
        return f64::NAN;
    }
    let var_hat = (n - 1.0) / n * within + between / n;
    (var_hat / within).sqrt()
}

/// Bulk ESS: autocorrelation-based ESS of the rank-normalized draws.
pub fn ess_bulk(traces: &[Vec<f64>]) -> f64 {
    autocorr_ess(&rank_normalize(&rectangular(traces)))
}

/// Tail ESS: minimum ESS of the 5%/95% tail indicator sequences.
pub fn ess_tail(traces: &[Vec<f64>]) -> f64 {
    let traces = rectangular(traces);
    let mut pooled: Vec<f64> = traces.iter().flat_map(|c| c.iter().copied()).collect();
    pooled.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q05 = quantile_sorted(&pooled, 0.05);
    let q95 = quantile_sorted(&pooled, 0.95);

    let indicator = |cut: f64, below: bool| -> Vec<Vec<f64>> {
        traces
            .iter()
            .map(|c| {
                c.iter()
                    .map(|&x| {
                        let hit = if below { x <= cut } else { x >= cut };
                        if hit {
                            1.0
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect()
    };
    let lo = autocorr_ess(&indicator(q05, true));
    let hi = autocorr_ess(&indicator(q95, false));
    lo.min(hi)
}

/// ESS from split chains via Geyer's initial positive sequence.
fn autocorr_ess(traces: &[Vec<f64>]) -> f64 {
    let halves = split_in_halves(traces);
    if halves.is_empty() || halves[0].len() < 4 {
        return f64::NAN;
    }
    let m = halves.len();
    let n = halves[0].len();
    let m_f = m as f64;
    let n_f = n as f64;

    let half_means: Vec<f64> = halves.iter().map(|c| mean(c)).collect();
    let within: f64 = halves
        .iter()
        .map(|c| {
            let cm = mean(c);
            c.iter().map(|&x| (x - cm).powi(2)).sum::<f64>() / (n_f - 1.0)
        })
        .sum::<f64>()
        / m_f;
    if within < 1e-30 {
        return f64::NAN;
    }

    let mut rho = Vec::with_capacity(n);
    for lag in 0..n {
        let mut acov = 0.0f64;
        for (ci, chain) in halves.iter().enumerate() {
            let cm = half_means[ci];
            for t in 0..(n - lag) {
                acov += (chain[t] - cm) * (chain[t + lag] - cm);
            }
        }
        acov /= m_f * (n_f - 1.0);
        rho.push(1.0 - (within - acov) / within);
    }

    // Sum consecutive autocorrelation pairs until the sum turns negative.
    let mut tau = -1.0f64;
    let mut t = 1;
    while t + 1 < rho.len() {
        let pair = rho[t] + rho[t + 1];
        if pair < 0.0 {
            break;
        }
        tau += pair;
        t += 2;
    }
    tau = tau.max(1.0 / (m_f * n_f));

    m_f * n_f / (1.0 + 2.0 * tau)
}

/// Replace draws by their normal scores across the pooled ranking,
/// averaging tied ranks.
fn rank_normalize(traces: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n_chains = traces.len();
    let n_per = traces.first().map_or(0, |c| c.len());
    let total = n_chains * n_per;
    if total == 0 {
        return vec![];
    }

    let mut indexed: Vec<(f64, usize, usize)> = Vec::with_capacity(total);
    for (ci, chain) in traces.iter().enumerate() {
        for (di, &v) in chain.iter().enumerate() {
            indexed.push((v, ci, di));
        }
    }
    indexed.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranks = vec![0.0f64; total];
    let mut i = 0;
    while i < total {
        let mut j = i;
        while j < total && indexed[j].0 == indexed[i].0 {
            j += 1;
        }
        let avg_rank = (i + j + 1) as f64 / 2.0;
        for r in ranks.iter_mut().take(j).skip(i) {
            *r = avg_rank;
        }
        i = j;
    }

    // Normal score: Phi^-1((rank - 3/8) / (N + 1/4))
    let n_f = total as f64;
    let mut out = vec![vec![0.0; n_per]; n_chains];
    for (idx, &(_, ci, di)) in indexed.iter().enumerate() {
        let p = (ranks[idx] - 0.375) / (n_f + 0.25);
        out[ci][di] = std_normal_quantile(p);
    }
    out
}

/// Truncate all chains to the shortest length so that ragged inputs
/// (e.g. from a cancelled run) compare like-for-like positions.
fn rectangular(traces: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let min_len = traces.iter().map(|c| c.len()).min().unwrap_or(0);
    traces.iter().map(|c| c[..min_len].to_vec()).collect()
}

fn split_in_halves(traces: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut out = Vec::with_capacity(traces.len() * 2);
    for chain in traces {
        let mid = chain.len() / 2;
        out.push(chain[..mid].to_vec());
        out.push(chain[mid..].to_vec());
    }
    out
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn sd(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return f64::NAN;
    }
    let ss: f64 = xs.iter().map(|&x| (x - mean) * (x - mean)).sum();
    (ss / (xs.len() - 1) as f64).sqrt()
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let idx = q * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = (idx.ceil() as usize).min(sorted.len() - 1);
    let frac = idx - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

/// Standard normal quantile via the inverse error function.
fn std_normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    std::f64::consts::SQRT_2 * erf_inv(2.0 * p - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::{ChainStats, SampleSet};

    fn fake_sample_set(traces: Vec<Vec<f64>>, divergences: usize) -> SampleSet {
        let n_chains = traces.len();
        let draws: Vec<Vec<Vec<f64>>> = traces
            .into_iter()
            .map(|chain| chain.into_iter().map(|v| vec![v]).collect())
            .collect();
        SampleSet {
            draws,
            param_names: vec!["theta".to_string()],
            chain_stats: (0..n_chains)
                .map(|_| ChainStats {
                    accept_rate: 0.9,
                    step_size: 0.1,
                    divergences: divergences / n_chains,
                    nonfinite_evals: 0,
                    max_depth_hits: 0,
                })
                .collect(),
            num_warmup: 0,
        }
    }

    fn wiggle(seed: u64, n: usize, offset: f64) -> Vec<f64> {
        // Deterministic mean-stationary sequence.
        (0..n)
            .map(|i| offset + ((seed as f64 + i as f64) * 0.7).sin())
            .collect()
    }

    #[test]
    fn test_r_hat_near_one_for_matching_chains() {
        let traces: Vec<Vec<f64>> = (0..4).map(|s| wiggle(s, 1000, 0.0)).collect();
        let rh = split_r_hat(&traces);
        assert!(rh < 1.01, "r_hat = {}", rh);
    }

    #[test]
    fn test_r_hat_flags_separated_chains() {
        // Chains stuck in visibly different regions.
        let traces = vec![wiggle(0, 500, 0.0), wiggle(1, 500, 50.0)];
        let rh = split_r_hat(&traces);
        assert!(rh > 1.01, "r_hat = {} should exceed 1.01", rh);
    }

    #[test]
    fn test_ess_positive_for_wiggly_chains() {
        let traces: Vec<Vec<f64>> = (0..4).map(|s| wiggle(s * 31, 500, 0.0)).collect();
        let ess = ess_bulk(&traces);
        assert!(ess > 0.0, "ess = {}", ess);
        let tail = ess_tail(&traces);
        assert!(tail > 0.0, "tail ess = {}", tail);
    }

    #[test]
    fn test_report_warns_on_separated_chains() {
        let set = fake_sample_set(vec![wiggle(0, 400, 0.0), wiggle(1, 400, 50.0)], 0);
        let report = compute(&set);
        assert!(!report.converged());
        assert!(report.warnings.iter().any(|w| w.contains("r_hat")));
    }

    #[test]
    fn test_report_counts_divergences() {
        let set = fake_sample_set(vec![wiggle(0, 400, 0.0), wiggle(3, 400, 0.0)], 4);
        let report = compute(&set);
        assert_eq!(report.divergences, 4);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("divergent transitions")));
    }

    #[test]
    fn test_ragged_chains_are_truncated_not_panicking() {
        // Chains of unequal length, as left behind by a cancelled run.
        let traces = vec![wiggle(0, 500, 0.0), wiggle(7, 313, 0.0)];
        let rh = split_r_hat(&traces);
        assert!(rh.is_finite(), "r_hat = {}", rh);
        let ess = ess_bulk(&traces);
        assert!(ess > 0.0, "ess_bulk = {}", ess);
        let tail = ess_tail(&traces);
        assert!(tail > 0.0, "ess_tail = {}", tail);
    }

    #[test]
    fn test_std_normal_quantile_symmetry() {
        assert!(std_normal_quantile(0.5).abs() < 1e-12);
        let q = std_normal_quantile(0.975);
        assert!((q - 1.96).abs() < 0.01, "q = {}", q);
        assert!((std_normal_quantile(0.025) + q).abs() < 1e-10);
    }

    #[test]
    fn test_table_renders() {
        let set = fake_sample_set(vec![wiggle(0, 400, 0.0), wiggle(3, 400, 0.0)], 0);
        let report = compute(&set);
        let table = report.to_table();
        assert!(table.contains("theta"));
        assert!(table.contains("r_hat"));
    }
}
