//! Multi-chain sampling driver.
//!
//! Chains are embarrassingly parallel: each owns its RNG (seeded
//! `seed + chain_index`), its warm-up adaptation, and its draw sequence, with
//! the dataset shared read-only. Results are therefore bit-reproducible for a
//! given (seed, dataset, config) regardless of thread scheduling.

use crate::data::Dataset;
use crate::error::{Error, Result};
use crate::model::BestModel;
use crate::monitor::{spawn_progress_thread, RunState};
use crate::nuts::{self, ChainRun, NutsConfig};
use crate::posterior::Posterior;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use std::sync::Arc;

/// Scale of the per-chain initialization jitter in unconstrained space.
const INIT_JITTER_SD: f64 = 0.5;

/// Configuration for a full sampling run.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub num_chains: usize,
    /// Retained draws per chain (warm-up is on top of this).
    pub num_draws: usize,
    pub num_warmup: usize,
    pub target_accept: f64,
    pub max_tree_depth: usize,
    /// 0 selects automatic step-size initialization.
    pub step_size: f64,
    pub seed: u64,
    /// Worker threads. 0 means use Rayon's default (all cores).
    pub num_threads: usize,
    /// Render a live progress bar to stderr.
    pub progress: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            num_chains: 4,
            num_draws: 1000,
            num_warmup: 1000,
            target_accept: 0.8,
            max_tree_depth: 10,
            step_size: 0.0,
            seed: 42,
            num_threads: 0,
            progress: false,
        }
    }
}

impl SamplerConfig {
    /// Reject configurations that cannot produce a usable run.
    pub fn validate(&self) -> Result<()> {
        if self.num_chains == 0 {
            return Err(Error::InvalidConfig("num_chains must be at least 1".into()));
        }
        if self.num_draws == 0 {
            return Err(Error::InvalidConfig("num_draws must be at least 1".into()));
        }
        if self.max_tree_depth == 0 {
            return Err(Error::InvalidConfig("max_tree_depth must be at least 1".into()));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "target_accept must be in (0, 1), got {}",
                self.target_accept
            )));
        }
        if self.step_size < 0.0 || !self.step_size.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "step_size must be finite and non-negative, got {}",
                self.step_size
            )));
        }
        Ok(())
    }

    fn nuts_config(&self) -> NutsConfig {
        NutsConfig {
            step_size: self.step_size,
            max_tree_depth: self.max_tree_depth,
            num_draws: self.num_draws,
            num_warmup: self.num_warmup,
            target_accept: self.target_accept,
        }
    }
}

/// Per-chain statistics kept alongside the draws.
#[derive(Debug, Clone)]
pub struct ChainStats {
    pub accept_rate: f64,
    pub step_size: f64,
    pub divergences: usize,
    pub nonfinite_evals: usize,
    pub max_depth_hits: usize,
}

/// Posterior draws from all chains, in constrained space.
///
/// Indexed `draws[chain][draw][param]`; warm-up is already discarded. A chain
/// may hold fewer than `num_draws` draws if the run was cancelled.
#[derive(Debug, Clone)]
pub struct SampleSet {
    pub draws: Vec<Vec<Vec<f64>>>,
    pub param_names: Vec<String>,
    pub chain_stats: Vec<ChainStats>,
    pub num_warmup: usize,
}

impl SampleSet {
    pub fn num_chains(&self) -> usize {
        self.draws.len()
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.param_names.iter().position(|n| n == name)
    }

    /// Per-chain trace of a single parameter.
    pub fn traces(&self, param: usize) -> Vec<Vec<f64>> {
        self.draws
            .iter()
            .map(|chain| chain.iter().map(|draw| draw[param]).collect())
            .collect()
    }

    /// All chains' draws of one parameter, pooled.
    pub fn pooled(&self, param: usize) -> Vec<f64> {
        self.draws
            .iter()
            .flat_map(|chain| chain.iter().map(move |draw| draw[param]))
            .collect()
    }

    /// Posterior mean per parameter, pooled across chains.
    pub fn mean(&self) -> Vec<f64> {
        let n_params = self.param_names.len();
        let mut sums = vec![0.0; n_params];
        let mut count = 0usize;
        for chain in &self.draws {
            for draw in chain {
                for (s, &v) in sums.iter_mut().zip(draw.iter()) {
                    *s += v;
                }
                count += 1;
            }
        }
        sums.iter().map(|s| s / count as f64).collect()
    }

    /// Posterior standard deviation per parameter, pooled across chains.
    pub fn std(&self) -> Vec<f64> {
        let means = self.mean();
        let n_params = self.param_names.len();
        let mut sum_sq = vec![0.0; n_params];
        let mut count = 0usize;
        for chain in &self.draws {
            for draw in chain {
                for (i, &v) in draw.iter().enumerate() {
                    let d = v - means[i];
                    sum_sq[i] += d * d;
                }
                count += 1;
            }
        }
        sum_sq.iter().map(|s| (s / count as f64).sqrt()).collect()
    }

    pub fn total_divergences(&self) -> usize {
        self.chain_stats.iter().map(|s| s.divergences).sum()
    }

    pub fn total_nonfinite_evals(&self) -> usize {
        self.chain_stats.iter().map(|s| s.nonfinite_evals).sum()
    }
}

/// Run the full multi-chain sampler on a dataset.
///
/// Fails fast on a malformed configuration; numerical trouble during
/// sampling never fails the run — it is reported through the chain stats and
/// [`crate::diagnostics`].
pub fn sample(dataset: &Dataset, config: &SamplerConfig) -> Result<SampleSet> {
    let state = Arc::new(RunState::new(
        config.num_chains,
        config.num_warmup + config.num_draws,
    ));
    let handle = if config.progress {
        Some(spawn_progress_thread(Arc::clone(&state)))
    } else {
        None
    };
    let result = sample_with_state(dataset, config, &state);
    state.finish();
    if let Some(h) = handle {
        let _ = h.join();
    }
    result
}

/// Like [`sample`], with a caller-owned [`RunState`] for progress observation
/// and cancellation. Draws collected before a cancellation are returned as-is.
pub fn sample_with_state(
    dataset: &Dataset,
    config: &SamplerConfig,
    state: &Arc<RunState>,
) -> Result<SampleSet> {
    config.validate()?;

    let model = BestModel::new(dataset);
    let param_names = model.param_names();
    let nuts_config = config.nuts_config();

    let run_chains = || -> Vec<ChainRun> {
        (0..config.num_chains)
            .into_par_iter()
            .map(|chain_idx| {
                let mut rng = ChaCha8Rng::seed_from_u64(config.seed + chain_idx as u64);
                let posterior = Posterior::new(&model);
                let init = initial_point(dataset, &model, &posterior, &mut rng);
                nuts::run_chain(&posterior, &nuts_config, &mut rng, init, Some(state.as_ref()))
            })
            .collect()
    };

    let results = if config.num_threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("thread pool: {}", e)))?;
        pool.install(run_chains)
    } else {
        run_chains()
    };

    let total_div: usize = results.iter().map(|r| r.divergences).sum();
    if total_div > 0 {
        log::warn!("{} divergent transitions across all chains", total_div);
    }
    let total_nonfinite: usize = results.iter().map(|r| r.nonfinite_evals).sum();
    if total_nonfinite > 0 {
        log::warn!(
            "{} non-finite log-density evaluations during sampling",
            total_nonfinite
        );
    }

    let mut draws = Vec::with_capacity(results.len());
    let mut chain_stats = Vec::with_capacity(results.len());
    for run in results {
        chain_stats.push(ChainStats {
            accept_rate: run.accept_rate,
            step_size: run.step_size,
            divergences: run.divergences,
            nonfinite_evals: run.nonfinite_evals,
            max_depth_hits: run.max_depth_hits,
        });
        draws.push(run.draws);
    }

    Ok(SampleSet {
        draws,
        param_names,
        chain_stats,
        num_warmup: config.num_warmup,
    })
}

/// Diffuse start: per-group empirical means and pooled spread, nudged by
/// Gaussian jitter in unconstrained space so chains start apart. Groups with
/// no observations fall back to the pooled mean.
fn initial_point(
    dataset: &Dataset,
    model: &BestModel,
    posterior: &Posterior,
    rng: &mut ChaCha8Rng,
) -> Vec<f64> {
    let (pooled_mean, pooled_sd) = model.prior_center();
    let g = model.n_groups();

    let mut theta = Vec::with_capacity(model.dim());
    for gm in dataset.group_means() {
        theta.push(gm.unwrap_or(pooled_mean));
    }
    theta.extend(std::iter::repeat(pooled_sd).take(g));
    theta.push(30.0);

    let mut z = posterior.to_unconstrained(&theta);
    for zi in &mut z {
        let noise: f64 = StandardNormal.sample(rng);
        *zi += INIT_JITTER_SD * noise;
    }
    z
}
