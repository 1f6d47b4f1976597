//! No-U-Turn Sampler — Hoffman & Gelman (2014) with multinomial candidate
//! selection (Betancourt 2017), the scheme used by Stan and PyMC:
//!
//!   - Iterative tree doubling (extend trajectory forward or backward)
//!   - Generalized U-turn criterion on subtrees
//!   - Multinomial candidate selection weighted by exp(-H)
//!   - Divergence detection via energy-error threshold
//!   - Max tree depth cap bounding the work per draw
//!
//! Warm-up adapts the step size by dual averaging toward a target acceptance
//! rate and estimates a diagonal mass matrix from mid-warm-up draws.

use crate::monitor::RunState;
use crate::posterior::Posterior;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

/// Energy error beyond which a trajectory is declared divergent.
const MAX_DELTA_H: f64 = 1000.0;

/// Per-chain NUTS settings. `step_size = 0` selects automatic initialization.
#[derive(Debug, Clone)]
pub struct NutsConfig {
    pub step_size: f64,
    pub max_tree_depth: usize,
    pub num_draws: usize,
    pub num_warmup: usize,
    pub target_accept: f64,
}

impl Default for NutsConfig {
    fn default() -> Self {
        Self {
            step_size: 0.0,
            max_tree_depth: 10,
            num_draws: 1000,
            num_warmup: 1000,
            target_accept: 0.8,
        }
    }
}

/// Output of one chain. Draws are in **constrained** space, warm-up excluded.
#[derive(Debug, Clone)]
pub struct ChainRun {
    pub draws: Vec<Vec<f64>>,
    pub accept_rate: f64,
    pub step_size: f64,
    pub divergences: usize,
    /// Log-density or gradient evaluated non-finite during a trajectory.
    pub nonfinite_evals: usize,
    /// Draws whose trajectory hit the max tree depth without a U-turn.
    pub max_depth_hits: usize,
}

/// A point on the Hamiltonian trajectory.
#[derive(Clone)]
struct PhasePoint {
    q: Vec<f64>,
    p: Vec<f64>,
    grad: Vec<f64>,
    logp: f64,
}

impl PhasePoint {
    fn energy(&self, inv_mass: &[f64]) -> f64 {
        let ke: f64 = self
            .p
            .iter()
            .zip(inv_mass.iter())
            .map(|(&pi, &im)| 0.5 * pi * pi * im)
            .sum();
        -self.logp + ke
    }
}

/// Leapfrog integrator bound to one chain's posterior and mass matrix.
/// Tracks non-finite density evaluations across the whole run.
struct Integrator<'a, 'b> {
    posterior: &'a Posterior<'b>,
    inv_mass: Vec<f64>,
    mass_sqrt: Vec<f64>,
    nonfinite_evals: usize,
}

impl<'a, 'b> Integrator<'a, 'b> {
    fn new(posterior: &'a Posterior<'b>, dim: usize) -> Self {
        Self {
            posterior,
            inv_mass: vec![1.0; dim],
            mass_sqrt: vec![1.0; dim],
            nonfinite_evals: 0,
        }
    }

    /// One leapfrog step: half-step momentum, full-step position, half-step
    /// momentum.
    fn leapfrog(&mut self, point: &PhasePoint, eps: f64) -> PhasePoint {
        let dim = point.q.len();
        let mut p_new = vec![0.0; dim];
        let mut q_new = vec![0.0; dim];

        for i in 0..dim {
            p_new[i] = point.p[i] + 0.5 * eps * point.grad[i];
        }
        for i in 0..dim {
            q_new[i] = point.q[i] + eps * self.inv_mass[i] * p_new[i];
        }

        let (logp_new, grad_new) = self.posterior.logp_grad_unconstrained(&q_new);
        if !logp_new.is_finite() || grad_new.iter().any(|g| !g.is_finite()) {
            self.nonfinite_evals += 1;
        }

        for i in 0..dim {
            p_new[i] += 0.5 * eps * grad_new[i];
        }

        PhasePoint {
            q: q_new,
            p: p_new,
            grad: grad_new,
            logp: logp_new,
        }
    }
}

struct TreeResult {
    left: PhasePoint,
    right: PhasePoint,
    proposal: PhasePoint,
    log_sum_weight: f64,
    depth: usize,
    turning: bool,
    diverging: bool,
}

struct TrajectoryStats {
    diverging: bool,
    saturated: bool,
    mean_accept_prob: f64,
}

/// Run a single NUTS chain.
///
/// `init` is a starting point in unconstrained space. The returned draws are
/// transformed back to constrained space as they are collected, so every
/// retained `gamma` draw is positive and every `nu` draw in bounds by
/// construction. Passing a [`RunState`] enables per-draw progress accounting
/// and cooperative cancellation: a cancelled chain stops at the next draw
/// boundary and returns what it has.
pub fn run_chain(
    posterior: &Posterior,
    config: &NutsConfig,
    rng: &mut ChaCha8Rng,
    init: Vec<f64>,
    run_state: Option<&RunState>,
) -> ChainRun {
    let dim = posterior.dim();
    let total_iters = config.num_warmup + config.num_draws;

    let mut integrator = Integrator::new(posterior, dim);
    let mut draws = Vec::with_capacity(config.num_draws);
    let mut n_divergences = 0usize;
    let mut max_depth_hits = 0usize;
    let mut sum_accept_prob = 0.0f64;
    let mut iters_done = 0u64;

    // Warm-up phases for mass-matrix estimation: 15% step-size-only, then
    // 75% collecting marginal variances, then a final re-tuning window.
    let phase1_end = config.num_warmup * 15 / 100;
    let phase2_end = config.num_warmup * 90 / 100;
    let mut warmup_q_sum = vec![0.0f64; dim];
    let mut warmup_q_sq_sum = vec![0.0f64; dim];
    let mut warmup_count = 0usize;

    let (logp0, grad0) = posterior.logp_grad_unconstrained(&init);
    let mut current = PhasePoint {
        q: init,
        p: vec![0.0; dim],
        grad: grad0,
        logp: logp0,
    };

    let mut step_size = if config.step_size > 0.0 {
        config.step_size
    } else {
        find_initial_step_size(&mut integrator, &current, rng)
    };

    // Dual averaging (Hoffman & Gelman 2014, §3.2)
    let da_mu = (10.0 * step_size).ln();
    let da_gamma = 0.05;
    let da_t0 = 10.0;
    let da_kappa = 0.75;
    let mut log_eps_bar = step_size.ln();
    let mut h_bar = 0.0f64;
    let mut adapt_count = 0u64;

    for iter in 0..total_iters {
        if let Some(rs) = run_state {
            if rs.is_cancelled() {
                break;
            }
        }
        let is_warmup = iter < config.num_warmup;

        for i in 0..dim {
            let z: f64 = StandardNormal.sample(rng);
            current.p[i] = z * integrator.mass_sqrt[i];
        }
        let h0 = current.energy(&integrator.inv_mass);

        let (proposal, stats) = sample_trajectory(
            &mut integrator,
            &current,
            step_size,
            h0,
            config.max_tree_depth,
            rng,
        );

        if stats.diverging {
            n_divergences += 1;
            if let Some(rs) = run_state {
                rs.record_divergence();
            }
        } else {
            current.q.copy_from_slice(&proposal.q);
            current.grad.copy_from_slice(&proposal.grad);
            current.logp = proposal.logp;
        }
        if stats.saturated {
            max_depth_hits += 1;
        }

        sum_accept_prob += stats.mean_accept_prob;
        iters_done += 1;
        if let Some(rs) = run_state {
            rs.record_draw();
        }

        if is_warmup {
            adapt_count += 1;
            let m = adapt_count as f64;
            let w = 1.0 / (m + da_t0);
            h_bar = (1.0 - w) * h_bar + w * (config.target_accept - stats.mean_accept_prob);
            let log_eps = da_mu - (m.sqrt() / da_gamma) * h_bar;
            step_size = log_eps.exp();
            let m_pow = m.powf(-da_kappa);
            log_eps_bar = m_pow * log_eps + (1.0 - m_pow) * log_eps_bar;

            if iter >= phase1_end && iter < phase2_end {
                for i in 0..dim {
                    warmup_q_sum[i] += current.q[i];
                    warmup_q_sq_sum[i] += current.q[i] * current.q[i];
                }
                warmup_count += 1;
            }

            // Switch to the estimated diagonal mass matrix and re-tune.
            if iter == phase2_end && warmup_count > 10 {
                let n = warmup_count as f64;
                for i in 0..dim {
                    let mean = warmup_q_sum[i] / n;
                    let var = warmup_q_sq_sum[i] / n - mean * mean;
                    // Stan convention: M^-1 = marginal posterior variance,
                    // so momenta are drawn with sd 1/sqrt(var).
                    if var > 1e-8 {
                        integrator.inv_mass[i] = var;
                        integrator.mass_sqrt[i] = 1.0 / var.sqrt();
                    }
                }
                adapt_count = 0;
                h_bar = 0.0;
                let (lp, grad) = posterior.logp_grad_unconstrained(&current.q);
                current.logp = lp;
                current.grad.copy_from_slice(&grad);
                step_size = find_initial_step_size(&mut integrator, &current, rng);
                log_eps_bar = step_size.ln();
            }
        }

        if iter + 1 == config.num_warmup && config.num_warmup > 0 {
            step_size = log_eps_bar.exp();
        }

        if !is_warmup {
            draws.push(posterior.to_constrained(&current.q));
        }
    }

    let accept_rate = if iters_done > 0 {
        sum_accept_prob / iters_done as f64
    } else {
        0.0
    };

    ChainRun {
        draws,
        accept_rate,
        step_size,
        divergences: n_divergences,
        nonfinite_evals: integrator.nonfinite_evals,
        max_depth_hits,
    }
}

/// Grow the trajectory by iterative doubling until a U-turn, a divergence,
/// or the depth cap, multinomially selecting the returned candidate.
fn sample_trajectory(
    integrator: &mut Integrator,
    initial: &PhasePoint,
    eps: f64,
    h0: f64,
    max_depth: usize,
    rng: &mut ChaCha8Rng,
) -> (PhasePoint, TrajectoryStats) {
    let mut left = initial.clone();
    let mut right = initial.clone();
    let mut proposal = initial.clone();
    let mut log_sum_weight = 0.0f64;
    let mut depth = 0;
    let mut sum_accept_stat = 0.0f64;
    let mut n_accept_stat = 0usize;
    let mut diverging = false;

    while depth < max_depth {
        let forward = rng.gen::<bool>();
        let subtree = if forward {
            build_subtree(integrator, &right, eps, h0, depth, rng)
        } else {
            build_subtree(integrator, &left, -eps, h0, depth, rng)
        };

        if subtree.diverging {
            diverging = true;
            break;
        }
        if subtree.turning {
            break;
        }

        // Multinomial combination across the doubled tree.
        let accept_prob = (subtree.log_sum_weight - log_sum_weight).min(0.0).exp();
        if rng.gen::<f64>() < accept_prob {
            proposal = subtree.proposal;
        }
        log_sum_weight = log_sum_exp(log_sum_weight, subtree.log_sum_weight);

        let n_leaves = 1usize << subtree.depth;
        sum_accept_stat += subtree.log_sum_weight.exp().min(n_leaves as f64);
        n_accept_stat += n_leaves;

        if forward {
            right = subtree.right;
        } else {
            left = subtree.left;
        }

        if check_uturn(&left, &right, &integrator.inv_mass) {
            break;
        }
        depth += 1;
    }

    let mean_accept = if n_accept_stat > 0 {
        (sum_accept_stat / n_accept_stat as f64).min(1.0)
    } else {
        0.0
    };

    (
        proposal,
        TrajectoryStats {
            diverging,
            saturated: depth >= max_depth,
            mean_accept_prob: mean_accept,
        },
    )
}

/// Recursively build a balanced subtree of the given depth.
/// depth 0 is a single leapfrog step.
fn build_subtree(
    integrator: &mut Integrator,
    point: &PhasePoint,
    eps: f64,
    h0: f64,
    depth: usize,
    rng: &mut ChaCha8Rng,
) -> TreeResult {
    if depth == 0 {
        let next = integrator.leapfrog(point, eps);
        let delta_h = next.energy(&integrator.inv_mass) - h0;
        let diverging = delta_h > MAX_DELTA_H || !delta_h.is_finite();
        let log_weight = if diverging { f64::NEG_INFINITY } else { -delta_h };
        return TreeResult {
            left: next.clone(),
            right: next.clone(),
            proposal: next,
            log_sum_weight: log_weight,
            depth: 0,
            turning: false,
            diverging,
        };
    }

    let inner = build_subtree(integrator, point, eps, h0, depth - 1, rng);
    if inner.diverging || inner.turning {
        return inner;
    }

    let start = if eps > 0.0 { &inner.right } else { &inner.left };
    let outer = build_subtree(integrator, start, eps, h0, depth - 1, rng);

    if outer.diverging {
        return TreeResult {
            left: inner.left,
            right: inner.right,
            proposal: inner.proposal,
            log_sum_weight: inner.log_sum_weight,
            depth,
            turning: false,
            diverging: true,
        };
    }

    let log_sum = log_sum_exp(inner.log_sum_weight, outer.log_sum_weight);
    let accept_outer = (outer.log_sum_weight - log_sum).exp();
    let proposal = if rng.gen::<f64>() < accept_outer {
        outer.proposal
    } else {
        inner.proposal
    };

    let (left, right) = if eps > 0.0 {
        (inner.left, outer.right)
    } else {
        (outer.left, inner.right)
    };
    let turning = outer.turning || check_uturn(&left, &right, &integrator.inv_mass);

    TreeResult {
        left,
        right,
        proposal,
        log_sum_weight: log_sum,
        depth,
        turning,
        diverging: false,
    }
}

/// Generalized U-turn check: turning when the momentum at either end would
/// shrink the distance between the endpoints.
fn check_uturn(left: &PhasePoint, right: &PhasePoint, inv_mass: &[f64]) -> bool {
    let mut dot_left = 0.0f64;
    let mut dot_right = 0.0f64;
    for i in 0..left.q.len() {
        let dq = right.q[i] - left.q[i];
        dot_left += dq * (inv_mass[i] * left.p[i]);
        dot_right += dq * (inv_mass[i] * right.p[i]);
    }
    dot_left < 0.0 || dot_right < 0.0
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY && b == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// Heuristic step-size initialization: double or halve until one leapfrog
/// step crosses 50% acceptance (Hoffman & Gelman 2014, Algorithm 4).
fn find_initial_step_size(
    integrator: &mut Integrator,
    current: &PhasePoint,
    rng: &mut ChaCha8Rng,
) -> f64 {
    let dim = current.q.len();
    let p0: Vec<f64> = (0..dim)
        .map(|i| {
            let z: f64 = StandardNormal.sample(rng);
            z * integrator.mass_sqrt[i]
        })
        .collect();

    let start = PhasePoint {
        q: current.q.clone(),
        p: p0,
        grad: current.grad.clone(),
        logp: current.logp,
    };
    let h0 = start.energy(&integrator.inv_mass);

    let mut eps = 1.0;
    let test = integrator.leapfrog(&start, eps);
    let log_ratio = h0 - test.energy(&integrator.inv_mass);
    let direction = if log_ratio > (-0.5f64).ln() { 1.0 } else { -1.0 };

    for _ in 0..50 {
        let t = integrator.leapfrog(&start, eps);
        let lr = h0 - t.energy(&integrator.inv_mass);
        if !lr.is_finite() {
            eps *= 0.5;
            break;
        }
        if direction > 0.0 && lr < (-0.5f64).ln() {
            break;
        }
        if direction < 0.0 && lr > (-0.5f64).ln() {
            break;
        }
        eps *= 2.0f64.powf(direction);
    }

    eps.clamp(1e-10, 1e3)
}
