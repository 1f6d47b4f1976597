//! Shared run state: progress counters and cooperative cancellation.
//!
//! Every chain bumps the same atomic counters once per draw; an optional
//! background thread renders a progress bar to stderr at ~10 Hz. The cancel
//! flag is checked by each chain at per-draw granularity — a cancelled chain
//! returns the draws it has collected so far.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct RunState {
    total_iters: usize,
    num_chains: usize,
    completed: AtomicUsize,
    divergences: AtomicUsize,
    cancel: AtomicBool,
    done: AtomicBool,
    started: Instant,
}

impl RunState {
    pub fn new(num_chains: usize, iters_per_chain: usize) -> Self {
        Self {
            total_iters: num_chains * iters_per_chain,
            num_chains,
            completed: AtomicUsize::new(0),
            divergences: AtomicUsize::new(0),
            cancel: AtomicBool::new(false),
            done: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    pub fn record_draw(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_divergence(&self) {
        self.divergences.fetch_add(1, Ordering::Relaxed);
    }

    /// Request early termination; chains stop at their next draw boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn finish(&self) {
        self.done.store(true, Ordering::Relaxed);
    }

    pub fn divergences(&self) -> usize {
        self.divergences.load(Ordering::Relaxed)
    }
}

fn render(state: &RunState, out: &mut impl Write) {
    let completed = state.completed.load(Ordering::Relaxed);
    let total = state.total_iters.max(1);
    let divs = state.divergences.load(Ordering::Relaxed);
    let elapsed = state.started.elapsed().as_secs_f64();
    let pct = (completed * 100 / total).min(100);

    let width = 30usize;
    let filled = (width * completed / total).min(width);
    let bar: String = "█".repeat(filled) + &"·".repeat(width - filled);

    let rate = if elapsed > 0.05 {
        completed as f64 / elapsed
    } else {
        0.0
    };
    let eta = if rate > 0.0 && completed < total {
        (total - completed) as f64 / rate
    } else {
        0.0
    };

    let _ = write!(
        out,
        "\r{} chains [{}] {:>3}% | {} div | {:.0} it/s | eta {:.0}s\x1b[K",
        state.num_chains, bar, pct, divs, rate, eta
    );
    let _ = out.flush();
}

/// Spawn the progress-bar thread. Call `state.finish()` then join the handle
/// once sampling completes.
pub fn spawn_progress_thread(state: Arc<RunState>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut err = std::io::stderr();
        while !state.done.load(Ordering::Relaxed) {
            render(&state, &mut err);
            std::thread::sleep(Duration::from_millis(100));
        }
        render(&state, &mut err);
        let _ = writeln!(err);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_cancel() {
        let state = RunState::new(4, 100);
        assert!(!state.is_cancelled());
        state.record_draw();
        state.record_divergence();
        state.record_divergence();
        assert_eq!(state.divergences(), 2);
        state.cancel();
        assert!(state.is_cancelled());
    }

    #[test]
    fn test_render_does_not_panic_on_zero_total() {
        let state = RunState::new(0, 0);
        let mut buf = Vec::new();
        render(&state, &mut buf);
        assert!(!buf.is_empty());
    }
}
