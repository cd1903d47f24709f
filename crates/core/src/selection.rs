//! Account selection scoring.
//!
//! The load balancer in the engine filters candidates and then applies one
//! of four rules. The scoring itself is pure and lives here so it can be
//! tested without instances or clocks. Randomness is passed in as a roll in
//! `[0, 1)` to keep the functions deterministic.

use serde::{Deserialize, Serialize};

/// Global account-selection rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChooseRule {
    /// Minimize `(queued + running) - core_size * IDLE_BIAS`;
    /// ties break by `(-weight, sort)`.
    #[default]
    BestWaitIdle,
    /// Uniform among survivors.
    Random,
    /// Weighted random with weight = account weight.
    Weight,
    /// Round-robin over survivors (counter kept by the registry).
    Polling,
}

/// How strongly free worker slots count against the wait score.
pub const IDLE_BIAS: f64 = 1.0;

/// Load snapshot of one candidate instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateLoad {
    pub queued: usize,
    pub running: usize,
    pub core_size: usize,
    pub weight: u32,
    pub sort: i32,
}

/// The BestWaitIdle score; lower is better.
pub fn wait_idle_score(load: &CandidateLoad) -> f64 {
    (load.queued + load.running) as f64 - load.core_size as f64 * IDLE_BIAS
}

/// Index of the BestWaitIdle winner, or `None` for an empty slice.
pub fn pick_best_wait_idle(loads: &[CandidateLoad]) -> Option<usize> {
    loads
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            wait_idle_score(a)
                .total_cmp(&wait_idle_score(b))
                .then_with(|| b.weight.cmp(&a.weight))
                .then_with(|| a.sort.cmp(&b.sort))
        })
        .map(|(i, _)| i)
}

/// Index chosen by weighted random for a roll in `[0, 1)`.
///
/// Zero-weight candidates are never chosen; if every weight is zero the
/// rule yields `None` and the caller falls back to uniform random.
pub fn pick_weighted(weights: &[u32], roll: f64) -> Option<usize> {
    let total: u64 = weights.iter().map(|w| *w as u64).sum();
    if total == 0 {
        return None;
    }
    let mut threshold = ((roll.max(0.0) * total as f64) as u64).min(total - 1);
    for (i, w) in weights.iter().enumerate() {
        let w = *w as u64;
        if threshold < w {
            return Some(i);
        }
        threshold -= w;
    }
    // Unreachable: threshold < total by construction.
    None
}

/// Round-robin index for a monotonic counter.
pub fn pick_polling(counter: u64, len: usize) -> Option<usize> {
    if len == 0 {
        None
    } else {
        Some((counter % len as u64) as usize)
    }
}
