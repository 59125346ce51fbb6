//! Token sampling over a logit vector.
//!
//! The pipeline for one step is:
//!
//! ```text
//! logits -> repetition penalty -> temperature -> top-k -> top-p -> softmax -> draw
//! ```
//!
//! Every truncation stage suppresses ids by setting their logit to negative infinity, so the
//! final softmax gives them zero mass.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

use crate::generation::GenerationParams;

/// Divides positive logits and multiplies negative ones by `penalty` for every id present in the
/// last `window` entries of `history`.
pub fn apply_repetition_penalty(logits: &mut [f32], history: &[u32], penalty: f32, window: usize) {
    if penalty <= 1.0 || window == 0 {
        return;
    }
    let start = history.len().saturating_sub(window);
    let recent: HashSet<u32> = history[start..].iter().copied().collect();
    for id in recent {
        if let Some(logit) = logits.get_mut(id as usize) {
            if *logit > 0.0 {
                *logit /= penalty;
            } else {
                *logit *= penalty;
            }
        }
    }
}

pub fn apply_temperature(logits: &mut [f32], temperature: f32) {
    if temperature > 0.0 && temperature != 1.0 {
        for logit in logits.iter_mut() {
            *logit /= temperature;
        }
    }
}

/// Keeps the logits at or above the k-th largest one. Returns how many ids were suppressed.
/// `k == 1` keeps exactly one id, the lowest among tied maxima.
///
/// Uses introselect on a scratch copy, so the cost is linear in the vocabulary size.
pub fn apply_top_k(logits: &mut [f32], k: usize) -> usize {
    if k == 0 || k >= logits.len() {
        return 0;
    }
    if k == 1 {
        let best = argmax(logits) as usize;
        let mut suppressed = 0;
        for (i, logit) in logits.iter_mut().enumerate() {
            if i != best && *logit != f32::NEG_INFINITY {
                suppressed += 1;
                *logit = f32::NEG_INFINITY;
            }
        }
        return suppressed;
    }
    let mut scratch = logits.to_vec();
    let (_, kth, _) = scratch.select_nth_unstable_by(k - 1, |a, b| b.total_cmp(a));
    let threshold = *kth;

    let mut suppressed = 0;
    for logit in logits.iter_mut() {
        if *logit < threshold {
            if *logit != f32::NEG_INFINITY {
                suppressed += 1;
            }
            *logit = f32::NEG_INFINITY;
        }
    }
    suppressed
}

/// Nucleus truncation: keeps the smallest prefix (by descending logit) whose probability mass
/// reaches `p`. Returns how many ids were suppressed. `p` outside (0, 1) is a no-op.
pub fn apply_top_p(logits: &mut [f32], p: f32) -> usize {
    if !(p > 0.0 && p < 1.0) || logits.is_empty() {
        return 0;
    }
    let mut order: Vec<usize> = (0..logits.len()).collect();
    order.sort_by(|&a, &b| logits[b].total_cmp(&logits[a]));

    let max = logits[order[0]];
    if max == f32::NEG_INFINITY {
        return 0;
    }
    let weights: Vec<f32> = order.iter().map(|&i| (logits[i] - max).exp()).collect();
    let total: f32 = weights.iter().sum();

    let mut cumulative = 0.0;
    let mut cutoff = order.len();
    for (rank, weight) in weights.iter().enumerate() {
        cumulative += weight / total;
        if cumulative >= p {
            cutoff = rank + 1;
            break;
        }
    }

    let mut suppressed = 0;
    for &i in &order[cutoff..] {
        if logits[i] != f32::NEG_INFINITY {
            suppressed += 1;
            logits[i] = f32::NEG_INFINITY;
        }
    }
    suppressed
}

/// Numerically stable softmax, in place. A fully suppressed vector becomes uniform.
pub fn softmax_in_place(logits: &mut [f32]) {
    if logits.is_empty() {
        return;
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        let uniform = 1.0 / logits.len() as f32;
        logits.iter_mut().for_each(|l| *l = uniform);
        return;
    }
    let mut sum = 0.0;
    for logit in logits.iter_mut() {
        *logit = (*logit - max).exp();
        sum += *logit;
    }
    for logit in logits.iter_mut() {
        *logit /= sum;
    }
}

pub fn argmax(logits: &[f32]) -> u32 {
    let mut best = 0;
    for (i, logit) in logits.iter().enumerate() {
        if logit.total_cmp(&logits[best]).is_gt() {
            best = i;
        }
    }
    best as u32
}

/// Walks the cumulative distribution and returns the first id whose running mass reaches `u`.
/// Zero-mass ids are never returned unless every id has zero mass.
pub fn draw(probs: &[f32], u: f32) -> u32 {
    let mut cumulative = 0.0;
    let mut last_live = None;
    for (i, p) in probs.iter().enumerate() {
        if *p <= 0.0 {
            continue;
        }
        cumulative += p;
        last_live = Some(i);
        if cumulative >= u {
            return i as u32;
        }
    }
    last_live.unwrap_or(probs.len().saturating_sub(1)) as u32
}

pub struct Sampler {
    rng: StdRng,
}

impl Sampler {
    /// A seeded sampler is reproducible; `None` seeds from system entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Runs the full pipeline on `logits` (consumed as scratch space) and returns the chosen id.
    pub fn sample(&mut self, logits: &mut [f32], history: &[u32], params: &GenerationParams) -> u32 {
        apply_repetition_penalty(
            logits,
            history,
            params.repetition_penalty,
            params.penalty_window,
        );
        if params.temperature == 0.0 {
            return argmax(logits);
        }
        apply_temperature(logits, params.temperature);
        apply_top_k(logits, params.top_k);
        apply_top_p(logits, params.top_p);
        softmax_in_place(logits);
        let u: f32 = self.rng.gen();
        draw(logits, u)
    }
}
