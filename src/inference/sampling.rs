//! Candidate pruning and next-token selection.
//!
//! Implements stable top-k, greedy arg-max and multinomial sampling over a re-ranked shortlist.

use std::cmp::Ordering;

use rand::Rng;

/// How the next token is chosen from fused candidate scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Highest fused score.
    Greedy,
    /// Keep the `postcondition_topk` best fused scores, softmax them, draw once.
    Sample { postcondition_topk: usize },
}

impl Default for Selection {
    fn default() -> Self {
        Self::Sample {
            postcondition_topk: 10,
        }
    }
}

/// Indices of the `k` largest values in descending order. Ties keep the lower index first and
/// NaN sorts last.
#[must_use]
pub fn top_k_indices(values: &[f32], k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| descending(values[a], values[b]));
    idx.truncate(k);
    idx
}

fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Pick a position in `fused` according to `selection`.
///
/// Returns `None` only for an empty slice.
pub fn select(fused: &[f32], selection: Selection, rng: &mut impl Rng) -> Option<usize> {
    if fused.is_empty() {
        return None;
    }
    let picked = match selection {
        Selection::Greedy => argmax(fused),
        Selection::Sample { postcondition_topk } => {
            let shortlist = top_k_indices(fused, postcondition_topk.max(1));
            let logits: Vec<f32> = shortlist.iter().map(|&i| fused[i]).collect();
            let probs = softmax(&logits);
            if probs.iter().all(|p| *p == 0.0) {
                argmax(fused)
            } else {
                shortlist[sample_multinomial(&probs, rng)]
            }
        }
    };
    Some(picked)
}

/// First index of the largest finite value, 0 if none is finite.
#[must_use]
pub fn argmax(logits: &[f32]) -> usize {
    let mut best_idx = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, &v) in logits.iter().enumerate() {
        if v.is_finite() && v > best_val {
            best_val = v;
            best_idx = idx;
        }
    }
    best_idx
}

#[must_use]
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);

    if !max_logit.is_finite() {
        return vec![0.0; logits.len()];
    }

    let mut exps = Vec::with_capacity(logits.len());
    let mut sum = 0.0_f32;
    for &v in logits {
        let e = if v.is_finite() {
            (v - max_logit).exp()
        } else {
            0.0
        };
        sum += e;
        exps.push(e);
    }

    if sum == 0.0 {
        return vec![0.0; logits.len()];
    }

    exps.into_iter().map(|e| e / sum).collect()
}

#[must_use]
fn sample_multinomial(probs: &[f32], rng: &mut impl Rng) -> usize {
    let r: f32 = rng.r#gen();
    let mut cum = 0.0_f32;
    for (idx, &p) in probs.iter().enumerate() {
        cum += p;
        if r < cum {
            return idx;
        }
    }
    // Numerical edge case: return last non-zero prob, else 0.
    probs.iter().rposition(|p| *p > 0.0).unwrap_or(0)
}
