//! Candidate expansion: every prefix extended by each of its top-K next tokens.

use candle_core::{Device, Tensor};

use super::sampling::top_k_indices;
use crate::error::{Result, SteerError};

/// The top-K next tokens of one row with their base scores, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct Shortlist {
    pub token_ids: Vec<u32>,
    pub base_scores: Vec<f32>,
}

impl Shortlist {
    /// Keep the `k` highest logits (ties by lower token id).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_logits(logits: &[f32], k: usize) -> Self {
        let idx = top_k_indices(logits, k);
        Self {
            token_ids: idx.iter().map(|&i| i as u32).collect(),
            base_scores: idx.iter().map(|&i| logits[i]).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.token_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }
}

/// `rows * k` candidate sequences laid out row-major, right-padded to one width.
#[derive(Debug)]
pub struct CandidateBatch {
    /// (rows * k, width) `u32`
    pub tokens: Tensor,
    /// Valid length of each candidate
    pub lengths: Vec<usize>,
    pub shortlists: Vec<Shortlist>,
    k: usize,
}

impl CandidateBatch {
    /// Append each shortlisted token to its row's prefix.
    ///
    /// # Errors
    /// Returns an error if rows disagree in count or shortlist size, or tensor creation fails.
    pub fn expand(
        prefixes: &[&[u32]],
        shortlists: Vec<Shortlist>,
        pad_id: u32,
        device: &Device,
    ) -> Result<Self> {
        if prefixes.len() != shortlists.len() || prefixes.is_empty() {
            return Err(SteerError::InvalidInput(format!(
                "{} prefixes for {} shortlists",
                prefixes.len(),
                shortlists.len()
            )));
        }
        let k = shortlists[0].len();
        if k == 0 || shortlists.iter().any(|s| s.len() != k) {
            return Err(SteerError::InvalidInput(
                "shortlists must share a non-zero size".to_string(),
            ));
        }

        let width = prefixes.iter().map(|p| p.len()).max().unwrap_or(0) + 1;
        let n = prefixes.len() * k;
        let mut flat = Vec::with_capacity(n * width);
        let mut lengths = Vec::with_capacity(n);
        for (prefix, shortlist) in prefixes.iter().zip(&shortlists) {
            for &token in &shortlist.token_ids {
                flat.extend_from_slice(prefix);
                flat.push(token);
                flat.extend(std::iter::repeat_n(pad_id, width - prefix.len() - 1));
                lengths.push(prefix.len() + 1);
            }
        }

        Ok(Self {
            tokens: Tensor::from_vec(flat, (n, width), device)?,
            lengths,
            shortlists,
            k,
        })
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.shortlists.len()
    }

    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Split a flat per-candidate vector back into rows of `k`.
    #[must_use]
    pub fn per_row<T: Clone>(&self, flat: &[T]) -> Vec<Vec<T>> {
        flat.chunks(self.k).map(<[T]>::to_vec).collect()
    }
}
