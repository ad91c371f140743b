//! The attribute predictor contract shared by all decoders.

use candle_core::{Device, Tensor};

use super::config::Task;
use crate::error::{Result, SteerError};

/// Conditioning targets scored by the per-target predictors.
#[derive(Debug, Clone)]
pub struct FutureTargets {
    /// Target indices (N,) `u32`: word-vocabulary or rhyme-group rows.
    pub indices: Tensor,
    /// Baseline log-probability per target (N,) `f32`.
    pub baseline_log_probs: Tensor,
}

impl FutureTargets {
    /// # Errors
    /// Returns an error if the slices differ in length or are empty.
    pub fn new(indices: &[u32], baseline_log_probs: &[f32], device: &Device) -> Result<Self> {
        if indices.is_empty() || indices.len() != baseline_log_probs.len() {
            return Err(SteerError::InvalidInput(format!(
                "{} targets with {} baselines",
                indices.len(),
                baseline_log_probs.len()
            )));
        }
        Ok(Self {
            indices: Tensor::new(indices, device)?,
            baseline_log_probs: Tensor::new(baseline_log_probs, device)?,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.dims().first().copied().unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One batch of prefixes to score.
#[derive(Debug, Clone, Copy)]
pub struct PredictorInputs<'a> {
    /// (batch, seq) `u32`, right-padded
    pub tokens: &'a Tensor,
    /// Valid length of each row
    pub lengths: &'a [usize],
    pub targets: Option<&'a FutureTargets>,
    /// Syllables remaining in the line, (batch,) `u32`
    pub syllables_to_go: Option<&'a Tensor>,
}

impl<'a> PredictorInputs<'a> {
    #[must_use]
    pub fn new(tokens: &'a Tensor, lengths: &'a [usize]) -> Self {
        Self {
            tokens,
            lengths,
            targets: None,
            syllables_to_go: None,
        }
    }

    #[must_use]
    pub fn with_targets(mut self, targets: &'a FutureTargets) -> Self {
        self.targets = Some(targets);
        self
    }

    #[must_use]
    pub fn with_syllables_to_go(mut self, syllables: &'a Tensor) -> Self {
        self.syllables_to_go = Some(syllables);
        self
    }

    /// Tokens cropped to the longest row, after checking the lengths against the batch.
    ///
    /// # Errors
    /// Returns [`SteerError::InvalidInput`] on a batch/length mismatch.
    pub fn cropped_tokens(&self) -> Result<Tensor> {
        let (b, s) = self.tokens.dims2()?;
        if self.lengths.len() != b {
            return Err(SteerError::InvalidInput(format!(
                "{} lengths for a batch of {b}",
                self.lengths.len()
            )));
        }
        let width = self.lengths.iter().copied().max().unwrap_or(0);
        if width == 0 || width > s {
            return Err(SteerError::InvalidInput(format!(
                "lengths must lie in 1..={s}, got max {width}"
            )));
        }
        Ok(self.tokens.narrow(1, 0, width)?)
    }

    pub(crate) fn require_targets(&self, task: Task) -> Result<&'a FutureTargets> {
        self.targets
            .ok_or_else(|| SteerError::InvalidInput(format!("{task} predictor needs targets")))
    }

    pub(crate) fn require_syllables(&self, task: Task) -> Result<&'a Tensor> {
        self.syllables_to_go.ok_or_else(|| {
            SteerError::InvalidInput(format!("{task} predictor needs syllables_to_go"))
        })
    }
}

/// A learned scorer of partial sequences.
///
/// Per-position tasks return (batch, max_len) logits where column `t` scores the prefix of
/// length `t + 1`. Per-target tasks return (batch, N) logits already offset by each target's
/// baseline log-probability.
pub trait AttributePredictor {
    fn task(&self) -> Task;

    /// # Errors
    /// Returns an error on missing side inputs, inconsistent lengths, or tensor failures.
    fn score(&self, inputs: &PredictorInputs<'_>) -> Result<Tensor>;
}

/// Read each row's logit at its last valid position from a (batch, max_len) score tensor.
///
/// # Errors
/// Returns an error if a length is out of range.
pub fn last_position_scores(scores: &Tensor, lengths: &[usize]) -> Result<Vec<f32>> {
    let rows: Vec<Vec<f32>> = scores.to_vec2()?;
    rows.iter()
        .zip(lengths)
        .map(|(row, &len)| {
            len.checked_sub(1)
                .and_then(|i| row.get(i).copied())
                .ok_or_else(|| {
                    SteerError::InvalidInput(format!("length {len} outside scores of {}", row.len()))
                })
        })
        .collect()
}
