//! Free continuation steered toward a bag of topic words.

use log::debug;
use rand::Rng;

use super::candidates::{CandidateBatch, Shortlist};
use super::fusion::{FusionWeight, mean_log_sigmoid};
use super::sampling::{Selection, select};
use super::{Generation, base_logits, check_shortlist_size};
use crate::error::{Result, SteerError};
use crate::lm::{LanguageModel, TextTokenizer};
use crate::model::{AttributePredictor, FutureTargets, PredictorInputs, Task};
use crate::tables::WordVocab;

/// Topic decoding settings.
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Base-model candidates scored per step
    pub precondition_topk: usize,
    pub selection: Selection,
    pub condition_lambda: FusionWeight,
    /// Stop once a sequence holds this many tokens, prompt included
    pub length_cutoff: usize,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            precondition_topk: 200,
            selection: Selection::Sample {
                postcondition_topk: 10,
            },
            condition_lambda: FusionWeight(1.0),
            length_cutoff: 80,
        }
    }
}

/// Resolve condition words into predictor targets.
///
/// # Errors
/// Returns [`SteerError::InvalidInput`] for words missing from the vocabulary or its counts.
#[allow(clippy::cast_possible_truncation)]
pub fn topic_targets(
    vocab: &WordVocab,
    condition_words: &[&str],
    device: &candle_core::Device,
) -> Result<FutureTargets> {
    let mut indices = Vec::with_capacity(condition_words.len());
    let mut baselines = Vec::with_capacity(condition_words.len());
    for &word in condition_words {
        let index = vocab
            .index(word)
            .ok_or_else(|| SteerError::InvalidInput(format!("condition word {word:?} not in vocabulary")))?;
        let log_prob = vocab
            .baseline_log_prob(word)
            .ok_or_else(|| SteerError::InvalidInput(format!("condition word {word:?} has no count")))?;
        indices.push(index as u32);
        baselines.push(log_prob as f32);
    }
    FutureTargets::new(&indices, &baselines, device)
}

/// Continue every prompt until it holds `length_cutoff` tokens.
///
/// Prompts must encode to the same number of tokens. Each emitted token is drawn from the base
/// model's top `precondition_topk` at its step.
///
/// # Errors
/// Returns an error for a zero `precondition_topk`, unknown condition words, ragged prompts, a predictor of the wrong task,
/// or a failed forward pass.
#[allow(clippy::too_many_arguments)]
pub fn generate_topic(
    model: &dyn LanguageModel,
    tokenizer: &dyn TextTokenizer,
    predictor: &dyn AttributePredictor,
    vocab: &WordVocab,
    prompts: &[&str],
    condition_words: &[&str],
    cfg: &TopicConfig,
    rng: &mut impl Rng,
) -> Result<Vec<Generation>> {
    check_shortlist_size(cfg.precondition_topk)?;
    if predictor.task() != Task::Topic {
        return Err(SteerError::TaskMismatch {
            expected: Task::Topic,
            found: predictor.task(),
        });
    }
    let targets = topic_targets(vocab, condition_words, model.device())?;

    let mut sequences = prompts
        .iter()
        .map(|p| tokenizer.encode(p))
        .collect::<Result<Vec<_>>>()?;
    let prompt_len = sequences.first().map_or(0, Vec::len);
    if prompt_len == 0 || sequences.iter().any(|s| s.len() != prompt_len) {
        return Err(SteerError::InvalidInput(
            "prompts must be non-empty and encode to the same length".to_string(),
        ));
    }

    let mut len = prompt_len;
    while len < cfg.length_cutoff {
        let logits = base_logits(model, &sequences, None)?;
        let shortlists: Vec<Shortlist> = logits
            .iter()
            .map(|row| Shortlist::from_logits(row, cfg.precondition_topk))
            .collect();

        let attribute = if cfg.condition_lambda.is_disabled() {
            shortlists.iter().map(|s| vec![0.0; s.len()]).collect()
        } else {
            let prefixes: Vec<&[u32]> = sequences.iter().map(Vec::as_slice).collect();
            let batch = CandidateBatch::expand(&prefixes, shortlists.clone(), 0, model.device())?;
            let inputs = PredictorInputs::new(&batch.tokens, &batch.lengths).with_targets(&targets);
            let scores: Vec<Vec<f32>> = predictor.score(&inputs)?.to_vec2()?;
            let per_candidate: Vec<f32> = scores.iter().map(|r| mean_log_sigmoid(r)).collect();
            batch.per_row(&per_candidate)
        };

        for ((seq, shortlist), attr) in sequences.iter_mut().zip(&shortlists).zip(&attribute) {
            let fused: Vec<f32> = shortlist
                .base_scores
                .iter()
                .zip(attr)
                .map(|(base, a)| base + cfg.condition_lambda.value() * a)
                .collect();
            let pick = select(&fused, cfg.selection, rng)
                .ok_or_else(|| SteerError::InvalidInput("empty shortlist".to_string()))?;
            seq.push(shortlist.token_ids[pick]);
        }
        len += 1;
        debug!("topic step {len}/{}", cfg.length_cutoff);
    }

    sequences
        .into_iter()
        .map(|tokens| {
            let text = tokenizer.decode(&tokens)?;
            Ok(Generation { tokens, text })
        })
        .collect()
}
