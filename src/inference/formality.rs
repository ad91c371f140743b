//! Bounded continuation steered toward a register (formal rewriting).
//!
//! Greedy only. Rows finish independently on the end token and are padded afterwards; decoding
//! ends when every row has finished or `max_length` decoder positions are used.

use candle_core::{DType, Tensor};
use log::debug;

use super::candidates::{CandidateBatch, Shortlist};
use super::constraints::ban_tokens;
use super::fusion::{FusionWeight, fuse};
use super::sampling::{Selection, argmax};
use super::{base_logits, batch_tensor, check_shortlist_size};
use crate::error::{Result, SteerError};
use crate::lm::LanguageModel;
use crate::model::{AttributePredictor, PredictorInputs, Task, last_position_scores};

/// Bounded decoding settings. Defaults match a Marian translation model.
#[derive(Debug, Clone)]
pub struct BoundedConfig {
    pub precondition_topk: usize,
    pub selection: Selection,
    pub condition_lambda: FusionWeight,
    /// Decoder positions including the start token
    pub max_length: usize,
    pub decoder_start_token_id: u32,
    pub end_token_id: u32,
    pub pad_token_id: u32,
    /// Never emitted; holds the decoder start token by default
    pub banned_tokens: Vec<u32>,
}

impl Default for BoundedConfig {
    fn default() -> Self {
        Self {
            precondition_topk: 200,
            selection: Selection::Greedy,
            condition_lambda: FusionWeight(1.0),
            max_length: 512,
            decoder_start_token_id: 65_000,
            end_token_id: 0,
            pad_token_id: 65_000,
            banned_tokens: vec![65_000],
        }
    }
}

/// Decode a continuation (decoder-only) or a target sequence (encoder–decoder) for each source.
///
/// Sources must share one length. Returned tokens stop before the end token; the start token and
/// padding are never included.
///
/// # Errors
/// Returns [`SteerError::InvalidInput`] for a zero `precondition_topk`,
/// [`SteerError::Unsupported`] for a sampling selection, [`SteerError::TaskMismatch`]
/// for a non-formality predictor, or any forward-pass error.
pub fn generate_bounded(
    model: &dyn LanguageModel,
    predictor: &dyn AttributePredictor,
    sources: &[Vec<u32>],
    cfg: &BoundedConfig,
) -> Result<Vec<Vec<u32>>> {
    check_shortlist_size(cfg.precondition_topk)?;
    if cfg.selection != Selection::Greedy {
        return Err(SteerError::Unsupported(
            "bounded decoding supports greedy selection only",
        ));
    }
    if predictor.task() != Task::Formality {
        return Err(SteerError::TaskMismatch {
            expected: Task::Formality,
            found: predictor.task(),
        });
    }

    let device = model.device();
    let encoder_ids = batch_tensor(sources, device)?;
    let rows = sources.len();
    let encoder_mask = Tensor::ones(encoder_ids.dims2()?, DType::U32, device)?;
    let encoder_decoder = model.is_encoder_decoder();

    let mut generated: Vec<Vec<u32>> = vec![Vec::new(); rows];
    let mut finished = vec![false; rows];
    let mut cur_len = 1;

    while cur_len < cfg.max_length && finished.iter().any(|f| !f) {
        let mut logits = if encoder_decoder {
            let decoder_rows: Vec<Vec<u32>> = generated
                .iter()
                .map(|g| std::iter::once(cfg.decoder_start_token_id).chain(g.iter().copied()).collect())
                .collect();
            let decoder_ids = batch_tensor(&decoder_rows, device)?;
            model
                .next_decoder_logits(&encoder_ids, Some(&encoder_mask), &decoder_ids)?
                .to_vec2()?
        } else {
            let rows_so_far: Vec<Vec<u32>> = sources
                .iter()
                .zip(&generated)
                .map(|(s, g)| s.iter().chain(g).copied().collect())
                .collect();
            let n = rows_so_far[0].len();
            let mask = Tensor::ones((rows, n), DType::U32, device)?;
            base_logits(model, &rows_so_far, Some(&mask))?
        };
        for row in &mut logits {
            ban_tokens(row, &cfg.banned_tokens);
        }

        let shortlists: Vec<Shortlist> = logits
            .iter()
            .map(|row| Shortlist::from_logits(row, cfg.precondition_topk))
            .collect();

        let attribute: Vec<Vec<f32>> = if cfg.condition_lambda.is_disabled() {
            shortlists.iter().map(|s| vec![0.0; s.len()]).collect()
        } else {
            let prefixes: Vec<&[u32]> = generated.iter().map(Vec::as_slice).collect();
            let batch =
                CandidateBatch::expand(&prefixes, shortlists.clone(), cfg.pad_token_id, device)?;
            let scores = predictor.score(&PredictorInputs::new(&batch.tokens, &batch.lengths))?;
            let last = last_position_scores(&scores, &batch.lengths)?;
            batch.per_row(&last)
        };

        for (i, (shortlist, attr)) in shortlists.iter().zip(&attribute).enumerate() {
            let next = if finished[i] {
                cfg.pad_token_id
            } else {
                let fused: Vec<f32> = shortlist
                    .base_scores
                    .iter()
                    .zip(attr)
                    .map(|(&base, &logit)| fuse(base, logit, 0.0, cfg.condition_lambda))
                    .collect();
                shortlist.token_ids[argmax(&fused)]
            };
            if next == cfg.end_token_id {
                finished[i] = true;
            }
            generated[i].push(next);
        }
        cur_len += 1;
        debug!(
            "bounded step {cur_len}: {} of {rows} rows finished",
            finished.iter().filter(|f| **f).count()
        );
    }

    Ok(generated
        .into_iter()
        .map(|g| {
            g.into_iter()
                .take_while(|&t| t != cfg.end_token_id)
                .collect()
        })
        .collect())
}
