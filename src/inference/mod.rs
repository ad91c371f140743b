//! Controlled decoding.
//!
//! Each step asks the base model for next-token logits, keeps a top-K shortlist, scores every
//! shortlisted continuation with attribute predictors, fuses the scores and picks one token.
//! The three drivers differ in batching, stopping and which predictors they consult.

pub mod candidates;
pub mod constraints;
pub mod formality;
pub mod fusion;
pub mod poetry;
pub mod sampling;
pub mod topic;

use candle_core::{Device, Tensor};

use crate::error::{Result, SteerError};
use crate::lm::LanguageModel;

pub use candidates::{CandidateBatch, Shortlist};
pub use constraints::{BANNED_LOGIT, LineStatus, PHRASE_ENDS, ban_tokens};
pub use formality::{BoundedConfig, generate_bounded};
pub use fusion::{FusionWeight, fuse, fuse_terms, log_sigmoid};
pub use poetry::{LineConfig, PoetryPredictors, VerseContext, complete_couplet, generate_line};
pub use sampling::Selection;
pub use topic::{TopicConfig, generate_topic};

/// One decoded sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub tokens: Vec<u32>,
    pub text: String,
}

/// Reject an empty base shortlist before any forward pass.
fn check_shortlist_size(precondition_topk: usize) -> Result<()> {
    if precondition_topk == 0 {
        return Err(SteerError::InvalidInput(
            "precondition_topk must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Stack equal-length rows into a (rows, len) `u32` tensor.
///
/// # Errors
/// Returns [`SteerError::InvalidInput`] if rows are empty or differ in length.
pub fn batch_tensor(rows: &[Vec<u32>], device: &Device) -> Result<Tensor> {
    let len = rows.first().map_or(0, Vec::len);
    if len == 0 || rows.iter().any(|r| r.len() != len) {
        return Err(SteerError::InvalidInput(
            "rows must be non-empty and of equal length".to_string(),
        ));
    }
    let flat: Vec<u32> = rows.iter().flatten().copied().collect();
    Ok(Tensor::from_vec(flat, (rows.len(), len), device)?)
}

/// Next-token logits for each row, on the host.
///
/// # Errors
/// Returns an error if the rows are ragged or the forward pass fails.
pub fn base_logits(
    model: &dyn LanguageModel,
    rows: &[Vec<u32>],
    attention_mask: Option<&Tensor>,
) -> Result<Vec<Vec<f32>>> {
    let input = batch_tensor(rows, model.device())?;
    let logits = model.next_token_logits(&input, attention_mask)?;
    Ok(logits.to_vec2()?)
}
