//! Line-by-line verse continuation: iambic meter, a rhyme with the previous line, and a line
//! break near the syllable target.

use candle_core::Tensor;
use log::debug;
use rand::Rng;

use super::candidates::{CandidateBatch, Shortlist};
use super::constraints::{LineStatus, ban_tokens, syllables_to_go};
use super::fusion::{FusionWeight, fuse_terms, log_sigmoid};
use super::sampling::{Selection, select};
use super::{base_logits, check_shortlist_size};
use crate::error::{Result, SteerError};
use crate::lm::{LanguageModel, TextTokenizer};
use crate::model::{AttributePredictor, FutureTargets, PredictorInputs, Task, last_position_scores};
use crate::oracle::{LinguisticOracle, last_word};
use crate::tables::{RhymeTable, RhymeTarget};

/// GPT-2 ids of `\n`, `<|endoftext|>`, `\n\n` and a quote-like token.
pub const DEFAULT_BANNED_TOKENS: [u32; 4] = [198, 50_256, 628, 221];

/// Verse decoding settings.
#[derive(Debug, Clone)]
pub struct LineConfig {
    pub precondition_topk: usize,
    pub selection: Selection,
    pub condition_lambda: FusionWeight,
    /// Hard ceiling on tokens generated for one line
    pub length_cutoff: usize,
    pub line_syllables: usize,
    pub banned_tokens: Vec<u32>,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            precondition_topk: 200,
            selection: Selection::Sample {
                postcondition_topk: 10,
            },
            condition_lambda: FusionWeight(1.0),
            length_cutoff: 30,
            line_syllables: 10,
            banned_tokens: DEFAULT_BANNED_TOKENS.to_vec(),
        }
    }
}

/// The three predictors verse decoding consults.
#[derive(Clone, Copy)]
pub struct PoetryPredictors<'a> {
    pub iambic: &'a dyn AttributePredictor,
    pub rhyme: &'a dyn AttributePredictor,
    pub newline: &'a dyn AttributePredictor,
}

impl PoetryPredictors<'_> {
    fn check(&self) -> Result<()> {
        for (p, expected) in [
            (self.iambic, Task::Iambic),
            (self.rhyme, Task::Rhyme),
            (self.newline, Task::Newline),
        ] {
            if p.task() != expected {
                return Err(SteerError::TaskMismatch {
                    expected,
                    found: p.task(),
                });
            }
        }
        Ok(())
    }
}

/// Shared, read-only inputs of one verse decoding call.
#[derive(Clone, Copy)]
pub struct VerseContext<'a> {
    pub model: &'a dyn LanguageModel,
    pub tokenizer: &'a dyn TextTokenizer,
    pub predictors: PoetryPredictors<'a>,
    pub oracle: &'a dyn LinguisticOracle,
    pub rhymes: &'a RhymeTable,
}

/// Generate one line after `context`, starting from the partial line `line_prefix`.
///
/// Returns the generated text following `context` (the prefix included).
///
/// # Errors
/// Returns [`SteerError::InvalidInput`] for a zero `precondition_topk` or if `line_prefix` already
/// has the target syllable count, or any predictor/forward-pass error.
pub fn generate_line(
    ctx: &VerseContext<'_>,
    context: &str,
    line_prefix: &str,
    target: RhymeTarget,
    cfg: &LineConfig,
    rng: &mut impl Rng,
) -> Result<String> {
    check_shortlist_size(cfg.precondition_topk)?;
    ctx.predictors.check()?;
    let start_syllables = ctx.oracle.count_syllables(line_prefix);
    if start_syllables >= cfg.line_syllables {
        return Err(SteerError::InvalidInput(format!(
            "line prefix already has {start_syllables} of {} syllables",
            cfg.line_syllables
        )));
    }

    let device = ctx.model.device();
    #[allow(clippy::cast_possible_truncation)]
    let targets = FutureTargets::new(&[target.index as u32], &[target.log_prob as f32], device)?;

    let context_len = ctx.tokenizer.encode(context)?.len();
    let mut tokens = ctx.tokenizer.encode(&format!("{context}{line_prefix}"))?;
    if tokens.is_empty() || tokens.len() < context_len {
        return Err(SteerError::InvalidInput(
            "context must encode to at least one token".to_string(),
        ));
    }

    for step in 0..cfg.length_cutoff {
        let mut row = base_logits(ctx.model, std::slice::from_ref(&tokens), None)?
            .pop()
            .ok_or_else(|| SteerError::InvalidInput("empty logits".to_string()))?;
        ban_tokens(&mut row, &cfg.banned_tokens);
        let shortlist = Shortlist::from_logits(&row, cfg.precondition_topk);

        let fused: Vec<f32> = if cfg.condition_lambda.is_disabled() {
            shortlist.base_scores.clone()
        } else {
            let terms = attribute_terms(ctx, &tokens, context_len, &shortlist, &targets, cfg)?;
            shortlist
                .base_scores
                .iter()
                .zip(&terms)
                .map(|(&base, t)| fuse_terms(base, t, cfg.condition_lambda))
                .collect()
        };

        let pick = select(&fused, cfg.selection, rng)
            .ok_or_else(|| SteerError::InvalidInput("empty shortlist".to_string()))?;
        let next = shortlist.token_ids[pick];
        tokens.push(next);

        let line = ctx.tokenizer.decode(&tokens[context_len..])?;
        let full = ctx.tokenizer.decode(&tokens)?;
        let count = ctx.oracle.count_syllables(&line);
        let status = LineStatus::evaluate(count, cfg.line_syllables, &full);
        debug!("verse step {step}: {count} syllables, {status:?}");
        if status.is_done() {
            break;
        }
    }

    let full = ctx.tokenizer.decode(&tokens)?;
    match full.strip_prefix(context) {
        Some(rest) => Ok(rest.to_string()),
        None => ctx.tokenizer.decode(&tokens[context_len..]),
    }
}

/// Per-candidate `[iambic, rhyme, newline]` log-probabilities.
fn attribute_terms(
    ctx: &VerseContext<'_>,
    tokens: &[u32],
    context_len: usize,
    shortlist: &Shortlist,
    targets: &FutureTargets,
    cfg: &LineConfig,
) -> Result<Vec<[f32; 3]>> {
    let device = ctx.model.device();
    let line_tokens = &tokens[context_len..];

    let mut to_go = Vec::with_capacity(shortlist.len());
    let mut candidate_line = line_tokens.to_vec();
    for &id in &shortlist.token_ids {
        candidate_line.push(id);
        let text = ctx.tokenizer.decode(&candidate_line)?;
        candidate_line.pop();
        let remaining = syllables_to_go(ctx.oracle, &text, cfg.line_syllables);
        to_go.push(u32::try_from(remaining).unwrap_or(u32::MAX));
    }
    let to_go = Tensor::from_vec(to_go, shortlist.len(), device)?;

    // The meter predictor was trained on single lines, so it only sees the line itself.
    let line_batch = CandidateBatch::expand(&[line_tokens], vec![shortlist.clone()], 0, device)?;
    let iambic = ctx
        .predictors
        .iambic
        .score(&PredictorInputs::new(&line_batch.tokens, &line_batch.lengths))?;
    let iambic = last_position_scores(&iambic, &line_batch.lengths)?;

    let full_batch = CandidateBatch::expand(&[tokens], vec![shortlist.clone()], 0, device)?;
    let rhyme: Vec<Vec<f32>> = ctx
        .predictors
        .rhyme
        .score(
            &PredictorInputs::new(&full_batch.tokens, &full_batch.lengths)
                .with_targets(targets)
                .with_syllables_to_go(&to_go),
        )?
        .to_vec2()?;
    let newline = ctx.predictors.newline.score(
        &PredictorInputs::new(&full_batch.tokens, &full_batch.lengths).with_syllables_to_go(&to_go),
    )?;
    let newline = last_position_scores(&newline, &full_batch.lengths)?;

    Ok((0..shortlist.len())
        .map(|j| {
            let r = rhyme[j].first().copied().unwrap_or(0.0);
            [log_sigmoid(iambic[j]), log_sigmoid(r), log_sigmoid(newline[j])]
        })
        .collect())
}

/// Write a second line rhyming with `first_line`.
///
/// Returns `[first_line, generated_line]`.
///
/// # Errors
/// Returns an error if line generation fails.
pub fn complete_couplet(
    ctx: &VerseContext<'_>,
    first_line: &str,
    cfg: &LineConfig,
    rng: &mut impl Rng,
) -> Result<[String; 2]> {
    let ending = last_word(first_line).unwrap_or_default();
    let target = ctx.rhymes.target(ending)?;
    debug!(
        "rhyming with {ending:?} in group {:?}",
        ctx.rhymes.group(target.index)
    );
    let line = generate_line(ctx, first_line, "", target, cfg, rng)?;
    Ok([first_line.to_string(), line])
}
