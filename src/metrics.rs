//! Offline evaluation of generated text.

use std::collections::HashSet;

use candle_core::{D, Tensor};
use serde::Serialize;

use crate::error::{Result, SteerError};
use crate::inference::PHRASE_ENDS;
use crate::lm::{LanguageModel, TextTokenizer};
use crate::oracle::{LinguisticOracle, last_word};

/// Fractions of couplets meeting each verse constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PoetryReport {
    pub total: usize,
    pub iambic: f64,
    pub rhymes: f64,
    /// Rhymes whose last word differs from the prefix's
    pub rhymes_different_word: f64,
    pub ends_phrase: f64,
    pub ten_syllables: f64,
    /// Iambic, rhyming, ten syllables and phrase-ending at once
    pub all_success: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Distinctness {
    pub dist1: f64,
    pub dist2: f64,
    pub dist3: f64,
}

#[allow(clippy::cast_precision_loss)]
fn frac(n: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { n as f64 / total as f64 }
}

fn ends_phrase(text: &str) -> bool {
    text.trim().chars().last().is_some_and(|c| PHRASE_ENDS.contains(c))
}

/// Score generated lines against the prefix lines they continue.
///
/// Pairs beyond the shorter slice are ignored.
#[must_use]
pub fn poetry_report(
    oracle: &dyn LinguisticOracle,
    prefixes: &[&str],
    predictions: &[&str],
) -> PoetryReport {
    let mut counts = [0usize; 6];
    let mut total = 0;
    for (&prefix, &pred) in prefixes.iter().zip(predictions) {
        total += 1;
        let iambic = oracle.is_iambic(pred);
        let rhymes = oracle.perfect_rhyme_end(prefix, pred);
        let ten = oracle.count_syllables(pred) == 10;
        let end = ends_phrase(pred);
        let different = rhymes && last_word(prefix) != last_word(pred);
        for (slot, hit) in [iambic, rhymes, different, end, ten, iambic && rhymes && ten && end]
            .into_iter()
            .enumerate()
        {
            counts[slot] += usize::from(hit);
        }
    }
    PoetryReport {
        total,
        iambic: frac(counts[0], total),
        rhymes: frac(counts[1], total),
        rhymes_different_word: frac(counts[2], total),
        ends_phrase: frac(counts[3], total),
        ten_syllables: frac(counts[4], total),
        all_success: frac(counts[5], total),
    }
}

/// Distinct uni-, bi- and tri-grams over the total word count, words split on single spaces.
#[must_use]
pub fn distinctness<S: AsRef<str>>(sentences: &[S]) -> Distinctness {
    let mut d1 = HashSet::new();
    let mut d2 = HashSet::new();
    let mut d3 = HashSet::new();
    let mut total = 0;
    for sentence in sentences {
        let words: Vec<&str> = sentence.as_ref().split(' ').collect();
        total += words.len();
        d1.extend(words.iter().copied());
        d2.extend(words.windows(2).map(|w| (w[0], w[1])));
        d3.extend(words.windows(3).map(|w| (w[0], w[1], w[2])));
    }
    Distinctness {
        dist1: frac(d1.len(), total),
        dist2: frac(d2.len(), total),
        dist3: frac(d3.len(), total),
    }
}

/// Total wordlist hits across `sentences`, each sentence contributing at most `cap` when given.
///
/// A wordlist entry counts once per sentence however often it occurs. Matching is
/// case-insensitive on punctuation-stripped tokens.
#[must_use]
pub fn topic_matches<S: AsRef<str>>(sentences: &[S], wordlist: &[&str], cap: Option<usize>) -> usize {
    let wordlist: Vec<String> = wordlist.iter().map(|w| w.trim().to_lowercase()).collect();
    sentences
        .iter()
        .map(|sentence| {
            let lowered = sentence.as_ref().to_lowercase();
            let tokens: HashSet<&str> = lowered
                .split_whitespace()
                .map(crate::oracle::strip_punctuation)
                .collect();
            let hits = wordlist.iter().filter(|w| tokens.contains(w.as_str())).count();
            cap.map_or(hits, |c| hits.min(c))
        })
        .sum()
}

/// Mean and spread of per-line perplexities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerplexitySummary {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
}

impl PerplexitySummary {
    /// Population mean and standard deviation.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            count: values.len(),
            mean,
            std: var.sqrt(),
        }
    }
}

/// Perplexity of the tokens `pred` adds after `prefix`.
///
/// Encodes `prefix` and `prefix + pred`, sums the negative log-softmax of every token past the
/// prefix given everything before it, averages over those tokens and exponentiates.
///
/// # Errors
/// Returns [`SteerError::InvalidInput`] if `prefix` encodes to nothing or `pred` adds no tokens,
/// or any tokenizer/forward-pass error.
pub fn conditional_perplexity(
    model: &dyn LanguageModel,
    tokenizer: &dyn TextTokenizer,
    prefix: &str,
    pred: &str,
) -> Result<f64> {
    let prefix_len = tokenizer.encode(prefix)?.len();
    let full = tokenizer.encode(&format!("{prefix}{pred}"))?;
    if prefix_len == 0 || full.len() <= prefix_len {
        return Err(SteerError::InvalidInput(
            "perplexity needs a non-empty prefix and prediction".to_string(),
        ));
    }

    let mut nll = 0.0f64;
    for end in prefix_len..full.len() {
        let input = Tensor::new(&full[..end], model.device())?.unsqueeze(0)?;
        let logits = model.next_token_logits(&input, None)?;
        let log_probs: Vec<f32> = candle_nn::ops::log_softmax(&logits, D::Minus1)?
            .squeeze(0)?
            .to_vec1()?;
        let target = full[end];
        let lp = log_probs.get(target as usize).ok_or_else(|| {
            SteerError::InvalidInput(format!("token {target} outside the model vocabulary"))
        })?;
        nll -= f64::from(*lp);
    }
    #[allow(clippy::cast_precision_loss)]
    let count = (full.len() - prefix_len) as f64;
    Ok((nll / count).exp())
}
