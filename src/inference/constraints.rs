//! Hard constraints applied during decoding.
//!
//! Banned-token masking on the base logits and the line-completion rules of verse decoding.

use crate::oracle::LinguisticOracle;

/// Logit assigned to banned tokens.
pub const BANNED_LOGIT: f32 = -1e8;

/// Characters that may close a line of verse.
pub const PHRASE_ENDS: &str = ".;?!";

/// Replace the logits of `banned` ids with [`BANNED_LOGIT`]. Out-of-range ids are ignored.
pub fn ban_tokens(logits: &mut [f32], banned: &[u32]) {
    for &id in banned {
        if let Some(v) = logits.get_mut(id as usize) {
            *v = BANNED_LOGIT;
        }
    }
}

/// Where a line stands after a token was appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    Continue,
    /// Target syllables reached and the text ends a phrase.
    Complete,
    /// More syllables than the target without a phrase end.
    Overshoot,
}

impl LineStatus {
    /// Classify a line with `syllables` counted against `target`; `text` is the full decoded text.
    #[must_use]
    pub fn evaluate(syllables: usize, target: usize, text: &str) -> Self {
        let ends_phrase = text.chars().last().is_some_and(|c| PHRASE_ENDS.contains(c));
        if syllables >= target && ends_phrase {
            Self::Complete
        } else if syllables > target {
            Self::Overshoot
        } else {
            Self::Continue
        }
    }

    #[must_use]
    pub fn is_done(self) -> bool {
        self != Self::Continue
    }
}

/// Syllables left in a line of `target`, ignoring the last (possibly partial) word of `line`.
///
/// Never negative; the caller clamps the upper end to the predictor's embedding range.
#[must_use]
pub fn syllables_to_go(oracle: &dyn LinguisticOracle, line: &str, target: usize) -> usize {
    let words: Vec<&str> = line.split_whitespace().collect();
    let complete = words[..words.len().saturating_sub(1)].join(" ");
    target.saturating_sub(oracle.count_syllables(&complete))
}
