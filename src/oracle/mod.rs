//! Linguistic oracle: syllables, meter and rhyme groups.
//!
//! Decoding and table construction only see the [`LinguisticOracle`] trait; the bundled
//! implementation is backed by a CMU-format pronouncing dictionary.

pub mod pronouncing;

use thiserror::Error;

pub use pronouncing::PronouncingDict;

/// Upper bound on syllables credited to a single word.
pub const MAX_SYLLABLES_PER_WORD: usize = 10;

/// The oracle has no pronunciation (and therefore no rhyme data) for a word.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no pronunciation for {0:?}")]
pub struct UnknownWord(pub String);

/// Pure string functions over English pronunciation.
pub trait LinguisticOracle {
    /// Syllables in whitespace-separated `text`. Never fails; unknown words are approximated.
    fn count_syllables(&self, text: &str) -> usize;

    /// Whether `text` scans as iambic. Any unknown word makes this `false`.
    fn is_iambic(&self, text: &str) -> bool;

    /// Canonical rhyme group of `word`: its sorted perfect rhymes joined by single spaces.
    ///
    /// # Errors
    /// Returns [`UnknownWord`] when the word has no rhyme data.
    fn rhyme_group(&self, word: &str) -> Result<String, UnknownWord>;

    /// Whether the last words of `a` and `b` fall in the same rhyme group.
    fn perfect_rhyme_end(&self, a: &str, b: &str) -> bool {
        let (Some(x), Some(y)) = (last_word(a), last_word(b)) else {
            return false;
        };
        match (self.rhyme_group(x), self.rhyme_group(y)) {
            (Ok(gx), Ok(gy)) => gx == gy,
            _ => false,
        }
    }
}

/// Trim leading/trailing ASCII punctuation.
#[must_use]
pub fn strip_punctuation(word: &str) -> &str {
    word.trim_matches(|c: char| c.is_ascii_punctuation())
}

/// Last whitespace-separated word of `text`, punctuation stripped.
#[must_use]
pub fn last_word(text: &str) -> Option<&str> {
    text.split_whitespace().last().map(strip_punctuation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_punctuation() {
        assert_eq!(strip_punctuation("day."), "day");
        assert_eq!(strip_punctuation("\"well,\""), "well");
        assert_eq!(strip_punctuation("..."), "");
        assert_eq!(strip_punctuation("don't"), "don't");
    }

    #[test]
    fn test_last_word() {
        assert_eq!(last_word("Shall I compare thee to a summer's day?"), Some("day"));
        assert_eq!(last_word("   "), None);
    }
}
