//! CMU pronouncing dictionary backend for [`LinguisticOracle`].
//!
//! Accepts both the classic `cmudict-0.7b` layout (`WORD  W ER1 D`, `;;;` comments, `WORD(1)`
//! alternates) and the lowercase `cmudict.dict` layout (`word(2) w er1 d # comment`).

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use log::debug;

use super::{LinguisticOracle, MAX_SYLLABLES_PER_WORD, UnknownWord, strip_punctuation};
use crate::error::Result;

/// Pronunciations keyed by lowercase word, with a reverse index from rhyming part to words.
#[derive(Debug, Clone, Default)]
pub struct PronouncingDict {
    phones: HashMap<String, Vec<Vec<String>>>,
    rhymes: HashMap<String, BTreeSet<String>>,
}

impl PronouncingDict {
    /// Parse dictionary text.
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let mut dict = Self::default();
        for line in source.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() || line.starts_with(";;;") {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(key) = parts.next() else {
                continue;
            };
            let word = key.split('(').next().unwrap_or(key).to_lowercase();
            let phones: Vec<String> = parts.map(str::to_uppercase).collect();
            if phones.is_empty() {
                continue;
            }
            dict.rhymes
                .entry(rhyming_part(&phones))
                .or_default()
                .insert(word.clone());
            dict.phones.entry(word).or_default().push(phones);
        }
        debug!("parsed pronouncing dictionary with {} words", dict.phones.len());
        dict
    }

    /// Load a dictionary file from disk.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::parse(&raw))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.phones.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phones.is_empty()
    }

    /// All listed pronunciations of `word` (case-insensitive), in file order.
    #[must_use]
    pub fn phones_for_word(&self, word: &str) -> Option<&[Vec<String>]> {
        self.phones.get(&word.to_lowercase()).map(Vec::as_slice)
    }

    fn first_stresses(&self, word: &str) -> Option<String> {
        self.phones_for_word(word)
            .and_then(|prons| prons.first())
            .map(|phones| stresses(phones))
    }

    /// Sorted perfect rhymes of `word`, the word itself included.
    ///
    /// # Errors
    /// Returns [`UnknownWord`] if the word is not in the dictionary.
    pub fn rhymes(&self, word: &str) -> std::result::Result<Vec<String>, UnknownWord> {
        let prons = self
            .phones_for_word(word)
            .ok_or_else(|| UnknownWord(word.to_string()))?;
        let mut out = BTreeSet::new();
        for phones in prons {
            if let Some(words) = self.rhymes.get(&rhyming_part(phones)) {
                out.extend(words.iter().cloned());
            }
        }
        Ok(out.into_iter().collect())
    }
}

impl LinguisticOracle for PronouncingDict {
    fn count_syllables(&self, text: &str) -> usize {
        text.split_whitespace()
            .map(|word| {
                let word = strip_punctuation(word);
                let n = self.first_stresses(word).map_or_else(
                    || approximate_syllables(word),
                    |s| s.len(),
                );
                n.min(MAX_SYLLABLES_PER_WORD)
            })
            .sum()
    }

    fn is_iambic(&self, text: &str) -> bool {
        let mut meter = String::new();
        for word in text.split_whitespace() {
            let word = strip_punctuation(word).to_lowercase();
            let Some(mut stress) = self.first_stresses(&word) else {
                return false;
            };
            // Monosyllables with primary stress may sit in either position.
            if stress == "1" {
                stress = "2".to_string();
            }
            meter.push_str(&stress);
        }
        for (i, c) in meter.chars().enumerate() {
            let bad = if i % 2 == 0 { '1' } else { '0' };
            if c == bad {
                return false;
            }
        }
        true
    }

    fn rhyme_group(&self, word: &str) -> std::result::Result<String, UnknownWord> {
        Ok(self.rhymes(word)?.join(" "))
    }
}

/// Stress digits of a pronunciation (`"K AE1 T"` → `"1"`).
fn stresses(phones: &[String]) -> String {
    phones
        .iter()
        .flat_map(|p| p.chars())
        .filter(|c| matches!(c, '0' | '1' | '2'))
        .collect()
}

/// Last stressed vowel (primary or secondary) and everything after it.
///
/// The leading phone is never chosen as the split point; when no later phone carries stress the
/// whole pronunciation is the rhyming part.
fn rhyming_part(phones: &[String]) -> String {
    for i in (1..phones.len()).rev() {
        if phones[i].ends_with('1') || phones[i].ends_with('2') {
            return phones[i..].join(" ");
        }
    }
    phones.join(" ")
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn approximate_syllables(word: &str) -> usize {
    (word.chars().count() as f64 / 3.0).round() as usize
}
