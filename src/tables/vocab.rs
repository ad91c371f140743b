//! Word vocabulary used to index future-word conditioning targets.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SteerError};

/// Reserved entry at index 0.
pub const PAD_TOKEN: &str = "[PAD]";

/// Default cap on kept words when building from a corpus.
pub const DEFAULT_MAX_VOCAB: usize = 50_000;

/// Bidirectional word ↔ index table with corpus frequencies.
///
/// Index 0 is always [`PAD_TOKEN`]; the remaining words are sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VocabFile", into = "VocabFile")]
pub struct WordVocab {
    index2word: Vec<String>,
    word2index: HashMap<String, usize>,
    counts: HashMap<String, u64>,
    total_words: u64,
}

#[derive(Serialize, Deserialize)]
struct VocabFile {
    index2word: Vec<String>,
    counts: HashMap<String, u64>,
    total_words: u64,
}

impl WordVocab {
    /// Count space-separated words across corpus lines.
    pub fn count_words<'a, I>(lines: I) -> HashMap<String, u64>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut counts = HashMap::new();
        for line in lines {
            for word in line.trim().split(' ') {
                *counts.entry(word.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Keep the `max_size` most frequent words (ties broken alphabetically).
    #[must_use]
    pub fn from_counts(counts: HashMap<String, u64>, max_size: usize) -> Self {
        let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(max_size);

        let counts: HashMap<String, u64> = ranked.into_iter().collect();
        let total_words = counts.values().sum();
        let mut words: Vec<String> = counts.keys().cloned().collect();
        words.sort();

        let mut index2word = Vec::with_capacity(words.len() + 1);
        index2word.push(PAD_TOKEN.to_string());
        index2word.extend(words);
        let word2index = index2word
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i))
            .collect();

        Self {
            index2word,
            word2index,
            counts,
            total_words,
        }
    }

    /// Number of entries, pad included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index2word.len()
    }

    /// True when only the pad entry exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index2word.len() <= 1
    }

    #[must_use]
    pub fn index(&self, word: &str) -> Option<usize> {
        self.word2index.get(word).copied()
    }

    #[must_use]
    pub fn word(&self, index: usize) -> Option<&str> {
        self.index2word.get(index).map(String::as_str)
    }

    /// Entries in index order.
    #[must_use]
    pub fn words(&self) -> &[String] {
        &self.index2word
    }

    #[must_use]
    pub fn count(&self, word: &str) -> Option<u64> {
        self.counts.get(word).copied()
    }

    #[must_use]
    pub fn total_words(&self) -> u64 {
        self.total_words
    }

    /// Unigram log-probability of `word`, or `None` if it was not counted.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn baseline_log_prob(&self, word: &str) -> Option<f64> {
        let count = self.count(word)?;
        if count == 0 || self.total_words == 0 {
            return None;
        }
        Some((count as f64 / self.total_words as f64).ln())
    }

    /// Write the table as JSON.
    ///
    /// # Errors
    /// Returns an error if serialisation or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Read a table written by [`WordVocab::save`].
    ///
    /// # Errors
    /// Returns an error if the file is unreadable or inconsistent.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl TryFrom<VocabFile> for WordVocab {
    type Error = SteerError;

    fn try_from(file: VocabFile) -> Result<Self> {
        if file.index2word.first().map(String::as_str) != Some(PAD_TOKEN) {
            return Err(SteerError::Config(format!(
                "vocabulary must start with {PAD_TOKEN}"
            )));
        }
        let mut word2index = HashMap::with_capacity(file.index2word.len());
        for (i, w) in file.index2word.iter().enumerate() {
            if word2index.insert(w.clone(), i).is_some() {
                return Err(SteerError::Config(format!("duplicate vocabulary entry {w:?}")));
            }
        }
        Ok(Self {
            index2word: file.index2word,
            word2index,
            counts: file.counts,
            total_words: file.total_words,
        })
    }
}

impl From<WordVocab> for VocabFile {
    fn from(v: WordVocab) -> Self {
        Self {
            index2word: v.index2word,
            counts: v.counts,
            total_words: v.total_words,
        }
    }
}
