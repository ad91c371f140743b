//! Rhyme-group table built from the word vocabulary.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::vocab::WordVocab;
use crate::error::{Result, SteerError};
use crate::oracle::LinguisticOracle;

/// Sentinel group for words the oracle cannot resolve. Always index 0.
pub const UNKNOWN_RHYME_GROUP: &str = "UNKNOWN_RHYME_GROUP";

/// A resolved conditioning target for the rhyme predictor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RhymeTarget {
    pub index: usize,
    pub log_prob: f64,
}

/// Word → rhyme group, group frequencies and group ↔ index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RhymeFile", into = "RhymeFile")]
pub struct RhymeTable {
    word2group: HashMap<String, String>,
    group_counts: HashMap<String, u64>,
    index2group: Vec<String>,
    group2index: HashMap<String, usize>,
    total: u64,
}

#[derive(Serialize, Deserialize)]
struct RhymeFile {
    word2group: HashMap<String, String>,
    group_counts: HashMap<String, u64>,
    index2group: Vec<String>,
}

impl RhymeTable {
    /// Resolve every vocabulary entry through `oracle`.
    ///
    /// Entries without a count (the pad token, words added by hand) weigh 1.
    pub fn build(vocab: &WordVocab, oracle: &dyn LinguisticOracle) -> Self {
        let mut word2group = HashMap::new();
        let mut group_counts: HashMap<String, u64> = HashMap::new();
        let mut groups = BTreeSet::new();
        let mut unresolved = 0usize;

        for word in vocab.words() {
            let weight = vocab.count(word).unwrap_or(1);
            match oracle.rhyme_group(word) {
                Ok(group) => {
                    *group_counts.entry(group.clone()).or_insert(0) += weight;
                    groups.insert(group.clone());
                    word2group.insert(word.clone(), group);
                }
                Err(e) => {
                    debug!("{e}; using {UNKNOWN_RHYME_GROUP}");
                    unresolved += 1;
                    *group_counts
                        .entry(UNKNOWN_RHYME_GROUP.to_string())
                        .or_insert(0) += weight;
                }
            }
        }
        info!(
            "built rhyme table: {} groups, {unresolved} unresolved of {} words",
            groups.len(),
            vocab.len()
        );

        let mut index2group = Vec::with_capacity(groups.len() + 1);
        index2group.push(UNKNOWN_RHYME_GROUP.to_string());
        index2group.extend(groups);
        Self::from_parts(word2group, group_counts, index2group)
    }

    fn from_parts(
        word2group: HashMap<String, String>,
        group_counts: HashMap<String, u64>,
        index2group: Vec<String>,
    ) -> Self {
        let group2index = index2group
            .iter()
            .enumerate()
            .map(|(i, g)| (g.clone(), i))
            .collect();
        let total = group_counts.values().sum();
        Self {
            word2group,
            group_counts,
            index2group,
            group2index,
            total,
        }
    }

    /// Group of `word`, or the sentinel when it was not resolved.
    #[must_use]
    pub fn group_of(&self, word: &str) -> &str {
        self.word2group
            .get(word)
            .map_or(UNKNOWN_RHYME_GROUP, String::as_str)
    }

    #[must_use]
    pub fn group_index(&self, group: &str) -> Option<usize> {
        self.group2index.get(group).copied()
    }

    #[must_use]
    pub fn group(&self, index: usize) -> Option<&str> {
        self.index2group.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn group_count(&self, group: &str) -> u64 {
        self.group_counts.get(group).copied().unwrap_or(0)
    }

    /// Number of groups, sentinel included. Sizes the rhyme predictor's target embedding.
    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.index2group.len()
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Group frequency as a log-probability.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn baseline_log_prob(&self, group: &str) -> Option<f64> {
        let count = self.group_count(group);
        if count == 0 || self.total == 0 {
            return None;
        }
        Some((count as f64 / self.total as f64).ln())
    }

    /// Conditioning target for the group `word` belongs to.
    ///
    /// # Errors
    /// Returns a config error if the table has no frequency for the resolved group, which only
    /// happens for a hand-edited table.
    pub fn target(&self, word: &str) -> Result<RhymeTarget> {
        let group = self.group_of(word);
        let index = self
            .group_index(group)
            .ok_or_else(|| SteerError::Config(format!("rhyme group {group:?} has no index")))?;
        let log_prob = self
            .baseline_log_prob(group)
            .ok_or_else(|| SteerError::Config(format!("rhyme group {group:?} has no count")))?;
        Ok(RhymeTarget { index, log_prob })
    }

    /// Write the table as JSON.
    ///
    /// # Errors
    /// Returns an error if serialisation or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Read a table written by [`RhymeTable::save`].
    ///
    /// # Errors
    /// Returns an error if the file is unreadable or inconsistent.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl TryFrom<RhymeFile> for RhymeTable {
    type Error = SteerError;

    fn try_from(file: RhymeFile) -> Result<Self> {
        if file.index2group.first().map(String::as_str) != Some(UNKNOWN_RHYME_GROUP) {
            return Err(SteerError::Config(format!(
                "rhyme table must start with {UNKNOWN_RHYME_GROUP}"
            )));
        }
        let known: BTreeSet<&String> = file.index2group.iter().collect();
        if known.len() != file.index2group.len() {
            return Err(SteerError::Config("duplicate rhyme group".to_string()));
        }
        if let Some(g) = file.word2group.values().find(|g| !known.contains(g)) {
            return Err(SteerError::Config(format!("rhyme group {g:?} has no index")));
        }
        Ok(Self::from_parts(
            file.word2group,
            file.group_counts,
            file.index2group,
        ))
    }
}

impl From<RhymeTable> for RhymeFile {
    fn from(t: RhymeTable) -> Self {
        Self {
            word2group: t.word2group,
            group_counts: t.group_counts,
            index2group: t.index2group,
        }
    }
}
