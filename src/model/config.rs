use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SteerError;

/// Attribute a predictor was trained for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// Bag-of-words topic: will any of these words appear later?
    Topic,
    /// Formal vs informal register.
    Formality,
    /// Iambic meter of the current line.
    Iambic,
    /// Will the line end in this rhyme group?
    Rhyme,
    /// Does the line end after the current prefix?
    Newline,
}

/// What a predictor returns per input row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreShape {
    /// One logit per prefix length: `(batch, seq)`.
    PerPosition,
    /// One pooled logit per conditioning target: `(batch, targets)`.
    PerTarget,
}

impl Task {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Formality => "formality",
            Self::Iambic => "iambic",
            Self::Rhyme => "rhyme",
            Self::Newline => "newline",
        }
    }

    #[must_use]
    pub fn score_shape(self) -> ScoreShape {
        match self {
            Self::Topic | Self::Rhyme => ScoreShape::PerTarget,
            Self::Formality | Self::Iambic | Self::Newline => ScoreShape::PerPosition,
        }
    }

    /// Bidirectional encoders pool over the whole prefix; causal ones score every position.
    #[must_use]
    pub fn bidirectional(self) -> bool {
        self.score_shape() == ScoreShape::PerTarget
    }

    /// Whether the predictor consumes the syllables-remaining side feature.
    #[must_use]
    pub fn uses_syllables(self) -> bool {
        matches!(self, Self::Rhyme | Self::Newline)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predictor architecture, stored alongside the weights in the checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub task: Task,
    /// Token embedding rows: the base tokenizer's pad id + 1.
    pub token_vocab_size: usize,
    #[serde(default = "defaults::hidden_dim")]
    pub hidden_dim: usize,
    /// Per-direction LSTM width for bidirectional predictors.
    #[serde(default = "defaults::rnn_dim")]
    pub rnn_dim: usize,
    /// Width of the conditioning-target embedding.
    #[serde(default = "defaults::target_embed_dim")]
    pub target_embed_dim: usize,
    #[serde(default = "defaults::num_layers")]
    pub num_layers: usize,
    /// Rows of the target embedding (word vocabulary or rhyme groups). Unused by causal tasks.
    #[serde(default)]
    pub num_targets: usize,
    #[serde(default = "defaults::syllable_embed_dim")]
    pub syllable_embed_dim: usize,
    /// Largest syllables-remaining value with its own embedding row.
    #[serde(default = "defaults::max_syllables_to_go")]
    pub max_syllables_to_go: usize,
}

mod defaults {
    pub fn hidden_dim() -> usize {
        300
    }
    pub fn rnn_dim() -> usize {
        150
    }
    pub fn target_embed_dim() -> usize {
        300
    }
    pub fn num_layers() -> usize {
        3
    }
    pub fn syllable_embed_dim() -> usize {
        100
    }
    pub fn max_syllables_to_go() -> usize {
        10
    }
}

impl PredictorConfig {
    /// Full-size configuration for `task`.
    #[must_use]
    pub fn new(task: Task, token_vocab_size: usize, num_targets: usize) -> Self {
        Self {
            task,
            token_vocab_size,
            hidden_dim: defaults::hidden_dim(),
            rnn_dim: defaults::rnn_dim(),
            target_embed_dim: defaults::target_embed_dim(),
            num_layers: defaults::num_layers(),
            num_targets,
            syllable_embed_dim: defaults::syllable_embed_dim(),
            max_syllables_to_go: defaults::max_syllables_to_go(),
        }
    }

    /// Tiny configuration for tests and smoke runs.
    #[must_use]
    pub fn small(task: Task, token_vocab_size: usize, num_targets: usize) -> Self {
        Self {
            task,
            token_vocab_size,
            hidden_dim: 16,
            rnn_dim: 8,
            target_embed_dim: 16,
            num_layers: 2,
            num_targets,
            syllable_embed_dim: 4,
            max_syllables_to_go: 10,
        }
    }

    /// Width of the per-layer LSTM state in one direction.
    #[must_use]
    pub fn lstm_dim(&self) -> usize {
        if self.task.bidirectional() {
            self.rnn_dim
        } else {
            self.hidden_dim
        }
    }

    /// Validate that configuration is consistent.
    ///
    /// # Errors
    /// Returns an error if the configuration is internally inconsistent.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_vocab_size == 0 {
            return Err("token_vocab_size must be positive".into());
        }
        if self.hidden_dim == 0 || self.num_layers == 0 {
            return Err("hidden_dim and num_layers must be positive".into());
        }
        if self.task.uses_syllables() && self.syllable_embed_dim == 0 {
            return Err(format!("{} predictor needs syllable_embed_dim > 0", self.task));
        }
        if self.task.bidirectional() {
            if self.num_targets == 0 {
                return Err(format!("{} predictor needs num_targets > 0", self.task));
            }
            if 2 * self.rnn_dim != self.hidden_dim {
                return Err(format!(
                    "bidirectional rnn_dim {} must be half of hidden_dim {}",
                    self.rnn_dim, self.hidden_dim
                ));
            }
            if self.target_embed_dim != self.hidden_dim {
                return Err(format!(
                    "target_embed_dim {} must equal hidden_dim {}",
                    self.target_embed_dim, self.hidden_dim
                ));
            }
        }
        Ok(())
    }

    /// Check a loaded predictor against the base model it will score candidates for.
    ///
    /// The token embedding must cover `model_vocab` ids plus at most one added pad token.
    /// `table_len` is the size of the word vocabulary or rhyme table the conditioning target
    /// indices come from; target embeddings must cover all of it.
    ///
    /// # Errors
    /// Returns [`SteerError::Config`] on either mismatch.
    pub fn check_compatible(
        &self,
        model_vocab: usize,
        table_len: Option<usize>,
    ) -> Result<(), SteerError> {
        if self.token_vocab_size < model_vocab || self.token_vocab_size > model_vocab + 1 {
            return Err(SteerError::Config(format!(
                "{} predictor embeds {} tokens but the base model has {model_vocab}",
                self.task, self.token_vocab_size
            )));
        }
        if let Some(len) = table_len {
            if self.num_targets < len {
                return Err(SteerError::Config(format!(
                    "{} predictor has {} targets but its table has {len} entries",
                    self.task, self.num_targets
                )));
            }
        }
        Ok(())
    }
}
