//! `tokenizer.json` adapter.

use std::path::Path;

use tokenizers::Tokenizer;

use super::TextTokenizer;
use crate::error::{Result, SteerError};

/// A HuggingFace tokenizer loaded from `tokenizer.json`.
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    /// # Errors
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = Tokenizer::from_file(path).map_err(|e| {
            SteerError::Tokenizer(format!("failed to load tokenizer from {}: {e}", path.display()))
        })?;
        Ok(Self { inner })
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl From<Tokenizer> for HfTokenizer {
    fn from(inner: Tokenizer) -> Self {
        Self { inner }
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| SteerError::Tokenizer(format!("failed to encode {text:?}: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| SteerError::Tokenizer(format!("failed to decode ids: {e}")))
    }

    fn token_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }
}
