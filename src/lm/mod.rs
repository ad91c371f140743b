//! Frozen base language models and their tokenizers.
//!
//! Decoders only see the [`LanguageModel`] and [`TextTokenizer`] traits. The crate ships a
//! GPT-2 layout decoder ([`GptModel`]) and a `tokenizer.json` adapter ([`HfTokenizer`]).

pub mod attention;
pub mod config;
pub mod gpt;
pub mod layers;
pub mod tokenizer;

use candle_core::{Device, Tensor};

use crate::error::{Result, SteerError};

pub use config::GptConfig;
pub use gpt::GptModel;
pub use tokenizer::HfTokenizer;

/// Autoregressive scorer of next-token logits.
pub trait LanguageModel {
    /// Logits for the token following `input_ids`.
    ///
    /// `input_ids` is (batch, seq) `u32`; rows share one length. `attention_mask` is (batch, seq)
    /// with 1 for real tokens and 0 for padding.
    ///
    /// Returns (batch, vocab) logits.
    ///
    /// # Errors
    /// Returns an error if the forward pass fails.
    fn next_token_logits(&self, input_ids: &Tensor, attention_mask: Option<&Tensor>)
    -> Result<Tensor>;

    /// Logits for the next decoder token given an encoded source.
    ///
    /// Only encoder–decoder models implement this. `encoder_mask` covers the source and never
    /// grows during decoding.
    ///
    /// # Errors
    /// Decoder-only models return [`SteerError::Unsupported`].
    fn next_decoder_logits(
        &self,
        encoder_ids: &Tensor,
        encoder_mask: Option<&Tensor>,
        decoder_ids: &Tensor,
    ) -> Result<Tensor> {
        let _ = (encoder_ids, encoder_mask, decoder_ids);
        Err(SteerError::Unsupported(
            "decoder-only model has no encoder to condition on",
        ))
    }

    fn vocab_size(&self) -> usize;

    fn device(&self) -> &Device;

    fn is_encoder_decoder(&self) -> bool {
        false
    }
}

/// Text ↔ token-id conversion for a base model.
pub trait TextTokenizer {
    /// # Errors
    /// Returns an error if the tokenizer rejects the input.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// # Errors
    /// Returns an error if an id is outside the vocabulary.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Id of an exact vocabulary entry.
    fn token_id(&self, token: &str) -> Option<u32>;
}
