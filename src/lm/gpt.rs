//! GPT-2 decoder-only transformer.
//!
//! Loads HuggingFace `GPT2LMHeadModel` safetensors, with or without the `transformer.` prefix.

use candle_core::{DType, Device, Tensor};
use candle_nn::{Embedding, LayerNorm, LayerNormConfig, Linear, Module, VarBuilder};
use log::debug;

use super::LanguageModel;
use super::attention::attention_bias;
use super::config::GptConfig;
use super::layers::TransformerBlock;
use crate::error::{Result, SteerError};

/// GPT-2 with a language-model head tied to the token embedding.
pub struct GptModel {
    /// Token embedding
    wte: Embedding,
    /// Learned absolute position embedding
    wpe: Embedding,
    blocks: Vec<TransformerBlock>,
    ln_f: LayerNorm,
    lm_head: Linear,
    config: GptConfig,
    device: Device,
}

impl GptModel {
    /// Create a model by loading weights.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or weight loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: GptConfig, vb: VarBuilder) -> Result<Self> {
        config
            .validate()
            .map_err(|e| SteerError::Config(e.to_string()))?;

        let device = vb.device().clone();
        let vb = if vb.contains_tensor("transformer.wte.weight") {
            vb.pp("transformer")
        } else {
            vb
        };

        let wte = candle_nn::embedding(config.vocab_size, config.n_embd, vb.pp("wte"))?;
        let wpe = candle_nn::embedding(config.n_positions, config.n_embd, vb.pp("wpe"))?;

        let mut blocks = Vec::with_capacity(config.n_layer);
        for i in 0..config.n_layer {
            blocks.push(TransformerBlock::new(&config, vb.pp(format!("h.{i}")))?);
        }

        let ln_config = LayerNormConfig {
            eps: config.layer_norm_epsilon,
            ..LayerNormConfig::default()
        };
        let ln_f = candle_nn::layer_norm(config.n_embd, ln_config, vb.pp("ln_f"))?;
        let lm_head = Linear::new(wte.embeddings().clone(), None);

        Ok(Self {
            wte,
            wpe,
            blocks,
            ln_f,
            lm_head,
            config,
            device,
        })
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `input_ids` - Token IDs of shape (batch, seq_len)
    /// * `attention_mask` - Optional (batch, seq_len) key mask, 1 = attend
    ///
    /// # Returns
    /// Logits of shape (batch, seq_len, vocab_size)
    ///
    /// # Errors
    /// Returns an error if the sequence exceeds `n_positions` or tensor operations fail.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: Option<&Tensor>) -> Result<Tensor> {
        let (_, t) = input_ids.dims2()?;
        if t > self.config.n_positions {
            return Err(SteerError::InvalidInput(format!(
                "sequence length {t} exceeds n_positions {}",
                self.config.n_positions
            )));
        }

        let positions = Tensor::arange(0u32, u32::try_from(t).unwrap_or(u32::MAX), &self.device)?
            .unsqueeze(0)?;
        let mut x = self
            .wte
            .forward(input_ids)?
            .broadcast_add(&self.wpe.forward(&positions)?)?;

        let mask = attention_bias(t, attention_mask, &self.device)?;
        for block in &self.blocks {
            x = block.forward(&x, &mask)?;
        }
        x = self.ln_f.forward(&x)?;
        Ok(self.lm_head.forward(&x)?)
    }

    #[must_use]
    pub fn config(&self) -> &GptConfig {
        &self.config
    }
}

impl LanguageModel for GptModel {
    /// Contexts longer than `n_positions` keep their most recent tokens.
    fn next_token_logits(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let (_, t) = input_ids.dims2()?;
        let (input_ids, attention_mask) = if t > self.config.n_positions {
            let start = t - self.config.n_positions;
            debug!("cropping context from {t} to {} tokens", self.config.n_positions);
            (
                input_ids.narrow(1, start, self.config.n_positions)?,
                attention_mask
                    .map(|m| m.narrow(1, start, self.config.n_positions))
                    .transpose()?,
            )
        } else {
            (input_ids.clone(), attention_mask.cloned())
        };

        let logits = self.forward(&input_ids, attention_mask.as_ref())?;
        let (_, t, _) = logits.dims3()?;
        Ok(logits.narrow(1, t - 1, 1)?.squeeze(1)?.to_dtype(DType::F32)?)
    }

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

/// Load a GPT-2 model from a safetensors file.
///
/// # Errors
/// Returns an error if file loading or model construction fails.
pub fn load_gpt(path: &std::path::Path, config: GptConfig, device: &Device) -> Result<GptModel> {
    let data = std::fs::read(path)?;
    let vb = VarBuilder::from_buffered_safetensors(data, DType::F32, device)?;
    GptModel::new(config, vb)
}
