use serde::{Deserialize, Serialize};

/// GPT-2 hyperparameters, read from a HuggingFace `config.json`.
///
/// Unknown fields in the file are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GptConfig {
    pub vocab_size: usize,
    /// Maximum context length
    pub n_positions: usize,
    /// Embedding dimension
    pub n_embd: usize,
    /// Number of transformer blocks
    pub n_layer: usize,
    /// Number of attention heads
    pub n_head: usize,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
    #[serde(default)]
    pub bos_token_id: Option<u32>,
    #[serde(default)]
    pub eos_token_id: Option<u32>,
}

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

impl GptConfig {
    /// Dimension per attention head.
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Validate that configuration is consistent.
    ///
    /// # Errors
    /// Returns an error if the configuration is internally inconsistent.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.n_head == 0 || !self.n_embd.is_multiple_of(self.n_head) {
            return Err("n_embd must be divisible by n_head");
        }
        if self.vocab_size == 0 {
            return Err("vocab_size must be positive");
        }
        if self.n_positions == 0 {
            return Err("n_positions must be positive");
        }
        Ok(())
    }

    /// The 124M-parameter `gpt2` checkpoint.
    #[must_use]
    pub fn gpt2() -> Self {
        Self {
            vocab_size: 50_257,
            n_positions: 1024,
            n_embd: 768,
            n_layer: 12,
            n_head: 12,
            layer_norm_epsilon: 1e-5,
            bos_token_id: Some(50_256),
            eos_token_id: Some(50_256),
        }
    }

    /// Tiny config for tests.
    #[must_use]
    pub fn small(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            n_positions: 64,
            n_embd: 32,
            n_layer: 2,
            n_head: 4,
            layer_norm_epsilon: 1e-5,
            bos_token_id: None,
            eos_token_id: None,
        }
    }
}
