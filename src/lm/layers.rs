//! MLP and transformer block in the GPT-2 weight layout.

use candle_core::Tensor;
use candle_nn::{Init, LayerNorm, LayerNormConfig, Linear, Module, VarBuilder};

use super::attention::CausalSelfAttention;
use super::config::GptConfig;
use crate::error::Result;

/// Load a GPT-2 `Conv1D`, whose weight is stored (in, out), as a [`Linear`].
///
/// # Errors
/// Returns an error if weight loading fails.
#[allow(clippy::needless_pass_by_value)]
pub fn conv1d(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let weight = vb
        .get_with_hints((in_dim, out_dim), "weight", candle_nn::init::DEFAULT_KAIMING_NORMAL)?
        .t()?
        .contiguous()?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Feed-forward network: c_fc -> GELU (tanh approximation) -> c_proj.
pub struct Mlp {
    /// Up projection (n_embd -> 4 * n_embd)
    c_fc: Linear,
    /// Down projection (4 * n_embd -> n_embd)
    c_proj: Linear,
}

impl Mlp {
    /// # Errors
    /// Returns an error if weight loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &GptConfig, vb: VarBuilder) -> Result<Self> {
        let hidden_dim = 4 * config.n_embd;
        Ok(Self {
            c_fc: conv1d(config.n_embd, hidden_dim, vb.pp("c_fc"))?,
            c_proj: conv1d(hidden_dim, config.n_embd, vb.pp("c_proj"))?,
        })
    }

    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.c_fc.forward(x)?.gelu()?;
        Ok(self.c_proj.forward(&h)?)
    }
}

/// Pre-norm transformer block.
///
/// Structure: LayerNorm -> Attention -> Residual -> LayerNorm -> MLP -> Residual
pub struct TransformerBlock {
    ln_1: LayerNorm,
    attn: CausalSelfAttention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl TransformerBlock {
    /// # Errors
    /// Returns an error if weight loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &GptConfig, vb: VarBuilder) -> Result<Self> {
        let ln_config = LayerNormConfig {
            eps: config.layer_norm_epsilon,
            ..LayerNormConfig::default()
        };
        Ok(Self {
            ln_1: candle_nn::layer_norm(config.n_embd, ln_config, vb.pp("ln_1"))?,
            attn: CausalSelfAttention::new(config, vb.pp("attn"))?,
            ln_2: candle_nn::layer_norm(config.n_embd, ln_config, vb.pp("ln_2"))?,
            mlp: Mlp::new(config, vb.pp("mlp"))?,
        })
    }

    /// # Arguments
    /// * `x` - Input tensor of shape (batch, seq_len, n_embd)
    /// * `mask` - Additive attention mask
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let h = self.attn.forward(&self.ln_1.forward(x)?, mask)?;
        let x = (x + h)?;
        let h = self.mlp.forward(&self.ln_2.forward(&x)?)?;
        Ok((x + h)?)
    }
}
