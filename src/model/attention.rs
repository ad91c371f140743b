//! Attention pooling of encoder states toward conditioning targets.

use candle_core::{D, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

use crate::error::{Result, SteerError};

/// Valid-position mask of shape (batch, max_len): 1.0 for `t < length`, 0.0 after.
///
/// # Errors
/// Returns [`SteerError::InvalidInput`] if a length is zero or exceeds `max_len`.
pub fn pad_mask(lengths: &[usize], max_len: usize, device: &Device) -> Result<Tensor> {
    let mut data = Vec::with_capacity(lengths.len() * max_len);
    for &len in lengths {
        if len == 0 || len > max_len {
            return Err(SteerError::InvalidInput(format!(
                "sequence length {len} outside 1..={max_len}"
            )));
        }
        data.extend((0..max_len).map(|t| if t < len { 1.0f32 } else { 0.0 }));
    }
    Ok(Tensor::from_vec(data, (lengths.len(), max_len), device)?)
}

/// Pools bidirectional encoder states once per conditioning target and scores each target.
///
/// Layer names match the trained checkpoints; they sit at the predictor's top level.
pub struct FutureAttention {
    /// Key projection of encoder states (H -> H)
    attention_linear: Linear,
    /// Query projection of target embedding plus side features (H + aux -> H)
    embed_key_linear: Linear,
    /// Value projection of encoder states (H -> H)
    attention_value_linear: Linear,
    /// Target-embedding gate (H -> H)
    out_embed_linear: Linear,
    /// Pooled-state projection (H -> H)
    out_linear: Linear,
    /// (H + H + aux -> H)
    out_linear2: Linear,
    /// (H -> 1)
    out_linear3: Linear,
}

impl FutureAttention {
    /// # Arguments
    /// * `hidden_dim` - Encoder width, also the target embedding width
    /// * `aux_dim` - Width of per-row side features appended to the query (0 for none)
    /// * `vb` - Variable builder at the predictor root
    ///
    /// # Errors
    /// Returns an error if weight loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(hidden_dim: usize, aux_dim: usize, vb: VarBuilder) -> Result<Self> {
        let query_dim = hidden_dim + aux_dim;
        Ok(Self {
            attention_linear: candle_nn::linear(hidden_dim, hidden_dim, vb.pp("attention_linear"))?,
            embed_key_linear: candle_nn::linear(query_dim, hidden_dim, vb.pp("embed_key_linear"))?,
            attention_value_linear: candle_nn::linear(
                hidden_dim,
                hidden_dim,
                vb.pp("attention_value_linear"),
            )?,
            out_embed_linear: candle_nn::linear(hidden_dim, hidden_dim, vb.pp("out_embed_linear"))?,
            out_linear: candle_nn::linear(hidden_dim, hidden_dim, vb.pp("out_linear"))?,
            out_linear2: candle_nn::linear(
                hidden_dim + query_dim,
                hidden_dim,
                vb.pp("out_linear2"),
            )?,
            out_linear3: candle_nn::linear(hidden_dim, 1, vb.pp("out_linear3"))?,
        })
    }

    /// Score every target against every row.
    ///
    /// # Arguments
    /// * `hidden` - Encoder states (batch, seq, H), zero at padding
    /// * `mask` - Valid-position mask (batch, seq)
    /// * `target_embed` - Target embeddings (batch, N, H)
    /// * `aux` - Optional side features (batch, N, aux)
    ///
    /// # Returns
    /// Logits of shape (batch, N)
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(
        &self,
        hidden: &Tensor,
        mask: &Tensor,
        target_embed: &Tensor,
        aux: Option<&Tensor>,
    ) -> Result<Tensor> {
        let query_in = match aux {
            Some(aux) => Tensor::cat(&[target_embed, aux], D::Minus1)?,
            None => target_embed.clone(),
        };
        let query = self.embed_key_linear.forward(&query_in)?;
        let keys = self.attention_linear.forward(hidden)?;

        // (batch, seq, N), normalised over positions
        let scores = keys.matmul(&query.transpose(1, 2)?.contiguous()?)?;
        let weights = candle_nn::ops::softmax(&scores, 1)?;
        // Masked after the softmax, not renormalised.
        let weights = weights.broadcast_mul(&mask.unsqueeze(2)?)?;

        let values = self.attention_value_linear.forward(hidden)?;
        let pooled = weights.transpose(1, 2)?.contiguous()?.matmul(&values)?;

        let gated = (self.out_linear.forward(&pooled)?
            * self.out_embed_linear.forward(target_embed)?)?;
        let features = Tensor::cat(&[&gated, &query_in], D::Minus1)?.relu()?;
        let h = self.out_linear2.forward(&features)?.relu()?;
        Ok(self.out_linear3.forward(&h)?.squeeze(D::Minus1)?)
    }
}
