//! Causal self-attention for GPT-2 blocks.

use candle_core::{D, DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

use super::config::GptConfig;
use super::layers::conv1d;
use crate::error::Result;

/// Multi-head causal self-attention with a fused QKV projection.
pub struct CausalSelfAttention {
    /// Combined query, key, value projection (n_embd -> 3 * n_embd)
    c_attn: Linear,
    /// Output projection (n_embd -> n_embd)
    c_proj: Linear,
    n_head: usize,
    n_embd: usize,
    head_dim: usize,
}

impl CausalSelfAttention {
    /// # Errors
    /// Returns an error if weight loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &GptConfig, vb: VarBuilder) -> Result<Self> {
        let n_embd = config.n_embd;
        Ok(Self {
            c_attn: conv1d(n_embd, 3 * n_embd, vb.pp("c_attn"))?,
            c_proj: conv1d(n_embd, n_embd, vb.pp("c_proj"))?,
            n_head: config.n_head,
            n_embd,
            head_dim: config.head_dim(),
        })
    }

    /// Forward pass for causal self-attention.
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape (batch, seq_len, n_embd)
    /// * `mask` - Additive mask broadcastable to (batch, n_head, seq_len, seq_len)
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    #[allow(clippy::many_single_char_names)]
    pub fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (b, t, _c) = x.dims3()?;

        let qkv = self.c_attn.forward(x)?;
        let heads = |offset: usize| -> Result<Tensor> {
            Ok(qkv
                .narrow(D::Minus1, offset, self.n_embd)?
                .reshape((b, t, self.n_head, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()?)
        };
        let q = heads(0)?;
        let k = heads(self.n_embd)?;
        let v = heads(2 * self.n_embd)?;

        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let k_t = k.transpose(D::Minus2, D::Minus1)?.contiguous()?;
        let att = (q.matmul(&k_t)? * scale)?;
        let att = att.broadcast_add(mask)?;
        let att = candle_nn::ops::softmax_last_dim(&att)?;

        let y = att
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, t, self.n_embd))?;
        Ok(self.c_proj.forward(&y)?)
    }
}

/// Causal mask of shape (1, 1, T, T): 0 where j <= i, -inf above the diagonal.
///
/// # Errors
/// Returns an error if tensor creation fails.
pub fn create_causal_mask(seq_len: usize, device: &Device) -> Result<Tensor> {
    let mut mask_data = Vec::with_capacity(seq_len * seq_len);
    for i in 0..seq_len {
        for j in 0..seq_len {
            mask_data.push(if j <= i { 0.0f32 } else { f32::NEG_INFINITY });
        }
    }
    let mask = Tensor::from_vec(mask_data, (seq_len, seq_len), device)?;
    Ok(mask.unsqueeze(0)?.unsqueeze(0)?)
}

/// Combine the causal mask with a (batch, T) key-padding mask (1 = attend).
///
/// Padded keys get a large finite penalty so a row never becomes all `-inf`.
///
/// # Errors
/// Returns an error if the padding mask does not match `seq_len`.
pub fn attention_bias(
    seq_len: usize,
    padding: Option<&Tensor>,
    device: &Device,
) -> Result<Tensor> {
    let causal = create_causal_mask(seq_len, device)?;
    match padding {
        None => Ok(causal),
        Some(padding) => {
            let (b, t) = padding.dims2()?;
            let keys = padding
                .to_dtype(DType::F32)?
                .affine(1e9, -1e9)?
                .reshape((b, 1, 1, t))?;
            Ok(causal.broadcast_add(&keys)?)
        }
    }
}
