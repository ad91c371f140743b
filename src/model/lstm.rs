//! Multi-layer LSTM over right-padded batches.
//!
//! Parameter names follow `torch.nn.LSTM` (`weight_ih_l0`, `bias_hh_l1_reverse`, ...), gate order
//! is input, forget, cell, output.

use candle_core::{D, DType, Device, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder};

use super::attention::pad_mask;
use crate::error::Result;

/// One direction of one LSTM layer.
pub struct Lstm {
    /// Input projection to the four gates (in_dim -> 4 * hidden)
    w_ih: Linear,
    /// Recurrent projection (hidden -> 4 * hidden)
    w_hh: Linear,
    hidden_dim: usize,
}

impl Lstm {
    /// Create one layer/direction.
    ///
    /// # Errors
    /// Returns an error if weight loading fails.
    #[allow(clippy::needless_pass_by_value, clippy::cast_precision_loss)]
    pub fn new(
        in_dim: usize,
        hidden_dim: usize,
        layer: usize,
        reverse: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let suffix = if reverse { "_reverse" } else { "" };
        let bound = 1.0 / (hidden_dim as f64).sqrt();
        let init = Init::Uniform {
            lo: -bound,
            up: bound,
        };
        let gates = 4 * hidden_dim;

        let w_ih = vb.get_with_hints((gates, in_dim), &format!("weight_ih_l{layer}{suffix}"), init)?;
        let w_hh =
            vb.get_with_hints((gates, hidden_dim), &format!("weight_hh_l{layer}{suffix}"), init)?;
        let b_ih = vb.get_with_hints(gates, &format!("bias_ih_l{layer}{suffix}"), init)?;
        let b_hh = vb.get_with_hints(gates, &format!("bias_hh_l{layer}{suffix}"), init)?;

        Ok(Self {
            w_ih: Linear::new(w_ih, Some(b_ih)),
            w_hh: Linear::new(w_hh, Some(b_hh)),
            hidden_dim,
        })
    }

    /// Run left to right over `x` of shape (batch, seq, in_dim).
    ///
    /// Returns hidden states of shape (batch, seq, hidden).
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, s, _) = x.dims3()?;
        let xs = self.w_ih.forward(x)?;

        let mut h = Tensor::zeros((b, self.hidden_dim), x.dtype(), x.device())?;
        let mut c = h.clone();
        let mut outs = Vec::with_capacity(s);
        for t in 0..s {
            let gates = (xs.narrow(1, t, 1)?.squeeze(1)? + self.w_hh.forward(&h)?)?;
            let g = gates.chunk(4, D::Minus1)?;
            let i = candle_nn::ops::sigmoid(&g[0])?;
            let f = candle_nn::ops::sigmoid(&g[1])?;
            let cell = g[2].tanh()?;
            let o = candle_nn::ops::sigmoid(&g[3])?;
            c = ((f * &c)? + (i * cell)?)?;
            h = (o * c.tanh()?)?;
            outs.push(h.clone());
        }
        Ok(Tensor::stack(&outs, 1)?)
    }
}

/// Stacked (optionally bidirectional) LSTM that honours per-row lengths.
pub struct StackedLstm {
    layers: Vec<(Lstm, Option<Lstm>)>,
}

impl StackedLstm {
    /// # Errors
    /// Returns an error if weight loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(
        in_dim: usize,
        hidden_dim: usize,
        num_layers: usize,
        bidirectional: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let dirs = if bidirectional { 2 } else { 1 };
        let mut layers = Vec::with_capacity(num_layers);
        for layer in 0..num_layers {
            let layer_in = if layer == 0 { in_dim } else { hidden_dim * dirs };
            let fwd = Lstm::new(layer_in, hidden_dim, layer, false, vb.clone())?;
            let bwd = if bidirectional {
                Some(Lstm::new(layer_in, hidden_dim, layer, true, vb.clone())?)
            } else {
                None
            };
            layers.push((fwd, bwd));
        }
        Ok(Self { layers })
    }

    /// Encode `x` of shape (batch, seq, in_dim).
    ///
    /// The backward direction reads each row's valid prefix in reverse, so padding never flows
    /// into valid positions. Padded positions of the output are zero.
    ///
    /// # Errors
    /// Returns an error if tensor operations fail or a length exceeds `seq`.
    pub fn forward(&self, x: &Tensor, lengths: &[usize]) -> Result<Tensor> {
        let (_, s, _) = x.dims3()?;
        let mask = pad_mask(lengths, s, x.device())?;

        let mut x = x.clone();
        for (fwd, bwd) in &self.layers {
            let out_f = fwd.forward(&x)?;
            x = match bwd {
                Some(bwd) => {
                    let idx = reversal_index(lengths, s, x.device())?;
                    let reversed = gather_time(&x, &idx)?;
                    let out_b = gather_time(&bwd.forward(&reversed)?, &idx)?;
                    Tensor::cat(&[&out_f, &out_b], D::Minus1)?
                }
                None => out_f,
            };
        }
        Ok(x.broadcast_mul(&mask.unsqueeze(2)?)?)
    }
}

/// Per-row time permutation that reverses the first `len` steps and leaves padding in place.
/// Applying it twice is the identity.
#[allow(clippy::cast_possible_truncation)]
fn reversal_index(lengths: &[usize], seq_len: usize, device: &Device) -> Result<Tensor> {
    let mut idx = Vec::with_capacity(lengths.len() * seq_len);
    for &len in lengths {
        for t in 0..seq_len {
            let src = if t < len { len - 1 - t } else { t };
            idx.push(src as u32);
        }
    }
    Ok(Tensor::from_vec(idx, (lengths.len(), seq_len), device)?)
}

fn gather_time(x: &Tensor, idx: &Tensor) -> Result<Tensor> {
    let (b, s, d) = x.dims3()?;
    let idx = idx
        .to_dtype(DType::U32)?
        .unsqueeze(2)?
        .broadcast_as((b, s, d))?
        .contiguous()?;
    Ok(x.contiguous()?.gather(&idx, 1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn random_stack(bidirectional: bool) -> StackedLstm {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        StackedLstm::new(3, 4, 2, bidirectional, vb).unwrap()
    }

    fn input(rows: &[Vec<f32>]) -> Tensor {
        let s = rows[0].len() / 3;
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::from_vec(flat, (rows.len(), s, 3), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_reversal_index_is_involution() {
        let idx = reversal_index(&[3, 1], 4, &Device::Cpu).unwrap();
        let v: Vec<Vec<u32>> = idx.to_vec2().unwrap();
        assert_eq!(v, vec![vec![2, 1, 0, 3], vec![0, 1, 2, 3]]);
    }

    #[test]
    fn test_output_shape_and_zero_padding() {
        let lstm = random_stack(true);
        let x = input(&[vec![0.5; 12], vec![0.25; 12]]);
        let out = lstm.forward(&x, &[4, 2]).unwrap();
        assert_eq!(out.dims(), &[2, 4, 8]);
        let rows: Vec<Vec<Vec<f32>>> = out.to_vec3().unwrap();
        assert!(rows[1][2].iter().all(|v| *v == 0.0));
        assert!(rows[1][3].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_padding_does_not_change_valid_positions() {
        let lstm = random_stack(true);
        let short = input(&[vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]]);
        let padded = input(&[vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 9.0, 9.0, 9.0]]);
        let a: Vec<Vec<Vec<f32>>> = lstm.forward(&short, &[2]).unwrap().to_vec3().unwrap();
        let b: Vec<Vec<Vec<f32>>> = lstm.forward(&padded, &[2]).unwrap().to_vec3().unwrap();
        for t in 0..2 {
            for (x, y) in a[0][t].iter().zip(&b[0][t]) {
                approx::assert_abs_diff_eq!(x, y, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_causal_prefix_scores_match() {
        let lstm = random_stack(false);
        let full = input(&[vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9]]);
        let prefix = full.narrow(1, 0, 2).unwrap();
        let a: Vec<Vec<Vec<f32>>> = lstm.forward(&full, &[3]).unwrap().to_vec3().unwrap();
        let b: Vec<Vec<Vec<f32>>> = lstm.forward(&prefix, &[2]).unwrap().to_vec3().unwrap();
        for (x, y) in a[0][1].iter().zip(&b[0][1]) {
            approx::assert_abs_diff_eq!(x, y, epsilon = 1e-6);
        }
    }
}
