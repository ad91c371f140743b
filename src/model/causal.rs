//! Per-position predictors: a causal LSTM that scores every prefix length at once.

use candle_core::{D, DType, Tensor};
use candle_nn::{Embedding, Linear, Module, VarBuilder};

use super::config::{PredictorConfig, Task};
use super::lstm::StackedLstm;
use super::predictor::{AttributePredictor, PredictorInputs};
use crate::error::Result;

/// Token embedding followed by a unidirectional stacked LSTM.
struct CausalEncoder {
    embed: Embedding,
    rnn: StackedLstm,
}

impl CausalEncoder {
    fn new(config: &PredictorConfig, embed_name: &str, vb: &VarBuilder) -> Result<Self> {
        let embed =
            candle_nn::embedding(config.token_vocab_size, config.hidden_dim, vb.pp(embed_name))?;
        let rnn = StackedLstm::new(
            config.hidden_dim,
            config.lstm_dim(),
            config.num_layers,
            false,
            vb.pp("rnn"),
        )?;
        Ok(Self { embed, rnn })
    }

    /// Hidden states (batch, max_len, hidden).
    fn forward(&self, inputs: &PredictorInputs<'_>) -> Result<Tensor> {
        let tokens = inputs.cropped_tokens()?;
        let embedded = self.embed.forward(&tokens)?;
        self.rnn.forward(&embedded, inputs.lengths)
    }
}

/// Embed a (batch,) syllables-remaining tensor, clamping values above `max`.
pub(super) fn embed_syllables(
    embed: &Embedding,
    syllables: &Tensor,
    max: usize,
) -> Result<Tensor> {
    let cap = u32::try_from(max).unwrap_or(u32::MAX);
    let clamped: Vec<u32> = syllables
        .to_dtype(DType::U32)?
        .to_vec1::<u32>()?
        .into_iter()
        .map(|s| s.min(cap))
        .collect();
    let n = clamped.len();
    let ids = Tensor::from_vec(clamped, n, syllables.device())?;
    Ok(embed.forward(&ids)?)
}

/// Formal vs informal register, trained on the target-side (Marian) vocabulary.
pub struct FormalityPredictor {
    encoder: CausalEncoder,
    out_linear: Linear,
}

impl FormalityPredictor {
    /// # Errors
    /// Returns an error if weight loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &PredictorConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            encoder: CausalEncoder::new(config, "marian_embed", &vb)?,
            out_linear: candle_nn::linear(config.hidden_dim, 1, vb.pp("out_linear"))?,
        })
    }
}

impl AttributePredictor for FormalityPredictor {
    fn task(&self) -> Task {
        Task::Formality
    }

    fn score(&self, inputs: &PredictorInputs<'_>) -> Result<Tensor> {
        let hidden = self.encoder.forward(inputs)?;
        Ok(self.out_linear.forward(&hidden)?.squeeze(D::Minus1)?)
    }
}

/// Whether the line so far scans as iambic.
pub struct IambicPredictor {
    encoder: CausalEncoder,
    out_linear: Linear,
}

impl IambicPredictor {
    /// # Errors
    /// Returns an error if weight loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &PredictorConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            encoder: CausalEncoder::new(config, "gpt_embed", &vb)?,
            out_linear: candle_nn::linear(config.hidden_dim, 1, vb.pp("out_linear"))?,
        })
    }
}

impl AttributePredictor for IambicPredictor {
    fn task(&self) -> Task {
        Task::Iambic
    }

    fn score(&self, inputs: &PredictorInputs<'_>) -> Result<Tensor> {
        let hidden = self.encoder.forward(inputs)?;
        Ok(self.out_linear.forward(&hidden)?.squeeze(D::Minus1)?)
    }
}

/// Whether the line ends right after the prefix, given the syllables still to go.
pub struct NewlinePredictor {
    encoder: CausalEncoder,
    count_syllable_embed: Embedding,
    out_linear: Linear,
    out_linear2: Linear,
    out_linear3: Linear,
    max_syllables_to_go: usize,
}

impl NewlinePredictor {
    /// # Errors
    /// Returns an error if weight loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &PredictorConfig, vb: VarBuilder) -> Result<Self> {
        let h = config.hidden_dim;
        let a = config.syllable_embed_dim;
        Ok(Self {
            encoder: CausalEncoder::new(config, "gpt_embed", &vb)?,
            count_syllable_embed: candle_nn::embedding(
                config.max_syllables_to_go + 1,
                a,
                vb.pp("count_syllable_embed"),
            )?,
            out_linear: candle_nn::linear(h + a, h, vb.pp("out_linear"))?,
            out_linear2: candle_nn::linear(h, h, vb.pp("out_linear2"))?,
            out_linear3: candle_nn::linear(h, 1, vb.pp("out_linear3"))?,
            max_syllables_to_go: config.max_syllables_to_go,
        })
    }
}

impl AttributePredictor for NewlinePredictor {
    fn task(&self) -> Task {
        Task::Newline
    }

    fn score(&self, inputs: &PredictorInputs<'_>) -> Result<Tensor> {
        let syllables = inputs.require_syllables(Task::Newline)?;
        let hidden = self.encoder.forward(inputs)?;
        let (b, s, _) = hidden.dims3()?;

        let syl = embed_syllables(
            &self.count_syllable_embed,
            syllables,
            self.max_syllables_to_go,
        )?;
        let a = syl.dim(D::Minus1)?;
        let syl = syl.unsqueeze(1)?.broadcast_as((b, s, a))?.contiguous()?;

        let h = Tensor::cat(&[&hidden, &syl], D::Minus1)?;
        let h = self.out_linear.forward(&h)?.relu()?;
        let h = self.out_linear2.forward(&h)?.relu()?;
        Ok(self.out_linear3.forward(&h)?.squeeze(D::Minus1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SteerError;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn vb(varmap: &VarMap) -> VarBuilder<'_> {
        VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
    }

    fn batch() -> Tensor {
        Tensor::new(&[[1u32, 5, 7, 0], [2, 3, 0, 0]], &Device::Cpu).unwrap()
    }

    #[test]
    fn test_formality_scores_each_position() {
        let varmap = VarMap::new();
        let cfg = PredictorConfig::small(Task::Formality, 10, 0);
        let p = FormalityPredictor::new(&cfg, vb(&varmap)).unwrap();
        let tokens = batch();
        let out = p.score(&PredictorInputs::new(&tokens, &[3, 2])).unwrap();
        assert_eq!(out.dims(), &[2, 3]);
    }

    #[test]
    fn test_iambic_prefix_scores_agree() {
        let varmap = VarMap::new();
        let cfg = PredictorConfig::small(Task::Iambic, 10, 0);
        let p = IambicPredictor::new(&cfg, vb(&varmap)).unwrap();
        let full = Tensor::new(&[[1u32, 5, 7]], &Device::Cpu).unwrap();
        let prefix = Tensor::new(&[[1u32, 5]], &Device::Cpu).unwrap();
        let a: Vec<Vec<f32>> = p
            .score(&PredictorInputs::new(&full, &[3]))
            .unwrap()
            .to_vec2()
            .unwrap();
        let b: Vec<Vec<f32>> = p
            .score(&PredictorInputs::new(&prefix, &[2]))
            .unwrap()
            .to_vec2()
            .unwrap();
        approx::assert_abs_diff_eq!(a[0][1], b[0][1], epsilon = 1e-5);
    }

    #[test]
    fn test_newline_requires_syllables() {
        let varmap = VarMap::new();
        let cfg = PredictorConfig::small(Task::Newline, 10, 0);
        let p = NewlinePredictor::new(&cfg, vb(&varmap)).unwrap();
        let tokens = batch();
        let err = p.score(&PredictorInputs::new(&tokens, &[3, 2])).unwrap_err();
        assert!(matches!(err, SteerError::InvalidInput(_)));

        let syl = Tensor::new(&[4u32, 25], &Device::Cpu).unwrap();
        let out = p
            .score(&PredictorInputs::new(&tokens, &[3, 2]).with_syllables_to_go(&syl))
            .unwrap();
        assert_eq!(out.dims(), &[2, 3]);
    }

    #[test]
    fn test_syllables_clamp_to_last_row() {
        let varmap = VarMap::new();
        let embed = candle_nn::embedding(4, 2, vb(&varmap)).unwrap();
        let high = embed_syllables(&embed, &Tensor::new(&[9u32], &Device::Cpu).unwrap(), 3).unwrap();
        let top = embed_syllables(&embed, &Tensor::new(&[3u32], &Device::Cpu).unwrap(), 3).unwrap();
        let high: Vec<Vec<f32>> = high.to_vec2().unwrap();
        let top: Vec<Vec<f32>> = top.to_vec2().unwrap();
        assert_eq!(high, top);
    }
}
