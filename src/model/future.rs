//! Per-target predictors: bidirectional encoding pooled once per conditioning target.

use candle_core::Tensor;
use candle_nn::{Embedding, Module, VarBuilder};

use super::attention::{FutureAttention, pad_mask};
use super::causal::embed_syllables;
use super::config::{PredictorConfig, Task};
use super::lstm::StackedLstm;
use super::predictor::{AttributePredictor, FutureTargets, PredictorInputs};
use crate::error::Result;

/// Shared body of the topic and rhyme predictors.
struct FutureEncoder {
    gpt_embed: Embedding,
    word_embed: Embedding,
    rnn: StackedLstm,
    attention: FutureAttention,
}

impl FutureEncoder {
    fn new(config: &PredictorConfig, aux_dim: usize, vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            gpt_embed: candle_nn::embedding(
                config.token_vocab_size,
                config.hidden_dim,
                vb.pp("gpt_embed"),
            )?,
            word_embed: candle_nn::embedding(
                config.num_targets,
                config.target_embed_dim,
                vb.pp("word_embed"),
            )?,
            rnn: StackedLstm::new(
                config.hidden_dim,
                config.rnn_dim,
                config.num_layers,
                true,
                vb.pp("rnn"),
            )?,
            attention: FutureAttention::new(config.hidden_dim, aux_dim, vb.clone())?,
        })
    }

    /// Target embeddings repeated per row: (batch, N, E).
    fn target_embed(&self, targets: &FutureTargets, batch: usize) -> Result<Tensor> {
        let embed = self.word_embed.forward(&targets.indices)?;
        let (n, e) = embed.dims2()?;
        Ok(embed.unsqueeze(0)?.broadcast_as((batch, n, e))?.contiguous()?)
    }

    fn score(
        &self,
        inputs: &PredictorInputs<'_>,
        targets: &FutureTargets,
        aux: Option<&Tensor>,
    ) -> Result<Tensor> {
        let tokens = inputs.cropped_tokens()?;
        let (b, s) = tokens.dims2()?;
        let hidden = self
            .rnn
            .forward(&self.gpt_embed.forward(&tokens)?, inputs.lengths)?;
        let mask = pad_mask(inputs.lengths, s, tokens.device())?;
        let embed = self.target_embed(targets, b)?;

        let scores = self.attention.forward(&hidden, &mask, &embed, aux)?;
        Ok(scores.broadcast_sub(&targets.baseline_log_probs.unsqueeze(0)?)?)
    }
}

/// Will any of the condition words appear later in the text?
pub struct TopicPredictor {
    body: FutureEncoder,
}

impl TopicPredictor {
    /// # Errors
    /// Returns an error if weight loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &PredictorConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            body: FutureEncoder::new(config, 0, &vb)?,
        })
    }
}

impl AttributePredictor for TopicPredictor {
    fn task(&self) -> Task {
        Task::Topic
    }

    fn score(&self, inputs: &PredictorInputs<'_>) -> Result<Tensor> {
        let targets = inputs.require_targets(Task::Topic)?;
        self.body.score(inputs, targets, None)
    }
}

/// Will the line end in a word from the target rhyme group?
pub struct RhymePredictor {
    body: FutureEncoder,
    count_syllable_embed: Embedding,
    max_syllables_to_go: usize,
}

impl RhymePredictor {
    /// # Errors
    /// Returns an error if weight loading fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &PredictorConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            body: FutureEncoder::new(config, config.syllable_embed_dim, &vb)?,
            count_syllable_embed: candle_nn::embedding(
                config.max_syllables_to_go + 1,
                config.syllable_embed_dim,
                vb.pp("count_syllable_embed"),
            )?,
            max_syllables_to_go: config.max_syllables_to_go,
        })
    }
}

impl AttributePredictor for RhymePredictor {
    fn task(&self) -> Task {
        Task::Rhyme
    }

    fn score(&self, inputs: &PredictorInputs<'_>) -> Result<Tensor> {
        let targets = inputs.require_targets(Task::Rhyme)?;
        let syllables = inputs.require_syllables(Task::Rhyme)?;

        let syl = embed_syllables(
            &self.count_syllable_embed,
            syllables,
            self.max_syllables_to_go,
        )?;
        let (b, a) = syl.dims2()?;
        let aux = syl
            .unsqueeze(1)?
            .broadcast_as((b, targets.len(), a))?
            .contiguous()?;
        self.body.score(inputs, targets, Some(&aux))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SteerError;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn targets() -> FutureTargets {
        FutureTargets::new(&[1, 3], &[-2.0, -4.0], &Device::Cpu).unwrap()
    }

    #[test]
    fn test_topic_one_score_per_target() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let cfg = PredictorConfig::small(Task::Topic, 12, 5);
        let p = TopicPredictor::new(&cfg, vb).unwrap();

        let tokens = Tensor::new(&[[1u32, 2, 3], [4, 5, 11]], &Device::Cpu).unwrap();
        let t = targets();
        let out = p
            .score(&PredictorInputs::new(&tokens, &[3, 2]).with_targets(&t))
            .unwrap();
        assert_eq!(out.dims(), &[2, 2]);
    }

    #[test]
    fn test_topic_baseline_is_subtracted() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let cfg = PredictorConfig::small(Task::Topic, 12, 5);
        let p = TopicPredictor::new(&cfg, vb).unwrap();
        let tokens = Tensor::new(&[[1u32, 2, 3]], &Device::Cpu).unwrap();

        let low = FutureTargets::new(&[1], &[-2.0], &Device::Cpu).unwrap();
        let high = FutureTargets::new(&[1], &[-1.0], &Device::Cpu).unwrap();
        let a: Vec<Vec<f32>> = p
            .score(&PredictorInputs::new(&tokens, &[3]).with_targets(&low))
            .unwrap()
            .to_vec2()
            .unwrap();
        let b: Vec<Vec<f32>> = p
            .score(&PredictorInputs::new(&tokens, &[3]).with_targets(&high))
            .unwrap()
            .to_vec2()
            .unwrap();
        approx::assert_abs_diff_eq!(a[0][0] - b[0][0], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_trailing_padding_is_ignored() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let cfg = PredictorConfig::small(Task::Topic, 12, 5);
        let p = TopicPredictor::new(&cfg, vb).unwrap();
        let t = targets();

        let short = Tensor::new(&[[1u32, 2]], &Device::Cpu).unwrap();
        let padded = Tensor::new(&[[1u32, 2, 9, 9]], &Device::Cpu).unwrap();
        let a: Vec<Vec<f32>> = p
            .score(&PredictorInputs::new(&short, &[2]).with_targets(&t))
            .unwrap()
            .to_vec2()
            .unwrap();
        let b: Vec<Vec<f32>> = p
            .score(&PredictorInputs::new(&padded, &[2]).with_targets(&t))
            .unwrap()
            .to_vec2()
            .unwrap();
        for (x, y) in a[0].iter().zip(&b[0]) {
            approx::assert_abs_diff_eq!(x, y, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_rhyme_needs_both_side_inputs() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let cfg = PredictorConfig::small(Task::Rhyme, 12, 5);
        let p = RhymePredictor::new(&cfg, vb).unwrap();
        let tokens = Tensor::new(&[[1u32, 2, 3]], &Device::Cpu).unwrap();
        let t = targets();

        let err = p
            .score(&PredictorInputs::new(&tokens, &[3]).with_targets(&t))
            .unwrap_err();
        assert!(matches!(err, SteerError::InvalidInput(_)));

        let syl = Tensor::new(&[6u32], &Device::Cpu).unwrap();
        let out = p
            .score(
                &PredictorInputs::new(&tokens, &[3])
                    .with_targets(&t)
                    .with_syllables_to_go(&syl),
            )
            .unwrap();
        assert_eq!(out.dims(), &[1, 2]);
    }
}
