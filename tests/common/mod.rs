//! Deterministic stand-ins for the base model, tokenizer and predictors.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::HashMap;

use candle_core::{Device, Tensor};
use steer_gen::error::{Result, SteerError};
use steer_gen::lm::{LanguageModel, TextTokenizer};
use steer_gen::model::{AttributePredictor, PredictorInputs, ScoreShape, Task};

/// Words of the test vocabulary; ids follow this order, fillers `w0..` come after.
pub const WORDS: &[&str] = &[
    "the", "weather", "today", "is", "rain", "storm", "sun", "cat", "sat", "on", "a", "mat",
    "hat", "day", "away", "shall", "i", "compare", "thee", "to", "summer", "\n", ".",
];

/// Word-level tokenizer: every word but `.` and `\n` is stored with a leading space.
pub struct WordTokenizer {
    tokens: Vec<String>,
    ids: HashMap<String, u32>,
}

impl WordTokenizer {
    pub fn new(size: usize) -> Self {
        let mut tokens: Vec<String> = WORDS
            .iter()
            .map(|w| match *w {
                "." | "\n" => (*w).to_string(),
                w => format!(" {w}"),
            })
            .collect();
        let fillers = size.saturating_sub(tokens.len());
        tokens.extend((0..fillers).map(|i| format!(" w{i}")));
        let ids = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), u32::try_from(i).unwrap()))
            .collect();
        Self { tokens, ids }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn id(&self, word: &str) -> u32 {
        self.token_id(&format!(" {word}"))
            .or_else(|| self.token_id(word))
            .unwrap()
    }
}

impl TextTokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut out = Vec::new();
        for word in text.split_whitespace() {
            let (stem, dot) = match word.strip_suffix('.') {
                Some(stem) => (stem, true),
                None => (word, false),
            };
            if !stem.is_empty() {
                let id = self
                    .ids
                    .get(&format!(" {stem}"))
                    .ok_or_else(|| SteerError::Tokenizer(format!("unknown word {stem:?}")))?;
                out.push(*id);
            }
            if dot {
                out.push(self.ids["."]);
            }
        }
        Ok(out)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        ids.iter()
            .map(|&id| {
                self.tokens
                    .get(id as usize)
                    .map(String::as_str)
                    .ok_or_else(|| SteerError::Tokenizer(format!("id {id} out of range")))
            })
            .collect()
    }

    fn token_id(&self, token: &str) -> Option<u32> {
        self.ids.get(token).copied()
    }
}

/// Host-side logits that depend on the last token and the sequence length, so every step ranks
/// the vocabulary differently.
fn pattern_logits(last: u32, len: usize, vocab: usize) -> Vec<f32> {
    (0..vocab)
        .map(|v| {
            let h = (v * 37 + last as usize * 11 + len * 5) % vocab;
            #[allow(clippy::cast_precision_loss)]
            let x = h as f32 / vocab as f32;
            x * 4.0
        })
        .collect()
}

/// Decoder-only mock. `favored` (if any) gets a large bonus every step.
pub struct PatternLm {
    pub vocab: usize,
    pub favored: Option<u32>,
    pub device: Device,
    pub calls: Cell<usize>,
}

impl PatternLm {
    pub fn new(vocab: usize) -> Self {
        Self {
            vocab,
            favored: None,
            device: Device::Cpu,
            calls: Cell::new(0),
        }
    }

    pub fn favoring(vocab: usize, token: u32) -> Self {
        Self {
            favored: Some(token),
            ..Self::new(vocab)
        }
    }

    /// What the model returns for one prefix.
    pub fn row_logits(&self, prefix: &[u32]) -> Vec<f32> {
        let last = prefix.last().copied().unwrap_or(0);
        let mut row = pattern_logits(last, prefix.len(), self.vocab);
        if let Some(f) = self.favored {
            row[f as usize] += 100.0;
        }
        row
    }
}

impl LanguageModel for PatternLm {
    fn next_token_logits(&self, input_ids: &Tensor, _mask: Option<&Tensor>) -> Result<Tensor> {
        self.calls.set(self.calls.get() + 1);
        let rows: Vec<Vec<u32>> = input_ids.to_vec2()?;
        let flat: Vec<f32> = rows.iter().flat_map(|r| self.row_logits(r)).collect();
        Ok(Tensor::from_vec(flat, (rows.len(), self.vocab), &self.device)?)
    }

    fn vocab_size(&self) -> usize {
        self.vocab
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

/// Encoder–decoder mock: logits depend on the first source token and the decoder prefix.
pub struct PatternSeq2Seq {
    pub vocab: usize,
    pub device: Device,
}

impl LanguageModel for PatternSeq2Seq {
    fn next_token_logits(&self, _input_ids: &Tensor, _mask: Option<&Tensor>) -> Result<Tensor> {
        Err(SteerError::Unsupported("decoder needs encoder input"))
    }

    fn next_decoder_logits(
        &self,
        encoder_ids: &Tensor,
        _encoder_mask: Option<&Tensor>,
        decoder_ids: &Tensor,
    ) -> Result<Tensor> {
        let src: Vec<Vec<u32>> = encoder_ids.to_vec2()?;
        let dec: Vec<Vec<u32>> = decoder_ids.to_vec2()?;
        let flat: Vec<f32> = src
            .iter()
            .zip(&dec)
            .flat_map(|(s, d)| {
                let last = d.last().copied().unwrap_or(0) + s[0];
                pattern_logits(last, d.len(), self.vocab)
            })
            .collect();
        Ok(Tensor::from_vec(flat, (src.len(), self.vocab), &self.device)?)
    }

    fn vocab_size(&self) -> usize {
        self.vocab
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn is_encoder_decoder(&self) -> bool {
        true
    }
}

/// Predictor that likes one token: +5 where a prefix ends in `favored`, -5 elsewhere.
///
/// Counts its calls.
pub struct SpyPredictor {
    pub task: Task,
    pub favored: u32,
    pub calls: Cell<usize>,
}

impl SpyPredictor {
    pub fn new(task: Task, favored: u32) -> Self {
        Self {
            task,
            favored,
            calls: Cell::new(0),
        }
    }
}

impl AttributePredictor for SpyPredictor {
    fn task(&self) -> Task {
        self.task
    }

    fn score(&self, inputs: &PredictorInputs<'_>) -> Result<Tensor> {
        self.calls.set(self.calls.get() + 1);
        let tokens: Vec<Vec<u32>> = inputs.cropped_tokens()?.to_vec2()?;
        let score = |t: u32| if t == self.favored { 5.0f32 } else { -5.0 };
        let device = inputs.tokens.device();
        match self.task.score_shape() {
            ScoreShape::PerPosition => {
                let width = tokens[0].len();
                let flat: Vec<f32> = tokens.iter().flatten().map(|&t| score(t)).collect();
                Ok(Tensor::from_vec(flat, (tokens.len(), width), device)?)
            }
            ScoreShape::PerTarget => {
                let n = inputs.targets.map_or(1, |t| t.len());
                let flat: Vec<f32> = tokens
                    .iter()
                    .zip(inputs.lengths)
                    .flat_map(|(row, &len)| std::iter::repeat_n(score(row[len - 1]), n))
                    .collect();
                Ok(Tensor::from_vec(flat, (tokens.len(), n), device)?)
            }
        }
    }
}

/// Decoder-only mock that plays back `script` after `offset` prompt tokens, one token per step.
/// Past the script it falls back to the plain pattern.
pub struct ScriptedLm {
    pub vocab: usize,
    pub offset: usize,
    pub script: Vec<u32>,
    pub device: Device,
}

impl LanguageModel for ScriptedLm {
    fn next_token_logits(&self, input_ids: &Tensor, _mask: Option<&Tensor>) -> Result<Tensor> {
        let rows: Vec<Vec<u32>> = input_ids.to_vec2()?;
        let flat: Vec<f32> = rows
            .iter()
            .flat_map(|r| {
                let mut row = pattern_logits(r.last().copied().unwrap_or(0), r.len(), self.vocab);
                let step = r.len().checked_sub(self.offset);
                if let Some(&t) = step.and_then(|s| self.script.get(s)) {
                    row[t as usize] += 100.0;
                }
                row
            })
            .collect();
        Ok(Tensor::from_vec(flat, (rows.len(), self.vocab), &self.device)?)
    }

    fn vocab_size(&self) -> usize {
        self.vocab
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

/// Decoder-only mock where `end` wins once a row starting with `marker` reaches `stop_at`
/// tokens. Every other row never ends.
pub struct StopsEarlyLm {
    pub vocab: usize,
    pub marker: u32,
    pub end: u32,
    pub stop_at: usize,
    pub device: Device,
}

impl LanguageModel for StopsEarlyLm {
    fn next_token_logits(&self, input_ids: &Tensor, _mask: Option<&Tensor>) -> Result<Tensor> {
        let rows: Vec<Vec<u32>> = input_ids.to_vec2()?;
        let flat: Vec<f32> = rows
            .iter()
            .flat_map(|r| {
                let mut row = pattern_logits(r.last().copied().unwrap_or(0), r.len(), self.vocab);
                let stops = r.first() == Some(&self.marker) && r.len() >= self.stop_at;
                row[self.end as usize] += if stops { 100.0 } else { -100.0 };
                row
            })
            .collect();
        Ok(Tensor::from_vec(flat, (rows.len(), self.vocab), &self.device)?)
    }

    fn vocab_size(&self) -> usize {
        self.vocab
    }

    fn device(&self) -> &Device {
        &self.device
    }
}
