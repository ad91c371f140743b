//! Attribute predictors.
//!
//! Five small LSTM scorers that estimate whether a partial sequence will end up with an
//! attribute. Decoders hold them as `Box<dyn AttributePredictor>`, built once from the
//! checkpoint's [`PredictorConfig`].

pub mod attention;
pub mod causal;
pub mod config;
pub mod future;
pub mod lstm;
pub mod predictor;

use candle_nn::VarBuilder;

use crate::error::{Result, SteerError};

// Re-exports for convenience
pub use causal::{FormalityPredictor, IambicPredictor, NewlinePredictor};
pub use config::{PredictorConfig, ScoreShape, Task};
pub use future::{RhymePredictor, TopicPredictor};
pub use predictor::{AttributePredictor, FutureTargets, PredictorInputs, last_position_scores};

/// Construct the predictor named by `config.task`.
///
/// # Errors
/// Returns an error if the config is invalid or weight loading fails.
#[allow(clippy::needless_pass_by_value)]
pub fn build_predictor(
    config: &PredictorConfig,
    vb: VarBuilder,
) -> Result<Box<dyn AttributePredictor>> {
    config.validate().map_err(SteerError::Config)?;
    let predictor: Box<dyn AttributePredictor> = match config.task {
        Task::Topic => Box::new(TopicPredictor::new(config, vb)?),
        Task::Formality => Box::new(FormalityPredictor::new(config, vb)?),
        Task::Iambic => Box::new(IambicPredictor::new(config, vb)?),
        Task::Rhyme => Box::new(RhymePredictor::new(config, vb)?),
        Task::Newline => Box::new(NewlinePredictor::new(config, vb)?),
    };
    Ok(predictor)
}
