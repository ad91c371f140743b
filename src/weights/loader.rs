use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use log::info;
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};

use crate::error::SteerError;
use crate::lm::{GptConfig, GptModel, HfTokenizer};
use crate::model::{AttributePredictor, PredictorConfig, Task, build_predictor};

/// Metadata stored next to a predictor's parameters as `<stem>.json`.
///
/// Only `config` is consumed at decode time; the rest is logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub config: PredictorConfig,
    #[serde(default)]
    pub epoch: usize,
    #[serde(default)]
    pub best_metric: Option<f64>,
    #[serde(default)]
    pub data_start_index: usize,
}

impl CheckpointMeta {
    #[must_use]
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            config,
            epoch: 0,
            best_metric: None,
            data_start_index: 0,
        }
    }

    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw).with_context(|| format!("write {}", path.display()))
    }

    /// # Errors
    /// Returns an error if the file is missing or malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read checkpoint metadata {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
    }
}

/// `(<stem>.safetensors, <stem>.json)`. A stem given with either extension is accepted.
#[must_use]
pub fn checkpoint_paths(stem: &Path) -> (PathBuf, PathBuf) {
    let stem = match stem.extension().and_then(|e| e.to_str()) {
        Some("safetensors" | "json") => stem.with_extension(""),
        _ => stem.to_path_buf(),
    };
    (stem.with_extension("safetensors"), stem.with_extension("json"))
}

/// Total number of scalars stored in a safetensors buffer.
///
/// # Errors
/// Returns an error if `data` is not a safetensors buffer.
pub fn parameter_count(data: &[u8]) -> Result<usize> {
    let tensors = SafeTensors::deserialize(data).context("parse safetensors header")?;
    Ok(tensors
        .tensors()
        .iter()
        .map(|(_, view)| view.shape().iter().product::<usize>())
        .sum())
}

/// Load a trained predictor, checking that it was trained for `expected`.
///
/// # Errors
/// Returns an error if either file is missing, the config is invalid, the checkpoint belongs to
/// another task, or a parameter is absent or misshapen.
pub fn load_predictor(
    stem: &Path,
    expected: Task,
    device: &Device,
) -> Result<(Box<dyn AttributePredictor>, CheckpointMeta)> {
    let (weights_path, meta_path) = checkpoint_paths(stem);
    let meta = CheckpointMeta::load(&meta_path)?;
    if meta.config.task != expected {
        return Err(SteerError::TaskMismatch {
            expected,
            found: meta.config.task,
        }
        .into());
    }

    let data = std::fs::read(&weights_path)
        .with_context(|| format!("read weights {}", weights_path.display()))?;
    let params = parameter_count(&data)
        .with_context(|| format!("inspect {}", weights_path.display()))?;
    let vb = VarBuilder::from_buffered_safetensors(data, DType::F32, device)?;
    let predictor = build_predictor(&meta.config, vb)
        .with_context(|| format!("load {expected} predictor from {}", weights_path.display()))?;
    info!(
        "loaded {expected} predictor from {} (epoch {}, {params} parameters)",
        weights_path.display(),
        meta.epoch
    );
    Ok((predictor, meta))
}

/// Load a GPT-2 directory holding `config.json`, `model.safetensors` and `tokenizer.json`.
///
/// # Errors
/// Returns an error if a file is missing or the config is inconsistent.
pub fn load_gpt_dir(dir: &Path, device: &Device) -> Result<(GptModel, HfTokenizer)> {
    let config_path = dir.join("config.json");
    let raw = std::fs::read_to_string(&config_path)
        .with_context(|| format!("read config {}", config_path.display()))?;
    let config: GptConfig =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", config_path.display()))?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid GptConfig")?;

    let weights_path = dir.join("model.safetensors");
    let model = crate::lm::gpt::load_gpt(&weights_path, config, device)
        .with_context(|| format!("load base model {}", weights_path.display()))?;
    let tokenizer = HfTokenizer::from_file(&dir.join("tokenizer.json"))
        .with_context(|| format!("load tokenizer from {}", dir.display()))?;
    info!(
        "loaded base model from {} ({} layers, vocab {})",
        dir.display(),
        model.config().n_layer,
        model.config().vocab_size
    );
    Ok((model, tokenizer))
}

/// Resolve `cpu` or `cuda` (device 0).
///
/// # Errors
/// Returns an error for an unknown name or when CUDA support is unavailable.
pub fn select_device(name: &str) -> Result<Device> {
    match name {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(0).context("CUDA device unavailable (build with --features cuda)"),
        other => anyhow::bail!("unknown device {other:?}; expected cpu or cuda"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn write_checkpoint(dir: &Path, config: &PredictorConfig) -> PathBuf {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        build_predictor(config, vb).unwrap();
        let stem = dir.join("ckpt");
        varmap.save(stem.with_extension("safetensors")).unwrap();
        CheckpointMeta {
            epoch: 7,
            ..CheckpointMeta::new(config.clone())
        }
        .save(&stem.with_extension("json"))
        .unwrap();
        stem
    }

    #[test]
    fn test_checkpoint_paths_accept_extensions() {
        let (w, m) = checkpoint_paths(Path::new("ckpt/topic.safetensors"));
        assert_eq!(w, PathBuf::from("ckpt/topic.safetensors"));
        assert_eq!(m, PathBuf::from("ckpt/topic.json"));
        let (w, _) = checkpoint_paths(Path::new("ckpt/topic"));
        assert_eq!(w, PathBuf::from("ckpt/topic.safetensors"));
    }

    #[test]
    fn test_load_predictor_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let stem = write_checkpoint(dir.path(), &PredictorConfig::small(Task::Iambic, 12, 0));
        let (predictor, meta) = load_predictor(&stem, Task::Iambic, &Device::Cpu).unwrap();
        assert_eq!(predictor.task(), Task::Iambic);
        assert_eq!(meta.epoch, 7);
    }

    #[test]
    fn test_load_predictor_rejects_other_task() {
        let dir = tempfile::tempdir().unwrap();
        let stem = write_checkpoint(dir.path(), &PredictorConfig::small(Task::Newline, 12, 0));
        let err = load_predictor(&stem, Task::Iambic, &Device::Cpu).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<SteerError>(),
            Some(SteerError::TaskMismatch { .. })
        ));
    }

    #[test]
    fn test_parameter_count() {
        let dir = tempfile::tempdir().unwrap();
        let stem = write_checkpoint(dir.path(), &PredictorConfig::small(Task::Formality, 12, 0));
        let data = std::fs::read(stem.with_extension("safetensors")).unwrap();
        assert!(parameter_count(&data).unwrap() > 12 * 16);
        assert!(parameter_count(b"not safetensors").is_err());
    }

    #[test]
    fn test_select_device() {
        assert!(matches!(select_device("cpu").unwrap(), Device::Cpu));
        assert!(select_device("tpu").is_err());
    }
}
