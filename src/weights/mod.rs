//! Checkpoint and base-model loading.

pub mod loader;

pub use loader::{
    CheckpointMeta, checkpoint_paths, load_gpt_dir, load_predictor, parameter_count, select_device,
};
