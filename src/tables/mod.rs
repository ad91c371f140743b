//! Immutable lookup tables shared by predictors and decoders.

pub mod rhyme;
pub mod vocab;

pub use rhyme::{RhymeTable, RhymeTarget, UNKNOWN_RHYME_GROUP};
pub use vocab::{DEFAULT_MAX_VOCAB, PAD_TOKEN, WordVocab};
