#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

//! Attribute-steered decoding.
//!
//! A frozen language model proposes next-token candidates; small predictors estimate whether
//! each candidate keeps the sequence on course for a desired attribute, and the two scores are
//! fused before a token is chosen.

pub mod error;
pub mod inference;
pub mod lm;
pub mod metrics;
pub mod model;
pub mod oracle;
pub mod tables;
pub mod weights;

pub use error::{Result, SteerError};
