//! Forecast pipeline stages.
//!
//! Pure functions and per-model sampling that turn a definition and a
//! headline snapshot into one consensus result.

pub mod budget;
pub mod consensus;
pub mod parser;
pub mod prompt;
pub mod sampler;
pub mod stats;

pub use consensus::{aggregate, ConsensusError};
pub use sampler::{SampleRequest, Sampler};
