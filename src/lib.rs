//! AUGUR: Multi-Model Forecast Consensus Engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod config;
pub mod data;
pub mod engine;
pub mod forecast;
pub mod llm;
pub mod storage;
pub mod types;
