//! Core engine: run orchestration and scheduling.

pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{CredentialLookup, ForecastEngine, RunTicket};
pub use scheduler::Scheduler;
