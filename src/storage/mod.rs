//! Persistence layer.
//!
//! The `ForecastStore` trait is the only way the engine reads definitions
//! and records runs. Two implementations: `MemoryStore` for tests and
//! ephemeral deployments, `SqliteStore` for durable state. Both also act as
//! the `HeadlineSource` over whatever the ingestion pipeline has written.
//!
//! Stores enforce the run lifecycle: `update_run_status` rejects any
//! transition `RunStatus::can_transition_to` does not allow, and a run
//! accepts at most one result.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{
    ForecastDefinition, ForecastResult, ForecastRun, Headline, ModelResponse, ModelSpec,
    RunDetail, RunStatus,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait ForecastStore: Send + Sync {
    async fn get_definition(&self, forecast_id: &str) -> Result<Option<ForecastDefinition>>;

    /// Models of a forecast, in configured order.
    async fn get_models(&self, forecast_id: &str) -> Result<Vec<ModelSpec>>;

    async fn create_run(&self, run: &ForecastRun) -> Result<()>;

    async fn set_headline_snapshot(&self, run_id: Uuid, headlines: &[Headline]) -> Result<()>;

    /// Move a run forward; stamps `completed_at` on terminal states.
    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()>;

    async fn save_model_response(&self, response: &ModelResponse) -> Result<()>;

    async fn save_result(&self, result: &ForecastResult) -> Result<()>;

    /// Run plus responses (save order) and result, if the run exists.
    async fn get_run_detail(&self, run_id: Uuid) -> Result<Option<RunDetail>>;

    /// Insert or replace a definition and its full model list.
    async fn save_definition(
        &self,
        definition: &ForecastDefinition,
        models: &[ModelSpec],
    ) -> Result<()>;

    async fn list_definitions(&self) -> Result<Vec<ForecastDefinition>>;

    /// Most recent first.
    async fn list_runs(&self, forecast_id: &str, limit: usize) -> Result<Vec<ForecastRun>>;

    /// Delete a run and everything it owns. Returns whether it existed.
    async fn delete_run(&self, run_id: Uuid) -> Result<bool>;

    /// Fail every `pending` or `running` run with `message`.
    ///
    /// Called once at startup, before any run of this process exists, to
    /// close out runs a previous process left in flight. Returns the ids.
    async fn fail_orphaned_runs(&self, message: &str) -> Result<Vec<Uuid>>;
}

/// Shared transition check for store implementations.
pub(crate) fn check_transition(run_id: Uuid, from: RunStatus, to: RunStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(crate::types::ForecastError::InvalidTransition { run_id, from, to }.into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
