//! In-process store on a `tokio::sync::RwLock`.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::ForecastStore;
use crate::data::{HeadlineQuery, HeadlineSource};
use crate::types::{
    ForecastDefinition, ForecastResult, ForecastRun, Headline, ModelResponse, ModelSpec,
    RunDetail, RunStatus,
};

#[derive(Default)]
struct Inner {
    definitions: BTreeMap<String, ForecastDefinition>,
    models: HashMap<String, Vec<ModelSpec>>,
    runs: HashMap<Uuid, ForecastRun>,
    responses: HashMap<Uuid, Vec<ModelResponse>>,
    results: HashMap<Uuid, ForecastResult>,
    headlines: Vec<Headline>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append ingested headlines.
    pub async fn insert_headlines(&self, headlines: impl IntoIterator<Item = Headline>) {
        let mut inner = self.inner.write().await;
        inner.headlines.extend(headlines);
    }
}

#[async_trait]
impl ForecastStore for MemoryStore {
    async fn get_definition(&self, forecast_id: &str) -> Result<Option<ForecastDefinition>> {
        Ok(self.inner.read().await.definitions.get(forecast_id).cloned())
    }

    async fn get_models(&self, forecast_id: &str) -> Result<Vec<ModelSpec>> {
        Ok(self
            .inner
            .read()
            .await
            .models
            .get(forecast_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_run(&self, run: &ForecastRun) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.runs.contains_key(&run.id) {
            bail!("Run {} already exists", run.id);
        }
        inner.runs.insert(run.id, run.clone());
        debug!(run_id = %run.id, forecast_id = %run.forecast_id, "Run created");
        Ok(())
    }

    async fn set_headline_snapshot(&self, run_id: Uuid, headlines: &[Headline]) -> Result<()> {
        let mut inner = self.inner.write().await;
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| anyhow!("Run {run_id} not found"))?;
        run.headline_snapshot = headlines.to_vec();
        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| anyhow!("Run {run_id} not found"))?;
        run.transition(status, error)?;
        Ok(())
    }

    async fn save_model_response(&self, response: &ModelResponse) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.runs.contains_key(&response.run_id) {
            bail!("Run {} not found", response.run_id);
        }
        inner
            .responses
            .entry(response.run_id)
            .or_default()
            .push(response.clone());
        Ok(())
    }

    async fn save_result(&self, result: &ForecastResult) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.runs.contains_key(&result.run_id) {
            bail!("Run {} not found", result.run_id);
        }
        if inner.results.contains_key(&result.run_id) {
            bail!("Run {} already has a result", result.run_id);
        }
        inner.results.insert(result.run_id, result.clone());
        Ok(())
    }

    async fn get_run_detail(&self, run_id: Uuid) -> Result<Option<RunDetail>> {
        let inner = self.inner.read().await;
        Ok(inner.runs.get(&run_id).map(|run| RunDetail {
            run: run.clone(),
            responses: inner.responses.get(&run_id).cloned().unwrap_or_default(),
            result: inner.results.get(&run_id).cloned(),
        }))
    }

    async fn save_definition(
        &self,
        definition: &ForecastDefinition,
        models: &[ModelSpec],
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .definitions
            .insert(definition.id.clone(), definition.clone());
        inner.models.insert(definition.id.clone(), models.to_vec());
        Ok(())
    }

    async fn list_definitions(&self) -> Result<Vec<ForecastDefinition>> {
        Ok(self.inner.read().await.definitions.values().cloned().collect())
    }

    async fn list_runs(&self, forecast_id: &str, limit: usize) -> Result<Vec<ForecastRun>> {
        let inner = self.inner.read().await;
        let mut runs: Vec<ForecastRun> = inner
            .runs
            .values()
            .filter(|r| r.forecast_id == forecast_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let existed = inner.runs.remove(&run_id).is_some();
        inner.responses.remove(&run_id);
        inner.results.remove(&run_id);
        if existed {
            debug!(run_id = %run_id, "Run deleted");
        }
        Ok(existed)
    }

    async fn fail_orphaned_runs(&self, message: &str) -> Result<Vec<Uuid>> {
        let mut inner = self.inner.write().await;
        let mut failed = Vec::new();
        for run in inner.runs.values_mut() {
            if !run.status.is_terminal() {
                run.transition(RunStatus::Failed, Some(message))?;
                failed.push(run.id);
            }
        }
        Ok(failed)
    }
}

#[async_trait]
impl HeadlineSource for MemoryStore {
    async fn query(&self, query: &HeadlineQuery) -> Result<Vec<Headline>> {
        let inner = self.inner.read().await;
        let mut matching: Vec<Headline> = inner
            .headlines
            .iter()
            .filter(|h| query.matches(h))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(query.limit);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract;

    #[tokio::test]
    async fn test_definitions_roundtrip() {
        contract::definitions_roundtrip(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        contract::run_lifecycle(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_failed_run_keeps_error() {
        contract::failed_run_keeps_error(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_list_and_delete_runs() {
        contract::list_and_delete_runs(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_orphaned_runs_failed() {
        contract::orphaned_runs_failed(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_headline_query_most_recent_first() {
        let store = MemoryStore::new();
        let mut sports = contract::headline("s", 0);
        sports.category = "sports".into();
        store
            .insert_headlines(vec![
                contract::headline("old", 60),
                contract::headline("new", 1),
                sports,
                contract::headline("mid", 30),
            ])
            .await;

        let got = store
            .query(&HeadlineQuery {
                categories: vec!["energy".into()],
                limit: 2,
            })
            .await
            .unwrap();
        let ids: Vec<&str> = got.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);
    }
}
