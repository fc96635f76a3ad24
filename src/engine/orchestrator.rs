//! Run orchestrator.
//!
//! Sequences one forecast run: headline snapshot → context documents →
//! per-model sampling → consensus → persistence. Every exit path leaves the
//! run in a terminal state, including a panic anywhere inside the task.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::data::{fetch_all, ContextDocument, ExternalDocumentFetcher, HeadlineQuery, HeadlineSource};
use crate::forecast::{aggregate, budget, prompt, ConsensusError, SampleRequest, Sampler};
use crate::llm::QueryAdapter;
use crate::storage::ForecastStore;
use crate::types::{
    ForecastDefinition, ForecastError, ForecastRun, Headline, ModelConfig, ModelResponse,
    ModelSpec, RunStatus,
};

/// Resolves a credential env-var name to its value.
pub type CredentialLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Handle to a run executing in the background.
///
/// Dropping the ticket detaches the task; the run still finishes and
/// records its own terminal status.
pub struct RunTicket {
    pub run_id: Uuid,
    handle: JoinHandle<RunStatus>,
}

impl RunTicket {
    /// Wait for the run to reach a terminal status.
    pub async fn wait(self) -> RunStatus {
        match self.handle.await {
            Ok(status) => status,
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "Run task aborted");
                RunStatus::Failed
            }
        }
    }
}

#[derive(Clone)]
pub struct ForecastEngine {
    store: Arc<dyn ForecastStore>,
    headlines: Arc<dyn HeadlineSource>,
    documents: Arc<dyn ExternalDocumentFetcher>,
    adapter: Arc<QueryAdapter>,
    credentials: CredentialLookup,
    model_concurrency: usize,
}

impl ForecastEngine {
    pub fn new(
        store: Arc<dyn ForecastStore>,
        headlines: Arc<dyn HeadlineSource>,
        documents: Arc<dyn ExternalDocumentFetcher>,
        adapter: Arc<QueryAdapter>,
    ) -> Self {
        Self {
            store,
            headlines,
            documents,
            adapter,
            credentials: Arc::new(|name: &str| std::env::var(name).ok()),
            model_concurrency: 1,
        }
    }

    /// Models sampled at once; responses keep model-list order regardless.
    pub fn with_model_concurrency(mut self, n: usize) -> Self {
        self.model_concurrency = n.max(1);
        self
    }

    pub fn with_credentials(mut self, lookup: CredentialLookup) -> Self {
        self.credentials = lookup;
        self
    }

    pub fn store(&self) -> &Arc<dyn ForecastStore> {
        &self.store
    }

    /// Create the run, mark it running, and execute it in a detached task.
    ///
    /// Returns once the run row exists, so the id can be polled at once.
    pub async fn start_run(&self, forecast_id: &str) -> Result<RunTicket> {
        let run = ForecastRun::new(forecast_id, Vec::new());
        let run_id = run.id;

        self.store
            .create_run(&run)
            .await
            .context("Failed to create run")?;
        if let Err(e) = self
            .store
            .update_run_status(run_id, RunStatus::Running, None)
            .await
        {
            self.fail_run(run_id, &format!("could not start: {e:#}")).await;
            return Err(e.context("Failed to mark run running"));
        }

        info!(run_id = %run_id, forecast_id, "Run started");

        let engine = self.clone();
        let forecast_id = forecast_id.to_string();
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(engine.execute(run_id, &forecast_id))
                .catch_unwind()
                .await;

            let message = match outcome {
                Ok(Ok(())) => return RunStatus::Completed,
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => format!("run panicked: {}", panic_message(panic.as_ref())),
            };

            engine.fail_run(run_id, &message).await;
            RunStatus::Failed
        });

        Ok(RunTicket { run_id, handle })
    }

    async fn fail_run(&self, run_id: Uuid, message: &str) {
        error!(run_id = %run_id, error = %message, "Run failed");
        if let Err(e) = self
            .store
            .update_run_status(run_id, RunStatus::Failed, Some(message))
            .await
        {
            error!(run_id = %run_id, error = %e, "Could not record run failure");
        }
    }

    /// The body of a run. Any error returned here fails the run.
    async fn execute(&self, run_id: Uuid, forecast_id: &str) -> Result<()> {
        let started = Instant::now();

        let definition = self
            .store
            .get_definition(forecast_id)
            .await
            .map_err(|e| ForecastError::Storage(format!("{e:#}")))?
            .ok_or_else(|| ForecastError::DefinitionNotFound(forecast_id.to_string()))?;

        let specs = self
            .store
            .get_models(forecast_id)
            .await
            .map_err(|e| ForecastError::Storage(format!("{e:#}")))?;
        if specs.is_empty() {
            return Err(ForecastError::NoModels(forecast_id.to_string()).into());
        }

        // -- Snapshot inputs -------------------------------------------------

        let headlines = self
            .headlines
            .query(&HeadlineQuery {
                categories: definition.categories.clone(),
                limit: definition.headline_count as usize,
            })
            .await
            .map_err(|e| ForecastError::HeadlineFetch(format!("{e:#}")))?;

        self.store
            .set_headline_snapshot(run_id, &headlines)
            .await
            .map_err(|e| ForecastError::Storage(format!("{e:#}")))?;

        let documents = fetch_all(self.documents.as_ref(), &definition.context_urls).await;

        info!(
            run_id = %run_id,
            forecast_id,
            models = specs.len(),
            headlines = headlines.len(),
            documents = documents.len(),
            iterations = definition.effective_iterations(),
            "Inputs frozen, sampling models"
        );

        // -- Sample every model ----------------------------------------------

        let pending: Vec<_> = specs
            .iter()
            .map(|spec| self.sample_model(run_id, &definition, spec, &headlines, &documents))
            .collect();
        let responses: Vec<ModelResponse> = stream::iter(pending)
            .buffered(self.model_concurrency)
            .collect()
            .await;

        for response in &responses {
            self.store
                .save_model_response(response)
                .await
                .map_err(|e| ForecastError::Storage(format!("{e:#}")))?;
        }

        // -- Consensus -------------------------------------------------------

        let weights: HashMap<String, f64> =
            specs.iter().map(|s| (s.id.clone(), s.weight)).collect();

        let result = aggregate(run_id, definition.prediction_type, &responses, &weights)
            .map_err(|e| match e {
                ConsensusError::NoContributingModels(_) => ForecastError::AllModelsFailed(specs.len()),
                other => ForecastError::Consensus(other.to_string()),
            })?;

        self.store
            .save_result(&result)
            .await
            .map_err(|e| ForecastError::Storage(format!("{e:#}")))?;

        self.store
            .update_run_status(run_id, RunStatus::Completed, None)
            .await
            .map_err(|e| ForecastError::Storage(format!("{e:#}")))?;

        info!(
            run_id = %run_id,
            forecast_id,
            result = %result,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run completed"
        );
        Ok(())
    }

    /// Budget, prompt and sample one model. Never fails: problems become a
    /// failed response.
    async fn sample_model(
        &self,
        run_id: Uuid,
        definition: &ForecastDefinition,
        spec: &ModelSpec,
        headlines: &[Headline],
        documents: &[ContextDocument],
    ) -> ModelResponse {
        let lookup = self.credentials.clone();
        let model = match ModelConfig::resolve(spec, |name| lookup(name)) {
            Ok(m) => m,
            Err(e) => {
                warn!(run_id = %run_id, model = %spec.id, error = %e, "Model skipped");
                return ModelResponse::failed(run_id, spec, e.to_string());
            }
        };

        let budgeted = budget::budget(model.model_name(), headlines);
        let user_prompt = prompt::build(definition, budgeted, documents);
        let system = prompt::system_prompt(definition.prediction_type);

        Sampler::new(&self.adapter)
            .sample(SampleRequest {
                run_id,
                forecast_id: &definition.id,
                model: &model,
                prediction_type: definition.prediction_type,
                system,
                prompt: &user_prompt,
                iterations: definition.effective_iterations(),
            })
            .await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
