//! AUGUR: Multi-Model Forecast Consensus Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the store and seeds forecast definitions, then serves the run API
//! and drives the scheduler until Ctrl+C.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use augur::api::{self, ApiContext};
use augur::config::{AppConfig, StorageBackend};
use augur::data::{HeadlineSource, HttpDocumentFetcher};
use augur::engine::{ForecastEngine, Scheduler};
use augur::llm::telemetry::{FanoutTelemetry, InferenceTelemetry, JsonlTelemetry, TracingTelemetry};
use augur::llm::QueryAdapter;
use augur::storage::{ForecastStore, MemoryStore, SqliteStore};

const BANNER: &str = r#"
    _   _   _  ____ _   _ ____
   / \ | | | |/ ___| | | |  _ \
  / _ \| | | | |  _| | | | |_) |
 / ___ \ |_| | |_| | |_| |  _ <
/_/   \_\___/ \____|\___/|_| \_\

  Multi-Model Forecast Consensus Engine
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("AUGUR_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path,
        forecasts = cfg.forecasts.len(),
        storage = ?cfg.storage.backend,
        "AUGUR starting up"
    );

    for (model_id, env_name) in cfg.missing_credentials() {
        warn!(model = %model_id, env = %env_name, "Credential not set; model will fail at run time");
    }

    // -- Storage ---------------------------------------------------------

    let (store, headlines): (Arc<dyn ForecastStore>, Arc<dyn HeadlineSource>) =
        match cfg.storage.backend {
            StorageBackend::Sqlite => {
                let s = Arc::new(SqliteStore::connect(&cfg.storage.url).await?);
                (s.clone(), s)
            }
            StorageBackend::Memory => {
                let s = Arc::new(MemoryStore::new());
                (s.clone(), s)
            }
        };

    let orphaned = store
        .fail_orphaned_runs("interrupted by shutdown before completion")
        .await
        .context("Failed to close out orphaned runs")?;
    if !orphaned.is_empty() {
        warn!(count = orphaned.len(), runs = ?orphaned, "Runs left in flight by a previous process marked failed");
    }

    for forecast in &cfg.forecasts {
        store
            .save_definition(&forecast.definition(), &forecast.models)
            .await
            .with_context(|| format!("Failed to seed forecast {}", forecast.id))?;
        info!(
            forecast_id = %forecast.id,
            models = forecast.models.len(),
            schedule_secs = ?forecast.schedule_interval_secs,
            "Forecast loaded"
        );
    }

    // -- Engine ----------------------------------------------------------

    let mut sinks: Vec<Arc<dyn InferenceTelemetry>> = vec![Arc::new(TracingTelemetry)];
    let jsonl = cfg.telemetry.jsonl_path.as_ref().map(|path| {
        info!(path = %path, "Inference telemetry appended to JSONL");
        Arc::new(JsonlTelemetry::new(path.clone()))
    });
    if let Some(sink) = &jsonl {
        sinks.push(sink.clone());
    }

    let registry = cfg.provider_registry()?;
    info!(providers = ?registry.keys(), "Providers registered");

    let adapter = QueryAdapter::new(
        registry,
        Arc::new(FanoutTelemetry::new(sinks)),
        Duration::from_secs(cfg.engine.call_timeout_secs),
    )
    .with_output_limits(
        cfg.engine.max_output_tokens,
        cfg.engine.reasoning_max_output_tokens,
    );

    let documents = Arc::new(HttpDocumentFetcher::new(Duration::from_secs(
        cfg.engine.document_timeout_secs,
    ))?);

    let engine = ForecastEngine::new(store, headlines, documents, Arc::new(adapter))
        .with_model_concurrency(cfg.engine.model_concurrency);

    // -- API -------------------------------------------------------------

    if cfg.server.enabled {
        let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
            .parse()
            .with_context(|| format!("Invalid server address {}:{}", cfg.server.host, cfg.server.port))?;
        api::spawn_server(Arc::new(ApiContext { engine: engine.clone() }), addr).await?;
    }

    // -- Main loop -------------------------------------------------------

    let scheduler = Scheduler::new(engine);
    let mut interval = tokio::time::interval(Duration::from_secs(cfg.engine.tick_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.engine.tick_interval_secs,
        "Entering scheduler loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match scheduler.tick().await {
                    Ok(tickets) if !tickets.is_empty() => {
                        info!(started = tickets.len(), "Scheduled runs dispatched");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Scheduler tick failed; continuing"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    if let Some(sink) = jsonl {
        if let Err(e) = tokio::task::spawn_blocking(move || sink.flush()).await {
            warn!(error = %e, "Telemetry flush did not complete");
        }
    }

    info!("AUGUR shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("augur=info"));

    let json_logging = std::env::var("AUGUR_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
