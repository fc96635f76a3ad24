//! Inference-call telemetry.
//!
//! Every provider call produces one `InferenceLog`. Sinks are
//! fire-and-forget: a sink that fails logs a warning and carries on, it
//! never fails the forecast run that produced the call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{info, warn};

use super::{is_reasoning_model, CallContext, TokenUsage};

/// Returns (input_cost_per_1k, output_cost_per_1k) in USD for known models.
fn model_costs(model: &str) -> (f64, f64) {
    let m = model.to_lowercase();
    match m.as_str() {
        m if m.contains("claude") && m.contains("opus") => (0.015, 0.075),
        m if m.contains("claude") && m.contains("sonnet") => (0.003, 0.015),
        m if m.contains("claude") && m.contains("haiku") => (0.0008, 0.004),
        m if m.contains("gpt-4o-mini") => (0.00015, 0.0006),
        m if m.contains("gpt-4o") => (0.0025, 0.010),
        m if is_reasoning_model(m) => (0.010, 0.040),
        m if m.contains("grok") => (0.003, 0.015),
        // Conservative default
        _ => (0.005, 0.015),
    }
}

/// Approximate USD cost of a call.
pub fn estimate_cost(model: &str, usage: &TokenUsage) -> f64 {
    let (input, output) = model_costs(model);
    (usage.prompt_tokens as f64 / 1000.0) * input
        + (usage.completion_tokens as f64 / 1000.0) * output
}

/// One provider call, as recorded for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceLog {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub operation: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    pub estimated_cost_usd: f64,
    pub error: Option<String>,
    pub run_id: String,
    pub forecast_id: String,
    pub model_id: String,
    pub sample: u32,
}

impl InferenceLog {
    pub fn new(
        provider: &str,
        model: &str,
        ctx: &CallContext,
        model_id: &str,
        usage: TokenUsage,
        latency: Duration,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            provider: provider.to_string(),
            model: model.to_string(),
            operation: ctx.operation.to_string(),
            usage,
            latency_ms: latency.as_millis() as u64,
            estimated_cost_usd: estimate_cost(model, &usage),
            error,
            run_id: ctx.run_id.to_string(),
            forecast_id: ctx.forecast_id.clone(),
            model_id: model_id.to_string(),
            sample: ctx.sample,
        }
    }
}

/// Audit sink for inference calls.
pub trait InferenceTelemetry: Send + Sync {
    fn record(&self, log: &InferenceLog);
}

/// Emits each call as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl InferenceTelemetry for TracingTelemetry {
    fn record(&self, log: &InferenceLog) {
        info!(
            target: "augur::inference",
            provider = %log.provider,
            model = %log.model,
            operation = %log.operation,
            prompt_tokens = log.usage.prompt_tokens,
            completion_tokens = log.usage.completion_tokens,
            latency_ms = log.latency_ms,
            cost = format!("${:.4}", log.estimated_cost_usd),
            error = log.error.as_deref().unwrap_or(""),
            run_id = %log.run_id,
            forecast_id = %log.forecast_id,
            model_id = %log.model_id,
            sample = log.sample,
            "Inference call"
        );
    }
}

enum WriterMsg {
    Line(String),
    Flush(mpsc::Sender<()>),
}

/// Appends each call as one JSON line to a file.
///
/// Lines are handed to a dedicated writer thread so file I/O never runs
/// on an async worker. Lines keep record order.
pub struct JsonlTelemetry {
    path: PathBuf,
    tx: mpsc::Sender<WriterMsg>,
}

impl JsonlTelemetry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::channel();
        let writer_path = path.clone();
        if let Err(e) = std::thread::Builder::new()
            .name("augur-telemetry".into())
            .spawn(move || write_loop(&writer_path, rx))
        {
            warn!(path = %path.display(), error = %e, "Failed to start telemetry writer");
        }
        Self { path, tx }
    }

    /// Block until every line recorded so far has been written.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.tx.send(WriterMsg::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

fn write_loop(path: &Path, rx: mpsc::Receiver<WriterMsg>) {
    let mut file: Option<File> = None;
    for msg in rx {
        match msg {
            WriterMsg::Line(line) => {
                if let Err(e) = append_line(path, &mut file, &line) {
                    warn!(path = %path.display(), error = %e, "Failed to write inference log");
                }
            }
            WriterMsg::Flush(ack) => {
                if let Some(f) = file.as_mut() {
                    let _ = f.flush();
                }
                let _ = ack.send(());
            }
        }
    }
}

fn append_line(path: &Path, file: &mut Option<File>, line: &str) -> std::io::Result<()> {
    let mut handle = match file.take() {
        Some(f) => f,
        None => OpenOptions::new().create(true).append(true).open(path)?,
    };
    writeln!(handle, "{line}")?;
    *file = Some(handle);
    Ok(())
}

impl InferenceTelemetry for JsonlTelemetry {
    fn record(&self, log: &InferenceLog) {
        let line = match serde_json::to_string(log) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialise inference log");
                return;
            }
        };
        if self.tx.send(WriterMsg::Line(line)).is_err() {
            warn!(path = %self.path.display(), "Telemetry writer stopped, inference log dropped");
        }
    }
}

/// Forwards every record to several sinks.
#[derive(Default, Clone)]
pub struct FanoutTelemetry {
    sinks: Vec<Arc<dyn InferenceTelemetry>>,
}

impl FanoutTelemetry {
    pub fn new(sinks: Vec<Arc<dyn InferenceTelemetry>>) -> Self {
        Self { sinks }
    }
}

impl InferenceTelemetry for FanoutTelemetry {
    fn record(&self, log: &InferenceLog) {
        for sink in &self.sinks {
            sink.record(log);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
