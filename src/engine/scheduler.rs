//! Periodic trigger for standing forecasts.
//!
//! A forecast with `schedule_interval_secs` is due when it has never run,
//! or when its latest run is terminal and older than the interval. A run
//! still in progress is never doubled up unless it has been in flight for
//! longer than [`STALE_RUN_SECS`].

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::orchestrator::{ForecastEngine, RunTicket};
use crate::types::{ForecastDefinition, ForecastRun};

/// A non-terminal run older than this no longer blocks its forecast.
pub const STALE_RUN_SECS: i64 = 6 * 60 * 60;

pub fn is_due(
    definition: &ForecastDefinition,
    latest_run: Option<&ForecastRun>,
    now: DateTime<Utc>,
) -> bool {
    let Some(interval) = definition.schedule_interval_secs.filter(|s| *s > 0) else {
        return false;
    };
    match latest_run {
        None => true,
        Some(run) => {
            let elapsed = (now - run.created_at).num_seconds();
            if run.status.is_terminal() {
                elapsed >= i64::try_from(interval).unwrap_or(i64::MAX)
            } else {
                elapsed >= STALE_RUN_SECS
            }
        }
    }
}

pub struct Scheduler {
    engine: ForecastEngine,
}

impl Scheduler {
    pub fn new(engine: ForecastEngine) -> Self {
        Self { engine }
    }

    /// Start every due forecast. Returned tickets may be dropped to detach.
    pub async fn tick(&self) -> Result<Vec<RunTicket>> {
        let store = self.engine.store();
        let now = Utc::now();
        let mut tickets = Vec::new();

        for definition in store.list_definitions().await? {
            let latest = store.list_runs(&definition.id, 1).await?;
            if !is_due(&definition, latest.first(), now) {
                debug!(forecast_id = %definition.id, "Not due");
                continue;
            }
            match self.engine.start_run(&definition.id).await {
                Ok(ticket) => {
                    info!(forecast_id = %definition.id, run_id = %ticket.run_id, "Scheduled run triggered");
                    tickets.push(ticket);
                }
                Err(e) => warn!(forecast_id = %definition.id, error = %e, "Scheduled run failed to start"),
            }
        }

        Ok(tickets)
    }
}
