//! SQLite store via `sqlx`.
//!
//! Timestamps are stored as RFC 3339 text in UTC (lexically sortable), ids
//! as text, nested values as JSON text. Runs own their responses and
//! result through `ON DELETE CASCADE`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{check_transition, ForecastStore};
use crate::data::{HeadlineQuery, HeadlineSource};
use crate::types::{
    ForecastDefinition, ForecastResult, ForecastRun, Headline, ModelResponse, ModelSpec,
    RunDetail, RunStatus,
};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS forecasts (
        id                      TEXT PRIMARY KEY,
        proposition             TEXT NOT NULL,
        prediction_type         TEXT NOT NULL,
        units                   TEXT NOT NULL DEFAULT '',
        categories              TEXT NOT NULL DEFAULT '[]',
        headline_count          INTEGER NOT NULL,
        iterations              INTEGER NOT NULL,
        context_urls            TEXT NOT NULL DEFAULT '[]',
        schedule_interval_secs  INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS forecast_models (
        forecast_id  TEXT NOT NULL REFERENCES forecasts(id) ON DELETE CASCADE,
        position     INTEGER NOT NULL,
        id           TEXT NOT NULL,
        provider     TEXT NOT NULL,
        model_name   TEXT NOT NULL,
        api_key_env  TEXT NOT NULL,
        weight       REAL NOT NULL CHECK (weight > 0),
        PRIMARY KEY (forecast_id, id)
    )",
    "CREATE TABLE IF NOT EXISTS forecast_runs (
        id                 TEXT PRIMARY KEY,
        forecast_id        TEXT NOT NULL,
        headline_snapshot  TEXT NOT NULL DEFAULT '[]',
        status             TEXT NOT NULL,
        error              TEXT,
        created_at         TEXT NOT NULL,
        completed_at       TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_runs_forecast ON forecast_runs (forecast_id, created_at)",
    "CREATE TABLE IF NOT EXISTS model_responses (
        id                TEXT PRIMARY KEY,
        run_id            TEXT NOT NULL REFERENCES forecast_runs(id) ON DELETE CASCADE,
        model_id          TEXT NOT NULL,
        provider          TEXT NOT NULL,
        model_name        TEXT NOT NULL,
        status            TEXT NOT NULL,
        error_message     TEXT,
        reasoning         TEXT,
        tokens_used       INTEGER NOT NULL,
        response_time_ms  INTEGER NOT NULL,
        prediction        TEXT,
        raw_response      TEXT NOT NULL,
        created_at        TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_responses_run ON model_responses (run_id)",
    "CREATE TABLE IF NOT EXISTS forecast_results (
        id                         TEXT PRIMARY KEY,
        run_id                     TEXT NOT NULL UNIQUE REFERENCES forecast_runs(id) ON DELETE CASCADE,
        aggregated_percentiles     TEXT,
        aggregated_point_estimate  REAL,
        model_count                INTEGER NOT NULL CHECK (model_count >= 1),
        consensus_level            REAL,
        created_at                 TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS headlines (
        id         TEXT PRIMARY KEY,
        title      TEXT NOT NULL,
        category   TEXT NOT NULL,
        magnitude  REAL NOT NULL,
        timestamp  TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_headlines_ts ON headlines (timestamp)",
];

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Bad timestamp {s}"))?
        .with_timezone(&Utc))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("Bad uuid {s}"))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to encode JSON column")
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).context("Failed to decode JSON column")
}

fn as_u32(v: i64, column: &str) -> Result<u32> {
    u32::try_from(v).with_context(|| format!("{column} out of range: {v}"))
}

fn as_u64(v: i64, column: &str) -> Result<u64> {
    u64::try_from(v).with_context(|| format!("{column} out of range: {v}"))
}

fn as_i64(v: u64, column: &str) -> Result<i64> {
    i64::try_from(v).with_context(|| format!("{column} too large: {v}"))
}

fn definition_from_row(row: &SqliteRow) -> Result<ForecastDefinition> {
    let prediction_type: String = row.try_get("prediction_type")?;
    let schedule: Option<i64> = row.try_get("schedule_interval_secs")?;
    Ok(ForecastDefinition {
        id: row.try_get("id")?,
        proposition: row.try_get("proposition")?,
        prediction_type: prediction_type.parse().map_err(|e: String| anyhow!(e))?,
        units: row.try_get("units")?,
        categories: from_json(&row.try_get::<String, _>("categories")?)?,
        headline_count: as_u32(row.try_get("headline_count")?, "headline_count")?,
        iterations: as_u32(row.try_get("iterations")?, "iterations")?,
        context_urls: from_json(&row.try_get::<String, _>("context_urls")?)?,
        schedule_interval_secs: schedule
            .map(|s| as_u64(s, "schedule_interval_secs"))
            .transpose()?,
    })
}

fn model_from_row(row: &SqliteRow) -> Result<ModelSpec> {
    Ok(ModelSpec {
        id: row.try_get("id")?,
        provider: row.try_get("provider")?,
        model_name: row.try_get("model_name")?,
        api_key_env: row.try_get("api_key_env")?,
        weight: row.try_get("weight")?,
    })
}

fn run_from_row(row: &SqliteRow) -> Result<ForecastRun> {
    let status: String = row.try_get("status")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    Ok(ForecastRun {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        forecast_id: row.try_get("forecast_id")?,
        headline_snapshot: from_json(&row.try_get::<String, _>("headline_snapshot")?)?,
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        error: row.try_get("error")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
    })
}

fn response_from_row(row: &SqliteRow) -> Result<ModelResponse> {
    let status: String = row.try_get("status")?;
    let prediction: Option<String> = row.try_get("prediction")?;
    Ok(ModelResponse {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        run_id: parse_uuid(&row.try_get::<String, _>("run_id")?)?,
        model_id: row.try_get("model_id")?,
        provider: row.try_get("provider")?,
        model_name: row.try_get("model_name")?,
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        error_message: row.try_get("error_message")?,
        reasoning: row.try_get("reasoning")?,
        tokens_used: as_u64(row.try_get("tokens_used")?, "tokens_used")?,
        response_time_ms: as_u64(row.try_get("response_time_ms")?, "response_time_ms")?,
        prediction: prediction.as_deref().map(from_json).transpose()?,
        raw_response: from_json(&row.try_get::<String, _>("raw_response")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn result_from_row(row: &SqliteRow) -> Result<ForecastResult> {
    let percentiles: Option<String> = row.try_get("aggregated_percentiles")?;
    Ok(ForecastResult {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        run_id: parse_uuid(&row.try_get::<String, _>("run_id")?)?,
        aggregated_percentiles: percentiles.as_deref().map(from_json).transpose()?,
        aggregated_point_estimate: row.try_get("aggregated_point_estimate")?,
        model_count: as_u32(row.try_get("model_count")?, "model_count")?,
        consensus_level: row.try_get("consensus_level")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn headline_from_row(row: &SqliteRow) -> Result<Headline> {
    Ok(Headline {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        category: row.try_get("category")?,
        magnitude: row.try_get("magnitude")?,
        timestamp: parse_ts(&row.try_get::<String, _>("timestamp")?)?,
    })
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) and migrate. `sqlite::memory:` gives a
    /// private in-memory database held on a single connection.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid SQLite URL {url}"))?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database {url}"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "SQLite store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Schema migration failed")?;
        }
        Ok(())
    }

    /// Upsert ingested headlines by id.
    pub async fn insert_headlines(&self, headlines: &[Headline]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for h in headlines {
            sqlx::query(
                "INSERT INTO headlines (id, title, category, magnitude, timestamp)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    category = excluded.category,
                    magnitude = excluded.magnitude,
                    timestamp = excluded.timestamp",
            )
            .bind(&h.id)
            .bind(&h.title)
            .bind(&h.category)
            .bind(h.magnitude)
            .bind(ts(&h.timestamp))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(count = headlines.len(), "Headlines stored");
        Ok(())
    }

    async fn run_row(&self, run_id: Uuid) -> Result<Option<ForecastRun>> {
        let row = sqlx::query("SELECT * FROM forecast_runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }
}

#[async_trait]
impl ForecastStore for SqliteStore {
    async fn get_definition(&self, forecast_id: &str) -> Result<Option<ForecastDefinition>> {
        let row = sqlx::query("SELECT * FROM forecasts WHERE id = ?")
            .bind(forecast_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(definition_from_row).transpose()
    }

    async fn get_models(&self, forecast_id: &str) -> Result<Vec<ModelSpec>> {
        let rows = sqlx::query(
            "SELECT * FROM forecast_models WHERE forecast_id = ? ORDER BY position",
        )
        .bind(forecast_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(model_from_row).collect()
    }

    async fn create_run(&self, run: &ForecastRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO forecast_runs
                (id, forecast_id, headline_snapshot, status, error, created_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.id.to_string())
        .bind(&run.forecast_id)
        .bind(to_json(&run.headline_snapshot)?)
        .bind(run.status.as_str())
        .bind(run.error.as_deref())
        .bind(ts(&run.created_at))
        .bind(run.completed_at.as_ref().map(ts))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create run {}", run.id))?;
        debug!(run_id = %run.id, forecast_id = %run.forecast_id, "Run created");
        Ok(())
    }

    async fn set_headline_snapshot(&self, run_id: Uuid, headlines: &[Headline]) -> Result<()> {
        let done = sqlx::query("UPDATE forecast_runs SET headline_snapshot = ? WHERE id = ?")
            .bind(to_json(&headlines)?)
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            bail!("Run {run_id} not found");
        }
        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let current = self
            .run_row(run_id)
            .await?
            .ok_or_else(|| anyhow!("Run {run_id} not found"))?;
        check_transition(run_id, current.status, status)?;

        let completed_at = status.is_terminal().then(|| ts(&Utc::now()));
        // Guard on the old status so a concurrent writer cannot skip a state.
        let done = sqlx::query(
            "UPDATE forecast_runs
             SET status = ?, error = COALESCE(?, error), completed_at = COALESCE(?, completed_at)
             WHERE id = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(completed_at)
        .bind(run_id.to_string())
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            bail!("Run {run_id} changed status concurrently");
        }
        Ok(())
    }

    async fn save_model_response(&self, r: &ModelResponse) -> Result<()> {
        sqlx::query(
            "INSERT INTO model_responses
                (id, run_id, model_id, provider, model_name, status, error_message, reasoning,
                 tokens_used, response_time_ms, prediction, raw_response, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(r.id.to_string())
        .bind(r.run_id.to_string())
        .bind(&r.model_id)
        .bind(&r.provider)
        .bind(&r.model_name)
        .bind(r.status.as_str())
        .bind(r.error_message.as_deref())
        .bind(r.reasoning.as_deref())
        .bind(as_i64(r.tokens_used, "tokens_used")?)
        .bind(as_i64(r.response_time_ms, "response_time_ms")?)
        .bind(r.prediction.as_ref().map(to_json).transpose()?)
        .bind(to_json(&r.raw_response)?)
        .bind(ts(&r.created_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save response of {} for run {}", r.model_id, r.run_id))?;
        Ok(())
    }

    async fn save_result(&self, result: &ForecastResult) -> Result<()> {
        sqlx::query(
            "INSERT INTO forecast_results
                (id, run_id, aggregated_percentiles, aggregated_point_estimate,
                 model_count, consensus_level, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(result.id.to_string())
        .bind(result.run_id.to_string())
        .bind(result.aggregated_percentiles.as_ref().map(to_json).transpose()?)
        .bind(result.aggregated_point_estimate)
        .bind(i64::from(result.model_count))
        .bind(result.consensus_level)
        .bind(ts(&result.created_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save result for run {}", result.run_id))?;
        Ok(())
    }

    async fn get_run_detail(&self, run_id: Uuid) -> Result<Option<RunDetail>> {
        let Some(run) = self.run_row(run_id).await? else {
            return Ok(None);
        };

        let responses = sqlx::query("SELECT * FROM model_responses WHERE run_id = ? ORDER BY rowid")
            .bind(run_id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(response_from_row)
            .collect::<Result<Vec<_>>>()?;

        let result = sqlx::query("SELECT * FROM forecast_results WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(result_from_row)
            .transpose()?;

        Ok(Some(RunDetail {
            run,
            responses,
            result,
        }))
    }

    async fn save_definition(
        &self,
        d: &ForecastDefinition,
        models: &[ModelSpec],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO forecasts
                (id, proposition, prediction_type, units, categories, headline_count,
                 iterations, context_urls, schedule_interval_secs)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                proposition = excluded.proposition,
                prediction_type = excluded.prediction_type,
                units = excluded.units,
                categories = excluded.categories,
                headline_count = excluded.headline_count,
                iterations = excluded.iterations,
                context_urls = excluded.context_urls,
                schedule_interval_secs = excluded.schedule_interval_secs",
        )
        .bind(&d.id)
        .bind(&d.proposition)
        .bind(d.prediction_type.as_str())
        .bind(&d.units)
        .bind(to_json(&d.categories)?)
        .bind(i64::from(d.headline_count))
        .bind(i64::from(d.iterations))
        .bind(to_json(&d.context_urls)?)
        .bind(
            d.schedule_interval_secs
                .map(|s| as_i64(s, "schedule_interval_secs"))
                .transpose()?,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM forecast_models WHERE forecast_id = ?")
            .bind(&d.id)
            .execute(&mut *tx)
            .await?;

        for (position, m) in models.iter().enumerate() {
            sqlx::query(
                "INSERT INTO forecast_models
                    (forecast_id, position, id, provider, model_name, api_key_env, weight)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&d.id)
            .bind(position as i64)
            .bind(&m.id)
            .bind(&m.provider)
            .bind(&m.model_name)
            .bind(&m.api_key_env)
            .bind(m.weight)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to save model {} of {}", m.id, d.id))?;
        }

        tx.commit().await?;
        debug!(forecast_id = %d.id, models = models.len(), "Definition saved");
        Ok(())
    }

    async fn list_definitions(&self) -> Result<Vec<ForecastDefinition>> {
        sqlx::query("SELECT * FROM forecasts ORDER BY id")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(definition_from_row)
            .collect()
    }

    async fn list_runs(&self, forecast_id: &str, limit: usize) -> Result<Vec<ForecastRun>> {
        sqlx::query(
            "SELECT * FROM forecast_runs WHERE forecast_id = ?
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(forecast_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(run_from_row)
        .collect()
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<bool> {
        let done = sqlx::query("DELETE FROM forecast_runs WHERE id = ?")
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn fail_orphaned_runs(&self, message: &str) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "UPDATE forecast_runs
             SET status = ?, error = ?, completed_at = ?
             WHERE status IN (?, ?)
             RETURNING id",
        )
        .bind(RunStatus::Failed.as_str())
        .bind(message)
        .bind(ts(&Utc::now()))
        .bind(RunStatus::Pending.as_str())
        .bind(RunStatus::Running.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fail orphaned runs")?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                Uuid::parse_str(&id).with_context(|| format!("Bad run id {id}"))
            })
            .collect()
    }
}

#[async_trait]
impl HeadlineSource for SqliteStore {
    async fn query(&self, query: &HeadlineQuery) -> Result<Vec<Headline>> {
        let mut sql = String::from("SELECT * FROM headlines");
        if !query.categories.is_empty() {
            let placeholders = vec!["?"; query.categories.len()].join(", ");
            sql.push_str(&format!(" WHERE lower(category) IN ({placeholders})"));
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");

        let mut q = sqlx::query(&sql);
        for c in &query.categories {
            q = q.bind(c.to_lowercase());
        }
        q = q.bind(i64::try_from(query.limit).unwrap_or(i64::MAX));

        let rows = q
            .fetch_all(&self.pool)
            .await
            .context("Headline query failed")?;
        rows.iter().map(headline_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_definitions_roundtrip() {
        contract::definitions_roundtrip(&store().await).await;
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        contract::run_lifecycle(&store().await).await;
    }

    #[tokio::test]
    async fn test_failed_run_keeps_error() {
        contract::failed_run_keeps_error(&store().await).await;
    }

    #[tokio::test]
    async fn test_list_and_delete_runs() {
        contract::list_and_delete_runs(&store().await).await;
    }

    #[tokio::test]
    async fn test_orphaned_runs_failed() {
        contract::orphaned_runs_failed(&store().await).await;
    }

    #[tokio::test]
    async fn test_orphaned_runs_failed_after_reopen() {
        let path = std::env::temp_dir().join(format!("augur_orphans_{}.db", Uuid::new_v4()));
        let url = format!("sqlite://{}", path.display());

        let mut run = ForecastRun::new("oil", Vec::new());
        run.created_at = Utc::now() - chrono::Duration::days(3);
        {
            let store = SqliteStore::connect(&url).await.unwrap();
            store.create_run(&run).await.unwrap();
            store.update_run_status(run.id, RunStatus::Running, None).await.unwrap();
            store.pool.close().await;
        }

        let store = SqliteStore::connect(&url).await.unwrap();
        let failed = store.fail_orphaned_runs("interrupted by shutdown").await.unwrap();
        assert_eq!(failed, vec![run.id]);
        let latest = store.list_runs("oil", 1).await.unwrap();
        assert_eq!(latest[0].status, RunStatus::Failed);
        store.pool.close().await;

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_responses() {
        let store = store().await;
        let run = ForecastRun::new("oil", Vec::new());
        store.create_run(&run).await.unwrap();
        let response = ModelResponse::failed(run.id, &contract::models()[0], "x");
        store.save_model_response(&response).await.unwrap();

        assert!(store.delete_run(run.id).await.unwrap());
        let left: i64 = sqlx::query("SELECT COUNT(*) AS n FROM model_responses")
            .fetch_one(&store.pool)
            .await
            .unwrap()
            .try_get("n")
            .unwrap();
        assert_eq!(left, 0);
    }

    #[tokio::test]
    async fn test_response_requires_existing_run() {
        let store = store().await;
        let orphan = ModelResponse::failed(Uuid::new_v4(), &contract::models()[0], "x");
        assert!(store.save_model_response(&orphan).await.is_err());
    }

    #[tokio::test]
    async fn test_headline_query() {
        let store = store().await;
        let mut sports = contract::headline("s", 0);
        sports.category = "Sports".into();
        store
            .insert_headlines(&[
                contract::headline("old", 60),
                contract::headline("new", 1),
                sports,
                contract::headline("mid", 30),
            ])
            .await
            .unwrap();

        let energy = store
            .query(&HeadlineQuery {
                categories: vec!["ENERGY".into()],
                limit: 2,
            })
            .await
            .unwrap();
        let ids: Vec<&str> = energy.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);

        let all = store.query(&HeadlineQuery { categories: vec![], limit: 10 }).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].id, "s");
    }
}
