//! End-to-end run scenarios: trigger → sample → consensus → persistence.

use std::sync::Arc;

use augur::engine::Scheduler;
use augur::llm::{ChatProvider, ChatRequest, LlmError};
use augur::storage::{ForecastStore, SqliteStore};
use augur::types::{ForecastRun, PredictionType, ResponseStatus, RunStatus};
use secrecy::SecretString;

use crate::mock_provider::{self, ScriptedProvider, Step};

const A_SAMPLES: &[&str] = &[
    "Supply risk is balanced.\n5,8,10,14,18",
    "Slight upside.\n6,9,12,15,19",
    "Holding steady.\n5,8,11,14,18",
];

const B_SAMPLES: &[&str] = &[
    "Escalation priced in.\n15,18,20,24,28",
    "Tighter market.\n16,19,22,25,29",
    "Base case.\n15,18,21,24,28",
];

fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 0.01
}

#[tokio::test]
async fn test_two_model_weighted_consensus() {
    let def = mock_provider::definition("brent", PredictionType::Percentile, 3);
    let models = vec![
        mock_provider::model("a", "gpt-4o", 1.0),
        mock_provider::model("b", "claude-sonnet-4", 2.0),
    ];
    let store = mock_provider::memory_store(&def, &models).await;
    let provider = Arc::new(
        ScriptedProvider::new()
            .replies("gpt-4o", A_SAMPLES)
            .replies("claude-sonnet-4", B_SAMPLES),
    );

    let ticket = mock_provider::engine(store.clone(), store.clone(), provider.clone())
        .start_run("brent")
        .await
        .unwrap();
    let run_id = ticket.run_id;
    assert_eq!(ticket.wait().await, RunStatus::Completed);

    let detail = store.get_run_detail(run_id).await.unwrap().unwrap();
    assert_eq!(detail.run.headline_snapshot.len(), 4);
    assert!(detail.run.headline_snapshot.iter().all(|h| h.category == "energy"));

    let a = &detail.responses[0];
    assert_eq!(a.model_id, "a");
    assert_eq!(a.status, ResponseStatus::Completed);
    assert_eq!(a.percentile_predictions().unwrap().p50, 11.0);
    assert_eq!(a.raw_response.valid_samples, 3);
    assert_eq!(a.raw_response.samples.len(), 3);
    assert_eq!(a.reasoning.as_deref(), Some(A_SAMPLES[0]));
    assert_eq!(a.tokens_used, 3 * 440);
    assert_eq!(detail.responses[1].percentile_predictions().unwrap().p50, 21.0);

    let result = detail.result.unwrap();
    assert_eq!(result.run_id, run_id);
    assert_eq!(result.model_count, 2);
    let p = result.aggregated_percentiles.unwrap();
    assert!(approx(p.p50, 17.67), "p50 = {}", p.p50);
    assert!(p.p10 <= p.p25 && p.p25 <= p.p50 && p.p50 <= p.p75 && p.p75 <= p.p90);
    // Unweighted population SD of {11, 21} around 53/3.
    assert!(approx(result.consensus_level.unwrap(), 5.27));

    // Every prompt carried the frozen snapshot and the context document.
    let seen = provider.seen();
    assert_eq!(seen.len(), 6);
    for request in &seen {
        assert!(request.user.contains("RECENT HEADLINES (4)"));
        assert!(request.user.contains("OPEC+ extends voluntary cuts"));
        assert!(request.system.is_some());
    }
}

#[tokio::test]
async fn test_exhausted_model_drops_out() {
    let def = mock_provider::definition("brent", PredictionType::Percentile, 3);
    let models = vec![
        mock_provider::model("a", "gpt-4o", 1.0),
        mock_provider::model("b", "claude-sonnet-4", 2.0),
    ];
    let store = mock_provider::memory_store(&def, &models).await;
    let provider = Arc::new(
        ScriptedProvider::new()
            .replies("gpt-4o", &["I cannot say.", "Uncertain.", "No numbers today."])
            .replies("claude-sonnet-4", B_SAMPLES),
    );

    let ticket = mock_provider::engine(store.clone(), store.clone(), provider)
        .start_run("brent")
        .await
        .unwrap();
    let run_id = ticket.run_id;
    assert_eq!(ticket.wait().await, RunStatus::Completed);

    let detail = store.get_run_detail(run_id).await.unwrap().unwrap();
    let a = &detail.responses[0];
    assert_eq!(a.status, ResponseStatus::Failed);
    assert_eq!(a.raw_response.attempted_samples, 3);
    assert!(a.error_message.as_ref().unwrap().contains("after 3 samples"));

    let result = detail.result.unwrap();
    assert_eq!(result.model_count, 1);
    assert!(result.consensus_level.is_none());
    assert_eq!(result.aggregated_percentiles.unwrap().p50, 21.0);
}

#[tokio::test]
async fn test_invalid_samples_excluded_from_average() {
    let def = mock_provider::definition("brent", PredictionType::Percentile, 3);
    let models = vec![mock_provider::model("a", "gpt-4o", 1.0)];
    let store = mock_provider::memory_store(&def, &models).await;
    let provider = Arc::new(ScriptedProvider::new().script(
        "gpt-4o",
        [
            Step::Reply("5,8,10,14,18".into()),
            Step::Fail(500),
            Step::Reply("descending 18,14,10,8,5".into()),
        ],
    ));

    let ticket = mock_provider::engine(store.clone(), store.clone(), provider)
        .start_run("brent")
        .await
        .unwrap();
    let run_id = ticket.run_id;
    assert_eq!(ticket.wait().await, RunStatus::Completed);

    let detail = store.get_run_detail(run_id).await.unwrap().unwrap();
    let a = &detail.responses[0];
    assert_eq!(a.raw_response.valid_samples, 1);
    assert_eq!(a.raw_response.attempted_samples, 3);
    assert_eq!(a.tokens_used, 440);
    assert_eq!(a.percentile_predictions().unwrap().p50, 10.0);
}

#[tokio::test]
async fn test_all_models_exhausted_fails_run() {
    let def = mock_provider::definition("brent", PredictionType::Percentile, 2);
    let models = vec![
        mock_provider::model("a", "gpt-4o", 1.0),
        mock_provider::model("b", "claude-sonnet-4", 2.0),
    ];
    let store = mock_provider::memory_store(&def, &models).await;
    let provider = Arc::new(ScriptedProvider::new());

    let ticket = mock_provider::engine(store.clone(), store.clone(), provider.clone())
        .start_run("brent")
        .await
        .unwrap();
    let run_id = ticket.run_id;
    assert_eq!(ticket.wait().await, RunStatus::Failed);

    let detail = store.get_run_detail(run_id).await.unwrap().unwrap();
    assert_eq!(detail.run.status, RunStatus::Failed);
    assert!(detail.run.completed_at.is_some());
    assert!(detail.run.error.unwrap().contains("All 2 models failed"));
    assert!(detail.result.is_none());
    assert_eq!(detail.responses.len(), 2);
    assert!(detail.responses.iter().all(|r| r.status == ResponseStatus::Failed));
    assert_eq!(provider.calls_for("gpt-4o"), 2);
}

#[tokio::test]
async fn test_point_estimate_consensus() {
    let def = mock_provider::definition("brent", PredictionType::PointEstimate, 3);
    let models = vec![
        mock_provider::model("a", "gpt-4o", 1.0),
        mock_provider::model("b", "claude-sonnet-4", 1.0),
    ];
    let store = mock_provider::memory_store(&def, &models).await;
    let provider = Arc::new(
        ScriptedProvider::new()
            .replies("gpt-4o", &["Reasoning...\n\n10", "12", "Roughly\n14"])
            .replies("claude-sonnet-4", &["30", "30", "30"]),
    );

    let ticket = mock_provider::engine(store.clone(), store.clone(), provider)
        .start_run("brent")
        .await
        .unwrap();
    let run_id = ticket.run_id;
    assert_eq!(ticket.wait().await, RunStatus::Completed);

    let result = store.get_run_detail(run_id).await.unwrap().unwrap().result.unwrap();
    assert!(result.aggregated_percentiles.is_none());
    assert_eq!(result.aggregated_point_estimate, Some(21.0));
    assert_eq!(result.consensus_level, Some(9.0));
}

#[tokio::test]
async fn test_reasoning_model_gets_merged_prompt() {
    let def = mock_provider::definition("brent", PredictionType::PointEstimate, 1);
    let models = vec![mock_provider::model("o", "o3-mini", 1.0)];
    let store = mock_provider::memory_store(&def, &models).await;
    let provider = Arc::new(ScriptedProvider::new().replies("o3-mini", &["81.5"]));

    let ticket = mock_provider::engine(store.clone(), store.clone(), provider.clone())
        .start_run("brent")
        .await
        .unwrap();
    assert_eq!(ticket.wait().await, RunStatus::Completed);

    let seen = provider.seen();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].system.is_none());
    assert!(seen[0].temperature.is_none());
    assert!(seen[0].user.contains("calibrated superforecaster"));
}

#[tokio::test]
async fn test_provider_panic_fails_run() {
    let def = mock_provider::definition("brent", PredictionType::Percentile, 3);
    let models = vec![mock_provider::model("a", "gpt-4o", 1.0)];
    let store = mock_provider::memory_store(&def, &models).await;
    let provider = Arc::new(ScriptedProvider::new().script("gpt-4o", [Step::Panic]));

    let ticket = mock_provider::engine(store.clone(), store.clone(), provider)
        .start_run("brent")
        .await
        .unwrap();
    let run_id = ticket.run_id;
    assert_eq!(ticket.wait().await, RunStatus::Failed);

    let run = store.get_run_detail(run_id).await.unwrap().unwrap().run;
    assert!(run.error.unwrap().contains("scripted provider panic"));
    assert!(store.get_run_detail(run_id).await.unwrap().unwrap().result.is_none());
}

#[tokio::test]
async fn test_sqlite_store_end_to_end() {
    let store = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
    let def = mock_provider::definition("brent", PredictionType::Percentile, 3);
    let models = vec![
        mock_provider::model("a", "gpt-4o", 1.0),
        mock_provider::model("b", "claude-sonnet-4", 2.0),
    ];
    store.save_definition(&def, &models).await.unwrap();
    store.insert_headlines(&mock_provider::headlines()).await.unwrap();

    let provider = Arc::new(
        ScriptedProvider::new()
            .replies("gpt-4o", A_SAMPLES)
            .replies("claude-sonnet-4", B_SAMPLES),
    );
    let ticket = mock_provider::engine(store.clone(), store.clone(), provider)
        .start_run("brent")
        .await
        .unwrap();
    let run_id = ticket.run_id;
    assert_eq!(ticket.wait().await, RunStatus::Completed);

    let detail = store.get_run_detail(run_id).await.unwrap().unwrap();
    assert_eq!(detail.run.headline_snapshot.len(), 4);
    let ids: Vec<&str> = detail.responses.iter().map(|r| r.model_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    let result = detail.result.unwrap();
    assert!(approx(result.aggregated_percentiles.unwrap().p50, 17.67));
    assert!(approx(result.consensus_level.unwrap(), 5.27));

    // Terminal runs stay terminal.
    assert!(store
        .update_run_status(run_id, RunStatus::Running, None)
        .await
        .is_err());

    // Deleting the run takes its responses and result with it.
    assert!(store.delete_run(run_id).await.unwrap());
    assert!(store.get_run_detail(run_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_scheduler_starts_due_forecast_once() {
    let mut def = mock_provider::definition("brent", PredictionType::PointEstimate, 1);
    def.schedule_interval_secs = Some(3600);
    let models = vec![mock_provider::model("a", "gpt-4o", 1.0)];
    let store = mock_provider::memory_store(&def, &models).await;
    let provider = Arc::new(ScriptedProvider::new().replies("gpt-4o", &["70", "71"]));

    let scheduler = Scheduler::new(mock_provider::engine(store.clone(), store.clone(), provider));

    let tickets = scheduler.tick().await.unwrap();
    assert_eq!(tickets.len(), 1);
    for ticket in tickets {
        assert_eq!(ticket.wait().await, RunStatus::Completed);
    }

    // Latest run is fresh: nothing is due.
    assert!(scheduler.tick().await.unwrap().is_empty());
    assert_eq!(store.list_runs("brent", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_orphaned_by_restart_is_rescheduled() {
    let path = std::env::temp_dir().join(format!("augur_restart_{}.db", uuid::Uuid::new_v4()));
    let url = format!("sqlite://{}", path.display());

    let mut def = mock_provider::definition("brent", PredictionType::PointEstimate, 1);
    def.schedule_interval_secs = Some(60);
    let models = vec![mock_provider::model("a", "gpt-4o", 1.0)];

    // First process: a run is mid-flight when it dies.
    let mut orphan = ForecastRun::new("brent", Vec::new());
    orphan.created_at = chrono::Utc::now() - chrono::Duration::minutes(10);
    {
        let store = SqliteStore::connect(&url).await.unwrap();
        store.save_definition(&def, &models).await.unwrap();
        store.insert_headlines(&mock_provider::headlines()).await.unwrap();
        store.create_run(&orphan).await.unwrap();
        store.update_run_status(orphan.id, RunStatus::Running, None).await.unwrap();
    }

    // Second process.
    let store = Arc::new(SqliteStore::connect(&url).await.unwrap());
    let provider = Arc::new(ScriptedProvider::new().replies("gpt-4o", &["70"]));
    let scheduler = Scheduler::new(mock_provider::engine(store.clone(), store.clone(), provider));

    assert!(scheduler.tick().await.unwrap().is_empty());

    let failed = store.fail_orphaned_runs("interrupted by shutdown").await.unwrap();
    assert_eq!(failed, vec![orphan.id]);
    let detail = store.get_run_detail(orphan.id).await.unwrap().unwrap();
    assert_eq!(detail.run.status, RunStatus::Failed);
    assert_eq!(detail.run.error.as_deref(), Some("interrupted by shutdown"));

    let tickets = scheduler.tick().await.unwrap();
    assert_eq!(tickets.len(), 1);
    for ticket in tickets {
        assert_eq!(ticket.wait().await, RunStatus::Completed);
    }
    assert_eq!(store.list_runs("brent", 10).await.unwrap().len(), 2);

    drop(scheduler);
    drop(store);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_scripted_provider_exhausts_to_503() {
    let provider = ScriptedProvider::new().replies("gpt-4o", &["1"]);
    let request = ChatRequest {
        model: "gpt-4o".into(),
        api_key: SecretString::new("sk-test".into()),
        system: None,
        user: "question".into(),
        temperature: None,
        max_tokens: 16,
    };

    let first = tokio_test::block_on(provider.chat(&request));
    tokio_test::assert_ok!(&first);
    let second = tokio_test::block_on(provider.chat(&request));
    assert!(matches!(second, Err(LlmError::Api { status: 503, .. })));
}
