mod common;

use std::time::Duration;

use serde_json::json;

use docqueue::run_coordinator::RunCoordinator;
use docqueue_core::models::{RunStatus, WorkerInfo};

use common::{queue_with, setup, RUN};

fn pipeline() -> serde_json::Value {
    json!({
        "content_sources": { "docs": { "root": "./docs", "include": ["**/*.md"] } },
        "storage": { "kind": "sqlite", "path": "./data/index.sqlite" },
        "embedding": { "model": "minilm", "dims": 384 },
        "relationship_detection": { "enabled": true },
        "logging": { "level": "info" }
    })
}

#[test]
fn run_id_ignores_key_order_and_logging() {
    let a = pipeline();
    let b = json!({
        "logging": { "level": "trace", "file": "/var/log/ingest.log" },
        "relationship_detection": { "enabled": true },
        "embedding": { "dims": 384, "model": "minilm" },
        "storage": { "path": "./data/index.sqlite", "kind": "sqlite" },
        "content_sources": { "docs": { "include": ["**/*.md"], "root": "./docs" } }
    });

    let id = RunCoordinator::get_run_id_from_config(&a);
    assert_eq!(id, RunCoordinator::get_run_id_from_config(&b));
    assert_eq!(id.len(), 16);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn run_id_changes_with_content_sources() {
    let a = pipeline();
    let mut b = pipeline();
    b["content_sources"]["docs"]["root"] = json!("./other");
    assert_ne!(
        RunCoordinator::get_run_id_from_config(&a),
        RunCoordinator::get_run_id_from_config(&b)
    );
}

#[tokio::test]
async fn ensure_run_exists_is_idempotent() {
    let (_tmp, pool) = setup().await;
    let coordinator = RunCoordinator::new(pool.clone());
    let config = pipeline();
    let run_id = RunCoordinator::get_run_id_from_config(&config);

    let first = coordinator.ensure_run_exists(&run_id, &config).await.unwrap();
    assert_eq!(first.status, RunStatus::Active);
    assert_eq!(first.config_snapshot, config);

    let second = coordinator
        .ensure_run_exists(&run_id, &json!({ "different": true }))
        .await
        .unwrap();
    assert_eq!(second, first);
    assert_eq!(coordinator.list_runs(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_ensure_creates_one_run() {
    let (_tmp, pool) = setup().await;
    let config = pipeline();
    let run_id = RunCoordinator::get_run_id_from_config(&config);

    let mut handles = Vec::new();
    for _ in 0..6 {
        let coordinator = RunCoordinator::new(pool.clone());
        let config = config.clone();
        let run_id = run_id.clone();
        handles.push(tokio::spawn(async move {
            coordinator.ensure_run_exists(&run_id, &config).await.unwrap()
        }));
    }
    let mut created = Vec::new();
    for h in handles {
        created.push(h.await.unwrap().created_at);
    }

    assert!(created.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(
        RunCoordinator::new(pool).list_runs(10).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn register_worker_upserts_heartbeat() {
    let (_tmp, pool) = setup().await;
    let coordinator = RunCoordinator::new(pool.clone());

    coordinator
        .register_worker(RUN, "w1", &WorkerInfo::with_hostname("ingest-1"))
        .await
        .unwrap();
    let before = coordinator.list_workers(RUN).await.unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    coordinator
        .register_worker(RUN, "w1", &WorkerInfo::default())
        .await
        .unwrap();
    let after = coordinator.list_workers(RUN).await.unwrap();

    assert_eq!(after.len(), 1);
    assert_eq!(after[0].start_time, before[0].start_time);
    assert!(after[0].last_heartbeat > before[0].last_heartbeat);
    assert_eq!(after[0].hostname.as_deref(), Some("ingest-1"));

    // Same worker id on another run is a separate registration
    coordinator
        .register_worker("another-run", "w1", &WorkerInfo::default())
        .await
        .unwrap();
    assert_eq!(coordinator.list_workers(RUN).await.unwrap().len(), 1);
}

#[tokio::test]
async fn active_workers_respects_window() {
    let (_tmp, pool) = setup().await;
    let coordinator = RunCoordinator::new(pool.clone());
    coordinator
        .register_worker(RUN, "w1", &WorkerInfo::default())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    coordinator
        .register_worker(RUN, "w2", &WorkerInfo::default())
        .await
        .unwrap();

    let live = coordinator
        .active_workers(RUN, Duration::from_millis(30))
        .await
        .unwrap();
    let ids: Vec<&str> = live.iter().map(|w| w.worker_id.as_str()).collect();
    assert_eq!(ids, vec!["w2"]);

    let all = coordinator
        .active_workers(RUN, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn progress_and_status_updates() {
    let (_tmp, pool) = setup().await;
    let coordinator = RunCoordinator::new(pool.clone());
    coordinator.ensure_run_exists(RUN, &json!({})).await.unwrap();

    let q = queue_with(&pool, "w1", Duration::from_secs(300), 0);
    for doc in ["a", "b", "c"] {
        q.add_document(doc, "docs", RUN, None).await.unwrap();
    }
    let a = q.claim_next_document(RUN).await.unwrap().unwrap();
    q.mark_completed(a.queue_id, None).await.unwrap();
    let b = q.claim_next_document(RUN).await.unwrap().unwrap();
    q.mark_failed(b.queue_id, "boom").await.unwrap();

    let run = coordinator.refresh_run_progress(RUN).await.unwrap().unwrap();
    assert_eq!(run.documents_queued, 3);
    assert_eq!(run.documents_processed, 1);
    assert_eq!(run.documents_failed, 1);

    assert!(coordinator
        .update_run_status(RUN, RunStatus::Completed)
        .await
        .unwrap());
    let finished = coordinator.get_run(RUN).await.unwrap().unwrap();
    assert_eq!(finished.status, RunStatus::Completed);

    // A finished run keeps its end time
    let refreshed = coordinator.refresh_run_progress(RUN).await.unwrap().unwrap();
    assert_eq!(refreshed.updated_at, finished.updated_at);

    assert!(!coordinator
        .update_run_status("missing", RunStatus::Failed)
        .await
        .unwrap());
    assert!(coordinator.refresh_run_progress("missing").await.unwrap().is_none());
}
