use docqueue::config::Config;
use docqueue::error::QueueError;
use docqueue::{db, migrate};
use sqlx::SqlitePool;
use tempfile::TempDir;

async fn empty_db() -> (TempDir, SqlitePool, Config) {
    let tmp = TempDir::new().unwrap();
    let config = Config::minimal(tmp.path().join("dq.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    (tmp, pool, config)
}

#[tokio::test]
async fn create_schema_is_idempotent() {
    let (_tmp, pool, _) = empty_db().await;
    assert!(!migrate::check_schema_exists(&pool).await.unwrap());

    migrate::create_schema(&pool).await.unwrap();
    migrate::create_schema(&pool).await.unwrap();

    assert!(migrate::check_schema_exists(&pool).await.unwrap());
    migrate::validate_schema(&pool).await.unwrap();
}

#[tokio::test]
async fn run_migrations_creates_the_file() {
    let (tmp, pool, config) = empty_db().await;
    pool.close().await;

    let nested = Config::minimal(tmp.path().join("nested").join("queue.sqlite"));
    migrate::run_migrations(&nested).await.unwrap();
    assert!(nested.db.path.exists());

    migrate::run_migrations(&config).await.unwrap();
    migrate::run_migrations(&config).await.unwrap();
}

#[tokio::test]
async fn existing_incompatible_table_fails_loudly() {
    let (_tmp, pool, _) = empty_db().await;
    sqlx::query("CREATE TABLE document_queue (queue_id INTEGER PRIMARY KEY, doc_id TEXT)")
        .execute(&pool)
        .await
        .unwrap();

    let err = migrate::create_schema(&pool).await.unwrap_err();
    match err {
        QueueError::IncompatibleSchema(msg) => {
            assert!(msg.contains("document_queue"), "unexpected message: {}", msg)
        }
        other => panic!("expected IncompatibleSchema, got {:?}", other),
    }
}

#[tokio::test]
async fn version_mismatch_is_rejected() {
    let (_tmp, pool, _) = empty_db().await;
    migrate::create_schema(&pool).await.unwrap();
    sqlx::query("UPDATE schema_meta SET value = '99' WHERE key = 'schema_version'")
        .execute(&pool)
        .await
        .unwrap();

    assert!(matches!(
        migrate::validate_schema(&pool).await,
        Err(QueueError::IncompatibleSchema(_))
    ));
}

#[tokio::test]
async fn partial_schema_does_not_count_as_existing() {
    let (_tmp, pool, _) = empty_db().await;
    sqlx::query("CREATE TABLE processing_runs (run_id TEXT PRIMARY KEY)")
        .execute(&pool)
        .await
        .unwrap();
    assert!(!migrate::check_schema_exists(&pool).await.unwrap());
}
