//! Integration tests for database-backed tools
//!
//! Uses an on-disk SQLite database so that several pooled connections see
//! each other's commits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use family_assistant::config::DatabaseConfig;
use family_assistant::db::{Database, DbError, SqlParam};
use family_assistant::tools::NotesToolProvider;
use family_assistant::{EngineConfig, ExecutionContext, Globals, Object, ScriptEngine};
use serde_json::json;
use tempfile::TempDir;

async fn open(temp: &TempDir) -> Database {
    open_with(temp, DatabaseConfig::default()).await
}

async fn open_with(temp: &TempDir, config: DatabaseConfig) -> Database {
    let config = DatabaseConfig {
        url: format!("sqlite://{}", temp.path().join("assistant.db").display()),
        ..config
    };
    Database::connect(&config).await.unwrap()
}

/// Fails fast on a held write lock and retries every 20 ms or more.
fn impatient(max_retries: u32) -> DatabaseConfig {
    DatabaseConfig {
        busy_timeout_secs: 0,
        max_retries,
        base_delay_ms: 20,
        ..DatabaseConfig::default()
    }
}

const INSERT_NOTE: &str = "INSERT INTO notes (title, content, include_in_prompt, created_at, updated_at)
     VALUES (?, 'x', 1, 'now', 'now')";

#[tokio::test(flavor = "multi_thread")]
async fn test_notes_round_trip_through_scripts() {
    let temp = TempDir::new().unwrap();
    let database = open(&temp).await;
    let context = ExecutionContext::new("conv")
        .with_database(database.clone())
        .with_tool_provider(Arc::new(NotesToolProvider::new(database.clone())));
    let engine = ScriptEngine::new(EngineConfig::default());

    let saved = engine
        .evaluate_async(
            "add_or_update_note('wifi', 'hunter2')",
            Globals::new(),
            &context,
        )
        .await
        .unwrap();
    assert_eq!(saved, Object::from("Note 'wifi' saved."));

    // The sync path goes through the bridge onto the same pool.
    let script = "\
tool_add_or_update_note(title='wifi', content='correct horse', include_in_prompt=False)
note = json_decode(get_note('wifi'))
[note['content'], note['include_in_prompt'], len(json_decode(list_notes()))]";
    let value = engine.evaluate(script, Globals::new(), &context).unwrap();
    assert_eq!(
        value,
        Object::List(vec![
            Object::from("correct horse"),
            Object::Bool(false),
            Object::Int(1),
        ])
    );

    let deleted = engine
        .evaluate_async("delete_note('wifi')", Globals::new(), &context)
        .await
        .unwrap();
    assert_eq!(deleted, Object::from("Note 'wifi' deleted."));

    let mut db = database.enter().await.unwrap();
    let rows = db.fetch_all("SELECT title FROM notes", &[]).await.unwrap();
    db.exit().await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_transaction_visibility_across_contexts() {
    let temp = TempDir::new().unwrap();
    let database = open(&temp).await;

    let mut writer = database.enter().await.unwrap();
    writer.begin().await.unwrap();
    writer
        .execute_with_retry(
            "INSERT INTO notes (title, content, include_in_prompt, created_at, updated_at)
             VALUES (?, ?, 1, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            &[SqlParam::from("draft"), SqlParam::from("pending")],
        )
        .await
        .unwrap();

    let mut reader = database.enter().await.unwrap();
    let before = reader
        .fetch_one("SELECT content FROM notes WHERE title = ?", &["draft".into()])
        .await
        .unwrap();
    assert_eq!(before, None);

    writer.commit().await.unwrap();
    writer.exit().await.unwrap();

    let after = reader
        .fetch_one("SELECT content FROM notes WHERE title = ?", &["draft".into()])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after["content"], json!("pending"));
    reader.exit().await.unwrap();
}

#[tokio::test]
async fn test_context_is_not_reentrant_and_rolls_back_on_exit() {
    let temp = TempDir::new().unwrap();
    let database = open(&temp).await;

    let mut ctx = database.enter().await.unwrap();
    assert!(matches!(ctx.enter().await, Err(DbError::AlreadyEntered)));

    ctx.begin().await.unwrap();
    ctx.execute_with_retry(
        "INSERT INTO notes (title, content, include_in_prompt, created_at, updated_at)
         VALUES ('temp', 'x', 1, 'now', 'now')",
        &[],
    )
    .await
    .unwrap();
    ctx.exit().await.unwrap();

    let mut check = database.enter().await.unwrap();
    let count = check
        .fetch_one("SELECT COUNT(*) AS n FROM notes", &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(count["n"], json!(0));
    check.exit().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_locked_statement_is_retried_then_reported() {
    let temp = TempDir::new().unwrap();
    let database = open_with(&temp, impatient(3)).await;

    let mut holder = database.enter().await.unwrap();
    holder.begin().await.unwrap();
    holder
        .execute_with_retry(INSERT_NOTE, &["held".into()])
        .await
        .unwrap();

    let mut blocked = database.enter().await.unwrap();
    let started = Instant::now();
    let err = blocked
        .execute_with_retry(INSERT_NOTE, &["blocked".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Sqlx(sqlx::Error::Database(_))), "{err:?}");
    // Three attempts sleep twice: at least 20 ms, then at least 40 ms.
    assert!(started.elapsed() >= Duration::from_millis(60));
    blocked.exit().await.unwrap();

    holder.commit().await.unwrap();
    holder.exit().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_locked_statement_succeeds_once_the_lock_is_released() {
    let temp = TempDir::new().unwrap();
    let database = open_with(&temp, impatient(8)).await;

    let mut holder = database.enter().await.unwrap();
    holder.begin().await.unwrap();
    holder
        .execute_with_retry(INSERT_NOTE, &["held".into()])
        .await
        .unwrap();
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        holder.commit().await.unwrap();
        holder.exit().await.unwrap();
    });

    let mut waiting = database.enter().await.unwrap();
    let row = waiting
        .fetch_one(
            "INSERT INTO notes (title, content, include_in_prompt, created_at, updated_at)
             VALUES ('late', 'x', 1, 'now', 'now') RETURNING title",
            &[],
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row["title"], json!("late"));
    waiting.exit().await.unwrap();
    release.await.unwrap();

    let mut check = database.enter().await.unwrap();
    let count = check
        .fetch_one("SELECT COUNT(*) AS n FROM notes", &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(count["n"], json!(2));
    check.exit().await.unwrap();
}
