//! Database access: a SQLite pool, the retry policy applied to statements,
//! and [`DatabaseContext`], the per-unit-of-work transactional scope.

mod context;
mod retry;

pub use context::DatabaseContext;
pub use retry::{Attempt, RetryPolicy, is_transient};

use std::str::FromStr;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value as JsonValue};
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};
use thiserror::Error;
use tracing::info;

use crate::config::DatabaseConfig;

/// A result row as column name → JSON value. Blobs are base64 strings.
pub type RowMap = Map<String, JsonValue>;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// `enter` was called on a context that already holds a connection.
    #[error("database context is already active")]
    AlreadyEntered,

    /// A statement was issued outside `enter`/`exit`.
    #[error("database context has not been entered")]
    NotEntered,

    /// `begin` while a transaction is open.
    #[error("a transaction is already in progress")]
    TransactionActive,

    /// Driver error, passed through untranslated.
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Result type for database operations.
pub type DbResult<T> = std::result::Result<T, DbError>;

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// SQL `NULL`.
    Null,
    /// Integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    Text(String),
    /// Binary.
    Blob(Vec<u8>),
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Int(i64::from(v))
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<Vec<u8>> for SqlParam {
    fn from(v: Vec<u8>) -> Self {
        SqlParam::Blob(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlParam::Null, Into::into)
    }
}

pub(crate) fn bind_all<'q>(
    sql: &'q str,
    params: &[SqlParam],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(Option::<i64>::None),
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.clone()),
            SqlParam::Blob(v) => query.bind(v.clone()),
        };
    }
    query
}

/// Convert a row into a JSON mapping keyed by column name.
pub fn row_to_map(row: &SqliteRow) -> DbResult<RowMap> {
    let mut map = Map::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            JsonValue::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => JsonValue::from(row.try_get::<i64, _>(index)?),
                "REAL" => JsonValue::from(row.try_get::<f64, _>(index)?),
                "BLOB" => JsonValue::from(BASE64.encode(row.try_get::<Vec<u8>, _>(index)?)),
                _ => JsonValue::from(row.try_get::<String, _>(index)?),
            }
        };
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS notes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL UNIQUE,
        content TEXT NOT NULL,
        include_in_prompt INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS attachments (
        id TEXT PRIMARY KEY,
        conversation_id TEXT,
        filename TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        mime_type TEXT NOT NULL,
        size INTEGER NOT NULL,
        content BLOB NOT NULL,
        created_at TEXT NOT NULL
    )",
];

/// Connection pool plus the retry policy every context inherits.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl Database {
    /// Open the pool described by `config` and create missing tables.
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        let in_memory = config.url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));
        let options = if in_memory {
            options
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        };
        // Every in-memory connection is its own database.
        let max_connections = if in_memory { 1 } else { config.max_connections.max(1) };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let database = Self {
            pool,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.base_delay_ms),
            },
        };
        database.bootstrap().await?;
        info!(url = %config.url, max_connections, "database ready");
        Ok(database)
    }

    /// In-memory database with default settings.
    pub async fn in_memory() -> DbResult<Self> {
        Self::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        })
        .await
    }

    async fn bootstrap(&self) -> DbResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Retry policy handed to new contexts.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// A context that has not yet acquired a connection.
    pub fn context(&self) -> DatabaseContext {
        DatabaseContext::new(self.clone())
    }

    /// A context that already holds a connection.
    pub async fn enter(&self) -> DbResult<DatabaseContext> {
        let mut ctx = self.context();
        ctx.enter().await?;
        Ok(ctx)
    }
}
