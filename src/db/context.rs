use futures::FutureExt;
use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnection, SqliteQueryResult, SqliteRow};
use sqlx::Sqlite;
use tracing::{debug, warn};

use super::{Database, DbError, DbResult, RetryPolicy, RowMap, SqlParam, bind_all, row_to_map};

/// A statement on the context's connection, rebuilt for every attempt.
struct Statement<'s> {
    conn: &'s mut SqliteConnection,
    sql: &'s str,
    params: &'s [SqlParam],
}

type StatementAttempt<T> =
    for<'c, 's> fn(&'c mut Statement<'s>) -> BoxFuture<'c, Result<T, sqlx::Error>>;

fn execute<'c>(
    statement: &'c mut Statement<'_>,
) -> BoxFuture<'c, Result<SqliteQueryResult, sqlx::Error>> {
    bind_all(statement.sql, statement.params)
        .execute(&mut *statement.conn)
        .boxed()
}

fn fetch_all<'c>(
    statement: &'c mut Statement<'_>,
) -> BoxFuture<'c, Result<Vec<SqliteRow>, sqlx::Error>> {
    bind_all(statement.sql, statement.params)
        .fetch_all(&mut *statement.conn)
        .boxed()
}

fn fetch_optional<'c>(
    statement: &'c mut Statement<'_>,
) -> BoxFuture<'c, Result<Option<SqliteRow>, sqlx::Error>> {
    bind_all(statement.sql, statement.params)
        .fetch_optional(&mut *statement.conn)
        .boxed()
}

/// Transactional scope over one pooled connection.
///
/// `enter` acquires the connection and `exit` rolls back anything still open
/// before releasing it. A context is not reentrant. Statements run through
/// the database's [`RetryPolicy`].
#[derive(Debug)]
pub struct DatabaseContext {
    database: Database,
    retry: RetryPolicy,
    conn: Option<PoolConnection<Sqlite>>,
    in_transaction: bool,
}

impl DatabaseContext {
    pub(super) fn new(database: Database) -> Self {
        let retry = database.retry_policy();
        Self {
            database,
            retry,
            conn: None,
            in_transaction: false,
        }
    }

    /// Override the retry policy for this context only.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Whether `enter` has been called without a matching `exit`.
    pub fn is_active(&self) -> bool {
        self.conn.is_some()
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Acquire a connection.
    pub async fn enter(&mut self) -> DbResult<()> {
        if self.conn.is_some() {
            return Err(DbError::AlreadyEntered);
        }
        let conn = self.database.pool().acquire().await?;
        self.conn = Some(conn);
        Ok(())
    }

    /// Roll back any open transaction and release the connection.
    pub async fn exit(&mut self) -> DbResult<()> {
        if self.conn.is_none() {
            return Err(DbError::NotEntered);
        }
        let rollback = if self.in_transaction {
            warn!("database context exited with an open transaction, rolling back");
            self.rollback().await
        } else {
            Ok(())
        };
        self.conn = None;
        rollback
    }

    fn conn(&mut self) -> DbResult<&mut PoolConnection<Sqlite>> {
        self.conn.as_mut().ok_or(DbError::NotEntered)
    }

    /// Open a transaction.
    pub async fn begin(&mut self) -> DbResult<()> {
        if self.in_transaction {
            return Err(DbError::TransactionActive);
        }
        sqlx::query("BEGIN").execute(&mut **self.conn()?).await?;
        self.in_transaction = true;
        debug!("transaction started");
        Ok(())
    }

    /// Commit the open transaction. A no-op when none is open.
    pub async fn commit(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        sqlx::query("COMMIT").execute(&mut **self.conn()?).await?;
        self.in_transaction = false;
        debug!("transaction committed");
        Ok(())
    }

    /// Roll back the open transaction. A no-op when none is open.
    pub async fn rollback(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        sqlx::query("ROLLBACK").execute(&mut **self.conn()?).await?;
        debug!("transaction rolled back");
        Ok(())
    }

    /// Run one statement through the retry policy.
    async fn run_statement<T>(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        attempt_once: StatementAttempt<T>,
    ) -> DbResult<T> {
        let retry = self.retry;
        let mut statement = Statement {
            conn: &mut **self.conn()?,
            sql,
            params,
        };
        Ok(retry.run(&mut statement, attempt_once).await?)
    }

    /// Execute a statement, retrying transient failures. Returns the number
    /// of affected rows.
    pub async fn execute_with_retry(&mut self, sql: &str, params: &[SqlParam]) -> DbResult<u64> {
        let done = self.run_statement(sql, params, execute).await?;
        Ok(done.rows_affected())
    }

    /// Fetch every row as a column → value mapping.
    pub async fn fetch_all(&mut self, sql: &str, params: &[SqlParam]) -> DbResult<Vec<RowMap>> {
        let rows = self.run_statement(sql, params, fetch_all).await?;
        rows.iter().map(row_to_map).collect()
    }

    /// Fetch the first row, if any.
    pub async fn fetch_one(&mut self, sql: &str, params: &[SqlParam]) -> DbResult<Option<RowMap>> {
        let row = self.run_statement(sql, params, fetch_optional).await?;
        row.as_ref().map(row_to_map).transpose()
    }

    /// Execute inside a transaction. When the caller already opened one,
    /// commit and rollback are left to the caller.
    pub async fn execute_and_commit(&mut self, sql: &str, params: &[SqlParam]) -> DbResult<u64> {
        if self.in_transaction {
            return self.execute_with_retry(sql, params).await;
        }
        self.begin().await?;
        match self.execute_with_retry(sql, params).await {
            Ok(rows) => {
                self.commit().await?;
                Ok(rows)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed statement also failed");
                }
                Err(err)
            }
        }
    }
}

impl Drop for DatabaseContext {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.as_mut()
            && self.in_transaction
        {
            warn!("database context dropped with an open transaction, discarding connection");
            // The transaction must not leak back into the pool.
            conn.close_on_drop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enter_is_not_reentrant() {
        let db = Database::in_memory().await.expect("db");
        let mut ctx = db.context();
        ctx.enter().await.expect("enter");
        assert!(matches!(ctx.enter().await, Err(DbError::AlreadyEntered)));
        ctx.exit().await.expect("exit");
        assert!(matches!(ctx.exit().await, Err(DbError::NotEntered)));
    }

    #[tokio::test]
    async fn statements_require_an_entered_context() {
        let db = Database::in_memory().await.expect("db");
        let mut ctx = db.context();
        assert!(matches!(
            ctx.fetch_all("SELECT 1", &[]).await,
            Err(DbError::NotEntered)
        ));
    }

    #[tokio::test]
    async fn exit_rolls_back_open_transaction() {
        let db = Database::in_memory().await.expect("db");
        let mut ctx = db.enter().await.expect("enter");
        ctx.begin().await.expect("begin");
        ctx.execute_with_retry(
            "INSERT INTO notes (title, content, created_at, updated_at) VALUES (?, ?, ?, ?)",
            &["t".into(), "c".into(), "now".into(), "now".into()],
        )
        .await
        .expect("insert");
        ctx.exit().await.expect("exit");

        let mut check = db.enter().await.expect("enter");
        let rows = check.fetch_all("SELECT * FROM notes", &[]).await.expect("select");
        assert!(rows.is_empty());
        check.exit().await.expect("exit");
    }

    #[tokio::test]
    async fn execute_and_commit_persists() {
        let db = Database::in_memory().await.expect("db");
        let mut ctx = db.enter().await.expect("enter");
        let affected = ctx
            .execute_and_commit(
                "INSERT INTO notes (title, content, created_at, updated_at) VALUES (?, ?, ?, ?)",
                &["groceries".into(), "milk".into(), "now".into(), "now".into()],
            )
            .await
            .expect("insert");
        assert_eq!(affected, 1);
        assert!(!ctx.in_transaction());
        let row = ctx
            .fetch_one("SELECT title, content, include_in_prompt FROM notes", &[])
            .await
            .expect("select")
            .expect("row");
        assert_eq!(row["title"], "groceries");
        assert_eq!(row["include_in_prompt"], 1);
        ctx.exit().await.expect("exit");
    }

    #[tokio::test]
    async fn constraint_violation_is_not_retried_and_rolls_back() {
        let db = Database::in_memory().await.expect("db");
        let mut ctx = db.enter().await.expect("enter");
        let insert =
            "INSERT INTO notes (title, content, created_at, updated_at) VALUES (?, ?, ?, ?)";
        let params: Vec<SqlParam> = vec!["dup".into(), "a".into(), "now".into(), "now".into()];
        ctx.execute_and_commit(insert, &params).await.expect("first");
        let err = ctx.execute_and_commit(insert, &params).await.expect_err("duplicate");
        match err {
            DbError::Sqlx(sqlx::Error::Database(db_err)) => assert!(db_err.is_unique_violation()),
            other => panic!("expected unique violation, got {other:?}"),
        }
        assert!(!ctx.in_transaction());
        ctx.exit().await.expect("exit");
    }

    #[tokio::test]
    async fn caller_managed_transaction_is_left_open() {
        let db = Database::in_memory().await.expect("db");
        let mut ctx = db.enter().await.expect("enter");
        ctx.begin().await.expect("begin");
        ctx.execute_and_commit(
            "INSERT INTO notes (title, content, created_at, updated_at) \
             VALUES ('a', 'b', 'now', 'now')",
            &[],
        )
        .await
        .expect("insert");
        assert!(ctx.in_transaction());
        ctx.commit().await.expect("commit");
        let rows = ctx.fetch_all("SELECT id FROM notes", &[]).await.expect("select");
        assert_eq!(rows.len(), 1);
        ctx.exit().await.expect("exit");
    }
}
