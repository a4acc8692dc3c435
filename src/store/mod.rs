//! Storage abstraction for the sync pipelines.
//!
//! The [`SyncStore`] trait covers every write the pipelines make, so the
//! batch loops in [`upsert`](crate::upsert) and [`feedback`](crate::feedback)
//! run unchanged against PostgreSQL, SQLite, or the in-memory store used in
//! tests.
//!
//! Each call to [`upsert_files`](SyncStore::upsert_files) or
//! [`insert_feedback`](SyncStore::insert_feedback) is exactly one
//! transaction. Dropping an uncommitted sqlx transaction rolls it back, so an
//! error mid-statement never leaves a half-applied batch.

#[cfg(test)]
pub mod memory;
pub mod postgres;
pub mod sqlite;

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Database, Encode, Executor, FromRow, IntoArguments, Pool, QueryBuilder, Type};

use crate::models::{FeedbackEntry, FileRecord, TableCounts};

/// Prefix of the multi-row file upsert; `VALUES` are appended per batch.
const UPSERT_FILES_SQL: &str = "INSERT INTO iris (filename, content) ";
const UPSERT_FILES_CONFLICT_SQL: &str =
    " ON CONFLICT (filename) DO UPDATE SET content = EXCLUDED.content";

const INSERT_FEEDBACK_SQL: &str = "INSERT INTO user_feedback (user_id, feedback_text) ";

const INSERT_CHECKPOINT_SQL: &str = "INSERT INTO feedback_checkpoints (object_key, ingested_at) ";
const INSERT_CHECKPOINT_CONFLICT_SQL: &str = " ON CONFLICT (object_key) DO NOTHING";

#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Create the pipeline tables if they do not exist.
    async fn migrate(&self) -> Result<()>;

    /// Upsert one batch of files in a single statement and transaction.
    async fn upsert_files(&self, batch: &[FileRecord]) -> Result<()>;

    /// Append one batch of feedback rows in a single transaction.
    ///
    /// With `checkpoint` set, each entry's key is recorded in
    /// `feedback_checkpoints` in the same transaction.
    async fn insert_feedback(&self, batch: &[FeedbackEntry], checkpoint: bool) -> Result<()>;

    /// Keys recorded by earlier checkpointed runs.
    async fn ingested_feedback_keys(&self) -> Result<HashSet<String>>;

    async fn counts(&self) -> Result<TableCounts>;

    /// Release the underlying connection.
    async fn close(&self);
}

// ============ Shared SQL paths ============
//
// PostgreSQL and SQLite accept the same statements, so the write and count
// paths are generic over the sqlx backend. Each backend keeps its own
// connection setup, schema and `SqlBackend` impl.

/// Runs a finished [`QueryBuilder`] on a connection of the concrete backend.
#[async_trait]
pub(crate) trait SqlBackend: Database {
    async fn execute_built(
        builder: QueryBuilder<'_, Self>,
        conn: &mut Self::Connection,
    ) -> sqlx::Result<()>;
}

/// Run each schema statement in order.
pub(crate) async fn create_tables<DB>(pool: &Pool<DB>, schema: &[&str]) -> Result<()>
where
    DB: Database,
    for<'q> DB::Arguments<'q>: IntoArguments<'q, DB>,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
{
    for statement in schema {
        sqlx::query(*statement)
            .execute(pool)
            .await
            .context("Failed to create pipeline tables")?;
    }
    Ok(())
}

pub(crate) async fn upsert_file_batch<DB>(pool: &Pool<DB>, batch: &[FileRecord]) -> Result<()>
where
    DB: SqlBackend,
    for<'q> String: Encode<'q, DB> + Type<DB>,
{
    if batch.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    let mut builder: QueryBuilder<DB> = QueryBuilder::new(UPSERT_FILES_SQL);
    builder.push_values(batch, |mut b, record| {
        b.push_bind(&record.filename).push_bind(&record.content);
    });
    builder.push(UPSERT_FILES_CONFLICT_SQL);
    DB::execute_built(builder, &mut *tx)
        .await
        .with_context(|| format!("Failed to upsert {} files", batch.len()))?;

    tx.commit().await?;
    Ok(())
}

pub(crate) async fn insert_feedback_batch<DB>(
    pool: &Pool<DB>,
    batch: &[FeedbackEntry],
    checkpoint: bool,
) -> Result<()>
where
    DB: SqlBackend,
    for<'q> String: Encode<'q, DB> + Type<DB>,
    for<'q> i64: Encode<'q, DB> + Type<DB>,
{
    if batch.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    let mut builder: QueryBuilder<DB> = QueryBuilder::new(INSERT_FEEDBACK_SQL);
    builder.push_values(batch, |mut b, entry| {
        b.push_bind(&entry.row.user_id)
            .push_bind(&entry.row.feedback_text);
    });
    DB::execute_built(builder, &mut *tx)
        .await
        .with_context(|| format!("Failed to insert {} feedback rows", batch.len()))?;

    if checkpoint {
        let now = chrono::Utc::now().timestamp();
        let mut builder: QueryBuilder<DB> = QueryBuilder::new(INSERT_CHECKPOINT_SQL);
        builder.push_values(batch, |mut b, entry| {
            b.push_bind(&entry.key).push_bind(now);
        });
        builder.push(INSERT_CHECKPOINT_CONFLICT_SQL);
        DB::execute_built(builder, &mut *tx)
            .await
            .context("Failed to record feedback checkpoints")?;
    }

    tx.commit().await?;
    Ok(())
}

pub(crate) async fn checkpointed_keys<DB>(pool: &Pool<DB>) -> Result<HashSet<String>>
where
    DB: Database,
    for<'q> DB::Arguments<'q>: IntoArguments<'q, DB>,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
    (String,): for<'r> FromRow<'r, DB::Row>,
{
    let keys: Vec<String> = sqlx::query_scalar("SELECT object_key FROM feedback_checkpoints")
        .fetch_all(pool)
        .await?;
    Ok(keys.into_iter().collect())
}

pub(crate) async fn table_counts<DB>(pool: &Pool<DB>) -> Result<TableCounts>
where
    DB: Database,
    for<'q> DB::Arguments<'q>: IntoArguments<'q, DB>,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
    (i64,): for<'r> FromRow<'r, DB::Row>,
{
    let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM iris")
        .fetch_one(pool)
        .await?;
    let feedback: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_feedback")
        .fetch_one(pool)
        .await?;
    let checkpoints: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feedback_checkpoints")
        .fetch_one(pool)
        .await?;
    Ok(TableCounts {
        files,
        feedback,
        checkpoints,
    })
}
