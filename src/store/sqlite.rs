//! SQLite [`SyncStore`] backed by a single-connection `sqlx` pool.
//!
//! Used for local development and tests; production profiles point at
//! PostgreSQL. The upsert and insert statements are the same text for both
//! backends, only the schema differs.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{QueryBuilder, Sqlite};

use crate::config::SqliteConfig;
use crate::models::{FeedbackEntry, FileRecord, TableCounts};

use super::{
    checkpointed_keys, create_tables, insert_feedback_batch, table_counts, upsert_file_batch,
    SqlBackend, SyncStore,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(config: &SqliteConfig) -> Result<Self> {
        let db_path = &config.path;

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database: {}", db_path.display()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS iris (
        filename TEXT PRIMARY KEY,
        content TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_feedback (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL DEFAULT 'anonymous',
        feedback_text TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS feedback_checkpoints (
        object_key TEXT PRIMARY KEY,
        ingested_at INTEGER NOT NULL
    )
    "#,
];

#[async_trait]
impl SqlBackend for Sqlite {
    async fn execute_built(
        mut builder: QueryBuilder<'_, Sqlite>,
        conn: &mut SqliteConnection,
    ) -> sqlx::Result<()> {
        builder.build().execute(conn).await?;
        Ok(())
    }
}

#[async_trait]
impl SyncStore for SqliteStore {
    async fn migrate(&self) -> Result<()> {
        create_tables(&self.pool, SQLITE_SCHEMA).await
    }

    async fn upsert_files(&self, batch: &[FileRecord]) -> Result<()> {
        upsert_file_batch(&self.pool, batch).await
    }

    async fn insert_feedback(&self, batch: &[FeedbackEntry], checkpoint: bool) -> Result<()> {
        insert_feedback_batch(&self.pool, batch, checkpoint).await
    }

    async fn ingested_feedback_keys(&self) -> Result<HashSet<String>> {
        checkpointed_keys(&self.pool).await
    }

    async fn counts(&self) -> Result<TableCounts> {
        table_counts(&self.pool).await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
