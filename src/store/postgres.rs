//! PostgreSQL [`SyncStore`] for deployed profiles.
//!
//! Connection parameters come from the profile's `[database]` section. Each
//! stage opens its own single-connection pool and closes it when the stage
//! ends; nothing is shared across stages or runs.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};

use crate::config::PostgresConfig;
use crate::models::{FeedbackEntry, FileRecord, TableCounts};

use super::{
    checkpointed_keys, create_tables, insert_feedback_batch, table_counts, upsert_file_batch,
    SqlBackend, SyncStore,
};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        // Never log the options; they carry the password.
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name)
            .username(&config.user)
            .password(&config.password);

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to postgres at {}:{}/{}",
                    config.host, config.port, config.name
                )
            })?;

        Ok(Self { pool })
    }
}

const POSTGRES_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS iris (
        filename TEXT PRIMARY KEY,
        content TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_feedback (
        id BIGSERIAL PRIMARY KEY,
        user_id TEXT NOT NULL DEFAULT 'anonymous',
        feedback_text TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS feedback_checkpoints (
        object_key TEXT PRIMARY KEY,
        ingested_at BIGINT NOT NULL
    )
    "#,
];

#[async_trait]
impl SqlBackend for Postgres {
    async fn execute_built(
        mut builder: QueryBuilder<'_, Postgres>,
        conn: &mut PgConnection,
    ) -> sqlx::Result<()> {
        builder.build().execute(conn).await?;
        Ok(())
    }
}

#[async_trait]
impl SyncStore for PostgresStore {
    async fn migrate(&self) -> Result<()> {
        create_tables(&self.pool, POSTGRES_SCHEMA).await
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
