use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::models::TableCounts;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let store = db::connect(&config.database).await?;
    let result = store.migrate().await;
    store.close().await;
    result
}

pub async fn table_counts(config: &Config) -> Result<TableCounts> {
    let store = db::connect(&config.database).await?;
    let result = store.counts().await;
    store.close().await;
    result
}
