use anyhow::Result;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::store::postgres::PostgresStore;
use crate::store::sqlite::SqliteStore;
use crate::store::SyncStore;

/// Open a store for the configured backend.
///
/// Callers own the returned store for the length of one stage and must call
/// [`SyncStore::close`] when done.
pub async fn connect(config: &DatabaseConfig) -> Result<Box<dyn SyncStore>> {
    match config {
        DatabaseConfig::Postgres(pg) => {
            debug!("Connecting to postgres at {}:{}/{}", pg.host, pg.port, pg.name);
            Ok(Box::new(PostgresStore::connect(pg).await?))
        }
        DatabaseConfig::Sqlite(sqlite) => {
            debug!("Opening sqlite database {}", sqlite.path.display());
            Ok(Box::new(SqliteStore::connect(sqlite).await?))
        }
    }
}
