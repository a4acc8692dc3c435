//! Pipeline orchestration.
//!
//! Runs the file sync (directory → `iris`) and then the feedback ingestion
//! (bucket → `user_feedback`). The two stages are independent: each opens
//! and closes its own store connection, and neither one's failure stops the
//! other. A stage's write step is skipped when its producer found nothing.

use tracing::{error, info};

use crate::config::Config;
use crate::connector_fs;
use crate::connector_s3::{self, AwsCredentials};
use crate::db;
use crate::feedback;
use crate::models::{FeedbackObject, FileRecord};
use crate::report::{RunSummary, StageSummary, WriteReport};
use crate::store::SyncStore;
use crate::upsert;

/// Run both pipelines in order and return their combined outcome.
pub async fn run_all(config: &Config, credentials: Option<&AwsCredentials>) -> RunSummary {
    let files = sync_files(config).await;
    let feedback = ingest_feedback(config, credentials).await;
    RunSummary {
        files: Some(files),
        feedback: Some(feedback),
    }
}

#[tracing::instrument(name = "files", skip_all)]
pub async fn sync_files(config: &Config) -> StageSummary {
    let collected = connector_fs::read_directory(&config.local_files_dir);
    let mut summary = StageSummary::new("files", &collected);

    if collected.items.is_empty() {
        info!("No local files to process.");
        return summary;
    }

    let report = match db::connect(&config.database).await {
        Ok(store) => {
            write_files(store.as_ref(), &collected.items, config.sync.file_batch_size).await
        }
        Err(e) => connection_failure(&e, collected.items.len()),
    };

    summary.write = Some(report);
    summary
}

#[tracing::instrument(name = "feedback", skip_all)]
pub async fn ingest_feedback(
    config: &Config,
    credentials: Option<&AwsCredentials>,
) -> StageSummary {
    let collected =
        connector_s3::fetch_feedback(&config.bucket, &config.feedback_prefix, credentials).await;
    let mut summary = StageSummary::new("feedback", &collected);

    if collected.items.is_empty() {
        info!("No feedback data to process from S3.");
        return summary;
    }

    let report = match db::connect(&config.database).await {
        Ok(store) => {
            write_feedback(
                store.as_ref(),
                &collected.items,
                config.sync.feedback_batch_size,
                config.sync.feedback_checkpoint,
            )
            .await
        }
        Err(e) => connection_failure(&e, collected.items.len()),
    };

    summary.write = Some(report);
    summary
}

/// Upsert `records` through `store`, then close it whatever the outcome.
pub async fn write_files(
    store: &dyn SyncStore,
    records: &[FileRecord],
    batch_size: usize,
) -> WriteReport {
    let report = upsert::upsert_files(store, records, batch_size).await;
    store.close().await;
    report
}

/// Persist `objects` through `store`, then close it whatever the outcome.
pub async fn write_feedback(
    store: &dyn SyncStore,
    objects: &[FeedbackObject],
    batch_size: usize,
    checkpoint: bool,
) -> WriteReport {
    let report = feedback::persist_feedback(store, objects, batch_size, checkpoint).await;
    store.close().await;
    report
}

fn connection_failure(error: &anyhow::Error, unwritten: usize) -> WriteReport {
    error!("Error connecting to database: {:#}", error);
    let mut report = WriteReport::default();
    report.record_failure(error, unwritten);
    report
}
