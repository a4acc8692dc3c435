//! Chunked upsert of local files into the `iris` table.
//!
//! Records are split into fixed-size batches in order. Each batch becomes one
//! multi-row `INSERT ... ON CONFLICT (filename) DO UPDATE` statement in its
//! own transaction, so a failure in batch *k* leaves batches `1..k-1` applied
//! and never attempts `k+1..n`.

use tracing::{error, info, warn};

use crate::models::FileRecord;
use crate::report::WriteReport;
use crate::store::SyncStore;

/// Number of statements needed for `records` rows at `batch_size` rows each.
pub fn batch_count(records: usize, batch_size: usize) -> usize {
    records.div_ceil(batch_size)
}

pub async fn upsert_files(
    store: &dyn SyncStore,
    records: &[FileRecord],
    batch_size: usize,
) -> WriteReport {
    let mut report = WriteReport::default();
    let total_batches = batch_count(records.len(), batch_size);
    let mut remaining = records.len();

    for (index, batch) in records.chunks(batch_size).enumerate() {
        match store.upsert_files(batch).await {
            Ok(()) => {
                report.record_batch(batch.len());
                remaining -= batch.len();
            }
            Err(e) => {
                error!(
                    "Error updating database at batch {}/{}: {:#}",
                    index + 1,
                    total_batches,
                    e
                );
                report.record_failure(&e, remaining);
                break;
            }
        }
    }

    if report.is_clean() {
        info!(
            "Database updated with {} local files in {} batches",
            report.records_written, report.batches_committed
        );
    } else {
        warn!(
            "Applied {} of {} batches before failure; {} files not written",
            report.batches_committed, total_batches, report.records_failed
        );
    }
    report
}
