//! In-memory [`SyncStore`] for tests.
//!
//! Mirrors the SQL semantics (upsert by filename, append-only feedback,
//! idempotent checkpoints) and records the size of every attempted
//! statement. Failures can be injected at the Nth call to exercise the
//! partial-failure paths of the batch loops.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{FeedbackEntry, FeedbackRow, FileRecord, TableCounts};

use super::SyncStore;

#[derive(Default)]
struct State {
    files: BTreeMap<String, String>,
    feedback: Vec<FeedbackRow>,
    checkpoints: HashSet<String>,
    file_batches: Vec<usize>,
    feedback_calls: usize,
    closed: bool,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    fail_file_batch_at: Option<usize>,
    fail_feedback_insert_at: Option<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`th `upsert_files` call (1-based) fail without applying.
    pub fn fail_file_batch_at(mut self, n: usize) -> Self {
        self.fail_file_batch_at = Some(n);
        self
    }

    /// Make the `n`th `insert_feedback` call (1-based) fail without applying.
    pub fn fail_feedback_insert_at(mut self, n: usize) -> Self {
        self.fail_feedback_insert_at = Some(n);
        self
    }

    pub fn files(&self) -> BTreeMap<String, String> {
        self.lock().files.clone()
    }

    pub fn feedback_rows(&self) -> Vec<FeedbackRow> {
        self.lock().feedback.clone()
    }

    /// Sizes of every attempted file upsert, in call order.
    pub fn file_batch_sizes(&self) -> Vec<usize> {
        self.lock().file_batches.clone()
    }

    pub fn feedback_statements(&self) -> usize {
        self.lock().feedback_calls
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SyncStore for InMemoryStore {
    async fn migrate(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_files(&self, batch: &[FileRecord]) -> Result<()> {
        let mut state = self.lock();
        state.file_batches.push(batch.len());
        if self.fail_file_batch_at == Some(state.file_batches.len()) {
            bail!("injected failure at file batch {}", state.file_batches.len());
        }
        for record in batch {
            state
                .files
                .insert(record.filename.clone(), record.content.clone());
        }
        Ok(())
    }

    async fn insert_feedback(&self, batch: &[FeedbackEntry], checkpoint: bool) -> Result<()> {
        let mut state = self.lock();
        state.feedback_calls += 1;
        if self.fail_feedback_insert_at == Some(state.feedback_calls) {
            bail!("injected failure at feedback insert {}", state.feedback_calls);
        }
        for entry in batch {
            state.feedback.push(entry.row.clone());
            if checkpoint {
                state.checkpoints.insert(entry.key.clone());
            }
        }
        Ok(())
    }

    async fn ingested_feedback_keys(&self) -> Result<HashSet<String>> {
        Ok(self.lock().checkpoints.clone())
    }

    async fn counts(&self) -> Result<TableCounts> {
        let state = self.lock();
        Ok(TableCounts {
            files: state.files.len() as i64,
            feedback: state.feedback.len() as i64,
            checkpoints: state.checkpoints.len() as i64,
        })
    }

    async fn close(&self) {
        self.lock().closed = true;
    }
}
