//! Per-stage outcomes and the run summary.
//!
//! Producers return a [`Collected`] (items plus the failure that stopped
//! collection, if any). Writers return a [`WriteReport`]. The orchestrator
//! folds both into a [`StageSummary`] per pipeline and a [`RunSummary`] for
//! the whole job.

use std::fmt::{self, Display};

/// Items gathered by a producer, possibly truncated by a failure.
#[derive(Debug)]
pub struct Collected<T, E> {
    pub items: Vec<T>,
    pub failure: Option<E>,
}

impl<T, E> Collected<T, E> {
    pub fn complete(items: Vec<T>) -> Self {
        Self {
            items,
            failure: None,
        }
    }

    pub fn truncated(items: Vec<T>, failure: E) -> Self {
        Self {
            items,
            failure: Some(failure),
        }
    }
}

/// Outcome of a batched write loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Transactions that committed.
    pub batches_committed: u64,
    pub records_written: u64,
    /// Records in the failed batch plus every batch that was never attempted.
    pub records_failed: u64,
    /// Feedback keys skipped because a checkpoint already recorded them.
    pub duplicates_skipped: u64,
    pub first_error: Option<String>,
}

impl WriteReport {
    pub fn record_batch(&mut self, len: usize) {
        self.batches_committed += 1;
        self.records_written += len as u64;
    }

    pub fn record_failure(&mut self, error: &anyhow::Error, unwritten: usize) {
        self.records_failed += unwritten as u64;
        if self.first_error.is_none() {
            self.first_error = Some(format!("{:#}", error));
        }
    }

    pub fn is_clean(&self) -> bool {
        self.first_error.is_none()
    }
}

/// Producer and writer outcome for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSummary {
    pub stage: &'static str,
    pub collected: usize,
    pub collect_error: Option<String>,
    /// `None` when the write step was skipped because nothing was collected.
    pub write: Option<WriteReport>,
}

impl StageSummary {
    pub fn new<T, E: Display>(stage: &'static str, collected: &Collected<T, E>) -> Self {
        Self {
            stage,
            collected: collected.items.len(),
            collect_error: collected.failure.as_ref().map(|e| e.to_string()),
            write: None,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.collect_error.is_none() && self.write.as_ref().map_or(true, WriteReport::is_clean)
    }
}

/// Outcome of a full run: file sync followed by feedback ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub files: Option<StageSummary>,
    pub feedback: Option<StageSummary>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.stages().all(StageSummary::is_clean)
    }

    pub fn stages(&self) -> impl Iterator<Item = &StageSummary> {
        self.files.iter().chain(self.feedback.iter())
    }
}

impl Display for StageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "sync {}", self.stage)?;
        writeln!(f, "  collected: {}", self.collected)?;
        if let Some(ref err) = self.collect_error {
            writeln!(f, "  collect error: {}", err)?;
        }
        match &self.write {
            None => writeln!(f, "  write: skipped (nothing to process)")?,
            Some(report) => {
                writeln!(f, "  batches committed: {}", report.batches_committed)?;
                writeln!(f, "  rows written: {}", report.records_written)?;
                if report.duplicates_skipped > 0 {
                    writeln!(f, "  duplicates skipped: {}", report.duplicates_skipped)?;
                }
                if report.records_failed > 0 {
                    writeln!(f, "  rows failed: {}", report.records_failed)?;
                }
                if let Some(ref err) = report.first_error {
                    writeln!(f, "  write error: {}", err)?;
                }
            }
        }
        write!(f, "{}", if self.is_clean() { "ok" } else { "partial" })
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for stage in self.stages() {
            if !first {
                writeln!(f)?;
            }
            writeln!(f, "{}", stage)?;
            first = false;
        }
        Ok(())
    }
}
