//! Core data types that flow through the two sync pipelines.

/// A local file read from the sync directory.
///
/// `filename` is the join key for the `iris` table; it is stored exactly as
/// listed, with no escaping or normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub filename: String,
    pub content: String,
}

/// A feedback object fetched from the bucket, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackObject {
    pub key: String,
    pub content: String,
}

/// Normalized feedback as stored in `user_feedback`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRow {
    pub user_id: String,
    pub feedback_text: String,
}

/// A parsed feedback row together with the key it came from.
///
/// The key is only persisted when feedback checkpointing is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackEntry {
    pub key: String,
    pub row: FeedbackRow,
}

/// Row counts for the tables owned by the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub files: i64,
    pub feedback: i64,
    pub checkpoints: i64,
}
