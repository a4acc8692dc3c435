//! Feedback parsing and persistence.
//!
//! Feedback objects are either structured JSON documents or free text.
//! [`FeedbackContent::parse`] decides which, and both variants normalize to
//! the same [`FeedbackRow`] shape before they are written.
//!
//! Persistence goes through the same batch loop as the file sync: each batch
//! is one transaction. The default batch size is 1, so every row commits on
//! its own and a failure leaves every earlier row in place. Without
//! checkpointing, re-ingesting the same objects appends duplicate rows
//! (at-least-once).

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::models::{FeedbackEntry, FeedbackObject, FeedbackRow};
use crate::report::WriteReport;
use crate::store::SyncStore;

/// `user_id` used when the object does not name one.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Decoded feedback content.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackContent {
    /// A JSON object. Fields other than `user_id` and `feedback_text` are ignored.
    Structured(Map<String, Value>),
    /// Anything that is not a JSON object, kept verbatim.
    PlainText(String),
}

impl FeedbackContent {
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => FeedbackContent::Structured(map),
            _ => FeedbackContent::PlainText(raw.to_string()),
        }
    }

    pub fn into_row(self) -> FeedbackRow {
        match self {
            FeedbackContent::Structured(mut map) => FeedbackRow {
                user_id: field_text(map.remove("user_id"))
                    .unwrap_or_else(|| ANONYMOUS_USER.to_string()),
                feedback_text: field_text(map.remove("feedback_text")).unwrap_or_default(),
            },
            FeedbackContent::PlainText(text) => FeedbackRow {
                user_id: ANONYMOUS_USER.to_string(),
                feedback_text: text,
            },
        }
    }
}

/// Strings are taken as-is; `null` counts as absent; other values keep their JSON text.
fn field_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

pub fn parse_feedback(object: &FeedbackObject) -> FeedbackEntry {
    FeedbackEntry {
        key: object.key.clone(),
        row: FeedbackContent::parse(&object.content).into_row(),
    }
}

/// Parse and persist feedback objects in order.
///
/// With `checkpoint` set, keys already recorded in the store are skipped and
/// each written key is recorded in the same transaction as its row. Any store
/// error stops the loop; committed batches stay.
pub async fn persist_feedback(
    store: &dyn SyncStore,
    objects: &[FeedbackObject],
    batch_size: usize,
    checkpoint: bool,
) -> WriteReport {
    let mut report = WriteReport::default();

    let seen = if checkpoint {
        match store.ingested_feedback_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                error!("Error loading feedback checkpoints: {:#}", e);
                report.record_failure(&e, objects.len());
                return report;
            }
        }
    } else {
        HashSet::new()
    };

    let mut entries = Vec::with_capacity(objects.len());
    for object in objects {
        if seen.contains(&object.key) {
            report.duplicates_skipped += 1;
            continue;
        }
        entries.push(parse_feedback(object));
    }
    if report.duplicates_skipped > 0 {
        info!(
            "Skipping {} feedback objects already ingested",
            report.duplicates_skipped
        );
    }

    let mut remaining = entries.len();
    for batch in entries.chunks(batch_size) {
        match store.insert_feedback(batch, checkpoint).await {
            Ok(()) => {
                report.record_batch(batch.len());
                remaining -= batch.len();
            }
            Err(e) => {
                error!("Error processing feedback data: {:#}", e);
                report.record_failure(&e, remaining);
                break;
            }
        }
    }

    if report.is_clean() {
        info!(
            "Stored {} feedback rows in {} batches",
            report.records_written, report.batches_committed
        );
    } else {
        warn!(
            "Stored {} of {} feedback rows before failure",
            report.records_written,
            entries.len()
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn object(key: &str, content: &str) -> FeedbackObject {
        FeedbackObject {
            key: key.to_string(),
            content: content.to_string(),
        }
    }

    fn row(user_id: &str, feedback_text: &str) -> FeedbackRow {
        FeedbackRow {
            user_id: user_id.to_string(),
            feedback_text: feedback_text.to_string(),
        }
    }

    #[test]
    fn structured_feedback() {
        let parsed = FeedbackContent::parse(r#"{"user_id": "u1", "feedback_text": "hello"}"#);
        assert!(matches!(parsed, FeedbackContent::Structured(_)));
        assert_eq!(parsed.into_row(), row("u1", "hello"));
    }

    #[test]
    fn plain_text_feedback() {
        let parsed = FeedbackContent::parse("plain text");
        assert_eq!(parsed, FeedbackContent::PlainText("plain text".to_string()));
        assert_eq!(parsed.into_row(), row("anonymous", "plain text"));
    }

    #[test]
    fn structured_defaults() {
        assert_eq!(
            FeedbackContent::parse(r#"{"feedback_text": "no user"}"#).into_row(),
            row("anonymous", "no user")
        );
        assert_eq!(
            FeedbackContent::parse(r#"{"user_id": "u2"}"#).into_row(),
            row("u2", "")
        );
        assert_eq!(
            FeedbackContent::parse(r#"{"user_id": null, "rating": 5}"#).into_row(),
            row("anonymous", "")
        );
    }

    #[test]
    fn non_string_fields_keep_json_text() {
        assert_eq!(
            FeedbackContent::parse(r#"{"user_id": 42, "feedback_text": ["a", "b"]}"#).into_row(),
            row("42", r#"["a","b"]"#)
        );
    }

    #[test]
    fn json_that_is_not_an_object_is_plain_text() {
        for raw in ["[1, 2]", "\"quoted\"", "17", "{broken"] {
            assert_eq!(
                FeedbackContent::parse(raw).into_row(),
                row("anonymous", raw),
                "input {raw}"
            );
        }
    }

    #[tokio::test]
    async fn one_row_per_object_in_order() {
        let store = InMemoryStore::new();
        let objects = vec![
            object("dev/feedback/1.json", r#"{"user_id": "u1", "feedback_text": "hello"}"#),
            object("dev/feedback/2.txt", "plain text"),
            object("dev/feedback/3.txt", ""),
        ];

        let report = persist_feedback(&store, &objects, 1, false).await;
        assert!(report.is_clean());
        assert_eq!(report.batches_committed, 3);
        assert_eq!(report.records_written, 3);
        assert_eq!(
            store.feedback_rows(),
            vec![row("u1", "hello"), row("anonymous", "plain text"), row("anonymous", "")]
        );
    }

    #[tokio::test]
    async fn reingesting_appends_duplicates_by_default() {
        let store = InMemoryStore::new();
        let objects = vec![object("k1", "first"), object("k2", "second")];

        persist_feedback(&store, &objects, 1, false).await;
        persist_feedback(&store, &objects, 1, false).await;
        assert_eq!(store.feedback_rows().len(), 4);
    }

    #[tokio::test]
    async fn checkpoint_skips_ingested_keys() {
        let store = InMemoryStore::new();
        let objects = vec![object("k1", "first"), object("k2", "second")];

        let first = persist_feedback(&store, &objects, 1, true).await;
        assert_eq!(first.records_written, 2);

        let more = vec![object("k1", "first"), object("k2", "second"), object("k3", "third")];
        let second = persist_feedback(&store, &more, 1, true).await;
        assert_eq!(second.duplicates_skipped, 2);
        assert_eq!(second.records_written, 1);
        assert_eq!(store.feedback_rows().len(), 3);
    }

    #[tokio::test]
    async fn failure_keeps_committed_rows_and_stops() {
        let store = InMemoryStore::new().fail_feedback_insert_at(3);
        let objects: Vec<_> = (1..=5)
            .map(|i| object(&format!("k{i}"), &format!("text {i}")))
            .collect();

        let report = persist_feedback(&store, &objects, 1, false).await;
        assert_eq!(report.records_written, 2);
        assert_eq!(report.records_failed, 3);
        assert!(report.first_error.is_some());
        assert_eq!(store.feedback_rows().len(), 2);
        assert_eq!(store.feedback_statements(), 3);
    }
}
