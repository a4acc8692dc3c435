//! # iris-sync
//!
//! Batch synchronization job with two independent pipelines:
//!
//! 1. **File sync**: every regular file directly under the profile's local
//!    directory is upserted into the `iris` table keyed by filename, in
//!    chunks of 100 rows, each chunk committed on its own.
//! 2. **Feedback ingestion**: every object under the profile's S3 prefix is
//!    fetched, parsed as JSON (`user_id`, `feedback_text`) or taken as plain
//!    text, and appended to `user_feedback`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │ connector_fs │──▶│    upsert    │──┐
//! └──────────────┘   └──────────────┘  │   ┌──────────────────┐
//!                                      ├──▶│ store (PG/SQLite) │
//! ┌──────────────┐   ┌──────────────┐  │   └──────────────────┘
//! │ connector_s3 │──▶│   feedback   │──┘
//! └──────────────┘   └──────────────┘
//!          ▲ orchestrated by `ingest`, summarized in `report`
//! ```
//!
//! No stage failure aborts the run. Producers return what they gathered
//! before an error, writers stop at the first failed batch, and everything
//! is folded into a [`report::RunSummary`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and profile selection |
//! | [`models`] | Core data types |
//! | [`connector_fs`] | Directory reader |
//! | [`connector_s3`] | S3 feedback fetcher |
//! | [`upsert`] | Chunked file upsert |
//! | [`feedback`] | Feedback parsing and persistence |
//! | [`ingest`] | Pipeline orchestration |
//! | [`report`] | Stage and run summaries |
//! | [`store`] | Storage trait and backends |
//! | [`db`] | Backend selection |
//! | [`migrate`] | Schema creation and stats |

pub mod config;
pub mod connector_fs;
pub mod connector_s3;
pub mod db;
pub mod feedback;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod report;
pub mod store;
pub mod upsert;
