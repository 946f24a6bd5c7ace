//! Storage contract linking persistence to cache invalidation (component F).
//!
//! `PersistenceAdapter` mirrors the small set of operations a CRUD-backed model
//! needs — create, merge (upsert), point lookup, filtered select, delete — the
//! same shape used across this codebase's service layers. What's specific to this
//! crate is that every mutation publishes an event to [`crate::signals`] carrying
//! the mutated row's fields plus an `_action` discriminator, so any
//! [`crate::cache::InvalidationScope`] subscribed to those fields is notified.

use std::collections::BTreeMap;

use async_trait::async_trait;
use http::StatusCode;

use crate::{responder::Responder, signals::FieldValue, types::Response};

/// A persisted record, represented field-by-field rather than as a fixed struct
/// so one adapter implementation can back any table shape.
pub type Record = BTreeMap<String, FieldValue>;

/// In-memory reference implementation of [`PersistenceAdapter`].
pub mod memory;

/// Errors a [`PersistenceAdapter`] can return.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
  /// No row matched the lookup filter.
  #[error("{table} matching {filter:?} doesn't exist")]
  NotFound { table: String, filter: Record },
}

impl Responder for PersistenceError {
  fn into_response(self) -> Response {
    let PersistenceError::NotFound { table, filter } = &self;
    let body = serde_json::json!({
      "message": format!("{table} matching {filter:?} doesn't exist"),
    })
    .to_string();
    http::Response::builder()
      .status(StatusCode::NOT_FOUND)
      .header(http::header::CONTENT_TYPE, "application/json")
      .body(crate::body::TakoBody::from(body))
      .unwrap()
  }
}

/// Storage contract for a table-like collection of [`Record`]s.
///
/// `table` identifies which collection an operation targets; `filter`/`key`
/// arguments are field-equality constraints, mirroring a SQL `WHERE` clause
/// built from keyword arguments.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
  /// Inserts a new row. A no-op if `values` is empty.
  async fn create(&self, table: &str, values: Record) -> Result<(), PersistenceError>;

  /// Inserts a new row, silently doing nothing if a conflicting row already
  /// exists (an upsert with "do nothing" conflict resolution).
  async fn merge(&self, table: &str, values: Record) -> Result<(), PersistenceError>;

  /// Overwrites fields in every row matching `filter` with `values`, leaving
  /// fields `values` doesn't mention untouched. A no-op if no row matches.
  async fn update(&self, table: &str, filter: Record, values: Record) -> Result<(), PersistenceError>;

  /// Returns the single row matching `filter`, or [`PersistenceError::NotFound`]
  /// if none exists.
  async fn get(&self, table: &str, filter: Record) -> Result<Record, PersistenceError>;

  /// Returns every row matching `filter`.
  async fn select(&self, table: &str, filter: Record) -> Result<Vec<Record>, PersistenceError>;

  /// Deletes every row matching `filter`.
  async fn delete(&self, table: &str, filter: Record) -> Result<(), PersistenceError>;
}
