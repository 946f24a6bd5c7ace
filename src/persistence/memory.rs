//! In-memory reference implementation of [`PersistenceAdapter`].

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{
  persistence::{PersistenceAdapter, PersistenceError, Record},
  signals::{Event, FieldValue, SignalArbiter, app_signals},
};

fn matches(row: &Record, filter: &Record) -> bool {
  filter.iter().all(|(k, v)| row.get(k) == Some(v))
}

fn publish(broker: &SignalArbiter, row: &Record, action: &str) {
  let mut event: Event = row.clone();
  event.insert("_action".to_string(), FieldValue::Str(action.to_string()));
  broker.publish(&event);
}

/// Stores each table as a plain `Vec<Record>` behind a [`DashMap`], and publishes
/// a signal on every mutation.
pub struct InMemoryAdapter {
  tables: DashMap<String, Vec<Record>>,
  broker: SignalArbiter,
}

impl Default for InMemoryAdapter {
  fn default() -> Self {
    Self::new()
  }
}

impl InMemoryAdapter {
  /// Creates an empty adapter wired to the global signal broker.
  pub fn new() -> Self {
    Self {
      tables: DashMap::new(),
      broker: app_signals().clone(),
    }
  }

  /// Creates an empty adapter wired to a specific broker, for test isolation.
  pub fn with_broker(broker: SignalArbiter) -> Self {
    Self {
      tables: DashMap::new(),
      broker,
    }
  }
}

#[async_trait]
impl PersistenceAdapter for InMemoryAdapter {
  async fn create(&self, table: &str, values: Record) -> Result<(), PersistenceError> {
    if values.is_empty() {
      return Ok(());
    }
    self
      .tables
      .entry(table.to_string())
      .or_default()
      .push(values.clone());
    publish(&self.broker, &values, "create");
    Ok(())
  }

  async fn merge(&self, table: &str, values: Record) -> Result<(), PersistenceError> {
    if values.is_empty() {
      return Ok(());
    }
    let mut rows = self.tables.entry(table.to_string()).or_default();
    if rows.iter().any(|row| matches(row, &values)) {
      return Ok(());
    }
    rows.push(values.clone());
    drop(rows);
    publish(&self.broker, &values, "merge");
    Ok(())
  }

  async fn update(&self, table: &str, filter: Record, values: Record) -> Result<(), PersistenceError> {
    let Some(mut rows) = self.tables.get_mut(table) else {
      return Ok(());
    };
    let mut updated = Vec::new();
    for row in rows.iter_mut() {
      if matches(row, &filter) {
        row.extend(values.clone());
        updated.push(row.clone());
      }
    }
    drop(rows);
    for row in updated {
      publish(&self.broker, &row, "update");
    }
    Ok(())
  }

  async fn get(&self, table: &str, filter: Record) -> Result<Record, PersistenceError> {
    self
      .tables
      .get(table)
      .and_then(|rows| rows.iter().find(|row| matches(row, &filter)).cloned())
      .ok_or_else(|| PersistenceError::NotFound {
        table: table.to_string(),
        filter,
      })
  }

  async fn select(&self, table: &str, filter: Record) -> Result<Vec<Record>, PersistenceError> {
    Ok(
      self
        .tables
        .get(table)
        .map(|rows| rows.iter().filter(|row| matches(row, &filter)).cloned().collect())
        .unwrap_or_default(),
    )
  }

  async fn delete(&self, table: &str, filter: Record) -> Result<(), PersistenceError> {
    let Some(mut rows) = self.tables.get_mut(table) else {
      return Ok(());
    };
    let mut removed = Vec::new();
    rows.retain(|row| {
      if matches(row, &filter) {
        removed.push(row.clone());
        false
      } else {
        true
      }
    });
    drop(rows);
    for row in removed {
      publish(&self.broker, &row, "delete");
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(pairs: &[(&str, FieldValue)]) -> Record {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
  }

  #[tokio::test]
  async fn create_then_get_round_trips() {
    let adapter = InMemoryAdapter::with_broker(SignalArbiter::new());
    let row = record(&[("id", FieldValue::Int(1)), ("name", FieldValue::Str("alpha".into()))]);
    adapter.create("projects", row.clone()).await.unwrap();

    let fetched = adapter
      .get("projects", record(&[("id", FieldValue::Int(1))]))
      .await
      .unwrap();
    assert_eq!(fetched, row);
  }

  #[tokio::test]
  async fn get_missing_row_returns_not_found() {
    let adapter = InMemoryAdapter::with_broker(SignalArbiter::new());
    let err = adapter
      .get("projects", record(&[("id", FieldValue::Int(99))]))
      .await
      .unwrap_err();
    assert!(matches!(err, PersistenceError::NotFound { .. }));
  }

  #[tokio::test]
  async fn merge_does_not_duplicate_existing_row() {
    let adapter = InMemoryAdapter::with_broker(SignalArbiter::new());
    let row = record(&[("id", FieldValue::Int(1))]);
    adapter.create("projects", row.clone()).await.unwrap();
    adapter.merge("projects", row.clone()).await.unwrap();

    let all = adapter.select("projects", Record::new()).await.unwrap();
    assert_eq!(all.len(), 1);
  }

  #[tokio::test]
  async fn update_overwrites_matching_row_fields() {
    let adapter = InMemoryAdapter::with_broker(SignalArbiter::new());
    let row = record(&[("id", FieldValue::Int(1)), ("name", FieldValue::Str("alpha".into()))]);
    adapter.create("projects", row).await.unwrap();

    adapter
      .update(
        "projects",
        record(&[("id", FieldValue::Int(1))]),
        record(&[("name", FieldValue::Str("beta".into()))]),
      )
      .await
      .unwrap();

    let fetched = adapter
      .get("projects", record(&[("id", FieldValue::Int(1))]))
      .await
      .unwrap();
    assert_eq!(fetched.get("name"), Some(&FieldValue::Str("beta".into())));
  }

  #[tokio::test]
  async fn update_with_no_matching_row_is_a_no_op() {
    let adapter = InMemoryAdapter::with_broker(SignalArbiter::new());
    adapter
      .update(
        "projects",
        record(&[("id", FieldValue::Int(99))]),
        record(&[("name", FieldValue::Str("beta".into()))]),
      )
      .await
      .unwrap();
    let all = adapter.select("projects", Record::new()).await.unwrap();
    assert!(all.is_empty());
  }

  #[tokio::test]
  async fn delete_publishes_event_with_action() {
    let broker = SignalArbiter::new();
    let adapter = InMemoryAdapter::with_broker(broker.clone());
    let row = record(&[("id", FieldValue::Int(1))]);
    adapter.create("projects", row.clone()).await.unwrap();

    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    broker.subscribe(
      crate::signals::Filter::from([("id".to_string(), FieldValue::Int(1))]),
      move |event| seen_clone.lock().unwrap().push(event.clone()),
    );

    adapter.delete("projects", record(&[("id", FieldValue::Int(1))])).await.unwrap();

    let events = seen.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].get("_action"), Some(&FieldValue::Str("delete".to_string())));
  }
}
