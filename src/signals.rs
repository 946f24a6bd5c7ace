//! In-process publish/subscribe broker used to drive cache invalidation.
//!
//! Subscribers register a *filter* — a set of `(field, value)` pairs — and are
//! notified whenever a published event carries a superset of that filter. Internally
//! subscriptions are stored as a tree keyed on sorted field/value pairs, so a filter
//! of `{a: 1, b: 2}` and a filter of `{a: 1}` share the same path down to the node for
//! `a = 1` before diverging. A published event with fields `{a: 1, b: 2, c: 3}` walks
//! every sorted subsequence of its fields, so it notifies subscribers on `{a:1}`,
//! `{a:1,b:2}`, `{a:1,c:3}`, `{b:2}`, `{b:2,c:3}`, `{c:3}`, and so on, firing each
//! matching node's callbacks exactly once.
//!
//! This module does not know about HTTP or caching; [`crate::cache`] builds the
//! invalidation-scope API on top of it.

use std::{
  collections::HashMap,
  panic::{AssertUnwindSafe, catch_unwind},
  sync::Arc,
  sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// Well-known `"event"` field values for operational (non-cache) signals, carried over
/// from the framework's own lifecycle/metrics hooks so logging plugins have a stable
/// vocabulary to filter on.
pub mod ids {
  pub const SERVER_STARTED: &str = "server.started";
  pub const SERVER_STOPPED: &str = "server.stopped";
  pub const REQUEST_STARTED: &str = "request.started";
  pub const REQUEST_COMPLETED: &str = "request.completed";
}

/// A single field value carried by an event or named in a filter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldValue {
  Str(String),
  Int(i64),
  Bool(bool),
}

impl From<&str> for FieldValue {
  fn from(value: &str) -> Self {
    FieldValue::Str(value.to_string())
  }
}

impl From<String> for FieldValue {
  fn from(value: String) -> Self {
    FieldValue::Str(value)
  }
}

impl From<i64> for FieldValue {
  fn from(value: i64) -> Self {
    FieldValue::Int(value)
  }
}

impl From<bool> for FieldValue {
  fn from(value: bool) -> Self {
    FieldValue::Bool(value)
  }
}

/// A fact published to the broker: an ordered map of field name to value.
///
/// `BTreeMap` gives us sorted iteration for free, which is what the tree walk in
/// [`SignalArbiter::publish`] relies on.
pub type Event = std::collections::BTreeMap<String, FieldValue>;

/// A subscription filter, shaped identically to an [`Event`].
///
/// A filter matches an event if every `(field, value)` pair in the filter also
/// appears in the event; extra fields on the event are ignored.
pub type Filter = std::collections::BTreeMap<String, FieldValue>;

type CallbackId = u64;

/// A synchronous event callback.
///
/// Callbacks run inline on the publishing thread/task and must not block; a
/// callback that panics is caught and logged rather than unwinding into the
/// publisher (see [`SignalArbiter::publish`]).
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Node {
  children: HashMap<(String, FieldValue), usize>,
  callbacks: std::collections::HashSet<CallbackId>,
}

struct Inner {
  nodes: RwLock<Vec<Node>>,
  callbacks: DashMap<CallbackId, Callback>,
  /// Node each callback id lives on, so unsubscribe doesn't need to re-walk the tree.
  locations: DashMap<CallbackId, usize>,
  next_id: AtomicU64,
}

impl Default for Inner {
  fn default() -> Self {
    Self {
      nodes: RwLock::new(vec![Node::default()]),
      callbacks: DashMap::new(),
      locations: DashMap::new(),
      next_id: AtomicU64::new(0),
    }
  }
}

const ROOT: usize = 0;

/// A handle returned by [`SignalArbiter::subscribe`] that removes the subscription
/// when [`Self::unsubscribe`] is called, or when dropped.
pub struct SubscriptionHandle {
  inner: Arc<Inner>,
  id: CallbackId,
}

impl SubscriptionHandle {
  /// Removes this subscription's callback from the broker.
  ///
  /// Safe to call more than once; later calls are no-ops.
  pub fn unsubscribe(&self) {
    self.inner.callbacks.remove(&self.id);
    if let Some((_, node_idx)) = self.inner.locations.remove(&self.id) {
      self.inner.nodes.write()[node_idx].callbacks.remove(&self.id);
    }
  }
}

/// Topic-indexed publish/subscribe broker (the cache core's component A).
///
/// Cloning a `SignalArbiter` gives you a handle to the same underlying broker;
/// it's cheap and intended to be shared across a process via [`app_signals`].
#[derive(Clone)]
pub struct SignalArbiter {
  inner: Arc<Inner>,
}

impl Default for SignalArbiter {
  fn default() -> Self {
    Self::new()
  }
}

/// Global application-level signal broker.
static APP_SIGNAL_ARBITER: Lazy<SignalArbiter> = Lazy::new(SignalArbiter::new);

/// Returns a reference to the global application-level signal broker.
pub fn app_signals() -> &'static SignalArbiter {
  &APP_SIGNAL_ARBITER
}

impl SignalArbiter {
  /// Creates a new, empty broker.
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Inner::default()),
    }
  }

  /// Subscribes `callback` to events matching `filter`.
  ///
  /// The filter's fields are sorted (via the `BTreeMap`'s natural iteration order)
  /// and walked/created as a path of tree nodes, with the callback attached to the
  /// terminal node.
  pub fn subscribe<F>(&self, filter: Filter, callback: F) -> SubscriptionHandle
  where
    F: Fn(&Event) + Send + Sync + 'static,
  {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    self.inner.callbacks.insert(id, Arc::new(callback));

    let mut nodes = self.inner.nodes.write();
    let mut node_idx = ROOT;
    for item in filter {
      node_idx = match nodes[node_idx].children.get(&item) {
        Some(&idx) => idx,
        None => {
          nodes.push(Node::default());
          let new_idx = nodes.len() - 1;
          nodes[node_idx].children.insert(item, new_idx);
          new_idx
        }
      };
    }
    nodes[node_idx].callbacks.insert(id);
    drop(nodes);

    self.inner.locations.insert(id, node_idx);

    SubscriptionHandle {
      inner: self.inner.clone(),
      id,
    }
  }

  /// Publishes `event`, synchronously invoking every subscription whose filter
  /// matches.
  ///
  /// At every node visited, all of that node's callbacks fire unconditionally;
  /// the walk then advances through the event's sorted fields one at a time,
  /// descending into a child whenever one matches the next field, so a single
  /// publish can satisfy several overlapping filters (exact, prefix, or a filter
  /// that skips some of the event's fields) in one pass.
  pub fn publish(&self, event: &Event) {
    let items: Vec<(String, FieldValue)> =
      event.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let nodes = self.inner.nodes.read();
    self.walk(&nodes, ROOT, &items, event);
  }

  fn walk(&self, nodes: &[Node], node_idx: usize, items: &[(String, FieldValue)], event: &Event) {
    let node = &nodes[node_idx];
    for id in &node.callbacks {
      let Some(cb) = self.inner.callbacks.get(id) else {
        continue;
      };
      let cb = cb.clone();
      if catch_unwind(AssertUnwindSafe(|| cb(event))).is_err() {
        tracing::error!(callback_id = *id, "signal callback panicked");
      }
    }
    for i in 0..items.len() {
      if let Some(&child_idx) = node.children.get(&items[i]) {
        self.walk(nodes, child_idx, &items[i + 1..], event);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  fn event(pairs: &[(&str, FieldValue)]) -> Event {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
  }

  fn filter(pairs: &[(&str, FieldValue)]) -> Filter {
    event(pairs)
  }

  fn recorder() -> (impl Fn(&Event) + Send + Sync + 'static, Arc<Mutex<Vec<Event>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    (move |e: &Event| seen_clone.lock().unwrap().push(e.clone()), seen)
  }

  #[test]
  fn exact_match_fires() {
    let broker = SignalArbiter::new();
    let (cb, seen) = recorder();
    broker.subscribe(filter(&[("a", 1i64.into())]), cb);
    broker.publish(&event(&[("a", 1i64.into())]));
    assert_eq!(seen.lock().unwrap().len(), 1);
  }

  #[test]
  fn exact_mismatch_does_not_fire() {
    let broker = SignalArbiter::new();
    let (cb, seen) = recorder();
    broker.subscribe(filter(&[("a", 1i64.into())]), cb);
    broker.publish(&event(&[("a", 2i64.into())]));
    assert!(seen.lock().unwrap().is_empty());
  }

  #[test]
  fn prefix_subscription_fires_on_superset_event() {
    let broker = SignalArbiter::new();
    let (cb, seen) = recorder();
    broker.subscribe(filter(&[("a", 1i64.into())]), cb);
    broker.publish(&event(&[("a", 1i64.into()), ("b", 2i64.into())]));
    assert_eq!(seen.lock().unwrap().len(), 1);
  }

  #[test]
  fn prefix_mismatch_does_not_fire() {
    let broker = SignalArbiter::new();
    let (cb, seen) = recorder();
    broker.subscribe(filter(&[("a", 1i64.into())]), cb);
    broker.publish(&event(&[("a", 2i64.into()), ("b", 2i64.into())]));
    assert!(seen.lock().unwrap().is_empty());
  }

  #[test]
  fn skip_subscription_fires_when_event_has_extra_fields_between() {
    let broker = SignalArbiter::new();
    let (cb, seen) = recorder();
    broker.subscribe(filter(&[("a", 1i64.into()), ("c", 3i64.into())]), cb);
    broker.publish(&event(&[("a", 1i64.into()), ("b", 2i64.into()), ("c", 3i64.into())]));
    assert_eq!(seen.lock().unwrap().len(), 1);
  }

  #[test]
  fn skip_mismatch_does_not_fire() {
    let broker = SignalArbiter::new();
    let (cb, seen) = recorder();
    broker.subscribe(filter(&[("a", 1i64.into()), ("c", 4i64.into())]), cb);
    broker.publish(&event(&[("a", 1i64.into()), ("b", 2i64.into()), ("c", 3i64.into())]));
    assert!(seen.lock().unwrap().is_empty());
  }

  #[test]
  fn overlapping_subscriptions_each_fire_once() {
    let broker = SignalArbiter::new();
    let (cb_a, seen_a) = recorder();
    let (cb_b, seen_b) = recorder();
    broker.subscribe(filter(&[("a", 1i64.into())]), cb_a);
    broker.subscribe(filter(&[("b", 2i64.into())]), cb_b);
    broker.publish(&event(&[("a", 1i64.into()), ("b", 2i64.into())]));
    assert_eq!(seen_a.lock().unwrap().len(), 1);
    assert_eq!(seen_b.lock().unwrap().len(), 1);
  }

  #[test]
  fn overlapping_prefix_and_full_subscriptions_both_fire() {
    let broker = SignalArbiter::new();
    let (cb_prefix, seen_prefix) = recorder();
    let (cb_full, seen_full) = recorder();
    broker.subscribe(filter(&[("a", 1i64.into())]), cb_prefix);
    broker.subscribe(filter(&[("a", 1i64.into()), ("b", 2i64.into())]), cb_full);
    broker.publish(&event(&[("a", 1i64.into()), ("b", 2i64.into())]));
    assert_eq!(seen_prefix.lock().unwrap().len(), 1);
    assert_eq!(seen_full.lock().unwrap().len(), 1);
  }

  #[test]
  fn overlapping_skip_and_prefix_subscriptions_both_fire() {
    let broker = SignalArbiter::new();
    let (cb_skip, seen_skip) = recorder();
    let (cb_prefix, seen_prefix) = recorder();
    broker.subscribe(filter(&[("a", 1i64.into()), ("c", 3i64.into())]), cb_skip);
    broker.subscribe(filter(&[("a", 1i64.into())]), cb_prefix);
    broker.publish(&event(&[("a", 1i64.into()), ("b", 2i64.into()), ("c", 3i64.into())]));
    assert_eq!(seen_skip.lock().unwrap().len(), 1);
    assert_eq!(seen_prefix.lock().unwrap().len(), 1);
  }

  #[test]
  fn unsubscribe_stops_future_delivery() {
    let broker = SignalArbiter::new();
    let (cb, seen) = recorder();
    let handle = broker.subscribe(filter(&[("a", 1i64.into())]), cb);
    broker.publish(&event(&[("a", 1i64.into())]));
    handle.unsubscribe();
    broker.publish(&event(&[("a", 1i64.into())]));
    assert_eq!(seen.lock().unwrap().len(), 1);
  }
}
