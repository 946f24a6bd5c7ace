//! Server-side response cache: Vary-aware keys, entries, and invalidation scopes.
//!
//! A [`CacheStore`] holds one [`CacheEntry`] per cache key and never expires an entry
//! on its own — entries live until something explicitly invalidates them, via
//! [`CacheStore::invalidate`] or an [`InvalidationScope`] wired up through
//! [`crate::signals`]. The cache key folds in whichever request headers that path's
//! most recently stored response declared itself sensitive to via `Vary`, the same
//! way an HTTP cache is supposed to.
//!
//! The VaryTable is keyed per path: a response for `/projects/1` declaring
//! `Vary: x-role` only affects cache keys computed for `/projects/1`, not for any
//! other path. A path with no recorded `Vary` keys on its URL alone.

use std::{collections::BTreeSet, sync::Arc};

use dashmap::DashMap;
use http::{HeaderMap, HeaderName, HeaderValue, header::VARY};
use parking_lot::Mutex;

use crate::signals::{Filter, SignalArbiter, SubscriptionHandle, app_signals};

/// A cached response: the ETag used for conditional requests and the headers that
/// were sent along with the cached body.
#[derive(Clone, Debug)]
pub struct CacheEntry {
  pub etag: String,
  pub headers: HeaderMap,
  pub body: bytes::Bytes,
}

/// Opaque key identifying one cached entry: a request path plus the current value
/// of every header that path's VaryTable entry lists.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

struct Inner {
  entries: DashMap<CacheKey, CacheEntry>,
  vary_headers: DashMap<String, BTreeSet<HeaderName>>,
}

/// The cache core's component B: storage, Vary-aware keys, and invalidation scopes.
#[derive(Clone)]
pub struct CacheStore {
  inner: Arc<Inner>,
  broker: SignalArbiter,
}

impl Default for CacheStore {
  fn default() -> Self {
    Self::new()
  }
}

impl CacheStore {
  /// Creates an empty store wired to the global signal broker.
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Inner {
        entries: DashMap::new(),
        vary_headers: DashMap::new(),
      }),
      broker: app_signals().clone(),
    }
  }

  /// Creates an empty store wired to a specific broker, primarily for tests that
  /// need isolation from the process-global one.
  pub fn with_broker(broker: SignalArbiter) -> Self {
    Self {
      inner: Arc::new(Inner {
        entries: DashMap::new(),
        vary_headers: DashMap::new(),
      }),
      broker,
    }
  }

  /// Computes the cache key for `path` given the request's headers, using whichever
  /// header names `path`'s VaryTable entry currently lists (none, if `path` has no
  /// recorded `Vary` yet).
  pub fn key_for(&self, path: &str, req_headers: &HeaderMap) -> CacheKey {
    let mut encoded = String::from(path);
    if let Some(vary) = self.inner.vary_headers.get(path) {
      for name in vary.iter() {
        let value = req_headers
          .get(name)
          .and_then(|v| v.to_str().ok())
          .unwrap_or("none");
        encoded.push('\u{0}');
        encoded.push_str(name.as_str());
        encoded.push('=');
        encoded.push_str(value);
      }
    }
    CacheKey(encoded)
  }

  /// Records `resp_headers`'s `Vary` declaration (if any) as `path`'s VaryTable entry,
  /// writes back the canonical serialized form, and returns the resulting cache key
  /// together with an [`InvalidationScope`] for registering cache-busting
  /// subscriptions. A response with no `Vary` header leaves `path`'s existing
  /// VaryTable entry untouched.
  ///
  /// Returns `None` if the response declares `Vary: *`, meaning it must never be
  /// cached at all.
  pub fn vary(&self, path: &str, req_headers: &HeaderMap, resp_headers: &mut HeaderMap) -> Option<(CacheKey, InvalidationScope)> {
    if let Some(declared) = resp_headers.get(VARY) {
      let declared = declared.to_str().ok()?;
      if declared.trim() == "*" {
        return None;
      }
      let mut names = BTreeSet::new();
      for name in declared.split(|c| c == ',' || c == ';') {
        let name = name.trim();
        if name.is_empty() {
          continue;
        }
        if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) {
          names.insert(header_name);
        }
      }
      self.inner.vary_headers.insert(path.to_string(), names);
    }

    if let Some(vary) = self.inner.vary_headers.get(path) {
      let names: Vec<&str> = vary.iter().map(|h| h.as_str()).collect();
      if !names.is_empty() {
        resp_headers.insert(
          VARY,
          HeaderValue::from_str(&names.join(";")).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
      }
    }

    let key = self.key_for(path, req_headers);
    let scope = InvalidationScope {
      store: self.clone(),
      key: key.clone(),
      handles: Arc::new(Mutex::new(Vec::new())),
    };
    Some((key, scope))
  }

  /// Stores `entry` under `key`, replacing any previous entry.
  pub fn store(&self, key: CacheKey, entry: CacheEntry) {
    self.inner.entries.insert(key, entry);
  }

  /// Returns the cached entry for `key`, if any.
  pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
    self.inner.entries.get(key).map(|e| e.clone())
  }

  /// Removes the cached entry for `key`, if any.
  pub fn invalidate(&self, key: &CacheKey) {
    self.inner.entries.remove(key);
  }

  /// The broker this store publishes and subscribes invalidations through.
  pub fn broker(&self) -> &SignalArbiter {
    &self.broker
  }
}

/// Collects invalidation subscriptions registered for a single stored entry.
///
/// Every subscription added with [`Self::on`] shares the same sibling list. When any
/// one of them fires, all siblings (including itself) are unsubscribed first and
/// only then is the entry actually invalidated — so a write that matches more than
/// one of an entry's subscriptions still invalidates it exactly once, and doesn't
/// leave dangling subscriptions behind for events that never come.
pub struct InvalidationScope {
  store: CacheStore,
  key: CacheKey,
  handles: Arc<Mutex<Vec<SubscriptionHandle>>>,
}

impl InvalidationScope {
  /// Invalidates the entry this scope was created for whenever a published event
  /// matches `filter`.
  pub fn on(&self, filter: Filter) -> &Self {
    let store = self.store.clone();
    let key = self.key.clone();
    let siblings = self.handles.clone();
    let handle = self.store.broker.subscribe(filter, move |_event| {
      let handles = std::mem::take(&mut *siblings.lock());
      for h in &handles {
        h.unsubscribe();
      }
      store.invalidate(&key);
    });
    self.handles.lock().push(handle);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::signals::{Event, FieldValue};

  fn headers() -> HeaderMap {
    HeaderMap::new()
  }

  #[test]
  fn key_for_ignores_headers_until_vary_declares_them() {
    let store = CacheStore::with_broker(SignalArbiter::new());
    let mut req = headers();
    req.insert("x-role", HeaderValue::from_static("admin"));
    let key_before = store.key_for("/projects/1", &req);

    let mut resp = headers();
    resp.insert(VARY, HeaderValue::from_static("x-role"));
    store.vary("/projects/1", &req, &mut resp).unwrap();

    let key_after = store.key_for("/projects/1", &req);
    assert_ne!(key_before, key_after);
  }

  #[test]
  fn missing_vary_header_value_collides_as_none() {
    let store = CacheStore::with_broker(SignalArbiter::new());
    let mut resp = headers();
    resp.insert(VARY, HeaderValue::from_static("x-role"));
    let (key_with_role, _scope) = store.vary("/p", &headers(), &mut resp).unwrap();

    let mut other_req = headers();
    other_req.insert("x-role", HeaderValue::from_static("none"));
    let key_literal_none = store.key_for("/p", &other_req);

    assert_eq!(key_with_role, key_literal_none);
  }

  #[test]
  fn vary_star_refuses_to_cache() {
    let store = CacheStore::with_broker(SignalArbiter::new());
    let mut resp = headers();
    resp.insert(VARY, HeaderValue::from_static("*"));
    assert!(store.vary("/p", &headers(), &mut resp).is_none());
  }

  #[test]
  fn invalidation_scope_removes_entry_on_matching_event() {
    let broker = SignalArbiter::new();
    let store = CacheStore::with_broker(broker.clone());
    let mut resp = headers();
    let (key, scope) = store.vary("/projects/1", &headers(), &mut resp).unwrap();
    store.store(
      key.clone(),
      CacheEntry {
        etag: "abc".into(),
        headers: headers(),
        body: bytes::Bytes::new(),
      },
    );
    scope.on(Filter::from([("project_id".to_string(), FieldValue::Str("1".into()))]));

    assert!(store.get(&key).is_some());
    let mut event = Event::new();
    event.insert("project_id".to_string(), FieldValue::Str("1".into()));
    event.insert("_action".to_string(), FieldValue::Str("update".into()));
    broker.publish(&event);

    assert!(store.get(&key).is_none());
  }

  #[test]
  fn sibling_subscriptions_are_all_unsubscribed_once_any_fires() {
    let broker = SignalArbiter::new();
    let store = CacheStore::with_broker(broker.clone());
    let mut resp = headers();
    let (key, scope) = store.vary("/projects/1/areas", &headers(), &mut resp).unwrap();
    store.store(
      key.clone(),
      CacheEntry {
        etag: "abc".into(),
        headers: headers(),
        body: bytes::Bytes::new(),
      },
    );
    scope.on(Filter::from([("project_id".to_string(), FieldValue::Str("1".into()))]));
    scope.on(Filter::from([("area_id".to_string(), FieldValue::Str("7".into()))]));

    let mut first = Event::new();
    first.insert("project_id".to_string(), FieldValue::Str("1".into()));
    broker.publish(&first);
    assert!(store.get(&key).is_none());

    // Restore the entry and fire the second filter; it must no longer be subscribed.
    store.store(
      key.clone(),
      CacheEntry {
        etag: "abc".into(),
        headers: headers(),
        body: bytes::Bytes::new(),
      },
    );
    let mut second = Event::new();
    second.insert("area_id".to_string(), FieldValue::Str("7".into()));
    broker.publish(&second);
    assert!(store.get(&key).is_some());
  }
}
