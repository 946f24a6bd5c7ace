//! Ambient, per-request identity context (the cache core's component E).
//!
//! Edge middleware resolves who a request is acting as and what role it holds,
//! and downstream code — handlers, the [`crate::client::CachingSession`] outbound
//! client, cache key computation — needs that identity without it being threaded
//! through every function signature. `RequestContext` carries a small, explicit
//! allow-list of headers (`x-user`, `x-role`) scoped to the lifetime of one request
//! via a [`tokio::task_local!`].
//!
//! This intentionally does not chase down a role by issuing its own side request —
//! whatever middleware sets `x-role` (or doesn't) is what downstream code sees.

use std::collections::BTreeMap;

/// Header names `RequestContext` tracks. Anything else set on the request or
/// response is outside its scope.
pub const TRACKED_HEADERS: &[&str] = &["x-user", "x-role"];

tokio::task_local! {
  static CONTEXT: RequestContext;
}

/// Per-request ambient identity, keyed by header name.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
  fields: BTreeMap<String, String>,
}

impl RequestContext {
  /// Creates an empty context.
  pub fn new() -> Self {
    Self::default()
  }

  /// Builds a context from an incoming request's headers, keeping only the
  /// tracked header names that are present.
  pub fn from_headers(headers: &http::HeaderMap) -> Self {
    let tracked: Vec<String> = TRACKED_HEADERS.iter().map(|s| s.to_string()).collect();
    Self::from_headers_tracking(&tracked, headers)
  }

  /// Builds a context from an incoming request's headers, keeping only the
  /// names listed in `tracked` that are present. Lets callers (e.g. a plugin
  /// wired to [`crate::config::CacheConfig::tracked_headers`]) widen or
  /// narrow [`TRACKED_HEADERS`]'s default allow-list.
  pub fn from_headers_tracking(tracked: &[String], headers: &http::HeaderMap) -> Self {
    let mut fields = BTreeMap::new();
    for name in tracked {
      if let Some(value) = headers.get(name.as_str()).and_then(|v| v.to_str().ok()) {
        fields.insert(name.clone(), value.to_string());
      }
    }
    Self { fields }
  }

  /// Returns the value for a tracked header, if set.
  pub fn get(&self, name: &str) -> Option<&str> {
    self.fields.get(name).map(String::as_str)
  }

  /// Sets a tracked header's value. Setting a name outside [`TRACKED_HEADERS`]
  /// is a no-op, mirroring an allow-list rather than an open bag of fields.
  pub fn set(&mut self, name: &str, value: impl Into<String>) {
    if TRACKED_HEADERS.contains(&name) {
      self.fields.insert(name.to_string(), value.into());
    }
  }

  /// Runs `fut` with `self` installed as the ambient context for its duration.
  pub async fn scope<F: std::future::Future>(self, fut: F) -> F::Output {
    CONTEXT.scope(self, fut).await
  }

  /// Returns a copy of the ambient context for the currently executing task, or
  /// an empty context if none was installed via [`Self::scope`].
  pub fn current() -> Self {
    CONTEXT.try_with(|ctx| ctx.clone()).unwrap_or_default()
  }

  /// Applies `self`'s tracked fields onto `headers`, unless the caller has
  /// already set a value for that header name.
  pub fn apply_to(&self, headers: &mut http::HeaderMap) {
    for (name, value) in &self.fields {
      if let (Ok(name), Ok(value)) = (
        http::HeaderName::from_bytes(name.as_bytes()),
        http::HeaderValue::from_str(value),
      ) {
        headers.entry(name).or_insert(value);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn scope_makes_context_visible_to_nested_calls() {
    let mut ctx = RequestContext::new();
    ctx.set("x-user", "alice");

    ctx.scope(async {
      let current = RequestContext::current();
      assert_eq!(current.get("x-user"), Some("alice"));
    })
    .await;
  }

  #[tokio::test]
  async fn outside_any_scope_current_is_empty() {
    let current = RequestContext::current();
    assert_eq!(current.get("x-user"), None);
  }

  #[test]
  fn set_ignores_untracked_header_names() {
    let mut ctx = RequestContext::new();
    ctx.set("x-unrelated", "value");
    assert_eq!(ctx.get("x-unrelated"), None);
  }

  #[test]
  fn from_headers_picks_up_only_tracked_names() {
    let mut headers = http::HeaderMap::new();
    headers.insert("x-user", http::HeaderValue::from_static("bob"));
    headers.insert("x-other", http::HeaderValue::from_static("ignored"));
    let ctx = RequestContext::from_headers(&headers);
    assert_eq!(ctx.get("x-user"), Some("bob"));
    assert_eq!(ctx.get("x-other"), None);
  }

  #[test]
  fn from_headers_tracking_honors_a_custom_allow_list() {
    let mut headers = http::HeaderMap::new();
    headers.insert("x-tenant", http::HeaderValue::from_static("acme"));
    headers.insert("x-user", http::HeaderValue::from_static("bob"));
    let ctx = RequestContext::from_headers_tracking(&["x-tenant".to_string()], &headers);
    assert_eq!(ctx.get("x-tenant"), Some("acme"));
    assert_eq!(ctx.get("x-user"), None);
  }

  #[test]
  fn apply_to_does_not_overwrite_a_caller_set_header() {
    let mut ctx = RequestContext::new();
    ctx.set("x-user", "alice");
    let mut headers = http::HeaderMap::new();
    headers.insert("x-user", http::HeaderValue::from_static("caller-supplied"));

    ctx.apply_to(&mut headers);

    assert_eq!(headers.get("x-user").unwrap(), "caller-supplied");
  }
}
