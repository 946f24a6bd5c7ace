//! Plugin wiring [`crate::middleware::etag_cache`] into a router.
//!
//! Registering [`CachePlugin`] installs the ETag caching middleware globally and
//! publishes the backing [`CacheStore`] into the application's global state, so
//! handlers can pull it out with `State<CacheStore>` to call
//! [`CacheStore::vary`](crate::cache::CacheStore::vary) and register invalidation
//! subscriptions of their own.

use anyhow::Result;

use crate::{cache::CacheStore, middleware::etag_cache::EtagCache, plugins::TakoPlugin, router::Router, state::set_state};

/// ETag caching plugin. Attach at the router level.
#[derive(Clone)]
pub struct CachePlugin {
  store: CacheStore,
}

impl CachePlugin {
  /// Creates a plugin backed by a fresh, empty [`CacheStore`].
  pub fn new() -> Self {
    Self {
      store: CacheStore::new(),
    }
  }

  /// Creates a plugin backed by an existing store, e.g. one shared with a test
  /// harness or another plugin.
  pub fn with_store(store: CacheStore) -> Self {
    Self { store }
  }

  /// Returns the store this plugin wraps, for registering it elsewhere.
  pub fn store(&self) -> &CacheStore {
    &self.store
  }
}

impl Default for CachePlugin {
  fn default() -> Self {
    Self::new()
  }
}

impl TakoPlugin for CachePlugin {
  fn name(&self) -> &'static str {
    "CachePlugin"
  }

  fn setup(&self, router: &Router) -> Result<()> {
    set_state(self.store.clone());

    let etag_cache = EtagCache::new(self.store.clone());
    router.middleware(move |req, next| {
      let etag_cache = etag_cache.clone();
      async move { etag_cache.handle(req, next).await }
    });

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn setup_registers_middleware_without_error() {
    let mut router = Router::new();
    let plugin = CachePlugin::new();
    assert!(plugin.setup(&router).is_ok());
    router.plugin(plugin);
  }
}
