//! Process configuration, loaded from `TAKO_CACHE_*` environment variables.
//!
//! Nothing here affects cache semantics — there's no TTL or capacity to tune,
//! since the cache core has no eviction policy of its own (invalidation is
//! event-driven, see [`crate::cache`]). What this does configure is which
//! headers [`crate::context::RequestContext`] tracks and where a demo binary
//! listens, mirroring how `rootsignal-core`'s `AppConfig` separates
//! env-sourced process config from the domain logic it wires up.

use anyhow::{Context, Result};

/// Default listen address for demo binaries built on top of this crate.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Process-level configuration for a service built on this crate.
#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// Address a demo binary should bind its listener to.
  pub listen_addr: String,
  /// Header names treated as ambient identity, overriding
  /// [`crate::context::TRACKED_HEADERS`] when set.
  pub tracked_headers: Vec<String>,
}

impl CacheConfig {
  /// Loads configuration from the environment, falling back to defaults for
  /// anything unset. Never fails on a missing variable; only malformed values
  /// (once there are any to parse) would return `Err`.
  pub fn from_env() -> Result<Self> {
    let listen_addr =
      std::env::var("TAKO_CACHE_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());

    let tracked_headers = match std::env::var("TAKO_CACHE_TRACKED_HEADERS") {
      Ok(raw) => raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect(),
      Err(_) => crate::context::TRACKED_HEADERS.iter().map(|s| s.to_string()).collect(),
    };

    let config = Self {
      listen_addr,
      tracked_headers,
    };
    config.validate().context("invalid TAKO_CACHE_* configuration")?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    use std::net::ToSocketAddrs;
    self
      .listen_addr
      .to_socket_addrs()
      .with_context(|| format!("TAKO_CACHE_LISTEN_ADDR {:?} is not a socket address", self.listen_addr))?;
    Ok(())
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
      tracked_headers: crate::context::TRACKED_HEADERS.iter().map(|s| s.to_string()).collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_tracks_the_same_headers_as_request_context() {
    let config = CacheConfig::default();
    assert_eq!(config.tracked_headers, vec!["x-user".to_string(), "x-role".to_string()]);
  }

  #[test]
  fn default_listen_addr_is_a_valid_socket_address() {
    let config = CacheConfig::default();
    assert!(config.validate().is_ok());
  }

  #[test]
  fn malformed_listen_addr_fails_validation() {
    let config = CacheConfig {
      listen_addr: "not-an-address".to_string(),
      ..CacheConfig::default()
    };
    assert!(config.validate().is_err());
  }
}
