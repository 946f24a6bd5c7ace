//! Plugin system for extending framework functionality with composable modules.
//!
//! This module provides the core plugin infrastructure, allowing reusable components
//! to add middleware, modify routing behavior, or integrate external services. The
//! `TakoPlugin` trait defines the interface all plugins must implement for registration
//! and setup, applied router-wide with `router.plugin()`.
//!
//! # Examples
//!
//! ```rust
//! use topocache::plugins::TakoPlugin;
//! use topocache::router::Router;
//! use topocache::Method;
//! use anyhow::Result;
//!
//! struct LoggingPlugin {
//!     level: String,
//! }
//!
//! impl TakoPlugin for LoggingPlugin {
//!     fn name(&self) -> &'static str {
//!         "logging"
//!     }
//!
//!     fn setup(&self, _router: &Router) -> Result<()> {
//!         println!("Setting up logging plugin with level: {}", self.level);
//!         Ok(())
//!     }
//! }
//!
//! async fn handler(_req: topocache::types::Request) -> &'static str {
//!     "Hello"
//! }
//!
//! // Router-level plugin (applied to all routes)
//! let mut router = Router::new();
//! router.plugin(LoggingPlugin { level: "info".to_string() });
//!
//! // Route-level plugin (applied to specific route only)
//! let route = router.route(Method::GET, "/api/data", handler);
//! route.plugin(LoggingPlugin { level: "debug".to_string() });
//! ```

use anyhow::Result;

use crate::router::Router;

/// Server-side ETag caching plugin wiring [`crate::middleware::etag_cache`] into a router.
pub mod cache;

/// Inbound-edge plugin installing [`crate::context::RequestContext`] as ambient middleware.
pub mod context;

/// Trait for implementing framework plugins.
///
/// Plugins extend the framework's functionality by implementing this trait. They can
/// add middleware, modify routing behavior, register handlers, or integrate external
/// services. All plugins must be thread-safe and have a static lifetime, and are applied
/// router-wide with `router.plugin()`.
///
/// # Examples
///
/// ```rust
/// use topocache::plugins::TakoPlugin;
/// use topocache::router::Router;
/// use topocache::Method;
/// use anyhow::Result;
///
/// struct LoggingPlugin;
///
/// impl TakoPlugin for LoggingPlugin {
///     fn name(&self) -> &'static str {
///         "logging"
///     }
///
///     fn setup(&self, router: &Router) -> Result<()> {
///         router.middleware(|req, next| async move {
///             println!("{} {}", req.method(), req.uri());
///             next.run(req).await
///         });
///         Ok(())
///     }
/// }
///
/// let mut router = Router::new();
/// router.plugin(LoggingPlugin);
/// ```
pub trait TakoPlugin: Send + Sync + 'static {
  /// Returns the unique name identifier for this plugin.
  fn name(&self) -> &'static str;

  /// Configures and initializes the plugin with the given router.
  fn setup(&self, router: &Router) -> Result<()>;
}
