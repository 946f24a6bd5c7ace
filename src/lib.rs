#![cfg_attr(docsrs, feature(doc_cfg))]

//! Shared HTTP response caching and invalidation core for project/topology microservices.
//!
//! This crate gives a family of backend services one consistent way to do three things:
//! cache GET responses with ETags, tear down exactly the cached entries a write affects,
//! and carry request-scoped identity across an outbound call without threading it through
//! every function signature. It is built on the same routing/middleware/extractor stack
//! used across this codebase's other HTTP services.
//!
//! # Components
//! - [signals] — a topic-indexed publish/subscribe broker used for cache invalidation.
//! - [cache] — the server-side cache store: keys, Vary handling, invalidation scopes.
//! - [middleware::etag_cache] — GET-only ETag middleware that serves 304s from the cache.
//! - [client] — an outbound HTTP client session that reuses cached entries (feature: `client`).
//! - [context] — ambient, per-request identity (`x-user`, `x-role`) via a task-local.
//! - [persistence] — the `PersistenceAdapter` contract linking storage to invalidation.
//!
//! # Compatibility
//! - Runtime: `tokio`
//! - HTTP: `hyper` 1.x
//!
//! # Feature flags
//! - `client` — outbound HTTP client session over TCP/TLS
//! - `tako-tracing` — structured tracing subscriber for standalone binaries

/// HTTP request and response body handling utilities.
pub mod body;

/// Cache store: entries, Vary-aware keys, and invalidation scopes (component B).
pub mod cache;

/// Process configuration loaded from `TAKO_CACHE_*` environment variables.
pub mod config;

/// Outbound HTTP client session with ETag reuse and 303-redirect following (component D).
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

/// Ambient, per-request identity context (component E).
pub mod context;

/// Ambient error types and their HTTP/JSON representation.
pub mod error;

/// Request data extraction utilities for parsing query params, JSON, and more.
pub mod extractors;

/// Request handler traits and implementations.
mod handler;

/// Middleware for processing requests and responses in a pipeline.
pub mod middleware;

/// Persistence adapter contract and an in-memory reference implementation (component F).
pub mod persistence;

/// Plugin system for extending framework functionality.
pub mod plugins;

/// Response generation utilities and traits.
pub mod responder;

/// Redirection utilities for handling HTTP redirects.
pub mod redirect;

/// Route definition and matching logic.
mod route;

/// Request routing and dispatch functionality.
pub mod router;

/// HTTP server implementation and configuration.
mod server;

/// Application state management and dependency injection.
pub mod state;

/// Topic-indexed signal broker used for cache invalidation (component A).
pub mod signals;

/// Distributed tracing integration for observability.
#[cfg(feature = "tako-tracing")]
#[cfg_attr(docsrs, doc(cfg(feature = "tako-tracing")))]
pub mod tracing;

/// Core type definitions used throughout the framework.
pub mod types;

pub use bytes::Bytes;
pub use http::{Method, StatusCode, header};
pub use http_body_util::Full;

/// Starts the HTTP server with the given listener and router.
///
/// # Examples
///
/// ```rust,no_run
/// use topocache::{serve, router::Router};
/// use tokio::net::TcpListener;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listener = TcpListener::bind("127.0.0.1:8080").await?;
/// let router = Router::new();
/// serve(listener, router).await;
/// # Ok(())
/// # }
/// ```
pub use server::serve;
