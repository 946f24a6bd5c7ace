//! Error types shared across the cache core's outbound and inbound paths.

use http::StatusCode;
use thiserror::Error;

use crate::{responder::Responder, types::Response};

/// Errors raised while the outbound [`crate::client::CachingSession`] talks to an
/// upstream service.
#[derive(Debug, Error)]
pub enum CacheError {
  /// The upstream response couldn't be parsed as a valid HTTP message.
  #[error("protocol error: {0}")]
  Protocol(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// The upstream responded with a non-success status.
  #[error("upstream error {status}: {reason}")]
  Upstream { status: StatusCode, reason: String },

  /// The request was cancelled before it completed (e.g. the caller's scope ended).
  #[error("request cancelled")]
  Cancelled,
}

/// Converts an error into the `{"message": ...}` JSON envelope used across
/// these services, with the upstream's own status code preserved where known.
impl Responder for CacheError {
  fn into_response(self) -> Response {
    let status = match &self {
      CacheError::Protocol(_) => StatusCode::BAD_GATEWAY,
      CacheError::Upstream { status, .. } => *status,
      CacheError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    };
    let message = match &self {
      CacheError::Upstream { reason, .. } => reason.clone(),
      other => other.to_string(),
    };
    let body = serde_json::json!({ "message": message }).to_string();
    http::Response::builder()
      .status(status)
      .header(http::header::CONTENT_TYPE, "application/json")
      .body(crate::body::TakoBody::from(body))
      .unwrap()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn upstream_error_preserves_status_and_message() {
    let err = CacheError::Upstream {
      status: StatusCode::NOT_FOUND,
      reason: "project not found".to_string(),
    };
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }

  #[test]
  fn cancelled_maps_to_service_unavailable() {
    let resp = CacheError::Cancelled.into_response();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
  }
}
