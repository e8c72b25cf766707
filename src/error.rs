//! Store error types.

use std::time::Duration;

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The backend cannot be reached or its storage is inaccessible.
  #[error("backend unavailable: {0}")]
  BackendUnavailable(String),

  /// A backend call did not complete within the configured timeout.
  #[error("backend call timed out after {0:?}")]
  Timeout(Duration),

  /// The backend refused the request itself, e.g. a malformed query or bad
  /// credentials. Retrying the same call will not help.
  #[error("request rejected: {0}")]
  Rejected(String),

  /// A record or key could not be encoded or decoded.
  #[error("codec error: {0}")]
  Codec(String),

  /// Backend construction failed at startup.
  #[error("store startup failed: {0}")]
  Startup(String),
}

impl StoreError {
  /// Whether the caller should treat this as the backend being unreachable.
  pub fn is_unavailable(&self) -> bool {
    matches!(self, Self::BackendUnavailable(_) | Self::Timeout(_))
  }
}

impl From<rusqlite::Error> for StoreError {
  fn from(e: rusqlite::Error) -> Self {
    Self::BackendUnavailable(format!("sqlite: {}", e))
  }
}

impl From<reqwest::Error> for StoreError {
  fn from(e: reqwest::Error) -> Self {
    match e.status() {
      Some(status) if status.is_client_error() => Self::Rejected(format!("cluster: {}", e)),
      _ => Self::BackendUnavailable(format!("cluster: {}", e)),
    }
  }
}

impl From<serde_json::Error> for StoreError {
  fn from(e: serde_json::Error) -> Self {
    Self::Codec(e.to_string())
  }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
