//! Error types for the cache pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard errors surfaced to callers of the request pipeline.
///
/// Transport failures are deliberately absent: a failed fetch still
/// resolves to a [`RequestView`](crate::select::RequestView) whose status
/// is rejected and which carries the [`ApiError`]. Only conditions that
/// prevent the pipeline from deciding where a result would be indexed are
/// returned as `Err`.
#[derive(Debug, Error)]
pub enum Error {
  /// The adapter could not map the request URL onto any known route.
  #[error("unrecognized route: {0}")]
  UnknownRoute(String),

  /// The adapter failed to build a request from the given descriptor.
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  /// A route pattern handed to an adapter did not compile.
  #[error("invalid route pattern: {0}")]
  InvalidRoute(String),
}

/// Structured transport failure, stored on the record that observed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
  pub message: String,
  /// HTTP status code, when the failure came with one.
  pub status: Option<u16>,
}

impl ApiError {
  pub fn new(message: impl Into<String>, status: Option<u16>) -> Self {
    Self {
      message: message.into(),
      status,
    }
  }
}

impl std::fmt::Display for ApiError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.status {
      Some(status) => write!(f, "{} (status {})", self.message, status),
      None => write!(f, "{}", self.message),
    }
  }
}
