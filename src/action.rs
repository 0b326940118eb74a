//! The event surface driving the request state tracker.
//!
//! Four event kinds cover the whole request lifecycle. For one logical
//! request the order is fixed: CacheHit (when a candidate exists) strictly
//! precedes RequestStarted, which precedes Success or Failure. Across
//! unrelated requests ordering is unconstrained; the reducer's staleness
//! check handles out-of-order completions.

use chrono::{DateTime, Utc};

use crate::adapter::{ApiResponse, Operation};
use crate::error::ApiError;
use crate::store::LocalId;

/// Context shared by every event of one logical request.
#[derive(Debug, Clone)]
pub struct ActionMeta {
  /// Application-chosen request name.
  pub name: String,
  /// Aggregator the result's resources index into; `None` for routes
  /// whose resources are not indexed.
  pub aggregator: Option<String>,
  pub operation: Operation,
  /// When the request was issued; write-op reconciliation keys on this.
  pub request_at: DateTime<Utc>,
  /// When the response arrived, on Success/Failure.
  pub response_at: Option<DateTime<Utc>>,
}

/// One request-lifecycle event.
#[derive(Debug, Clone)]
pub enum Action {
  /// A usable cache candidate exists; dependents may render it while a
  /// refetch is possibly underway.
  CacheHit {
    meta: ActionMeta,
    fingerprint: String,
    page: u32,
    /// Freshness timestamp of the candidate.
    last_cache_update: DateTime<Utc>,
    /// The candidate's result ids (a single id for a direct identity hit).
    data: Vec<LocalId>,
  },
  /// A network round trip is being issued.
  RequestStarted {
    meta: ActionMeta,
    /// Present for read operations only.
    fingerprint: Option<String>,
    page: u32,
  },
  /// The round trip resolved; the response's resources get indexed.
  Success {
    meta: ActionMeta,
    fingerprint: Option<String>,
    page: u32,
    response: ApiResponse,
  },
  /// The round trip failed; stored entities are left untouched.
  Failure {
    meta: ActionMeta,
    fingerprint: Option<String>,
    page: u32,
    error: ApiError,
  },
}

impl Action {
  pub fn meta(&self) -> &ActionMeta {
    match self {
      Action::CacheHit { meta, .. }
      | Action::RequestStarted { meta, .. }
      | Action::Success { meta, .. }
      | Action::Failure { meta, .. } => meta,
    }
  }
}
