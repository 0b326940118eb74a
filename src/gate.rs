//! Cache-hit decisions for incoming read requests.
//!
//! The gate inspects a snapshot and decides whether a read can be served
//! from cache, served-then-refetched, or must go to the network. It never
//! mutates anything: it hands back the CacheHit event to dispatch (if a
//! usable candidate exists) and the freshness verdict.

use chrono::{DateTime, Duration, Utc};
use tracing::trace;

use crate::action::{Action, ActionMeta};
use crate::adapter::Adapter;
use crate::config::Settings;
use crate::store::{resolve_local_id, LocalId, Store};

/// Outcome of evaluating a read request against a snapshot.
#[derive(Debug)]
pub struct GateDecision {
  /// Cache-hit event to dispatch before anything else, when a usable
  /// candidate exists.
  pub cache_hit: Option<Action>,
  /// True when the candidate is fresh enough to skip the network.
  pub fresh: bool,
}

impl GateDecision {
  fn miss() -> Self {
    Self {
      cache_hit: None,
      fresh: false,
    }
  }
}

/// Evaluate a read request against `store` at time `now`.
///
/// Candidate preference: a direct identity match on an existing record
/// beats the query record at (fingerprint, page); a query record in an
/// error state is not a candidate. A record still flagged partial gets an
/// effective TTL of zero, so it is served but always refetched.
pub fn evaluate<A: Adapter>(
  store: &Store,
  adapter: &A,
  settings: &Settings,
  meta: &ActionMeta,
  request: &A::Request,
  fingerprint: &str,
  page: u32,
  now: DateTime<Utc>,
) -> GateDecision {
  let mut data: Vec<LocalId> = Vec::new();
  let mut freshness: Option<DateTime<Utc>> = None;
  let mut partial = false;
  let mut usable = false;

  if let Some(aggregator) = meta.aggregator.as_deref() {
    let candidate = adapter.identity_fields(request);
    let keys = settings.identity_keys(&adapter.identity_keys(), aggregator);
    if let Some(id) = resolve_local_id(store, aggregator, &keys, &candidate) {
      if let Some(record) = store.resource(id) {
        usable = true;
        data = vec![id];
        freshness = Some(record.last_cache_update);
        partial = !record.complete;
      }
    }
  }

  if !usable {
    if let Some(query) = store.query_page(fingerprint, page) {
      // a record that errored, or that never carried data (a first fetch
      // still in flight), is not a candidate
      if query.error.is_none() {
        if let Some(ids) = &query.data {
          usable = true;
          data = ids.clone();
          freshness = Some(query.response_at.unwrap_or(query.request_at));
        }
      }
    }
  }

  if !usable {
    return GateDecision::miss();
  }

  let last_cache_update = freshness.unwrap_or(now);
  let ttl = if partial {
    Duration::zero()
  } else {
    adapter.ttl(request).unwrap_or(settings.default_ttl)
  };
  let fresh = now - last_cache_update < ttl;
  trace!(
    name = %meta.name,
    fingerprint,
    page,
    fresh,
    partial,
    "cache candidate found"
  );

  GateDecision {
    cache_hit: Some(Action::CacheHit {
      meta: meta.clone(),
      fingerprint: fingerprint.to_string(),
      page,
      last_cache_update,
      data,
    }),
    fresh,
  }
}
