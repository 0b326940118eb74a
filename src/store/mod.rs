//! The normalized store snapshot.
//!
//! A [`Store`] bundles everything the cache knows at one point in time:
//! the resource arena, the identity index, per-query request records and
//! per-name request records. Snapshots are immutable from the outside;
//! every transition produces a new snapshot so consumers can hold onto old
//! ones for change detection. Records are `Arc`ed, which keeps snapshot
//! clones cheap.

mod identity;

pub use identity::{index_value, resolve_local_id};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::adapter::{Operation, Pagination};
use crate::error::ApiError;

/// Process-local identifier of a normalized resource.
///
/// Indexes into the resource arena. Assigned monotonically on first
/// index of a new identity; never reused, never invalidated.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LocalId(pub usize);

/// One outbound relation entry, as found under a resource's `_links`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
  pub href: String,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub embeddable: bool,
  /// Attributes beyond href/embeddable are carried through verbatim.
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Link {
  pub fn new(href: impl Into<String>) -> Self {
    Self {
      href: href.into(),
      embeddable: false,
      extra: Map::new(),
    }
  }
}

/// Reference(s) stored under one embed name.
///
/// List-shaped embeds stay lists even when elements were dropped; a
/// scalar embed whose single element was dropped is omitted entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddedRef {
  One(LocalId),
  Many(Vec<LocalId>),
}

/// One normalized resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
  /// Business fields from the source payload (everything except
  /// `_links` and `_embedded`).
  pub fields: Map<String, Value>,
  /// Outbound relations, keyed by fully-qualified relation name.
  pub links: BTreeMap<String, Vec<Link>>,
  /// Embedded references, keyed by embed name.
  pub embedded: BTreeMap<String, EmbeddedRef>,
  /// When this record was last written from a response.
  pub last_cache_update: DateTime<Utc>,
  /// False until the resource has been fetched directly rather than
  /// only seen as an embedded fragment. Never downgrades back to false.
  pub complete: bool,
}

/// Lifecycle status of a request record.
///
/// Terminal-free: records cycle pending -> resolved/rejected -> pending
/// again on refetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  Pending,
  Resolved,
  Rejected,
}

/// State of one (fingerprint, page) query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
  pub status: Status,
  pub operation: Operation,
  pub error: Option<ApiError>,
  pub request_at: DateTime<Utc>,
  pub response_at: Option<DateTime<Utc>>,
  /// Result page as local ids, in response order. None until the first
  /// resolution; a later failure leaves it untouched.
  pub data: Option<Vec<LocalId>>,
}

/// All fetched pages plus cross-page pagination for one cache fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySlot {
  pub pagination: Option<Pagination>,
  pub pages: BTreeMap<u32, QueryRecord>,
}

/// State of one application-named request.
///
/// Read operations only point at the query record they currently refer
/// to; write operations track their own lifecycle directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedRequest {
  pub fingerprint: Option<String>,
  pub page: Option<u32>,
  pub status: Option<Status>,
  pub operation: Option<Operation>,
  pub error: Option<ApiError>,
  pub request_at: Option<DateTime<Utc>>,
  pub response_at: Option<DateTime<Utc>>,
  pub data: Option<Vec<LocalId>>,
}

/// Immutable snapshot of the whole cache.
#[derive(Debug, Clone, Default)]
pub struct Store {
  resources: Vec<Arc<ResourceRecord>>,
  indexes: HashMap<String, HashMap<String, HashMap<String, LocalId>>>,
  queries: HashMap<String, QuerySlot>,
  named: HashMap<String, NamedRequest>,
}

impl Store {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn resource(&self, id: LocalId) -> Option<&Arc<ResourceRecord>> {
    self.resources.get(id.0)
  }

  pub fn resource_count(&self) -> usize {
    self.resources.len()
  }

  /// The id the next brand-new resource will receive.
  pub(crate) fn next_local_id(&self) -> LocalId {
    LocalId(self.resources.len())
  }

  /// Write `record` at `id`, either replacing an existing record or
  /// appending the next arena slot.
  pub(crate) fn put_resource(&mut self, id: LocalId, record: ResourceRecord) {
    if id.0 < self.resources.len() {
      self.resources[id.0] = Arc::new(record);
    } else {
      debug_assert_eq!(id.0, self.resources.len());
      self.resources.push(Arc::new(record));
    }
  }

  /// Identity index lookup: (aggregator, key, canonical value) -> id.
  pub fn index_entry(&self, aggregator: &str, key: &str, value: &str) -> Option<LocalId> {
    self
      .indexes
      .get(aggregator)?
      .get(key)?
      .get(value)
      .copied()
  }

  pub(crate) fn put_index_entry(
    &mut self,
    aggregator: &str,
    key: &str,
    value: String,
    id: LocalId,
  ) {
    self
      .indexes
      .entry(aggregator.to_string())
      .or_default()
      .entry(key.to_string())
      .or_default()
      .insert(value, id);
  }

  pub fn query(&self, fingerprint: &str) -> Option<&QuerySlot> {
    self.queries.get(fingerprint)
  }

  pub fn query_page(&self, fingerprint: &str, page: u32) -> Option<&QueryRecord> {
    self.queries.get(fingerprint)?.pages.get(&page)
  }

  pub(crate) fn query_slot_mut(&mut self, fingerprint: &str) -> &mut QuerySlot {
    self.queries.entry(fingerprint.to_string()).or_default()
  }

  pub fn named(&self, name: &str) -> Option<&NamedRequest> {
    self.named.get(name)
  }

  pub(crate) fn named_mut(&mut self, name: &str) -> &mut NamedRequest {
    self.named.entry(name.to_string()).or_default()
  }
}
