//! The capability boundary between the cache core and a concrete API.
//!
//! Everything the pipeline needs from the outside world is expressed as a
//! method on [`Adapter`]; defaults fill in the optional capabilities so a
//! consumer only implements what its API actually requires. The core never
//! performs I/O itself; [`Adapter::send`] is the single suspension point
//! of the whole pipeline.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;

use crate::error::{ApiError, Error};
use crate::store::ResourceRecord;

/// CRUD operation of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
  #[default]
  Get,
  Create,
  Update,
  Delete,
}

impl Operation {
  /// Read operations go through the cache gate and query records; write
  /// operations track their lifecycle on the named request directly.
  pub fn is_read(self) -> bool {
    matches!(self, Operation::Get)
  }
}

/// Where a URL lands in the API's route space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
  /// Resources at this URL are indexed under the named aggregator.
  Aggregate(String),
  /// Recognized route whose resources are not cacheable entities.
  Transient,
  /// Not part of the API at all.
  Unknown,
}

/// Cross-page totals reported by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
  pub total: u64,
  pub total_pages: u64,
}

/// A transport response: decoded body plus whatever pagination the wire
/// carried (headers, envelope fields, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
  pub body: Value,
  pub pagination: Option<Pagination>,
}

impl ApiResponse {
  pub fn new(body: Value) -> Self {
    Self {
      body,
      pagination: None,
    }
  }

  pub fn with_pagination(mut self, pagination: Pagination) -> Self {
    self.pagination = Some(pagination);
    self
  }
}

/// A link paired with its fully-qualified relation name, as handed to
/// [`Adapter::embed_link_as`].
#[derive(Debug, Clone, Copy)]
pub struct LinkRef<'a> {
  pub name: &'a str,
  pub href: &'a str,
}

/// Capability interface a concrete API plugs into the pipeline.
pub trait Adapter: Send + Sync + 'static {
  /// Consumer-side description of a request (route, params, body, ...).
  type Descriptor: Send;
  /// The built request handed back into the adapter's other methods.
  type Request: Send + Sync + 'static;

  fn build_request(&self, descriptor: Self::Descriptor) -> Result<Self::Request, Error>;

  /// Effective URL of the request, used for route classification.
  fn url(&self, request: &Self::Request) -> String;

  fn operation(&self, request: &Self::Request) -> Operation;

  /// Route classification for a URL. Consulted for the request itself and
  /// for every embedded resource's link href.
  fn aggregator(&self, url: &str) -> Route;

  /// Pagination-independent cache key: two read requests differing only
  /// by page (or by embedding directives) must share a fingerprint.
  fn cache_fingerprint(&self, request: &Self::Request) -> String;

  fn requested_page(&self, _request: &Self::Request) -> u32 {
    1
  }

  /// Candidate identity fields extracted from the request itself
  /// (path segments, query parameters), used for direct cache lookups.
  fn identity_fields(&self, _request: &Self::Request) -> Map<String, Value> {
    Map::new()
  }

  /// Alternate identity keys per aggregator, checked after `id`. Merged
  /// beneath the consumer's [`Settings`](crate::config::Settings) keys.
  fn identity_keys(&self) -> HashMap<String, Vec<String>> {
    HashMap::new()
  }

  /// Perform the request. Rejections carry a message and, when the
  /// failure came with one, an HTTP status code.
  fn send(
    &self,
    request: &Self::Request,
  ) -> impl Future<Output = Result<ApiResponse, ApiError>> + Send;

  /// Per-request TTL override; `None` falls back to the configured default.
  fn ttl(&self, _request: &Self::Request) -> Option<Duration> {
    None
  }

  /// Relation-name namespace stripped when naming embeds, e.g. a vendor
  /// prefix shared by all of the API's custom link relations.
  fn link_namespace(&self) -> Option<&str> {
    None
  }

  /// Decide the embed name a relation's resources are stored under.
  ///
  /// Default: strip the configured namespace; relations named `term`
  /// (which say nothing about what they point at) take their name from
  /// the href's last path segment instead.
  fn embed_link_as(&self, link: &LinkRef<'_>) -> String {
    let mut name = link.name;
    if let Some(namespace) = self.link_namespace() {
      name = name.strip_prefix(namespace).unwrap_or(name);
    }

    if name == "term" {
      if let Some(segment) = last_path_segment(link.href) {
        return segment.to_string();
      }
    }

    name.to_string()
  }

  /// Last-chance record rewrite before a merged record is stored.
  fn transform_resource(&self, record: ResourceRecord) -> ResourceRecord {
    record
  }
}

/// Last path segment of an href, query string ignored.
pub(crate) fn last_path_segment(href: &str) -> Option<&str> {
  let path = href.split('?').next().unwrap_or(href);
  path
    .trim_end_matches('/')
    .rsplit('/')
    .next()
    .filter(|s| !s.is_empty())
}
