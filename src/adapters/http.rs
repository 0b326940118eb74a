//! Generic HTTP adapter for HAL-style JSON APIs.
//!
//! Routes are declared as anchored regex patterns over the path relative
//! to the configured endpoint; named capture groups double as identity
//! fields. Pagination totals come from response headers.

use chrono::Duration;
use regex::Regex;
use reqwest::Method;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use url::Url;

use crate::adapter::{Adapter, ApiResponse, LinkRef, Operation, Pagination, Route};
use crate::error::{ApiError, Error};

/// One declared route: a pattern over the endpoint-relative path, and the
/// aggregator its resources index into (`None` for transient routes).
#[derive(Debug, Clone)]
pub struct RouteSpec {
  pattern: Regex,
  aggregator: Option<String>,
}

impl RouteSpec {
  /// A route whose resources index under `aggregator`. The pattern is
  /// anchored to the whole relative path; named capture groups become
  /// identity fields, e.g. `r"/posts/(?P<id>\d+)"`.
  pub fn new(pattern: &str, aggregator: &str) -> Result<Self, Error> {
    Ok(Self {
      pattern: compile_anchored(pattern)?,
      aggregator: Some(aggregator.to_string()),
    })
  }

  /// A recognized route whose resources are not cacheable entities.
  pub fn transient(pattern: &str) -> Result<Self, Error> {
    Ok(Self {
      pattern: compile_anchored(pattern)?,
      aggregator: None,
    })
  }
}

fn compile_anchored(pattern: &str) -> Result<Regex, Error> {
  Regex::new(&format!("^{pattern}$")).map_err(|e| Error::InvalidRoute(e.to_string()))
}

/// Consumer-side description of one request against the endpoint.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
  pub path: String,
  pub params: Vec<(String, String)>,
  pub operation: Operation,
  pub body: Option<Value>,
  pub ttl: Option<Duration>,
}

impl RequestDescriptor {
  pub fn get(path: &str) -> Self {
    Self {
      path: path.to_string(),
      params: Vec::new(),
      operation: Operation::Get,
      body: None,
      ttl: None,
    }
  }

  pub fn create(path: &str, body: Value) -> Self {
    Self {
      path: path.to_string(),
      params: Vec::new(),
      operation: Operation::Create,
      body: Some(body),
      ttl: None,
    }
  }

  pub fn param(mut self, name: &str, value: impl ToString) -> Self {
    self.params.push((name.to_string(), value.to_string()));
    self
  }

  pub fn page(self, page: u32) -> Self {
    self.param("page", page)
  }

  pub fn with_operation(mut self, operation: Operation) -> Self {
    self.operation = operation;
    self
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }
}

/// The built request: an absolute URL plus what the round trip needs.
#[derive(Debug, Clone)]
pub struct RestRequest {
  url: Url,
  operation: Operation,
  body: Option<Value>,
  ttl: Option<Duration>,
}

impl RestRequest {
  pub fn url(&self) -> &Url {
    &self.url
  }
}

/// Adapter speaking plain HTTP+JSON against one endpoint.
pub struct HttpAdapter {
  endpoint: Url,
  routes: Vec<RouteSpec>,
  http: reqwest::Client,
  link_namespace: Option<String>,
  embed_renames: HashMap<String, String>,
  identity_keys: HashMap<String, Vec<String>>,
  total_header: String,
  total_pages_header: String,
}

impl HttpAdapter {
  pub fn new(endpoint: Url) -> Self {
    Self {
      endpoint,
      routes: Vec::new(),
      http: reqwest::Client::new(),
      link_namespace: None,
      embed_renames: HashMap::new(),
      identity_keys: HashMap::new(),
      total_header: "X-Total".to_string(),
      total_pages_header: "X-Total-Pages".to_string(),
    }
  }

  /// Declare a route. Declaration order is match order.
  pub fn route(mut self, route: RouteSpec) -> Self {
    self.routes.push(route);
    self
  }

  pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
    self.http = http;
    self
  }

  /// Vendor prefix stripped from relation names when naming embeds.
  pub fn with_link_namespace(mut self, namespace: &str) -> Self {
    self.link_namespace = Some(namespace.to_string());
    self
  }

  /// Force the embed name for one fully-qualified relation.
  pub fn rename_embed(mut self, relation: &str, name: &str) -> Self {
    self
      .embed_renames
      .insert(relation.to_string(), name.to_string());
    self
  }

  /// Declare an alternate identity key for an aggregator, e.g. `slug`.
  pub fn identity_key(mut self, aggregator: &str, key: &str) -> Self {
    self
      .identity_keys
      .entry(aggregator.to_string())
      .or_default()
      .push(key.to_string());
    self
  }

  /// Response headers carrying cross-page totals.
  pub fn pagination_headers(mut self, total: &str, total_pages: &str) -> Self {
    self.total_header = total.to_string();
    self.total_pages_header = total_pages.to_string();
    self
  }

  /// Path of `url` relative to the endpoint, or `None` when the URL lives
  /// on a different host or outside the endpoint's path.
  fn relative_path(&self, url: &Url) -> Option<String> {
    if url.host_str() != self.endpoint.host_str() || url.port() != self.endpoint.port() {
      return None;
    }
    let base = self.endpoint.path().trim_end_matches('/');
    let rest = url.path().strip_prefix(base)?;
    if rest.is_empty() {
      return Some("/".to_string());
    }
    if !rest.starts_with('/') {
      return None;
    }
    Some(rest.to_string())
  }

  fn matched_route(&self, path: &str) -> Option<&RouteSpec> {
    let trimmed = if path.len() > 1 {
      path.trim_end_matches('/')
    } else {
      path
    };
    self.routes.iter().find(|r| r.pattern.is_match(trimmed))
  }
}

impl Adapter for HttpAdapter {
  type Descriptor = RequestDescriptor;
  type Request = RestRequest;

  fn build_request(&self, descriptor: RequestDescriptor) -> Result<RestRequest, Error> {
    let mut url = self
      .endpoint
      .join(descriptor.path.trim_start_matches('/'))
      .map_err(|e| Error::InvalidRequest(format!("{}: {e}", descriptor.path)))?;
    for (name, value) in &descriptor.params {
      url.query_pairs_mut().append_pair(name, value);
    }
    Ok(RestRequest {
      url,
      operation: descriptor.operation,
      body: descriptor.body,
      ttl: descriptor.ttl,
    })
  }

  fn url(&self, request: &RestRequest) -> String {
    request.url.to_string()
  }

  fn operation(&self, request: &RestRequest) -> Operation {
    request.operation
  }

  fn aggregator(&self, url: &str) -> Route {
    let Ok(url) = Url::parse(url).or_else(|_| self.endpoint.join(url)) else {
      return Route::Unknown;
    };
    let Some(path) = self.relative_path(&url) else {
      return Route::Unknown;
    };
    match self.matched_route(&path) {
      Some(RouteSpec {
        aggregator: Some(aggregator),
        ..
      }) => Route::Aggregate(aggregator.clone()),
      Some(_) => Route::Transient,
      None => Route::Unknown,
    }
  }

  /// Relative path plus sorted query pairs, `page` and `_embed` excluded,
  /// hashed for a stable fixed-length key.
  fn cache_fingerprint(&self, request: &RestRequest) -> String {
    let path = self
      .relative_path(&request.url)
      .unwrap_or_else(|| request.url.path().to_string());

    let mut pairs: Vec<(String, String)> = request
      .url
      .query_pairs()
      .filter(|(name, _)| name != "page" && name != "_embed")
      .map(|(name, value)| (name.into_owned(), value.into_owned()))
      .collect();
    pairs.sort();

    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    for (name, value) in &pairs {
      hasher.update([0]);
      hasher.update(name.as_bytes());
      hasher.update([0]);
      hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
  }

  fn requested_page(&self, request: &RestRequest) -> u32 {
    request
      .url
      .query_pairs()
      .find(|(name, _)| name == "page")
      .and_then(|(_, value)| value.parse().ok())
      .map(|page: u32| page.max(1))
      .unwrap_or(1)
  }

  /// Named capture groups of the matched route, plus query pairs.
  fn identity_fields(&self, request: &RestRequest) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(path) = self.relative_path(&request.url) {
      if let Some(route) = self.matched_route(&path) {
        if let Some(captures) = route.pattern.captures(path.trim_end_matches('/')) {
          for name in route.pattern.capture_names().flatten() {
            if let Some(value) = captures.name(name) {
              fields.insert(name.to_string(), Value::String(value.as_str().to_string()));
            }
          }
        }
      }
    }
    for (name, value) in request.url.query_pairs() {
      if name != "page" && name != "_embed" {
        fields
          .entry(name.into_owned())
          .or_insert_with(|| Value::String(value.into_owned()));
      }
    }
    fields
  }

  fn identity_keys(&self) -> HashMap<String, Vec<String>> {
    self.identity_keys.clone()
  }

  async fn send(&self, request: &RestRequest) -> Result<ApiResponse, ApiError> {
    let method = match request.operation {
      Operation::Get => Method::GET,
      Operation::Create => Method::POST,
      Operation::Update => Method::PUT,
      Operation::Delete => Method::DELETE,
    };
    let mut builder = self.http.request(method, request.url.clone());
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| ApiError::new(e.to_string(), e.status().map(|s| s.as_u16())))?;
    let status = response.status();

    let total = header_number(&response, &self.total_header);
    let total_pages = header_number(&response, &self.total_pages_header);

    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
      let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed"))
        .to_string();
      return Err(ApiError::new(message, Some(status.as_u16())));
    }

    let mut out = ApiResponse::new(body);
    if let (Some(total), Some(total_pages)) = (total, total_pages) {
      out = out.with_pagination(Pagination { total, total_pages });
    }
    Ok(out)
  }

  fn ttl(&self, request: &RestRequest) -> Option<Duration> {
    request.ttl
  }

  fn link_namespace(&self) -> Option<&str> {
    self.link_namespace.as_deref()
  }

  fn embed_link_as(&self, link: &LinkRef<'_>) -> String {
    if let Some(name) = self.embed_renames.get(link.name) {
      return name.clone();
    }
    // default naming: strip the namespace, resolve `term` from the href
    let default_name = |link: &LinkRef<'_>| {
      let mut name = link.name;
      if let Some(namespace) = self.link_namespace.as_deref() {
        name = name.strip_prefix(namespace).unwrap_or(name);
      }
      if name == "term" {
        if let Some(segment) = crate::adapter::last_path_segment(link.href) {
          return segment.to_string();
        }
      }
      name.to_string()
    };
    default_name(link)
  }
}

fn header_number(response: &reqwest::Response, name: &str) -> Option<u64> {
  response
    .headers()
    .get(name)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.parse().ok())
}
