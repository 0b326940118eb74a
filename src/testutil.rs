//! Scripted adapter for exercising the pipeline without a network.

use chrono::Duration;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::adapter::{Adapter, ApiResponse, Operation, Route};
use crate::error::{ApiError, Error};

/// Route tracing to the test writer; honors `RUST_LOG`.
pub fn init_tracing() {
  use tracing_subscriber::EnvFilter;
  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

/// A request whose descriptor is itself: every adapter-derived property
/// is spelled out by the test.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
  pub url: String,
  pub operation: Operation,
  pub fingerprint: String,
  pub page: u32,
  pub identity: Map<String, Value>,
  pub ttl: Option<Duration>,
}

impl MockRequest {
  pub fn read(url: &str, fingerprint: &str) -> Self {
    Self {
      url: url.to_string(),
      fingerprint: fingerprint.to_string(),
      page: 1,
      ..Self::default()
    }
  }

  pub fn write(url: &str, operation: Operation) -> Self {
    Self {
      url: url.to_string(),
      operation,
      page: 1,
      ..Self::default()
    }
  }

  pub fn with_identity(mut self, key: &str, value: Value) -> Self {
    self.identity.insert(key.to_string(), value);
    self
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }
}

/// Adapter that classifies routes by their first path segment and serves
/// responses from a script.
#[derive(Default)]
pub struct MockAdapter {
  responses: Mutex<VecDeque<Result<ApiResponse, ApiError>>>,
  send_calls: AtomicUsize,
  send_delay: Option<std::time::Duration>,
  link_namespace: Option<String>,
  identity_keys: HashMap<String, Vec<String>>,
}

impl MockAdapter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_link_namespace(mut self, namespace: &str) -> Self {
    self.link_namespace = Some(namespace.to_string());
    self
  }

  pub fn with_identity_key(mut self, aggregator: &str, key: &str) -> Self {
    self
      .identity_keys
      .entry(aggregator.to_string())
      .or_default()
      .push(key.to_string());
    self
  }

  pub fn with_send_delay(mut self, delay: std::time::Duration) -> Self {
    self.send_delay = Some(delay);
    self
  }

  /// Queue the next response `send` will produce.
  pub fn respond(&self, response: Result<ApiResponse, ApiError>) {
    self
      .responses
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner)
      .push_back(response);
  }

  pub fn send_calls(&self) -> usize {
    self.send_calls.load(Ordering::SeqCst)
  }
}

impl Adapter for MockAdapter {
  type Descriptor = MockRequest;
  type Request = MockRequest;

  fn build_request(&self, descriptor: MockRequest) -> Result<MockRequest, Error> {
    Ok(descriptor)
  }

  fn url(&self, request: &MockRequest) -> String {
    request.url.clone()
  }

  fn operation(&self, request: &MockRequest) -> Operation {
    request.operation
  }

  fn aggregator(&self, url: &str) -> Route {
    // relative urls route by their first path segment; anything absolute
    // belongs to some other host
    if !url.starts_with('/') {
      return Route::Unknown;
    }
    match url.trim_start_matches('/').split('/').next() {
      Some("transient") => Route::Transient,
      Some("") | None => Route::Unknown,
      Some(segment) => Route::Aggregate(segment.split('?').next().unwrap_or(segment).to_string()),
    }
  }

  fn cache_fingerprint(&self, request: &MockRequest) -> String {
    request.fingerprint.clone()
  }

  fn requested_page(&self, request: &MockRequest) -> u32 {
    request.page.max(1)
  }

  fn identity_fields(&self, request: &MockRequest) -> Map<String, Value> {
    request.identity.clone()
  }

  fn identity_keys(&self) -> HashMap<String, Vec<String>> {
    self.identity_keys.clone()
  }

  async fn send(&self, _request: &MockRequest) -> Result<ApiResponse, ApiError> {
    self.send_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = self.send_delay {
      tokio::time::sleep(delay).await;
    }
    self
      .responses
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner)
      .pop_front()
      .unwrap_or_else(|| Err(ApiError::new("no scripted response", None)))
  }

  fn ttl(&self, request: &MockRequest) -> Option<Duration> {
    request.ttl
  }

  fn link_namespace(&self) -> Option<&str> {
    self.link_namespace.as_deref()
  }
}
