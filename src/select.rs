//! The outward query surface.
//!
//! Given a request name or an explicit (fingerprint, page) pair, produce
//! the current `{status, error, data, page, pagination}` view of that
//! request, either raw (local ids) or denormalized.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::adapter::{Operation, Pagination};
use crate::denormalize::{denormalize, Denormalized, Memo};
use crate::error::ApiError;
use crate::store::{LocalId, Status, Store};

/// What to look up: a name, or a query the caller already knows.
#[derive(Debug, Clone, Copy)]
pub enum RequestRef<'a> {
  Name(&'a str),
  Query { fingerprint: &'a str, page: u32 },
}

/// Current state of a request, result as local ids.
#[derive(Debug, Clone)]
pub struct RawRequestView {
  pub status: Status,
  pub operation: Option<Operation>,
  pub error: Option<ApiError>,
  /// `None` while pending/unfetched.
  pub data: Option<Vec<LocalId>>,
  pub page: u32,
  pub fingerprint: Option<String>,
  pub pagination: Option<Pagination>,
  pub request_at: Option<DateTime<Utc>>,
  pub response_at: Option<DateTime<Utc>>,
}

impl RawRequestView {
  /// A request nothing is known about yet.
  fn unfetched() -> Self {
    Self {
      status: Status::Pending,
      operation: None,
      error: None,
      data: None,
      page: 1,
      fingerprint: None,
      pagination: None,
      request_at: None,
      response_at: None,
    }
  }
}

/// Current state of a request, result denormalized.
#[derive(Debug, Clone)]
pub struct RequestView {
  pub status: Status,
  pub operation: Option<Operation>,
  pub error: Option<ApiError>,
  /// `None` while pending/unfetched.
  pub data: Option<Vec<Arc<Denormalized>>>,
  pub page: u32,
  pub fingerprint: Option<String>,
  pub pagination: Option<Pagination>,
  pub request_at: Option<DateTime<Utc>>,
  pub response_at: Option<DateTime<Utc>>,
}

impl RequestView {
  pub fn is_resolved(&self) -> bool {
    self.status == Status::Resolved
  }

  pub fn is_rejected(&self) -> bool {
    self.status == Status::Rejected
  }
}

/// Resolve the current raw view of `target` from `store`.
pub fn select_request_raw(store: &Store, target: RequestRef<'_>) -> RawRequestView {
  match target {
    RequestRef::Name(name) => {
      let Some(named) = store.named(name) else {
        return RawRequestView::unfetched();
      };

      let mut view = RawRequestView {
        status: named.status.unwrap_or(Status::Pending),
        operation: named.operation,
        error: named.error.clone(),
        data: named.data.clone(),
        page: named.page.unwrap_or(1),
        fingerprint: named.fingerprint.clone(),
        pagination: None,
        request_at: named.request_at,
        response_at: named.response_at,
      };
      if let Some(fingerprint) = named.fingerprint.clone() {
        let page = view.page;
        merge_query(&mut view, store, &fingerprint, page);
      }
      view
    }
    RequestRef::Query { fingerprint, page } => {
      let mut view = RawRequestView {
        page,
        fingerprint: Some(fingerprint.to_string()),
        ..RawRequestView::unfetched()
      };
      merge_query(&mut view, store, fingerprint, page);
      view
    }
  }
}

/// Overlay the query record at (fingerprint, page) onto `view`.
fn merge_query(view: &mut RawRequestView, store: &Store, fingerprint: &str, page: u32) {
  let Some(slot) = store.query(fingerprint) else {
    return;
  };
  view.pagination = slot.pagination;

  if let Some(record) = slot.pages.get(&page) {
    view.status = record.status;
    view.operation = Some(record.operation);
    view.error = record.error.clone();
    view.request_at = Some(record.request_at);
    view.response_at = record.response_at;
    if record.data.is_some() {
      view.data = record.data.clone();
    }
  }
}

/// Resolve the current view of `target`, denormalizing the result list.
///
/// The whole list shares one memo, so a resource appearing in several
/// result rows (directly or embedded) materializes once.
pub fn select_request(store: &Store, target: RequestRef<'_>) -> RequestView {
  let raw = select_request_raw(store, target);
  let data = raw.data.as_ref().map(|ids| {
    let mut memo = Memo::new();
    ids
      .iter()
      .filter_map(|id| denormalize(store, *id, &mut memo))
      .collect()
  });

  RequestView {
    status: raw.status,
    operation: raw.operation,
    error: raw.error,
    data,
    page: raw.page,
    fingerprint: raw.fingerprint,
    pagination: raw.pagination,
    request_at: raw.request_at,
    response_at: raw.response_at,
  }
}
