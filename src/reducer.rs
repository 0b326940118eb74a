//! Pure request-state transitions over store snapshots.
//!
//! [`Engine::reduce`] is the only place the store changes: it maps an old
//! snapshot plus one event onto a new snapshot and has no other effects,
//! so an event sequence can be replayed against any starting state.

use std::sync::Arc;
use tracing::debug;

use crate::action::Action;
use crate::adapter::{Adapter, Pagination};
use crate::config::Settings;
use crate::indexer::{IndexMeta, Indexer};
use crate::store::{QueryRecord, Status, Store};
use serde_json::Value;

/// The state machine: adapter capabilities + settings, applied to events.
pub struct Engine<A: Adapter> {
  adapter: Arc<A>,
  settings: Settings,
}

impl<A: Adapter> Engine<A> {
  pub fn new(adapter: Arc<A>, settings: Settings) -> Self {
    Self { adapter, settings }
  }

  pub fn adapter(&self) -> &A {
    &self.adapter
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  /// Apply one event to a snapshot, producing the next snapshot.
  pub fn reduce(&self, state: &Store, action: &Action) -> Store {
    let mut next = state.clone();

    match action {
      Action::CacheHit {
        meta,
        fingerprint,
        page,
        last_cache_update,
        data,
      } => {
        let named = next.named_mut(&meta.name);
        named.fingerprint = Some(fingerprint.clone());
        named.page = Some(*page);

        // A candidate served from a direct identity match may have no
        // query record yet; synthesize one already resolved, stamped
        // with the candidate's own freshness.
        if next.query_page(fingerprint, *page).is_none() {
          let synthesized = QueryRecord {
            status: Status::Resolved,
            operation: meta.operation,
            error: None,
            request_at: *last_cache_update,
            response_at: Some(*last_cache_update),
            data: None,
          };
          let slot = next.query_slot_mut(fingerprint);
          slot.pages.insert(*page, synthesized.clone());
          // the seeded result list lives on page 1
          slot
            .pages
            .entry(1)
            .or_insert(synthesized)
            .data = Some(data.clone());
        }
      }

      Action::RequestStarted {
        meta,
        fingerprint,
        page,
      } => {
        if meta.operation.is_read() {
          let Some(fingerprint) = fingerprint.as_deref() else {
            return next;
          };
          let named = next.named_mut(&meta.name);
          named.fingerprint = Some(fingerprint.to_string());
          named.page = Some(*page);

          // the page flips back to pending; prior data, response time
          // and pagination survive the refetch
          let slot = next.query_slot_mut(fingerprint);
          let record = slot.pages.entry(*page).or_insert(QueryRecord {
            status: Status::Pending,
            operation: meta.operation,
            error: None,
            request_at: meta.request_at,
            response_at: None,
            data: None,
          });
          record.status = Status::Pending;
          record.operation = meta.operation;
          record.request_at = meta.request_at;
          // a retry clears the previous error so surviving data is
          // servable again; the data itself stays
          record.error = None;
        } else {
          let named = next.named_mut(&meta.name);
          named.status = Some(Status::Pending);
          named.operation = Some(meta.operation);
          named.request_at = Some(meta.request_at);
          named.data = None;
        }
      }

      Action::Success {
        meta,
        fingerprint,
        page,
        response,
      } => {
        // Every returned resource is indexed, single bodies included;
        // result order is preserved in the id list.
        let mut data = Vec::new();
        if let Some(aggregator) = meta.aggregator.as_deref() {
          let indexer = Indexer::new(self.adapter.as_ref(), &self.settings);
          let items: Vec<&Value> = match &response.body {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
          };
          let index_meta =
            IndexMeta::full_fetch(meta.response_at.unwrap_or(meta.request_at));
          for item in items {
            let (after, id) = indexer.index(next, aggregator, item, index_meta);
            next = after;
            data.push(id);
          }
        }

        if meta.operation.is_read() {
          let Some(fingerprint) = fingerprint.as_deref() else {
            return next;
          };
          // a response that reports no totals is its own single page
          let pagination = response.pagination.unwrap_or(Pagination {
            total: data.len() as u64,
            total_pages: 1,
          });

          let slot = next.query_slot_mut(fingerprint);
          slot.pagination = Some(pagination);
          let record = slot.pages.entry(*page).or_insert(QueryRecord {
            status: Status::Resolved,
            operation: meta.operation,
            error: None,
            request_at: meta.request_at,
            response_at: None,
            data: None,
          });
          record.status = Status::Resolved;
          record.error = None;
          record.response_at = meta.response_at;
          record.data = Some(data);
        } else {
          // A completion for a superseded request must not clobber the
          // newer pending request's eventual state.
          let still_current =
            next.named(&meta.name).and_then(|n| n.request_at) == Some(meta.request_at);
          if still_current {
            let named = next.named_mut(&meta.name);
            named.status = Some(Status::Resolved);
            named.error = None;
            named.response_at = meta.response_at;
            named.data = Some(data);
          } else {
            debug!(name = %meta.name, "discarding response for superseded request");
          }
        }
      }

      Action::Failure {
        meta,
        fingerprint,
        page,
        error,
      } => {
        if meta.operation.is_read() {
          let Some(fingerprint) = fingerprint.as_deref() else {
            return next;
          };
          let slot = next.query_slot_mut(fingerprint);
          let record = slot.pages.entry(*page).or_insert(QueryRecord {
            status: Status::Rejected,
            operation: meta.operation,
            error: None,
            request_at: meta.request_at,
            response_at: None,
            data: None,
          });
          // status and error only; previously resolved data stays
          record.status = Status::Rejected;
          record.error = Some(error.clone());
          record.response_at = meta.response_at;
        } else {
          let still_current =
            next.named(&meta.name).and_then(|n| n.request_at) == Some(meta.request_at);
          if still_current {
            let named = next.named_mut(&meta.name);
            named.status = Some(Status::Rejected);
            named.error = Some(error.clone());
            named.response_at = meta.response_at;
          } else {
            debug!(name = %meta.name, "discarding failure for superseded request");
          }
        }
      }
    }

    next
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::action::ActionMeta;
  use crate::adapter::{ApiResponse, Operation};
  use crate::error::ApiError;
  use crate::store::LocalId;
  use crate::testutil::MockAdapter;
  use chrono::{Duration, Utc};
  use serde_json::json;

  fn engine() -> Engine<MockAdapter> {
    Engine::new(Arc::new(MockAdapter::new()), Settings::default())
  }

  fn read_meta(name: &str) -> ActionMeta {
    ActionMeta {
      name: name.to_string(),
      aggregator: Some("posts".to_string()),
      operation: Operation::Get,
      request_at: Utc::now(),
      response_at: None,
    }
  }

  fn write_meta(name: &str) -> ActionMeta {
    ActionMeta {
      operation: Operation::Create,
      ..read_meta(name)
    }
  }

  #[test]
  fn request_started_marks_query_pending() {
    let engine = engine();
    let meta = read_meta("list");

    let state = engine.reduce(
      &Store::new(),
      &Action::RequestStarted {
        meta: meta.clone(),
        fingerprint: Some("Q".into()),
        page: 1,
      },
    );

    let record = state.query_page("Q", 1).unwrap();
    assert_eq!(record.status, Status::Pending);
    let named = state.named("list").unwrap();
    assert_eq!(named.fingerprint.as_deref(), Some("Q"));
    assert_eq!(named.page, Some(1));
  }

  #[test]
  fn success_indexes_deduplicates_and_paginates() {
    // Result order is preserved in the id list, and each embedded
    // resource lands under the aggregator its link href routes to.
    let engine = engine();
    let mut meta = read_meta("list");
    meta.response_at = Some(meta.request_at + Duration::milliseconds(80));

    let response = ApiResponse::new(json!([
      {
        "id": 2,
        "_links": { "author": [{ "href": "/users/1", "embeddable": true }] },
        "_embedded": { "author": [{ "id": 1 }] },
      },
      { "id": 1 },
    ]));

    let state = engine.reduce(
      &Store::new(),
      &Action::Success {
        meta: {
          let mut m = meta.clone();
          m.aggregator = Some("posts".into());
          m
        },
        fingerprint: Some("Q".into()),
        page: 1,
        response,
      },
    );

    // id:1 was indexed under "users" via its embed href, while the list
    // element {id:1} indexed under "posts": author + 2 posts = 3 records
    assert_eq!(state.resource_count(), 3);

    let record = state.query_page("Q", 1).unwrap();
    assert_eq!(record.status, Status::Resolved);
    assert_eq!(
      record.data,
      Some(vec![
        state.index_entry("posts", "id", "2").unwrap(),
        state.index_entry("posts", "id", "1").unwrap(),
      ])
    );

    let pagination = state.query("Q").unwrap().pagination.unwrap();
    assert_eq!(pagination.total, 2);
    assert_eq!(pagination.total_pages, 1);
  }

  #[test]
  fn embedded_duplicate_resolves_to_one_identity() {
    // The first element embeds post 1, which is also the second element:
    // both occurrences must land on the same record.
    let engine = engine();
    let response = ApiResponse::new(json!([
      {
        "id": 2,
        "_links": { "parent": [{ "href": "/posts/1", "embeddable": true }] },
        "_embedded": { "parent": [{ "id": 1, "title": "parent post" }] },
      },
      { "id": 1 },
    ]));

    let state = engine.reduce(
      &Store::new(),
      &Action::Success {
        meta: read_meta("list"),
        fingerprint: Some("Q".into()),
        page: 1,
        response,
      },
    );

    assert_eq!(state.resource_count(), 2);
    let parent = state.resource(LocalId(0)).unwrap();
    // embedded fields survived the later bare {id:1} merge, and the
    // direct fetch upgraded the fragment to complete
    assert_eq!(parent.fields.get("title"), Some(&json!("parent post")));
    assert!(parent.complete);
    assert_eq!(
      state.query_page("Q", 1).unwrap().data,
      Some(vec![LocalId(1), LocalId(0)])
    );
  }

  #[test]
  fn same_identity_across_events_stays_one_record() {
    let engine = engine();
    let mut state = Store::new();

    for body in [json!([{ "id": 2, "a": 1 }]), json!([{ "id": 2, "b": 2 }])] {
      state = engine.reduce(
        &state,
        &Action::Success {
          meta: read_meta("list"),
          fingerprint: Some("Q".into()),
          page: 1,
          response: ApiResponse::new(body),
        },
      );
    }

    assert_eq!(state.resource_count(), 1);
    let record = state.resource(LocalId(0)).unwrap();
    assert_eq!(record.fields.get("a"), Some(&json!(1)));
    assert_eq!(record.fields.get("b"), Some(&json!(2)));
  }

  #[test]
  fn failure_keeps_previous_data() {
    let engine = engine();
    let mut state = engine.reduce(
      &Store::new(),
      &Action::Success {
        meta: read_meta("list"),
        fingerprint: Some("Q".into()),
        page: 1,
        response: ApiResponse::new(json!([{ "id": 1 }])),
      },
    );
    let resolved_data = state.query_page("Q", 1).unwrap().data.clone();
    assert!(resolved_data.is_some());

    state = engine.reduce(
      &state,
      &Action::Failure {
        meta: read_meta("list"),
        fingerprint: Some("Q".into()),
        page: 1,
        error: ApiError::new("gateway timeout", Some(504)),
      },
    );

    let record = state.query_page("Q", 1).unwrap();
    assert_eq!(record.status, Status::Rejected);
    assert_eq!(record.error.as_ref().unwrap().status, Some(504));
    assert_eq!(record.data, resolved_data);
  }

  #[test]
  fn retry_clears_error_and_keeps_data() {
    let engine = engine();
    let mut state = engine.reduce(
      &Store::new(),
      &Action::Success {
        meta: read_meta("list"),
        fingerprint: Some("Q".into()),
        page: 1,
        response: ApiResponse::new(json!([{ "id": 1 }])),
      },
    );
    state = engine.reduce(
      &state,
      &Action::Failure {
        meta: read_meta("list"),
        fingerprint: Some("Q".into()),
        page: 1,
        error: ApiError::new("gateway timeout", Some(504)),
      },
    );
    assert!(state.query_page("Q", 1).unwrap().error.is_some());

    state = engine.reduce(
      &state,
      &Action::RequestStarted {
        meta: read_meta("list"),
        fingerprint: Some("Q".into()),
        page: 1,
      },
    );

    let record = state.query_page("Q", 1).unwrap();
    assert_eq!(record.status, Status::Pending);
    assert!(record.error.is_none());
    assert_eq!(record.data, Some(vec![LocalId(0)]));
  }

  #[test]
  fn stale_write_completion_is_discarded() {
    let engine = engine();
    let first = write_meta("save");
    let second = ActionMeta {
      request_at: first.request_at + Duration::milliseconds(10),
      ..write_meta("save")
    };

    let mut state = Store::new();
    state = engine.reduce(
      &state,
      &Action::RequestStarted {
        meta: first.clone(),
        fingerprint: None,
        page: 1,
      },
    );
    state = engine.reduce(
      &state,
      &Action::RequestStarted {
        meta: second.clone(),
        fingerprint: None,
        page: 1,
      },
    );

    // the slow first response lands after the second request started
    state = engine.reduce(
      &state,
      &Action::Success {
        meta: ActionMeta {
          response_at: Some(second.request_at + Duration::milliseconds(5)),
          ..first
        },
        fingerprint: None,
        page: 1,
        response: ApiResponse::new(json!({ "id": 8 })),
      },
    );

    let named = state.named("save").unwrap();
    assert_eq!(named.status, Some(Status::Pending));
    assert_eq!(named.data, None);
    assert_eq!(named.request_at, Some(second.request_at));
  }

  #[test]
  fn write_success_updates_current_request() {
    let engine = engine();
    let meta = write_meta("save");

    let mut state = engine.reduce(
      &Store::new(),
      &Action::RequestStarted {
        meta: meta.clone(),
        fingerprint: None,
        page: 1,
      },
    );
    assert_eq!(state.named("save").unwrap().status, Some(Status::Pending));

    state = engine.reduce(
      &state,
      &Action::Success {
        meta: ActionMeta {
          response_at: Some(meta.request_at + Duration::milliseconds(30)),
          ..meta
        },
        fingerprint: None,
        page: 1,
        response: ApiResponse::new(json!({ "id": 8, "title": "saved" })),
      },
    );

    let named = state.named("save").unwrap();
    assert_eq!(named.status, Some(Status::Resolved));
    assert_eq!(named.data, Some(vec![LocalId(0)]));
  }

  #[test]
  fn cache_hit_synthesizes_a_resolved_query_record() {
    let engine = engine();
    let cached_at = Utc::now() - Duration::seconds(5);

    let state = engine.reduce(
      &Store::new(),
      &Action::CacheHit {
        meta: read_meta("one"),
        fingerprint: "Q1".into(),
        page: 1,
        last_cache_update: cached_at,
        data: vec![LocalId(3)],
      },
    );

    let record = state.query_page("Q1", 1).unwrap();
    assert_eq!(record.status, Status::Resolved);
    assert_eq!(record.request_at, cached_at);
    assert_eq!(record.response_at, Some(cached_at));
    assert_eq!(record.data, Some(vec![LocalId(3)]));
  }

  #[test]
  fn cache_hit_leaves_existing_query_records_alone() {
    let engine = engine();
    let mut state = engine.reduce(
      &Store::new(),
      &Action::Success {
        meta: read_meta("list"),
        fingerprint: Some("Q".into()),
        page: 1,
        response: ApiResponse::new(json!([{ "id": 1 }])),
      },
    );
    let before = state.query_page("Q", 1).cloned();

    state = engine.reduce(
      &state,
      &Action::CacheHit {
        meta: read_meta("list-again"),
        fingerprint: "Q".into(),
        page: 1,
        last_cache_update: Utc::now(),
        data: vec![LocalId(0)],
      },
    );

    assert_eq!(state.query_page("Q", 1).cloned(), before);
    // but the new name now points at the same query
    assert_eq!(
      state.named("list-again").unwrap().fingerprint.as_deref(),
      Some("Q")
    );
  }

  #[test]
  fn transient_routes_index_nothing() {
    let engine = engine();
    let state = engine.reduce(
      &Store::new(),
      &Action::Success {
        meta: ActionMeta {
          aggregator: None,
          ..read_meta("settings")
        },
        fingerprint: Some("S".into()),
        page: 1,
        response: ApiResponse::new(json!({ "site_title": "blog" })),
      },
    );

    assert_eq!(state.resource_count(), 0);
    let record = state.query_page("S", 1).unwrap();
    assert_eq!(record.status, Status::Resolved);
    assert_eq!(record.data, Some(vec![]));
  }
}
