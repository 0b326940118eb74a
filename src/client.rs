//! The driver tying the pipeline together.
//!
//! A [`Client`] owns the current snapshot and runs the whole read path:
//! gate evaluation, event dispatch, the network round trip, and view
//! selection afterwards. Identical concurrent reads coalesce onto one
//! in-flight round trip.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

use crate::action::{Action, ActionMeta};
use crate::adapter::{Adapter, Route};
use crate::config::Settings;
use crate::error::{ApiError, Error};
use crate::gate;
use crate::reducer::Engine;
use crate::select::{select_request, RequestRef, RequestView};
use crate::store::Store;

/// Identity of an in-flight round trip. Reads coalesce on their cache
/// key; writes on the request name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum InflightKey {
  Query(String, u32),
  Name(String),
}

type InflightFuture = Shared<BoxFuture<'static, RequestView>>;

struct ClientInner<A: Adapter> {
  engine: Engine<A>,
  adapter: Arc<A>,
  settings: Settings,
  state: RwLock<Store>,
  inflight: Mutex<HashMap<InflightKey, InflightFuture>>,
}

/// Handle to one cache instance. Cheap to clone; clones share state.
pub struct Client<A: Adapter> {
  inner: Arc<ClientInner<A>>,
}

impl<A: Adapter> Clone for Client<A> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<A: Adapter> Client<A> {
  pub fn new(adapter: A, settings: Settings) -> Self {
    let adapter = Arc::new(adapter);
    Self {
      inner: Arc::new(ClientInner {
        engine: Engine::new(Arc::clone(&adapter), settings.clone()),
        adapter,
        settings,
        state: RwLock::new(Store::new()),
        inflight: Mutex::new(HashMap::new()),
      }),
    }
  }

  /// The current snapshot. Immutable; later dispatches never change it.
  pub fn snapshot(&self) -> Store {
    self
      .inner
      .state
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Current view of the named request.
  pub fn view(&self, name: &str) -> RequestView {
    select_request(&self.snapshot(), RequestRef::Name(name))
  }

  /// Current view of an explicit (fingerprint, page) query.
  pub fn view_query(&self, fingerprint: &str, page: u32) -> RequestView {
    select_request(&self.snapshot(), RequestRef::Query { fingerprint, page })
  }

  /// Apply one event to the snapshot and notify the observer, if any.
  pub fn dispatch(&self, action: Action) {
    self.inner.dispatch(action);
  }

  /// Run the named request through the pipeline.
  ///
  /// Reads consult the cache first: a fresh candidate short-circuits the
  /// network entirely, a stale one is served via the dispatched CacheHit
  /// and refetched. The returned view reflects the snapshot after the
  /// round trip (or after the cache hit, when no round trip happened).
  pub async fn request(&self, name: &str, descriptor: A::Descriptor) -> Result<RequestView, Error> {
    let inner = &self.inner;
    let request = inner.adapter.build_request(descriptor)?;
    let url = inner.adapter.url(&request);
    let aggregator = match inner.adapter.aggregator(&url) {
      Route::Aggregate(aggregator) => Some(aggregator),
      Route::Transient => None,
      Route::Unknown => return Err(Error::UnknownRoute(url)),
    };

    let operation = inner.adapter.operation(&request);
    let meta = ActionMeta {
      name: name.to_string(),
      aggregator,
      operation,
      request_at: Utc::now(),
      response_at: None,
    };

    let (key, fingerprint, page) = if operation.is_read() {
      let fingerprint = inner.adapter.cache_fingerprint(&request);
      let page = inner.adapter.requested_page(&request);

      let decision = gate::evaluate(
        &self.snapshot(),
        inner.adapter.as_ref(),
        &inner.settings,
        &meta,
        &request,
        &fingerprint,
        page,
        Utc::now(),
      );
      if let Some(hit) = decision.cache_hit {
        inner.dispatch(hit);
        if decision.fresh {
          debug!(name, fingerprint, page, "served from cache");
          return Ok(self.view_query(&fingerprint, page));
        }
      }

      (
        InflightKey::Query(fingerprint.clone(), page),
        Some(fingerprint),
        page,
      )
    } else {
      (InflightKey::Name(name.to_string()), None, 1)
    };

    let shared = {
      let mut inflight = inner
        .inflight
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
      if let Some(existing) = inflight.get(&key) {
        debug!(name, "joining in-flight request");
        existing.clone()
      } else {
        inner.dispatch(Action::RequestStarted {
          meta: meta.clone(),
          fingerprint: fingerprint.clone(),
          page,
        });
        let future = ClientInner::round_trip(
          Arc::clone(inner),
          request,
          meta,
          key.clone(),
          fingerprint,
          page,
        )
        .boxed()
        .shared();
        inflight.insert(key, future.clone());
        future
      }
    };

    Ok(shared.await)
  }
}

impl<A: Adapter> ClientInner<A> {
  fn dispatch(&self, action: Action) {
    let next = {
      let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
      *state = self.engine.reduce(&state, &action);
      state.clone()
    };
    if let Some(observer) = &self.settings.on_action {
      observer(&action, &next);
    }
  }

  /// One network round trip: send (bounded by the configured timeout),
  /// dispatch the outcome, drop the in-flight entry, select the view.
  async fn round_trip(
    inner: Arc<Self>,
    request: A::Request,
    mut meta: ActionMeta,
    key: InflightKey,
    fingerprint: Option<String>,
    page: u32,
  ) -> RequestView {
    let timeout = inner
      .settings
      .default_timeout
      .to_std()
      .unwrap_or(std::time::Duration::from_secs(30));
    let outcome = match tokio::time::timeout(timeout, inner.adapter.send(&request)).await {
      Ok(outcome) => outcome,
      Err(_) => Err(ApiError::new("request timed out", None)),
    };

    meta.response_at = Some(Utc::now());
    let action = match outcome {
      Ok(response) => Action::Success {
        meta,
        fingerprint: fingerprint.clone(),
        page,
        response,
      },
      Err(error) => Action::Failure {
        meta,
        fingerprint: fingerprint.clone(),
        page,
        error,
      },
    };
    let name = action.meta().name.clone();
    inner.dispatch(action);

    inner
      .inflight
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&key);

    let state = inner
      .state
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();
    match &fingerprint {
      Some(fingerprint) => select_request(&state, RequestRef::Query { fingerprint, page }),
      None => select_request(&state, RequestRef::Name(&name)),
    }
  }
}
