//! Consumer-facing settings, threaded explicitly through every call.

use chrono::Duration;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::action::Action;
use crate::store::{ResourceRecord, Store};

/// Hook applied to every merged record just before it is stored.
pub type TransformFn = Arc<dyn Fn(ResourceRecord) -> ResourceRecord + Send + Sync>;

/// Observer invoked after every dispatched event, with the new snapshot.
/// This is the sole outward event surface; the sequence it observes is
/// replayable through [`Engine::reduce`](crate::reducer::Engine::reduce).
pub type ActionObserver = Arc<dyn Fn(&Action, &Store) + Send + Sync>;

/// Pipeline configuration. No global state: a `Settings` is handed to the
/// client at construction and travels with it.
#[derive(Clone)]
pub struct Settings {
  /// How long a cached answer keeps short-circuiting identical reads.
  pub default_ttl: Duration,
  /// Upper bound on a single transport round trip.
  pub default_timeout: Duration,
  /// Alternate identity keys per aggregator, checked after `id`.
  pub custom_identity_keys: HashMap<String, Vec<String>>,
  /// Record rewrite hook, applied after the adapter's own transform.
  pub before_indexing: Option<TransformFn>,
  /// Event observer, called after each state transition.
  pub on_action: Option<ActionObserver>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      default_ttl: Duration::seconds(60),
      default_timeout: Duration::seconds(30),
      custom_identity_keys: HashMap::new(),
      before_indexing: None,
      on_action: None,
    }
  }
}

impl Settings {
  /// Ordered candidate identity keys for `aggregator`.
  ///
  /// `id` is always first and always consulted; adapter-declared keys
  /// come next, consumer-configured keys last. Duplicates collapse onto
  /// their first position.
  pub fn identity_keys(
    &self,
    adapter_keys: &HashMap<String, Vec<String>>,
    aggregator: &str,
  ) -> Vec<String> {
    let mut keys = vec!["id".to_string()];
    for source in [adapter_keys, &self.custom_identity_keys] {
      if let Some(extra) = source.get(aggregator) {
        for key in extra {
          if !keys.contains(key) {
            keys.push(key.clone());
          }
        }
      }
    }
    keys
  }
}

impl fmt::Debug for Settings {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Settings")
      .field("default_ttl", &self.default_ttl)
      .field("default_timeout", &self.default_timeout)
      .field("custom_identity_keys", &self.custom_identity_keys)
      .field("before_indexing", &self.before_indexing.is_some())
      .field("on_action", &self.on_action.is_some())
      .finish()
  }
}
