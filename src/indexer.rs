//! The entity indexer: merges raw resources into the normalized store.
//!
//! Indexing one resource is a recursive, pure transformation of a store
//! snapshot: embedded sub-resources are indexed first (marked partial),
//! then the resource itself is merged into its prior record, keeping
//! fields the new payload does not carry, and finally every configured
//! identity key is (re)pointed at the record's local id.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::adapter::{Adapter, LinkRef, Route};
use crate::config::Settings;
use crate::links::{curie_table, parse_link_map, resolve_aliases};
use crate::store::{index_value, resolve_local_id, EmbeddedRef, LocalId, ResourceRecord, Store};

/// Error code carried by embedded items whose own fetch failed. Such
/// items are dropped from their slot instead of indexed as error records.
const NO_ROUTE_CODE: &str = "rest_no_route";

/// Per-pass indexing context.
#[derive(Debug, Clone, Copy)]
pub struct IndexMeta {
  /// Freshness timestamp the written records receive.
  pub last_cache_update: DateTime<Utc>,
  /// True while indexing embedded fragments of another resource.
  pub partial: bool,
}

impl IndexMeta {
  pub fn full_fetch(at: DateTime<Utc>) -> Self {
    Self {
      last_cache_update: at,
      partial: false,
    }
  }
}

/// Indexes raw resources into store snapshots for one adapter/settings pair.
pub struct Indexer<'a, A: Adapter> {
  adapter: &'a A,
  settings: &'a Settings,
}

impl<'a, A: Adapter> Indexer<'a, A> {
  pub fn new(adapter: &'a A, settings: &'a Settings) -> Self {
    Self { adapter, settings }
  }

  /// Index one raw resource, embedded sub-resources first.
  ///
  /// Returns the next snapshot and the resource's local id. The id is
  /// either the resource's existing identity or the next arena slot.
  pub fn index(
    &self,
    store: Store,
    aggregator: &str,
    raw: &Value,
    meta: IndexMeta,
  ) -> (Store, LocalId) {
    let mut store = store;
    let obj = raw.as_object().cloned().unwrap_or_default();

    let raw_links = obj
      .get("_links")
      .and_then(Value::as_object)
      .cloned()
      .unwrap_or_default();
    let curies = curie_table(&raw_links);
    let links = parse_link_map(&resolve_aliases(&raw_links, &curies));

    let keys = self
      .settings
      .identity_keys(&self.adapter.identity_keys(), aggregator);
    let existing = resolve_local_id(&store, aggregator, &keys, &obj);
    let prior = existing.and_then(|id| store.resource(id).cloned());

    let mut embedded: BTreeMap<String, EmbeddedRef> = prior
      .as_ref()
      .map(|record| record.embedded.clone())
      .unwrap_or_default();

    if let Some(raw_embedded) = obj.get("_embedded").and_then(Value::as_object) {
      let aliased = resolve_aliases(raw_embedded, &curies);
      for (rel, slots) in &aliased {
        let Some(link_entries) = links.get(rel.as_str()) else {
          continue;
        };

        // The _embedded value of a relation is an array positionally
        // aligned with the relation's link array; each slot holds either
        // one resource or a list of them.
        let slots: Vec<&Value> = match slots {
          Value::Array(items) => items.iter().collect(),
          single => vec![single],
        };

        for (position, link) in link_entries.iter().enumerate() {
          let Some(slot) = slots.get(position) else {
            continue;
          };
          let Route::Aggregate(embedded_aggregator) = self.adapter.aggregator(&link.href)
          else {
            continue;
          };

          let is_list = slot.is_array();
          let items: Vec<&Value> = match slot {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
          };

          let mut ids = Vec::new();
          for item in items {
            if item.get("code").and_then(Value::as_str) == Some(NO_ROUTE_CODE) {
              continue;
            }
            let (next, id) = self.index(
              store,
              &embedded_aggregator,
              item,
              IndexMeta {
                partial: true,
                ..meta
              },
            );
            store = next;
            ids.push(id);
          }

          let embed_name = self.adapter.embed_link_as(&LinkRef {
            name: rel,
            href: &link.href,
          });
          if is_list {
            embedded.insert(embed_name, EmbeddedRef::Many(ids));
          } else if let Some(id) = ids.first() {
            embedded.insert(embed_name, EmbeddedRef::One(*id));
          }
          // a scalar embed whose only item was dropped is omitted
        }
      }
    }

    let local_id = existing.unwrap_or_else(|| store.next_local_id());

    // Merge precedence: prior fields, overlaid by the new payload,
    // overlaid by the pass meta.
    let mut fields = prior
      .as_ref()
      .map(|record| record.fields.clone())
      .unwrap_or_default();
    for (key, value) in &obj {
      if key == "_links" || key == "_embedded" {
        continue;
      }
      fields.insert(key.clone(), value.clone());
    }

    // A payload without _links keeps the prior record's relations.
    let links = if raw_links.is_empty() {
      prior
        .as_ref()
        .map(|record| record.links.clone())
        .unwrap_or_default()
    } else {
      links
    };

    // A partial pass can never downgrade an already-complete record.
    let complete = prior.as_ref().map(|r| r.complete).unwrap_or(false) || !meta.partial;

    let record = ResourceRecord {
      fields,
      links,
      embedded,
      last_cache_update: meta.last_cache_update,
      complete,
    };
    let record = self.adapter.transform_resource(record);
    let record = match &self.settings.before_indexing {
      Some(hook) => hook(record),
      None => record,
    };

    store.put_resource(local_id, record);
    for key in &keys {
      if let Some(value) = obj.get(key).and_then(index_value) {
        store.put_index_entry(aggregator, key, value, local_id);
      }
    }

    (store, local_id)
  }
}
