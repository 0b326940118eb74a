//! Rebuilding linked object graphs from normalized records.
//!
//! Denormalization walks a record's embedded references and substitutes
//! the referenced records, recursively. Each call carries a memo table:
//! a resource is materialized at most once per call, so shared references
//! resolve to the same allocation and cyclic graphs terminate instead of
//! recursing forever.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use crate::store::{EmbeddedRef, Link, LocalId, Store};

static NO_EMBEDS: BTreeMap<String, EmbeddedView> = BTreeMap::new();

/// A fully linked view of one resource.
///
/// The embedded map is written exactly once, at the end of the node's own
/// denormalization; nodes reached through a cycle observe it filled in by
/// the time the top-level call returns.
#[derive(Debug)]
pub struct Denormalized {
  local_id: LocalId,
  fields: Map<String, Value>,
  links: BTreeMap<String, Vec<Link>>,
  embedded: OnceLock<BTreeMap<String, EmbeddedView>>,
}

/// Materialized embedded reference(s) under one embed name.
#[derive(Debug, Clone)]
pub enum EmbeddedView {
  One(Arc<Denormalized>),
  Many(Vec<Arc<Denormalized>>),
}

impl Denormalized {
  /// The record's process-local identity tag.
  pub fn local_id(&self) -> LocalId {
    self.local_id
  }

  pub fn fields(&self) -> &Map<String, Value> {
    &self.fields
  }

  pub fn field(&self, name: &str) -> Option<&Value> {
    self.fields.get(name)
  }

  pub fn links(&self) -> &BTreeMap<String, Vec<Link>> {
    &self.links
  }

  pub fn embedded(&self) -> &BTreeMap<String, EmbeddedView> {
    self.embedded.get().unwrap_or(&NO_EMBEDS)
  }

  pub fn embed(&self, name: &str) -> Option<&EmbeddedView> {
    self.embedded().get(name)
  }
}

/// Memo table for one denormalization pass. Reusing one memo across
/// several roots makes their shared references pointer-identical too.
pub type Memo = HashMap<LocalId, Arc<Denormalized>>;

/// Denormalize `id` out of `store`. Returns `None` when the identifier
/// has no record.
pub fn denormalize(store: &Store, id: LocalId, memo: &mut Memo) -> Option<Arc<Denormalized>> {
  if let Some(hit) = memo.get(&id) {
    return Some(hit.clone());
  }

  let record = store.resource(id)?;
  let node = Arc::new(Denormalized {
    local_id: id,
    fields: record.fields.clone(),
    links: record.links.clone(),
    embedded: OnceLock::new(),
  });
  // entered before recursing, so a cycle lands back on this node
  memo.insert(id, node.clone());

  let mut views = BTreeMap::new();
  for (name, reference) in &record.embedded {
    match reference {
      EmbeddedRef::One(child) => {
        if let Some(view) = denormalize(store, *child, memo) {
          views.insert(name.clone(), EmbeddedView::One(view));
        }
      }
      EmbeddedRef::Many(children) => {
        let resolved = children
          .iter()
          .filter_map(|child| denormalize(store, *child, memo))
          .collect();
        views.insert(name.clone(), EmbeddedView::Many(resolved));
      }
    }
  }
  let _ = node.embedded.set(views);

  Some(node)
}
