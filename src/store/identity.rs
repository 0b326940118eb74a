//! Identity resolution: matching raw candidate fields onto existing records.

use serde_json::{Map, Value};

use super::{LocalId, Store};

/// Canonical index form of a field value.
///
/// Strings index as-is; everything else by its compact JSON rendering.
/// Path and query parameters arrive as strings while payload ids are
/// usually numbers, so `5` and `"5"` must land on the same entry.
pub fn index_value(value: &Value) -> Option<String> {
  match value {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    other => Some(other.to_string()),
  }
}

/// Resolve the local id of `candidate` within `aggregator`.
///
/// `keys` is the ordered candidate key list (`id` first, then configured
/// alternates). The first key whose value is present on the candidate and
/// in the identity index wins; resources are never matched across
/// aggregators.
pub fn resolve_local_id(
  store: &Store,
  aggregator: &str,
  keys: &[String],
  candidate: &Map<String, Value>,
) -> Option<LocalId> {
  keys.iter().find_map(|key| {
    let value = index_value(candidate.get(key)?)?;
    store.index_entry(aggregator, key, &value)
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  fn candidate(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
  }

  #[test]
  fn first_matching_key_wins() {
    let mut store = Store::new();
    store.put_index_entry("posts", "id", "1".into(), LocalId(0));
    store.put_index_entry("posts", "slug", "hello-world".into(), LocalId(3));

    // id is present and indexed, so slug is never consulted
    let found = resolve_local_id(
      &store,
      "posts",
      &keys(&["id", "slug"]),
      &candidate(json!({ "id": 1, "slug": "hello-world" })),
    );
    assert_eq!(found, Some(LocalId(0)));
  }

  #[test]
  fn falls_through_to_alternate_keys() {
    let mut store = Store::new();
    store.put_index_entry("posts", "slug", "hello-world".into(), LocalId(3));

    let found = resolve_local_id(
      &store,
      "posts",
      &keys(&["id", "slug"]),
      &candidate(json!({ "slug": "hello-world" })),
    );
    assert_eq!(found, Some(LocalId(3)));
  }

  #[test]
  fn numbers_and_strings_share_an_entry() {
    let mut store = Store::new();
    store.put_index_entry("posts", "id", "5".into(), LocalId(2));

    let by_number = resolve_local_id(
      &store,
      "posts",
      &keys(&["id"]),
      &candidate(json!({ "id": 5 })),
    );
    let by_string = resolve_local_id(
      &store,
      "posts",
      &keys(&["id"]),
      &candidate(json!({ "id": "5" })),
    );
    assert_eq!(by_number, Some(LocalId(2)));
    assert_eq!(by_string, Some(LocalId(2)));
  }

  #[test]
  fn aggregators_are_disjoint() {
    let mut store = Store::new();
    store.put_index_entry("posts", "id", "1".into(), LocalId(0));

    let found = resolve_local_id(
      &store,
      "users",
      &keys(&["id"]),
      &candidate(json!({ "id": 1 })),
    );
    assert_eq!(found, None);
  }

  #[test]
  fn unknown_identity_is_not_found() {
    let store = Store::new();
    let found = resolve_local_id(
      &store,
      "posts",
      &keys(&["id", "slug"]),
      &candidate(json!({ "id": 9 })),
    );
    assert_eq!(found, None);
  }
}
