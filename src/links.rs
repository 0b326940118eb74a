//! Curie alias resolution for `_links` and `_embedded` maps.
//!
//! HAL resources may declare compact relation names (`v:term`) together
//! with a `curies` table mapping each prefix onto an href template with a
//! `{rel}` placeholder. Alias resolution is an explicit string-rewrite
//! pass over the map keys, kept separate from merging so it stays
//! independently testable.

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::store::Link;

/// One entry of a resource's `curies` table.
#[derive(Debug, Clone, Deserialize)]
pub struct Curie {
  pub name: String,
  pub href: String,
}

/// Extract the curie table from a raw `_links` map.
pub fn curie_table(links: &Map<String, Value>) -> Vec<Curie> {
  links
    .get("curies")
    .and_then(|value| serde_json::from_value(value.clone()).ok())
    .unwrap_or_default()
}

/// Rewrite curie-prefixed keys into fully-qualified relation names.
///
/// Every key matching `^{curie.name}:` becomes the curie's href template
/// with `{rel}` substituted by the key's suffix; other keys pass through
/// unchanged. Running this on already-resolved input is a no-op since no
/// key remains in prefixed form.
pub fn resolve_aliases(map: &Map<String, Value>, curies: &[Curie]) -> Map<String, Value> {
  if curies.is_empty() {
    return map.clone();
  }

  let mut out = Map::new();
  'keys: for (key, value) in map {
    for curie in curies {
      let alias = match Regex::new(&format!("^{}:", regex::escape(&curie.name))) {
        Ok(re) => re,
        Err(_) => continue,
      };
      if alias.is_match(key) {
        let rel = alias.replace(key, "");
        out.insert(curie.href.replace("{rel}", &rel), value.clone());
        continue 'keys;
      }
    }
    out.insert(key.clone(), value.clone());
  }
  out
}

/// Shape an alias-resolved `_links` map into typed link lists.
///
/// The `curies` entry is dropped here; single link objects are promoted
/// to one-element lists; entries that are not link-shaped are skipped.
pub fn parse_link_map(map: &Map<String, Value>) -> BTreeMap<String, Vec<Link>> {
  let mut links = BTreeMap::new();
  for (rel, value) in map {
    if rel == "curies" {
      continue;
    }

    let entries = match value {
      Value::Array(items) => items.clone(),
      single => vec![single.clone()],
    };
    let parsed: Vec<Link> = entries
      .into_iter()
      .filter_map(|entry| serde_json::from_value(entry).ok())
      .collect();
    if !parsed.is_empty() {
      links.insert(rel.clone(), parsed);
    }
  }
  links
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn map(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
  }

  fn vendor_curies() -> Vec<Curie> {
    vec![Curie {
      name: "v".into(),
      href: "https://rels.example.com/{rel}".into(),
    }]
  }

  #[test]
  fn rewrites_prefixed_keys() {
    let resolved = resolve_aliases(
      &map(json!({
        "self": [{ "href": "/posts/1" }],
        "v:term": [{ "href": "/v2/categories?post=1" }],
      })),
      &vendor_curies(),
    );

    assert!(resolved.contains_key("self"));
    assert!(resolved.contains_key("https://rels.example.com/term"));
    assert!(!resolved.contains_key("v:term"));
  }

  #[test]
  fn resolution_is_idempotent() {
    let input = map(json!({
      "v:featuredmedia": [{ "href": "/v2/media/9" }],
      "author": [{ "href": "/v2/users/1" }],
    }));

    let once = resolve_aliases(&input, &vendor_curies());
    let twice = resolve_aliases(&once, &vendor_curies());
    assert_eq!(once, twice);
  }

  #[test]
  fn unknown_prefixes_pass_through() {
    let resolved = resolve_aliases(
      &map(json!({ "acme:thing": [{ "href": "/things/1" }] })),
      &vendor_curies(),
    );
    assert!(resolved.contains_key("acme:thing"));
  }

  #[test]
  fn curie_table_reads_links_entry() {
    let links = map(json!({
      "curies": [{ "name": "v", "href": "https://rels.example.com/{rel}", "templated": true }],
      "self": [{ "href": "/posts/1" }],
    }));
    let curies = curie_table(&links);
    assert_eq!(curies.len(), 1);
    assert_eq!(curies[0].name, "v");
  }

  #[test]
  fn parse_link_map_drops_curies_and_promotes_scalars() {
    let parsed = parse_link_map(&map(json!({
      "curies": [{ "name": "v", "href": "https://rels.example.com/{rel}" }],
      "self": { "href": "/posts/1" },
      "author": [{ "href": "/users/1", "embeddable": true }],
    })));

    assert!(!parsed.contains_key("curies"));
    assert_eq!(parsed["self"].len(), 1);
    assert!(parsed["author"][0].embeddable);
  }
}
