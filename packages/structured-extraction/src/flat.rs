//! Dotted-path flattening of nested JSON values.
//!
//! Model output is merged key-by-key, so nested values travel as
//! [`FlatMap`]s keyed by paths like `contacts.0.email`.
//!
//! ```rust,ignore
//! use serde_json::json;
//! use structured_extraction::flat::{flatten, unflatten};
//!
//! let flat = flatten(&json!({"a": {"b": [1, 2]}}));
//! assert_eq!(flat["a.b.1"], json!(2));
//! assert_eq!(unflatten(&flat), json!({"a": {"b": [1, 2]}}));
//! ```
//!
//! # Key conflicts
//!
//! When a path is first written as a leaf and later used as a prefix of a
//! longer path (or the other way around), the later write replaces the
//! earlier node outright. Nothing is merged and no error is raised.
//!
//! # Round-trip limits
//!
//! `unflatten(&flatten(v)) == v` holds for values whose object keys are
//! non-empty and free of `.`. An empty key joins to nothing, so
//! `{"": {"x": 1}}` flattens like `{"x": 1}` and `{"": 1}` reads back as the
//! scalar root `1`. A root-level empty array flattens to an empty map, which
//! reads back as `{}`.

use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Mapping from dotted path to leaf value, in insertion order.
pub type FlatMap = IndexMap<String, Value>;

/// Path separator.
pub const SEPARATOR: char = '.';

/// Flatten a nested value into a [`FlatMap`].
///
/// Empty objects and arrays below the root are kept as explicit `{}` / `[]`
/// leaves so the container shape survives. A scalar root flattens to a
/// single entry under the empty key.
pub fn flatten(value: &Value) -> FlatMap {
    let mut out = FlatMap::new();
    match value {
        Value::Object(_) | Value::Array(_) => flatten_into(value, "", &mut out),
        scalar => {
            out.insert(String::new(), scalar.clone());
        }
    }
    out
}

/// Flatten `value` into `out`, prefixing every key with `prefix`.
pub fn flatten_into(value: &Value, prefix: &str, out: &mut FlatMap) {
    match value {
        Value::Object(map) => {
            if map.is_empty() && !prefix.is_empty() {
                out.insert(prefix.to_string(), Value::Object(Map::new()));
            }
            for (key, child) in map {
                flatten_into(child, &join(prefix, key), out);
            }
        }
        Value::Array(items) => {
            if items.is_empty() && !prefix.is_empty() {
                out.insert(prefix.to_string(), Value::Array(Vec::new()));
            }
            for (index, child) in items.iter().enumerate() {
                flatten_into(child, &join(prefix, &index.to_string()), out);
            }
        }
        scalar => {
            out.insert(prefix.to_string(), scalar.clone());
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}{SEPARATOR}{key}")
    }
}

/// Intermediate tree built from flat keys before sequences are recovered.
#[derive(Debug)]
enum Node {
    Leaf(Value),
    Branch(IndexMap<String, Node>),
}

impl Node {
    fn insert(&mut self, segments: &[&str], value: &Value) {
        let Some((head, rest)) = segments.split_first() else {
            *self = Node::Leaf(value.clone());
            return;
        };

        if !matches!(self, Node::Branch(_)) {
            // Last write wins: a leaf used as a prefix becomes a branch.
            *self = Node::Branch(IndexMap::new());
        }
        if let Node::Branch(children) = self {
            let child = children
                .entry((*head).to_string())
                .or_insert_with(|| Node::Branch(IndexMap::new()));
            if rest.is_empty() {
                *child = Node::Leaf(value.clone());
            } else {
                child.insert(rest, value);
            }
        }
    }

    fn into_value(self) -> Value {
        match self {
            Node::Leaf(value) => value,
            Node::Branch(children) => {
                if let Some(len) = sequence_len(&children) {
                    let mut slots: Vec<Option<Value>> = vec![None; len];
                    for (key, child) in children {
                        if let Some(slot) = index_segment(&key).and_then(|i| slots.get_mut(i)) {
                            *slot = Some(child.into_value());
                        }
                    }
                    Value::Array(slots.into_iter().map(|v| v.unwrap_or(Value::Null)).collect())
                } else {
                    Value::Object(
                        children
                            .into_iter()
                            .map(|(key, child)| (key, child.into_value()))
                            .collect(),
                    )
                }
            }
        }
    }
}

/// Parse a canonical non-negative integer segment (`"0"`, `"17"`, not `"01"`).
pub fn index_segment(segment: &str) -> Option<usize> {
    let index: usize = segment.parse().ok()?;
    (index.to_string() == segment).then_some(index)
}

/// Returns the sequence length if the keys are exactly `0..n`.
fn sequence_len(children: &IndexMap<String, Node>) -> Option<usize> {
    if children.is_empty() {
        return None;
    }
    let len = children.len();
    let mut seen = vec![false; len];
    for key in children.keys() {
        let index = index_segment(key)?;
        let slot = seen.get_mut(index)?;
        if *slot {
            return None;
        }
        *slot = true;
    }
    Some(len)
}

/// Rebuild a nested value from a [`FlatMap`].
///
/// Sub-mappings whose keys are exactly `0..n` become arrays. Mappings with
/// gaps in their integer keys stay objects with the indices as string keys.
/// An empty map yields `{}`.
pub fn unflatten(flat: &FlatMap) -> Value {
    if flat.len() == 1 {
        if let Some(value) = flat.get("") {
            return value.clone();
        }
    }

    let mut root = Node::Branch(IndexMap::new());
    for (key, value) in flat {
        let segments: Vec<&str> = key.split(SEPARATOR).collect();
        root.insert(&segments, value);
    }

    match root {
        Node::Branch(children) if children.is_empty() => Value::Object(Map::new()),
        root => root.into_value(),
    }
}

/// Flatten an already-nested value, then rebuild it. Handy for normalizing
/// objects that use integer keys as sequence indices.
pub fn normalize(value: &Value) -> Value {
    unflatten(&flatten(value))
}
