//! Auxiliary "reasoning" and "source quote" fields.
//!
//! Fields marked with `X-ReasoningPrompt` get a `reasoning___<field>` string
//! sibling placed right before them; leaves marked `X-SourceQuote: true` get
//! a `source___<field>` sibling right after them. The model fills these in
//! while generating, and [`filter_auxiliary`] strips them again before data
//! reaches the end consumer.
//!
//! A property typed as `anyOf`/`oneOf` (an optional record, say) takes its
//! reasoning prompt from the first member carrying one when the property
//! itself has none. The `reasoning___root` and `reasoning___item` slots
//! reach into a union only when the union node is not an object itself and
//! exactly one member is, so each slot is filled at most once.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

use crate::schema::node::{
    JsonType, NodeId, SchemaDocument, SchemaKind, SchemaNode, X_SOURCE_QUOTE,
};

pub const REASONING_PREFIX: &str = "reasoning___";
pub const SOURCE_PREFIX: &str = "source___";

/// Reasoning slot name for the document root.
pub const ROOT_SLOT: &str = "root";
/// Reasoning slot name for array item objects.
pub const ITEM_SLOT: &str = "item";

pub fn reasoning_field(name: &str) -> String {
    format!("{REASONING_PREFIX}{name}")
}

pub fn source_field(name: &str) -> String {
    format!("{SOURCE_PREFIX}{name}")
}

/// Whether a property name belongs to an injected auxiliary field.
pub fn is_auxiliary(name: &str) -> bool {
    name.starts_with(REASONING_PREFIX) || name.starts_with(SOURCE_PREFIX)
}

/// Insert reasoning and source-quote fields throughout the document.
///
/// Running this twice is harmless: a field whose auxiliary sibling already
/// exists is left alone. `$ref` nodes are not followed and the definitions
/// table is not touched.
pub fn augment(doc: &mut SchemaDocument) {
    let root = doc.root();
    visit(doc, root, Some(ROOT_SLOT));
}

fn describes_object(node: &SchemaNode) -> bool {
    let kind = node.kind();
    kind == SchemaKind::Object
        || (kind == SchemaKind::TypeUnion && node.types.contains(&JsonType::Object))
}

fn visit(doc: &mut SchemaDocument, id: NodeId, slot: Option<&str>) {
    let node = doc.node(id);
    let is_object = describes_object(node);
    let items = node.items;
    let members: Vec<NodeId> = node.any_of.iter().chain(&node.one_of).copied().collect();
    let object_members = members.iter().filter(|m| describes_object(doc.node(**m))).count();
    let member_slot = if is_object || object_members != 1 { None } else { slot };

    if is_object {
        if let Some(slot) = slot {
            insert_self_reasoning(doc, id, slot);
        }
        augment_properties(doc, id);
        let children: Vec<NodeId> = doc.node(id).properties.values().copied().collect();
        for child in children {
            visit(doc, child, None);
        }
    }

    if let Some(items) = items {
        // Leaf items have no named sibling slot; only the marker goes.
        if doc.node(items).is_leaf() {
            doc.node_mut(items).extensions.shift_remove(X_SOURCE_QUOTE);
        }
        visit(doc, items, Some(ITEM_SLOT));
    }

    for member in members {
        visit(doc, member, member_slot);
    }
}

/// `reasoning___root` / `reasoning___item`: first property, always required.
fn insert_self_reasoning(doc: &mut SchemaDocument, id: NodeId, slot: &str) {
    let Some(prompt) = doc.node(id).reasoning_prompt().map(str::to_string) else {
        return;
    };
    let name = reasoning_field(slot);
    if doc.node(id).properties.contains_key(&name) {
        return;
    }

    let field = doc.push(string_field(prompt));
    let node = doc.node_mut(id);
    let mut properties = IndexMap::with_capacity(node.properties.len() + 1);
    properties.insert(name.clone(), field);
    properties.extend(node.properties.drain(..));
    node.properties = properties;
    node.required.insert(0, name.clone());
    debug!(field = %name, "inserted reasoning field");
}

fn augment_properties(doc: &mut SchemaDocument, id: NodeId) {
    let original: Vec<(String, NodeId)> = doc
        .node(id)
        .properties
        .iter()
        .map(|(name, child)| (name.clone(), *child))
        .collect();
    let existing: Vec<String> = original.iter().map(|(name, _)| name.clone()).collect();

    let mut properties = IndexMap::with_capacity(original.len());
    let mut required = doc.node(id).required.clone();

    for (name, child) in original {
        if is_auxiliary(&name) {
            properties.insert(name, child);
            continue;
        }
        let is_required = doc.node(id).is_required(&name);

        if let Some(prompt) = field_reasoning_prompt(doc, child) {
            let aux = reasoning_field(&name);
            if !existing.contains(&aux) {
                let field = doc.push(string_field(prompt));
                properties.insert(aux.clone(), field);
                if is_required {
                    insert_before(&mut required, &name, aux.clone());
                }
                debug!(field = %aux, "inserted reasoning field");
            }
        }

        properties.insert(name.clone(), child);

        let wants_quote = doc.node(child).wants_source_quote();
        let had_marker = doc
            .node_mut(child)
            .extensions
            .shift_remove(X_SOURCE_QUOTE)
            .is_some();
        if had_marker && wants_quote {
            let aux = source_field(&name);
            if !doc.node(child).is_leaf() {
                debug!(field = %name, "source quote requested on a non-leaf field; ignoring");
            } else if !existing.contains(&aux) {
                let description = format!(
                    "Verbatim quote from the source document that supports the value of `{name}`."
                );
                let field = doc.push(string_field(description));
                properties.insert(aux.clone(), field);
                if is_required {
                    insert_after(&mut required, &name, aux.clone());
                }
                debug!(field = %aux, "inserted source quote field");
            }
        }
    }

    let node = doc.node_mut(id);
    node.properties = properties;
    node.required = required;
}

/// The field's own prompt, else the first union member's.
fn field_reasoning_prompt(doc: &SchemaDocument, id: NodeId) -> Option<String> {
    let node = doc.node(id);
    node.reasoning_prompt()
        .or_else(|| {
            node.any_of
                .iter()
                .chain(&node.one_of)
                .find_map(|member| doc.node(*member).reasoning_prompt())
        })
        .map(str::to_string)
}

fn string_field(description: String) -> SchemaNode {
    SchemaNode {
        description: Some(description),
        ..SchemaNode::with_type(JsonType::String)
    }
}

fn insert_before(required: &mut Vec<String>, anchor: &str, name: String) {
    let at = required.iter().position(|r| r == anchor).unwrap_or(required.len());
    required.insert(at, name);
}

fn insert_after(required: &mut Vec<String>, anchor: &str, name: String) {
    let at = required
        .iter()
        .position(|r| r == anchor)
        .map_or(required.len(), |i| i + 1);
    required.insert(at, name);
}

/// Remove every `reasoning___*` / `source___*` key, at any depth.
pub fn filter_auxiliary(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !is_auxiliary(key))
                .map(|(key, child)| (key.clone(), filter_auxiliary(child)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(filter_auxiliary).collect()),
        scalar => scalar.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn augmented(value: Value) -> Value {
        let mut doc = SchemaDocument::from_value(&value).unwrap();
        augment(&mut doc);
        doc.to_value()
    }

    fn property_names(schema: &Value) -> Vec<String> {
        schema["properties"]
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect()
    }

    #[test]
    fn test_reasoning_inserted_before_optional_field() {
        let schema = augmented(json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer", "X-ReasoningPrompt": "How did you infer the age?"}
            },
            "required": ["name"]
        }));

        assert_eq!(property_names(&schema), vec!["name", "reasoning___age", "age"]);
        assert_eq!(
            schema["properties"]["reasoning___age"],
            json!({"type": "string", "description": "How did you infer the age?"})
        );
        assert_eq!(schema["required"], json!(["name"]));
    }

    #[test]
    fn test_reasoning_of_required_field_is_required() {
        let schema = augmented(json!({
            "type": "object",
            "properties": {
                "total": {"type": "number", "X-ReasoningPrompt": "show the sum"}
            },
            "required": ["total"]
        }));
        assert_eq!(schema["required"], json!(["reasoning___total", "total"]));
    }

    #[test]
    fn test_source_quote_inserted_after_leaf_and_marker_stripped() {
        let schema = augmented(json!({
            "type": "object",
            "properties": {
                "invoice_no": {"type": "string", "X-SourceQuote": true},
                "date": {"type": "string"}
            },
            "required": ["invoice_no"]
        }));

        assert_eq!(property_names(&schema), vec!["invoice_no", "source___invoice_no", "date"]);
        assert!(schema["properties"]["invoice_no"].get("X-SourceQuote").is_none());
        assert_eq!(schema["properties"]["source___invoice_no"]["type"], json!("string"));
        assert_eq!(schema["required"], json!(["invoice_no", "source___invoice_no"]));
    }

    #[test]
    fn test_root_and_item_reasoning_slots() {
        let schema = augmented(json!({
            "type": "object",
            "X-ReasoningPrompt": "overall reasoning",
            "properties": {
                "lines": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "X-ReasoningPrompt": "per line",
                        "properties": {"amount": {"type": "number"}}
                    }
                }
            }
        }));

        assert_eq!(property_names(&schema), vec!["reasoning___root", "lines"]);
        assert_eq!(schema["required"], json!(["reasoning___root"]));
        let item = &schema["properties"]["lines"]["items"];
        assert_eq!(property_names(item), vec!["reasoning___item", "amount"]);
        assert_eq!(item["required"], json!(["reasoning___item"]));
    }

    #[test]
    fn test_nested_objects_are_augmented() {
        let schema = augmented(json!({
            "type": "object",
            "properties": {
                "vendor": {
                    "type": "object",
                    "properties": {"vat": {"type": "string", "X-SourceQuote": true}}
                }
            }
        }));
        assert_eq!(
            property_names(&schema["properties"]["vendor"]),
            vec!["vat", "source___vat"]
        );
    }

    #[test]
    fn test_union_member_prompt_reaches_property_sibling() {
        let schema = augmented(json!({
            "type": "object",
            "properties": {
                "contact": {
                    "anyOf": [
                        {
                            "type": "object",
                            "X-ReasoningPrompt": "who is the contact?",
                            "properties": {"name": {"type": "string"}}
                        },
                        {"type": "null"}
                    ]
                }
            },
            "required": ["contact"]
        }));

        assert_eq!(property_names(&schema), vec!["reasoning___contact", "contact"]);
        assert_eq!(
            schema["properties"]["reasoning___contact"]["description"],
            json!("who is the contact?")
        );
        assert_eq!(schema["required"], json!(["reasoning___contact", "contact"]));
        let member = &schema["properties"]["contact"]["anyOf"][0];
        assert_eq!(property_names(member), vec!["name"]);
    }

    #[test]
    fn test_slot_reasoning_is_filled_once_per_union() {
        // Optional item record: the one object member takes the slot.
        let schema = augmented(json!({
            "type": "object",
            "properties": {
                "lines": {
                    "type": "array",
                    "items": {"anyOf": [
                        {"type": "object", "X-ReasoningPrompt": "per line", "properties": {"a": {"type": "number"}}},
                        {"type": "null"}
                    ]}
                }
            }
        }));
        let member = &schema["properties"]["lines"]["items"]["anyOf"][0];
        assert_eq!(property_names(member), vec!["reasoning___item", "a"]);

        // Several object members: no member takes the root slot.
        let schema = augmented(json!({
            "anyOf": [
                {"type": "object", "X-ReasoningPrompt": "as a person", "properties": {"name": {"type": "string"}}},
                {"type": "object", "X-ReasoningPrompt": "as a company", "properties": {"org": {"type": "string"}}}
            ]
        }));
        assert_eq!(property_names(&schema["anyOf"][0]), vec!["name"]);
        assert_eq!(property_names(&schema["anyOf"][1]), vec!["org"]);
    }

    #[test]
    fn test_augment_is_idempotent() {
        let input = json!({
            "type": "object",
            "X-ReasoningPrompt": "why",
            "properties": {
                "a": {"type": "string", "X-ReasoningPrompt": "a?", "X-SourceQuote": true}
            },
            "required": ["a"]
        });

        let mut doc = SchemaDocument::from_value(&input).unwrap();
        augment(&mut doc);
        let once = doc.to_value();
        augment(&mut doc);
        assert_eq!(doc.to_value(), once);

        let reparsed = augmented(once.clone());
        assert_eq!(reparsed, once);
        assert_eq!(
            property_names(&once),
            vec!["reasoning___root", "reasoning___a", "a", "source___a"]
        );
    }

    #[test]
    fn test_references_are_not_followed() {
        let schema = augmented(json!({
            "type": "object",
            "properties": {"next": {"$ref": "#/definitions/Node"}},
            "definitions": {
                "Node": {
                    "type": "object",
                    "properties": {
                        "label": {"type": "string", "X-SourceQuote": true},
                        "next": {"$ref": "#/definitions/Node"}
                    }
                }
            }
        }));
        assert_eq!(
            property_names(&schema["definitions"]["Node"]),
            vec!["label", "next"]
        );
    }

    #[test]
    fn test_filter_auxiliary_recurses() {
        let data = json!({
            "reasoning___root": "because",
            "name": "Al",
            "lines": [{"reasoning___item": "x", "amount": 3, "source___amount": "3.00"}],
            "nested": {"source___k": "q", "k": 1}
        });
        assert_eq!(
            filter_auxiliary(&data),
            json!({"name": "Al", "lines": [{"amount": 3}], "nested": {"k": 1}})
        );
    }
}
