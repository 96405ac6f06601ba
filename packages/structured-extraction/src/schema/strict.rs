//! Strict schema compilation for structured-output model APIs.
//!
//! Constrained decoding endpoints accept a narrow JSON Schema dialect:
//! 1. `additionalProperties: false` on every object
//! 2. every property listed in `required`
//! 3. no `integer` (use `number`)
//! 4. string-only `enum` values
//! 5. no descriptive-only keywords (`default`, `format`, `X-*` extensions)
//!
//! The input is expected to be expanded already. References survive only
//! when their target definition is part of a cycle, in which case both the
//! reference and the cyclic definitions are passed through untouched.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::StrictOptions;
use crate::error::{SchemaError, SchemaResult};
use crate::schema::node::{definition_name, types_to_value, JsonType, NodeId, SchemaDocument};
use crate::schema::normalize::cyclic_definitions;

/// Keywords the compiler owns or drops regardless of options.
const RESERVED_KEYWORDS: &[&str] = &["$schema", "additionalProperties"];

/// Compile `doc` into the strict dialect.
pub fn compile_strict(doc: &SchemaDocument, options: &StrictOptions) -> SchemaResult<Value> {
    let mut compiler = StrictCompiler {
        doc,
        options,
        tolerated: cyclic_definitions(doc),
        objects: 0,
    };
    compiler.compile_document()
}

struct StrictCompiler<'a> {
    doc: &'a SchemaDocument,
    options: &'a StrictOptions,
    /// Definitions that lie on or reach a cycle
    tolerated: HashSet<String>,
    objects: usize,
}

impl StrictCompiler<'_> {
    fn compile_document(&mut self) -> SchemaResult<Value> {
        let doc = self.doc;
        let mut root = match self.compile_node(doc.root())? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        if !doc.definitions.is_empty() {
            let mut table = Map::new();
            for (name, id) in &doc.definitions {
                let compiled = if self.tolerated.contains(name) {
                    doc.node_to_value(*id)
                } else {
                    self.compile_node(*id)?
                };
                table.insert(name.clone(), compiled);
            }
            root.insert(doc.definitions_key.clone(), Value::Object(table));
        }

        debug!(
            objects = self.objects,
            tolerated_cycles = self.tolerated.len(),
            "compiled strict schema"
        );
        Ok(Value::Object(root))
    }

    fn compile_node(&mut self, id: NodeId) -> SchemaResult<Value> {
        let doc = self.doc;
        let node = doc.node(id);
        let mut map = Map::new();

        if let Some(reference) = &node.reference {
            doc.resolve(reference)?;
            let name = definition_name(reference)?;
            if !self.tolerated.contains(name) {
                return Err(SchemaError::UnexpandedReference {
                    reference: reference.clone(),
                });
            }
            map.insert("$ref".into(), Value::String(reference.clone()));
            return Ok(Value::Object(map));
        }

        if let Some(values) = &node.enum_values {
            map.insert("type".into(), Value::String("string".into()));
            map.insert("enum".into(), Value::Array(stringify_enum(values)));
        } else if !node.types.is_empty() {
            map.insert(
                "type".into(),
                types_to_value(&narrow_types(&node.types), node.type_is_list),
            );
        }

        if let Some(description) = &node.description {
            map.insert("description".into(), Value::String(description.clone()));
        }

        let is_object = node.types.contains(&JsonType::Object)
            || (node.types.is_empty() && !node.properties.is_empty());
        if is_object && node.enum_values.is_none() {
            self.objects += 1;
            let mut properties = Map::new();
            for (name, child) in &node.properties {
                properties.insert(name.clone(), self.compile_node(*child)?);
            }
            let required: Vec<Value> = properties.keys().cloned().map(Value::String).collect();
            map.insert("properties".into(), Value::Object(properties));
            map.insert("required".into(), Value::Array(required));
            map.insert("additionalProperties".into(), Value::Bool(false));
        }

        if let Some(items) = node.items {
            map.insert("items".into(), self.compile_node(items)?);
        }

        for (key, members) in [("anyOf", &node.any_of), ("oneOf", &node.one_of), ("allOf", &node.all_of)] {
            if members.is_empty() {
                continue;
            }
            let compiled = members
                .iter()
                .map(|m| self.compile_node(*m))
                .collect::<SchemaResult<Vec<_>>>()?;
            map.insert(key.into(), Value::Array(compiled));
        }

        for (key, value) in &node.keywords {
            if RESERVED_KEYWORDS.contains(&key.as_str()) || self.options.strips(key) {
                continue;
            }
            map.insert(key.clone(), value.clone());
        }
        if !self.options.strip_extensions {
            for (key, value) in &node.extensions {
                map.insert(key.clone(), value.clone());
            }
        }

        Ok(Value::Object(map))
    }
}

/// `integer` becomes `number`; duplicates collapse.
fn narrow_types(types: &[JsonType]) -> Vec<JsonType> {
    let mut out: Vec<JsonType> = Vec::with_capacity(types.len());
    for ty in types {
        let ty = match ty {
            JsonType::Integer => JsonType::Number,
            other => *other,
        };
        if !out.contains(&ty) {
            out.push(ty);
        }
    }
    out
}

fn stringify_enum(values: &[Value]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(values.len());
    for value in values {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let text = Value::String(text);
        if !out.contains(&text) {
            out.push(text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::normalize::expand;
    use serde_json::json;

    fn strict(value: Value) -> SchemaResult<Value> {
        let doc = SchemaDocument::from_value(&value).unwrap();
        compile_strict(&expand(&doc)?, &StrictOptions::default())
    }

    /// Every object must list all its properties as required and forbid extras.
    fn assert_strict_objects(value: &Value) {
        match value {
            Value::Object(map) => {
                if let Some(Value::Object(props)) = map.get("properties") {
                    let required: Vec<&str> = map["required"]
                        .as_array()
                        .unwrap()
                        .iter()
                        .filter_map(Value::as_str)
                        .collect();
                    let names: Vec<&str> = props.keys().map(String::as_str).collect();
                    assert_eq!(required, names);
                    assert_eq!(map["additionalProperties"], json!(false));
                }
                assert_ne!(map.get("type"), Some(&json!("integer")));
                if let Some(Value::Array(types)) = map.get("type") {
                    assert!(!types.contains(&json!("integer")));
                }
                for child in map.values() {
                    assert_strict_objects(child);
                }
            }
            Value::Array(items) => items.iter().for_each(assert_strict_objects),
            _ => {}
        }
    }

    #[test]
    fn test_objects_get_required_and_no_additional_properties() {
        let out = strict(json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "address": {
                    "type": "object",
                    "properties": {"zip": {"type": "integer"}, "city": {"type": "string"}},
                    "required": ["city"]
                },
                "scores": {"type": "array", "items": {"type": "integer"}}
            },
            "required": ["name"]
        }))
        .unwrap();

        assert_strict_objects(&out);
        assert_eq!(out["required"], json!(["name", "address", "scores"]));
        assert_eq!(out["properties"]["address"]["required"], json!(["zip", "city"]));
        assert_eq!(out["properties"]["scores"]["items"]["type"], json!("number"));
    }

    #[test]
    fn test_integer_in_type_union_becomes_number() {
        let out = strict(json!({
            "type": "object",
            "properties": {
                "a": {"type": ["integer", "null"]},
                "b": {"type": ["integer", "number"]},
                "c": {"anyOf": [{"type": "integer"}, {"type": "null"}]}
            }
        }))
        .unwrap();

        assert_eq!(out["properties"]["a"]["type"], json!(["number", "null"]));
        assert_eq!(out["properties"]["b"]["type"], json!(["number"]));
        assert_eq!(out["properties"]["c"]["anyOf"][0]["type"], json!("number"));
        assert_strict_objects(&out);
    }

    #[test]
    fn test_enum_values_are_stringified() {
        let out = strict(json!({
            "type": "object",
            "properties": {"level": {"type": "integer", "enum": [1, 2, "2", true]}}
        }))
        .unwrap();

        assert_eq!(
            out["properties"]["level"],
            json!({"type": "string", "enum": ["1", "2", "true"]})
        );
    }

    #[test]
    fn test_descriptive_keywords_and_extensions_stripped() {
        let out = strict(json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "title": "Invoice",
            "X-SystemPrompt": "You extract invoices.",
            "properties": {
                "date": {
                    "type": "string",
                    "format": "date",
                    "default": "1970-01-01",
                    "description": "issue date",
                    "X-FieldPrompt": "look near the header"
                }
            },
            "additionalProperties": true
        }))
        .unwrap();

        assert_eq!(
            out,
            json!({
                "type": "object",
                "title": "Invoice",
                "properties": {"date": {"type": "string", "description": "issue date"}},
                "required": ["date"],
                "additionalProperties": false
            })
        );
    }

    #[test]
    fn test_unexpanded_reference_is_rejected() {
        let doc = SchemaDocument::from_value(&json!({
            "type": "object",
            "properties": {"a": {"$ref": "#/definitions/A"}},
            "definitions": {"A": {"type": "string"}}
        }))
        .unwrap();

        let err = compile_strict(&doc, &StrictOptions::default()).unwrap_err();
        assert!(matches!(err, SchemaError::UnexpandedReference { .. }));
    }

    #[test]
    fn test_cyclic_reference_is_tolerated() {
        let doc = SchemaDocument::from_value(&json!({
            "type": "object",
            "properties": {"head": {"$ref": "#/definitions/Node"}},
            "definitions": {
                "Node": {
                    "type": "object",
                    "properties": {
                        "value": {"type": "integer"},
                        "next": {"$ref": "#/definitions/Node"}
                    }
                }
            }
        }))
        .unwrap();
        let doc = expand(&doc).unwrap();

        let out = compile_strict(&doc, &StrictOptions::default()).unwrap();
        assert_eq!(out["properties"]["head"], json!({"$ref": "#/definitions/Node"}));
        assert_eq!(out["required"], json!(["head"]));
        // cyclic definitions pass through untouched
        assert_eq!(
            out["definitions"]["Node"]["properties"]["value"]["type"],
            json!("integer")
        );
    }

    #[test]
    fn test_extensions_kept_when_configured() {
        let doc = SchemaDocument::from_value(&json!({
            "type": "object",
            "properties": {"a": {"type": "string", "X-FieldPrompt": "p", "format": "email"}}
        }))
        .unwrap();
        let options = StrictOptions {
            strip_keywords: vec![],
            strip_extensions: false,
        };

        let out = compile_strict(&doc, &options).unwrap();
        assert_eq!(out["properties"]["a"]["X-FieldPrompt"], json!("p"));
        assert_eq!(out["properties"]["a"]["format"], json!("email"));
    }
}
