//! Prompt text carried inside the schema.
//!
//! The root may carry `X-SystemPrompt` and any field may carry
//! `X-FieldPrompt`. The strict schema drops both, so they are collected here
//! for whoever assembles the model prompt. The text itself is opaque.

use indexmap::IndexMap;

use crate::flat::SEPARATOR;
use crate::schema::node::{NodeId, SchemaDocument, X_FIELD_PROMPT, X_SYSTEM_PROMPT};

/// Path segment used for array items.
pub const ITEMS_SEGMENT: &str = "*";

/// Prompts gathered from a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaPrompts {
    /// Root `X-SystemPrompt`
    pub system: Option<String>,
    /// `X-FieldPrompt` keyed by dotted field path (`lines.*.amount`)
    pub fields: IndexMap<String, String>,
}

impl SchemaPrompts {
    pub fn is_empty(&self) -> bool {
        self.system.is_none() && self.fields.is_empty()
    }
}

/// Collect the system prompt and every field prompt. References are not
/// followed.
pub fn collect_prompts(doc: &SchemaDocument) -> SchemaPrompts {
    let root = doc.root_node();
    let mut prompts = SchemaPrompts {
        system: root.extension_str(X_SYSTEM_PROMPT).map(str::to_string),
        fields: IndexMap::new(),
    };
    collect(doc, doc.root(), "", &mut prompts.fields);
    prompts
}

fn collect(doc: &SchemaDocument, id: NodeId, path: &str, out: &mut IndexMap<String, String>) {
    let node = doc.node(id);
    if !path.is_empty() {
        if let Some(prompt) = node.extension_str(X_FIELD_PROMPT) {
            out.insert(path.to_string(), prompt.to_string());
        }
    }

    for (name, child) in &node.properties {
        collect(doc, *child, &child_path(path, name), out);
    }
    if let Some(items) = node.items {
        collect(doc, items, &child_path(path, ITEMS_SEGMENT), out);
    }
    // Union members describe the same slot.
    for member in node.any_of.iter().chain(&node.one_of).chain(&node.all_of) {
        collect(doc, *member, path, out);
    }
}

fn child_path(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}{SEPARATOR}{segment}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collects_system_and_field_prompts() {
        let doc = SchemaDocument::from_value(&json!({
            "type": "object",
            "X-SystemPrompt": "You read invoices.",
            "properties": {
                "vendor": {"type": "string", "X-FieldPrompt": "legal entity name"},
                "lines": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "amount": {"type": "number", "X-FieldPrompt": "net amount"}
                        }
                    }
                },
                "note": {
                    "anyOf": [{"type": "string", "X-FieldPrompt": "free text"}, {"type": "null"}]
                }
            }
        }))
        .unwrap();

        let prompts = collect_prompts(&doc);
        assert_eq!(prompts.system.as_deref(), Some("You read invoices."));
        assert_eq!(
            prompts.fields.into_iter().collect::<Vec<_>>(),
            vec![
                ("vendor".to_string(), "legal entity name".to_string()),
                ("lines.*.amount".to_string(), "net amount".to_string()),
                ("note".to_string(), "free text".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_when_no_prompts() {
        let doc = SchemaDocument::from_value(&json!({"type": "string"})).unwrap();
        assert!(collect_prompts(&doc).is_empty());
    }
}
