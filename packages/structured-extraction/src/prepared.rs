//! A schema prepared for one extraction: normalized, augmented, with its
//! derived forms computed on first use.
//!
//! # Example
//!
//! ```rust,ignore
//! use structured_extraction::{ExtractionConfig, ExtractionSchema};
//!
//! let schema = ExtractionSchema::new(&raw_schema, ExtractionConfig::default())?;
//!
//! // What goes to the model
//! let wire = schema.strict_schema()?;
//!
//! // What validates streamed output locally
//! let partial = schema.partial_type()?;
//! ```

use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tracing::debug;

use crate::config::ExtractionConfig;
use crate::error::SchemaResult;
use crate::model::{PartialType, StructuralType};
use crate::schema::{augment, collect_prompts, compile_strict, expand, filter_auxiliary, has_cycle};
use crate::schema::{SchemaDocument, SchemaPrompts};

/// Normalized schema plus lazily cached derivations.
#[derive(Debug)]
pub struct ExtractionSchema {
    document: SchemaDocument,
    cyclic: bool,
    config: ExtractionConfig,
    strict: OnceLock<Value>,
    structural: OnceLock<StructuralType>,
    partial: OnceLock<PartialType>,
}

impl ExtractionSchema {
    /// Parse, expand and (unless disabled) augment a raw JSON schema.
    ///
    /// In a cyclic schema only the references into the cycle stay
    /// unexpanded; augmentation does not follow them.
    pub fn new(raw: &Value, config: ExtractionConfig) -> SchemaResult<Self> {
        let parsed = SchemaDocument::from_value(raw)?;
        let cyclic = has_cycle(&parsed);
        let mut document = expand(&parsed)?;

        if config.augment {
            augment(&mut document);
        }
        debug!(
            cyclic,
            augment = config.augment,
            properties = document.root_node().properties.len(),
            "prepared extraction schema"
        );

        Ok(Self {
            document,
            cyclic,
            config,
            strict: OnceLock::new(),
            structural: OnceLock::new(),
            partial: OnceLock::new(),
        })
    }

    /// Wrap in an `Arc` for sharing across accumulators.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn document(&self) -> &SchemaDocument {
        &self.document
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Whether the definitions table contains a reference cycle.
    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    /// The prepared (expanded, augmented) schema as JSON.
    pub fn to_value(&self) -> Value {
        self.document.to_value()
    }

    /// Strict-dialect schema for structured-output APIs. Cached.
    pub fn strict_schema(&self) -> SchemaResult<&Value> {
        if let Some(strict) = self.strict.get() {
            return Ok(strict);
        }
        let strict = compile_strict(&self.document, &self.config.strict)?;
        Ok(self.strict.get_or_init(|| strict))
    }

    /// Full structural type. Cached.
    pub fn structural_type(&self) -> SchemaResult<&StructuralType> {
        if let Some(ty) = self.structural.get() {
            return Ok(ty);
        }
        let ty = StructuralType::from_schema(&self.document, &self.config.root_name)?;
        Ok(self.structural.get_or_init(|| ty))
    }

    /// Partial variant of [`Self::structural_type`]. Cached.
    pub fn partial_type(&self) -> SchemaResult<&PartialType> {
        if let Some(partial) = self.partial.get() {
            return Ok(partial);
        }
        let partial = self.structural_type()?.to_partial();
        Ok(self.partial.get_or_init(|| partial))
    }

    /// System and field prompts carried in the schema.
    pub fn prompts(&self) -> SchemaPrompts {
        collect_prompts(&self.document)
    }

    /// Strip auxiliary reasoning / source fields from extracted data.
    pub fn filter(&self, data: &Value) -> Value {
        filter_auxiliary(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> Value {
        json!({
            "type": "object",
            "X-SystemPrompt": "Extract the person.",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer", "X-ReasoningPrompt": "why this age?"}
            },
            "required": ["name"]
        })
    }

    #[test]
    fn test_prepares_augmented_schema() {
        let schema = ExtractionSchema::new(&person(), ExtractionConfig::default()).unwrap();
        let value = schema.to_value();
        let names: Vec<&String> = value["properties"].as_object().unwrap().keys().collect();
        assert_eq!(names, vec!["name", "reasoning___age", "age"]);
        assert_eq!(schema.prompts().system.as_deref(), Some("Extract the person."));
    }

    #[test]
    fn test_augment_can_be_disabled() {
        let schema =
            ExtractionSchema::new(&person(), ExtractionConfig::default().with_augment(false)).unwrap();
        assert!(schema.to_value()["properties"].get("reasoning___age").is_none());
    }

    #[test]
    fn test_derived_forms_are_cached() {
        let schema = ExtractionSchema::new(&person(), ExtractionConfig::default()).unwrap();

        let first = schema.strict_schema().unwrap() as *const Value;
        let second = schema.strict_schema().unwrap() as *const Value;
        assert_eq!(first, second);

        let ty = schema.structural_type().unwrap();
        assert_eq!(ty.name, "Extraction");
        assert!(ty.field("reasoning___age").unwrap().optional);

        let partial = schema.partial_type().unwrap();
        assert!(std::ptr::eq(partial, schema.partial_type().unwrap()));
    }

    #[test]
    fn test_strict_schema_of_prepared() {
        let schema = ExtractionSchema::new(&person(), ExtractionConfig::default()).unwrap();
        let strict = schema.strict_schema().unwrap();
        assert_eq!(strict["required"], json!(["name", "reasoning___age", "age"]));
        assert_eq!(strict["properties"]["age"], json!({"type": "number"}));
        assert!(strict.get("X-SystemPrompt").is_none());
    }

    #[test]
    fn test_cyclic_references_are_kept_unexpanded() {
        let raw = json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "X-SourceQuote": true},
                "root": {"$ref": "#/definitions/Node"}
            },
            "definitions": {
                "Node": {
                    "type": "object",
                    "properties": {"children": {"type": "array", "items": {"$ref": "#/definitions/Node"}}}
                }
            }
        });

        let schema = ExtractionSchema::new(&raw, ExtractionConfig::default()).unwrap();
        assert!(schema.is_cyclic());
        let value = schema.to_value();
        assert_eq!(value["properties"]["root"], json!({"$ref": "#/definitions/Node"}));
        assert!(value["properties"].get("source___title").is_some());
        assert!(schema.strict_schema().is_ok());
    }
}
