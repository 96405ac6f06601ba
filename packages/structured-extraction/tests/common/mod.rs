// Common test utilities
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use structured_extraction::{ExtractionConfig, ExtractionSchema};

/// Initialize tracing once; respects RUST_LOG.
/// Run tests with: RUST_LOG=debug cargo test -- --nocapture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Person schema with a reasoning prompt on `age`.
pub fn person_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "age": {"type": "integer", "X-ReasoningPrompt": "explain how you determined the age"}
        },
        "required": ["name"]
    })
}

/// Invoice schema exercising refs, arrays, enums and source quotes.
pub fn invoice_schema() -> Value {
    json!({
        "type": "object",
        "title": "Invoice",
        "X-SystemPrompt": "You extract invoices.",
        "properties": {
            "vendor": {"$ref": "#/definitions/Party", "description": "who issued it"},
            "currency": {"enum": ["EUR", "USD"]},
            "lines": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "description": {"type": "string", "X-SourceQuote": true},
                        "amount": {"type": "number"}
                    },
                    "required": ["description", "amount"]
                }
            }
        },
        "required": ["vendor", "lines"],
        "definitions": {
            "Party": {
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "vat_id": {"type": ["string", "null"], "format": "vat"}
                },
                "required": ["name"]
            }
        }
    })
}

pub fn prepare(raw: &Value) -> Arc<ExtractionSchema> {
    ExtractionSchema::new(raw, ExtractionConfig::default())
        .expect("schema prepares")
        .shared()
}
