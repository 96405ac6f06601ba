//! Schema-driven structured extraction
//!
//! Prepares a JSON schema for LLM extraction and accumulates streamed model
//! output into typed, validated results.
//!
//! Schema side: `$ref` expansion, reasoning / source-quote augmentation,
//! strict-dialect compilation for structured-output APIs and synthesis of a
//! structural type (plus its partial variant) for local validation.
//!
//! Stream side: flat-key deltas are merged per candidate, partially
//! validated on every step and fully validated when the candidate stops.
//!
//! # Example
//!
//! ```rust,ignore
//! use structured_extraction::{Accumulator, ExtractionConfig, ExtractionSchema};
//!
//! let schema = ExtractionSchema::new(&raw_schema, ExtractionConfig::default())?.shared();
//! let wire_schema = schema.strict_schema()?;
//!
//! let mut acc = Accumulator::new(schema.clone())?;
//! for chunk in chunks {
//!     let snapshot = acc.push(&chunk);
//!     println!("{:?}", snapshot.filtered());
//! }
//! let result = acc.into_inner().into_result()?;
//! ```
//!
//! # Streaming
//!
//! ```rust,ignore
//! use structured_extraction::{AccumulateExt, AccumulatedExtraction, ChunkStream};
//!
//! let snapshots = ChunkStream::new(response.bytes_stream())
//!     .accumulate(AccumulatedExtraction::new(schema)?);
//! ```
//!
//! # Modules
//!
//! - [`flat`] - Dotted-path flatten / unflatten
//! - [`schema`] - Schema arena, expansion, augmentation, strict compilation
//! - [`model`] - Structural types and validation
//! - [`stream`] - Delta accumulation and SSE decoding
//! - [`testing`] - Chunk builders for tests

pub mod config;
pub mod error;
pub mod flat;
pub mod model;
pub mod prepared;
pub mod schema;
pub mod stream;
pub mod testing;

pub use config::{AccumulatorConfig, ExtractionConfig, StrictOptions};
pub use error::{
    ExtractionError, Result, SchemaError, SchemaResult, ValidationError, ValidationIssue,
};
pub use flat::{flatten, unflatten, FlatMap};
pub use model::{Field, FieldType, PartialType, ScalarKind, StructuralType};
pub use prepared::ExtractionSchema;
pub use schema::{
    augment, collect_prompts, compile_strict, expand, filter_auxiliary, has_cycle,
    SchemaDocument, SchemaPrompts,
};
pub use stream::{
    AccumulateExt, AccumulatedExtraction, AccumulatingStream, Accumulator, Candidate,
    ChoiceDelta, ChoiceState, ChunkChoice, ChunkStream, ExtractionChunk, ExtractionStatus,
    FinishReason, Phase,
};
