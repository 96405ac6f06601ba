//! Schema algebra: parsing, reference expansion, field augmentation, strict
//! compilation and prompt collection.
//!
//! The usual order is [`normalize::expand`] then [`augment::augment`], after
//! which the document feeds either [`strict::compile_strict`] (what the model
//! sees) or [`crate::model`] (what local validation uses).

pub mod augment;
pub mod node;
pub mod normalize;
pub mod prompts;
pub mod strict;

pub use augment::{augment, filter_auxiliary, is_auxiliary};
pub use node::{JsonType, NodeId, SchemaDocument, SchemaKind, SchemaNode};
pub use normalize::{cyclic_definitions, expand, has_cycle};
pub use prompts::{collect_prompts, SchemaPrompts};
pub use strict::compile_strict;
