//! Testing utilities for building extraction streams by hand.
//!
//! These are useful for exercising accumulation without a model on the other
//! end of the wire.

use std::convert::Infallible;

use bytes::Bytes;
use serde_json::Value;

use crate::flat::{flatten, FlatMap};
use crate::stream::delta::{ChoiceDelta, ChunkChoice, ExtractionChunk, FinishReason, KeyMapping};

/// Builder for a single candidate delta.
#[derive(Debug, Clone, Default)]
pub struct DeltaBuilder {
    delta: ChoiceDelta,
    finish_reason: Option<FinishReason>,
}

impl DeltaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one parsed flat key.
    pub fn parsed(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.delta.flat_parsed.insert(key.into(), value.into());
        self
    }

    /// Set every leaf of a nested value.
    pub fn parsed_value(mut self, value: &Value) -> Self {
        self.delta.flat_parsed.extend(flatten(value));
        self
    }

    pub fn likelihood(mut self, key: impl Into<String>, likelihood: f64) -> Self {
        self.delta
            .flat_likelihoods
            .insert(key.into(), Value::from(likelihood));
        self
    }

    /// Retract a flat key.
    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.delta.flat_deleted_keys.push(key.into());
        self
    }

    pub fn content(mut self, text: impl Into<String>) -> Self {
        self.delta.content.push_str(&text.into());
        self
    }

    pub fn valid_json(mut self, valid: bool) -> Self {
        self.delta.is_valid_json = valid;
        self
    }

    pub fn key_mapping(mut self, mapping: KeyMapping) -> Self {
        self.delta.key_mapping = Some(mapping);
        self
    }

    /// Mark this candidate as stopped.
    pub fn stop(mut self) -> Self {
        self.finish_reason = Some(FinishReason::Stop);
        self
    }

    pub fn finish(mut self, reason: FinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    pub fn build(self) -> ChunkChoice {
        ChunkChoice {
            delta: self.delta,
            finish_reason: self.finish_reason,
        }
    }

    pub fn into_delta(self) -> ChoiceDelta {
        self.delta
    }
}

/// Builder for a chunk with one or more candidates.
#[derive(Debug, Clone, Default)]
pub struct ChunkBuilder {
    choices: Vec<ChunkChoice>,
}

impl ChunkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next candidate's delta.
    pub fn choice(mut self, delta: DeltaBuilder) -> Self {
        self.choices.push(delta.build());
        self
    }

    pub fn build(self) -> ExtractionChunk {
        ExtractionChunk {
            choices: self.choices,
        }
    }
}

/// Single-candidate chunk.
pub fn chunk(delta: DeltaBuilder) -> ExtractionChunk {
    ChunkBuilder::new().choice(delta).build()
}

/// Stream a value one flat leaf per chunk, stopping on the last one.
pub fn chunks_for(value: &Value) -> Vec<ExtractionChunk> {
    let flat: FlatMap = flatten(value);
    let last = flat.len().saturating_sub(1);
    if flat.is_empty() {
        return vec![chunk(DeltaBuilder::new().stop())];
    }
    flat.into_iter()
        .enumerate()
        .map(|(i, (key, leaf))| {
            let delta = DeltaBuilder::new().parsed(key, leaf);
            chunk(if i == last { delta.stop() } else { delta })
        })
        .collect()
}

/// Encode chunks as SSE `data:` lines, terminated by `[DONE]`.
pub fn sse_bytes(chunks: &[ExtractionChunk]) -> Vec<Result<Bytes, Infallible>> {
    chunks
        .iter()
        .map(|chunk| {
            let json = serde_json::to_string(chunk).unwrap_or_default();
            Ok(Bytes::from(format!("data: {json}\n\n")))
        })
        .chain(std::iter::once(Ok(Bytes::from_static(b"data: [DONE]\n\n"))))
        .collect()
}
