//! Streamed extraction: wire types, accumulation and SSE decoding.

pub mod accumulator;
pub mod delta;
pub mod sse;

pub use accumulator::{AccumulatedExtraction, Accumulator, Candidate, ExtractionStatus, Phase};
pub use delta::{
    accumulate_all, accumulate_choices, ChoiceDelta, ChoiceState, ChunkChoice, ExtractionChunk,
    FinishReason, KeyMapping,
};
pub use sse::{AccumulateExt, AccumulatingStream, ChunkStream};
