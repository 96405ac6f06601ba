//! Wire types for streamed extraction deltas and the pure accumulation step.
//!
//! Each streamed unit carries a list of choices (one per candidate, by
//! position). A choice's delta holds newly parsed flat keys, their
//! likelihoods, keys to retract and the raw text fragment.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::flat::FlatMap;

/// Consensus key aliasing: candidate key to shared key, `None` to drop.
pub type KeyMapping = IndexMap<String, Option<String>>;

/// One streamed unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionChunk {
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<ChunkChoice>,
}

/// A candidate's part of a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    pub delta: ChoiceDelta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Why a candidate stopped. Only `stop` ends accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    #[serde(other)]
    Other,
}

impl FinishReason {
    pub fn is_stop(self) -> bool {
        self == Self::Stop
    }
}

/// Incremental update for one candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceDelta {
    /// Raw text fragment
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,

    /// Newly parsed leaves, by flat key
    #[serde(default, deserialize_with = "null_as_default")]
    pub flat_parsed: FlatMap,

    /// Confidence per flat key
    #[serde(default, deserialize_with = "null_as_default")]
    pub flat_likelihoods: FlatMap,

    /// Keys to retract from the cumulative state
    #[serde(default, deserialize_with = "null_as_default")]
    pub flat_deleted_keys: Vec<String>,

    /// Whether this fragment parsed as complete JSON on its own
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_valid_json: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_mapping: Option<KeyMapping>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Cumulative state of one candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceState {
    pub flat_parsed: FlatMap,
    pub flat_likelihoods: FlatMap,
    /// Concatenated raw text
    pub content: String,
    /// Validity of the latest fragment only
    pub is_valid_json: bool,
    pub key_mapping: Option<KeyMapping>,
}

impl ChoiceState {
    /// Apply one delta, producing the next state. `self` is left untouched.
    ///
    /// Retractions are applied to the previous state before the new keys
    /// are merged in, so a delta may delete and re-set the same key.
    pub fn apply(&self, delta: &ChoiceDelta) -> ChoiceState {
        let mut flat_parsed = self.flat_parsed.clone();
        let mut flat_likelihoods = self.flat_likelihoods.clone();

        for key in &delta.flat_deleted_keys {
            flat_parsed.shift_remove(key);
            flat_likelihoods.shift_remove(key);
        }
        for (key, value) in &delta.flat_parsed {
            flat_parsed.insert(key.clone(), value.clone());
        }
        for (key, value) in &delta.flat_likelihoods {
            flat_likelihoods.insert(key.clone(), value.clone());
        }

        ChoiceState {
            flat_parsed,
            flat_likelihoods,
            content: format!("{}{}", self.content, delta.content),
            is_valid_json: delta.is_valid_json,
            key_mapping: self
                .key_mapping
                .clone()
                .or_else(|| delta.key_mapping.clone()),
        }
    }

    /// Apply a sequence of deltas in order.
    pub fn apply_all<'a>(&self, deltas: impl IntoIterator<Item = &'a ChoiceDelta>) -> ChoiceState {
        deltas
            .into_iter()
            .fold(self.clone(), |state, delta| state.apply(delta))
    }
}

/// Advance every candidate by one chunk.
///
/// The result tracks `max(previous.len(), chunk.choices.len())` candidates;
/// a candidate missing on either side is treated as empty there.
pub fn accumulate_choices(previous: &[ChoiceState], chunk: &ExtractionChunk) -> Vec<ChoiceState> {
    let len = previous.len().max(chunk.choices.len());
    (0..len)
        .map(|index| {
            let base = previous.get(index).cloned().unwrap_or_default();
            match chunk.choices.get(index) {
                Some(choice) => base.apply(&choice.delta),
                None => base,
            }
        })
        .collect()
}

/// Fold a whole sequence of chunks.
pub fn accumulate_all<'a>(
    initial: &[ChoiceState],
    chunks: impl IntoIterator<Item = &'a ExtractionChunk>,
) -> Vec<ChoiceState> {
    chunks
        .into_iter()
        .fold(initial.to_vec(), |states, chunk| accumulate_choices(&states, chunk))
}
