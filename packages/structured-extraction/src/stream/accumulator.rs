//! Folds streamed chunks into per-candidate extraction state.
//!
//! [`AccumulatedExtraction`] is an immutable snapshot: `next` returns a new
//! snapshot and leaves the old one usable. [`Accumulator`] owns the current
//! snapshot for callers that just want to push chunks.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut acc = Accumulator::new(schema.shared())?;
//! for chunk in chunks {
//!     let snapshot = acc.push(&chunk);
//!     if let Some(best) = snapshot.candidate(0).and_then(|c| c.last_valid()) {
//!         render(best);
//!     }
//! }
//! let done = acc.into_inner().into_result()?;
//! ```

use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::AccumulatorConfig;
use crate::error::{ExtractionError, Result, SchemaResult, ValidationError};
use crate::flat::{unflatten, FlatMap, SEPARATOR};
use crate::prepared::ExtractionSchema;
use crate::schema::filter_auxiliary;
use crate::stream::delta::{ChoiceState, ExtractionChunk, FinishReason, KeyMapping};

/// Where the stream is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No chunk seen yet
    Empty,
    Accumulating,
    /// Every candidate has stopped
    Terminal,
}

/// Outcome as seen by a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    Streaming,
    Complete,
    Invalid,
}

/// One candidate's cumulative state and its derived views.
#[derive(Debug, Clone)]
pub struct Candidate {
    index: usize,
    state: ChoiceState,
    finish_reason: Option<FinishReason>,
    last_valid: Option<Value>,
    terminal: Option<std::result::Result<(), ValidationError>>,
    parsed: OnceLock<Value>,
    likelihoods: OnceLock<Value>,
    filtered: OnceLock<Value>,
    aligned: OnceLock<Value>,
}

impl Candidate {
    fn new(index: usize, state: ChoiceState) -> Self {
        Self {
            index,
            state,
            finish_reason: None,
            last_valid: None,
            terminal: None,
            parsed: OnceLock::new(),
            likelihoods: OnceLock::new(),
            filtered: OnceLock::new(),
            aligned: OnceLock::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> &ChoiceState {
        &self.state
    }

    pub fn flat_parsed(&self) -> &FlatMap {
        &self.state.flat_parsed
    }

    /// Concatenated raw text.
    pub fn content(&self) -> &str {
        &self.state.content
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Whether this candidate has received `stop`.
    pub fn is_finished(&self) -> bool {
        self.finish_reason.is_some_and(FinishReason::is_stop)
    }

    /// Nested view of the parsed flat state.
    pub fn parsed(&self) -> &Value {
        self.parsed.get_or_init(|| unflatten(&self.state.flat_parsed))
    }

    /// Nested view of the likelihoods.
    pub fn likelihoods(&self) -> &Value {
        self.likelihoods
            .get_or_init(|| unflatten(&self.state.flat_likelihoods))
    }

    /// Parsed data without reasoning / source fields.
    pub fn filtered(&self) -> &Value {
        self.filtered.get_or_init(|| filter_auxiliary(self.parsed()))
    }

    /// Parsed data with keys renamed through the candidate's key mapping.
    ///
    /// A flat key is matched on its longest mapped prefix; a `null` target
    /// drops the key. Without a mapping this is [`Self::parsed`].
    pub fn aligned(&self) -> &Value {
        self.aligned.get_or_init(|| match &self.state.key_mapping {
            None => self.parsed().clone(),
            Some(mapping) => {
                let mut renamed = FlatMap::with_capacity(self.state.flat_parsed.len());
                for (key, value) in &self.state.flat_parsed {
                    if let Some(target) = map_key(key, mapping) {
                        renamed.insert(target, value.clone());
                    }
                }
                unflatten(&renamed)
            }
        })
    }

    /// Last parsed value that passed partial validation.
    pub fn last_valid(&self) -> Option<&Value> {
        self.last_valid.as_ref()
    }

    /// Full validation outcome, set once the candidate stops.
    pub fn terminal(&self) -> Option<&std::result::Result<(), ValidationError>> {
        self.terminal.as_ref()
    }
}

fn map_key(key: &str, mapping: &KeyMapping) -> Option<String> {
    if let Some(target) = mapping.get(key) {
        return target.clone();
    }
    let mut prefix = key;
    while let Some((head, _)) = prefix.rsplit_once(SEPARATOR) {
        if let Some(target) = mapping.get(head) {
            let rest = &key[head.len()..];
            return target.as_ref().map(|t| format!("{t}{rest}"));
        }
        prefix = head;
    }
    Some(key.to_string())
}

/// Immutable snapshot of an extraction stream.
#[derive(Debug, Clone)]
pub struct AccumulatedExtraction {
    schema: Option<Arc<ExtractionSchema>>,
    config: AccumulatorConfig,
    candidates: Vec<Candidate>,
    phase: Phase,
}

impl AccumulatedExtraction {
    /// Empty snapshot that validates against `schema`.
    ///
    /// Fails if the schema cannot be turned into a structural type.
    pub fn new(schema: Arc<ExtractionSchema>) -> SchemaResult<Self> {
        schema.partial_type()?;
        let config = schema.config().accumulator.clone();
        Ok(Self {
            schema: Some(schema),
            config,
            candidates: Vec::new(),
            phase: Phase::Empty,
        })
    }

    /// Empty snapshot without a schema. Every parsed value counts as valid.
    pub fn untyped(config: AccumulatorConfig) -> Self {
        Self {
            schema: None,
            config,
            candidates: Vec::new(),
            phase: Phase::Empty,
        }
    }

    /// Fold one chunk, returning the next snapshot.
    pub fn next(&self, chunk: &ExtractionChunk) -> Self {
        if self.phase == Phase::Terminal {
            warn!(
                choices = chunk.choices.len(),
                "chunk received after terminal state; ignoring"
            );
            return self.clone();
        }

        let mut choices = chunk.choices.as_slice();
        if let Some(max) = self.config.max_choices {
            if choices.len() > max {
                warn!(received = choices.len(), max, "dropping choices beyond max_choices");
                choices = &choices[..max];
            }
        }

        let len = self.candidates.len().max(choices.len());
        let candidates: Vec<Candidate> = (0..len)
            .map(|index| match (self.candidates.get(index), choices.get(index)) {
                (Some(previous), None) => previous.clone(),
                (Some(previous), Some(_)) if previous.is_finished() => {
                    warn!(choice = index, "delta for finished choice; ignoring");
                    previous.clone()
                }
                (previous, Some(choice)) => {
                    let base = previous.map(|p| p.state.clone()).unwrap_or_default();
                    let mut candidate = Candidate::new(index, base.apply(&choice.delta));
                    candidate.finish_reason = choice
                        .finish_reason
                        .or_else(|| previous.and_then(|p| p.finish_reason));
                    candidate.last_valid = previous.and_then(|p| p.last_valid.clone());
                    self.validate(&mut candidate);
                    candidate
                }
                (None, None) => Candidate::new(index, ChoiceState::default()),
            })
            .collect();

        let phase = if !candidates.is_empty() && candidates.iter().all(Candidate::is_finished) {
            Phase::Terminal
        } else {
            Phase::Accumulating
        };

        Self {
            schema: self.schema.clone(),
            config: self.config.clone(),
            candidates,
            phase,
        }
    }

    fn validate(&self, candidate: &mut Candidate) {
        let value = candidate.parsed().clone();

        match (&self.schema, self.config.validate_partials) {
            (Some(schema), true) => match schema.partial_type() {
                Ok(partial) => match partial.validate(&value) {
                    Ok(()) => candidate.last_valid = Some(value.clone()),
                    Err(err) => debug!(
                        choice = candidate.index,
                        issues = err.issues.len(),
                        "partial data did not validate; keeping last valid"
                    ),
                },
                Err(err) => debug!(error = %err, "no partial type available"),
            },
            _ => candidate.last_valid = Some(value.clone()),
        }

        if !candidate.is_finished() {
            return;
        }

        let outcome = match self.schema.as_ref().map(|s| s.structural_type()) {
            Some(Ok(full)) => full.validate(&value),
            Some(Err(err)) => {
                debug!(error = %err, "no structural type available");
                Ok(())
            }
            None => Ok(()),
        };
        if let Err(err) = &outcome {
            warn!(choice = candidate.index, error = %err, "terminal validation failed");
        }
        candidate.terminal = Some(outcome);
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == Phase::Terminal
    }

    /// `Stop` once every candidate has stopped, otherwise `None`.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.is_terminal().then_some(FinishReason::Stop)
    }

    pub fn status(&self) -> ExtractionStatus {
        match self.phase {
            Phase::Terminal if self.terminal_failure().is_some() => ExtractionStatus::Invalid,
            Phase::Terminal => ExtractionStatus::Complete,
            _ => ExtractionStatus::Streaming,
        }
    }

    fn terminal_failure(&self) -> Option<(usize, &ValidationError)> {
        self.candidates.iter().find_map(|candidate| match &candidate.terminal {
            Some(Err(err)) => Some((candidate.index, err)),
            _ => None,
        })
    }

    /// Surface the first terminal validation failure, if any.
    pub fn into_result(self) -> Result<Self> {
        if let Some((choice, err)) = self.terminal_failure() {
            return Err(ExtractionError::TerminalValidation {
                choice,
                source: err.clone(),
            });
        }
        Ok(self)
    }

    pub fn schema(&self) -> Option<&Arc<ExtractionSchema>> {
        self.schema.as_ref()
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn candidate(&self, index: usize) -> Option<&Candidate> {
        self.candidates.get(index)
    }

    /// Cumulative state of every candidate.
    pub fn states(&self) -> Vec<&ChoiceState> {
        self.candidates.iter().map(|c| &c.state).collect()
    }

    pub fn parsed(&self) -> Vec<&Value> {
        self.candidates.iter().map(Candidate::parsed).collect()
    }

    pub fn likelihoods(&self) -> Vec<&Value> {
        self.candidates.iter().map(Candidate::likelihoods).collect()
    }

    pub fn filtered(&self) -> Vec<&Value> {
        self.candidates.iter().map(Candidate::filtered).collect()
    }
}

/// Owning driver around [`AccumulatedExtraction`].
#[derive(Debug, Clone)]
pub struct Accumulator {
    current: AccumulatedExtraction,
}

impl Accumulator {
    pub fn new(schema: Arc<ExtractionSchema>) -> SchemaResult<Self> {
        Ok(Self {
            current: AccumulatedExtraction::new(schema)?,
        })
    }

    pub fn untyped(config: AccumulatorConfig) -> Self {
        Self {
            current: AccumulatedExtraction::untyped(config),
        }
    }

    pub fn push(&mut self, chunk: &ExtractionChunk) -> &AccumulatedExtraction {
        self.current = self.current.next(chunk);
        &self.current
    }

    pub fn extend<I>(&mut self, chunks: I) -> &AccumulatedExtraction
    where
        I: IntoIterator<Item = ExtractionChunk>,
    {
        for chunk in chunks {
            self.current = self.current.next(&chunk);
        }
        &self.current
    }

    pub fn current(&self) -> &AccumulatedExtraction {
        &self.current
    }

    pub fn into_inner(self) -> AccumulatedExtraction {
        self.current
    }
}
