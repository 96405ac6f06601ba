//! Configuration for schema preparation and stream accumulation.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Insert reasoning / source-quote fields when preparing a schema.
    ///
    /// Default: true.
    pub augment: bool,

    /// Name of the root structural type.
    ///
    /// Default: "Extraction".
    pub root_name: String,

    /// Strict compilation options.
    pub strict: StrictOptions,

    /// Accumulator options.
    pub accumulator: AccumulatorConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            augment: true,
            root_name: "Extraction".to_string(),
            strict: StrictOptions::default(),
            accumulator: AccumulatorConfig::default(),
        }
    }
}

impl ExtractionConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable field augmentation.
    pub fn with_augment(mut self, augment: bool) -> Self {
        self.augment = augment;
        self
    }

    /// Set the root type name.
    pub fn with_root_name(mut self, name: impl Into<String>) -> Self {
        self.root_name = name.into();
        self
    }

    /// Set strict compilation options.
    pub fn with_strict(mut self, strict: StrictOptions) -> Self {
        self.strict = strict;
        self
    }

    /// Set accumulator options.
    pub fn with_accumulator(mut self, accumulator: AccumulatorConfig) -> Self {
        self.accumulator = accumulator;
        self
    }
}

/// What the strict compiler removes besides the keywords it always rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrictOptions {
    /// Descriptive-only keywords to drop.
    ///
    /// Default: `["default", "format"]`.
    pub strip_keywords: Vec<String>,

    /// Drop `X-*` extension keys.
    ///
    /// Default: true.
    pub strip_extensions: bool,
}

impl Default for StrictOptions {
    fn default() -> Self {
        Self {
            strip_keywords: vec!["default".to_string(), "format".to_string()],
            strip_extensions: true,
        }
    }
}

impl StrictOptions {
    /// Also strip these keywords.
    pub fn with_stripped(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.strip_keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub(crate) fn strips(&self, keyword: &str) -> bool {
        self.strip_keywords.iter().any(|k| k == keyword)
    }
}

/// Accumulator behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorConfig {
    /// Validate in-progress data against the partial type on every step.
    ///
    /// When false, `last_valid` simply tracks the latest parsed value.
    /// Default: true.
    pub validate_partials: bool,

    /// Maximum number of candidates tracked. Extra candidates are dropped.
    ///
    /// Default: None (unlimited).
    pub max_choices: Option<usize>,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            validate_partials: true,
            max_choices: None,
        }
    }
}

impl AccumulatorConfig {
    pub fn with_validate_partials(mut self, validate: bool) -> Self {
        self.validate_partials = validate;
        self
    }

    pub fn with_max_choices(mut self, max: usize) -> Self {
        self.max_choices = Some(max);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExtractionConfig::default();
        assert!(config.augment);
        assert_eq!(config.root_name, "Extraction");
        assert!(config.strict.strips("default"));
        assert!(config.strict.strips("format"));
        assert!(!config.strict.strips("title"));
        assert!(config.accumulator.validate_partials);
        assert_eq!(config.accumulator.max_choices, None);
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: ExtractionConfig =
            serde_json::from_str(r#"{"root_name": "Invoice", "accumulator": {"max_choices": 3}}"#)
                .unwrap();
        assert_eq!(config.root_name, "Invoice");
        assert!(config.augment);
        assert_eq!(config.accumulator.max_choices, Some(3));
        assert!(config.accumulator.validate_partials);
        assert_eq!(config.strict, StrictOptions::default());
    }

    #[test]
    fn test_builders() {
        let config = ExtractionConfig::new()
            .with_augment(false)
            .with_root_name("Receipt")
            .with_strict(StrictOptions::default().with_stripped(["title"]))
            .with_accumulator(AccumulatorConfig::default().with_max_choices(2));

        assert!(!config.augment);
        assert_eq!(config.root_name, "Receipt");
        assert!(config.strict.strips("title"));
        assert_eq!(config.accumulator.max_choices, Some(2));
    }
}
