//! Resolution configuration.
//!
//! Configuration is passed explicitly into every engine entry point; nothing
//! is read from ambient global state. All structs deserialize with defaults
//! for missing fields so a partial JSON document is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Largest accepted blocking gram size.
pub const MAX_GRAM_SIZE: usize = 8;

/// Weights combining the similarity signals into one score.
///
/// The label, alias and Jaccard weights are relative: the weighted mean of
/// those three signals is taken, so `(1, 1, 1)` and `(2, 2, 2)` behave the
/// same. `type_bonus` is an absolute amount added when both entity types
/// agree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityWeights {
    /// Weight of the Jaro-Winkler label signal.
    pub label_weight: f64,
    /// Weight of the best cross-name edit similarity.
    pub alias_weight: f64,
    /// Weight of the name-set Jaccard overlap.
    pub jaccard_weight: f64,
    /// Added to the score when both types match.
    pub type_bonus: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            label_weight: 1.0 / 3.0,
            alias_weight: 1.0 / 3.0,
            jaccard_weight: 1.0 / 3.0,
            type_bonus: 0.05,
        }
    }
}

impl SimilarityWeights {
    /// Sum of the three relative signal weights.
    #[must_use]
    pub fn signal_total(&self) -> f64 {
        self.label_weight + self.alias_weight + self.jaccard_weight
    }

    /// Validates that all weights are finite and usable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in [
            ("label_weight", self.label_weight),
            ("alias_weight", self.alias_weight),
            ("jaccard_weight", self.jaccard_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidWeight { name, value });
            }
        }
        if !self.type_bonus.is_finite() || !(0.0..=1.0).contains(&self.type_bonus) {
            return Err(ValidationError::InvalidWeight {
                name: "type_bonus",
                value: self.type_bonus,
            });
        }
        if self.signal_total() <= 0.0 {
            return Err(ValidationError::WeightsSumToZero);
        }
        Ok(())
    }
}

/// Worker pool settings for candidate scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of scan workers.
    pub workers: usize,
    /// Maximum queued buckets.
    pub queue_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
            .min(4);
        Self {
            workers,
            queue_capacity: 1024,
        }
    }
}

/// Everything that tunes candidate generation, scoring and merging.
///
/// # Examples
///
/// ```
/// use kyroql_resolve::ResolutionConfig;
///
/// let config = ResolutionConfig::from_json_str(r#"{"threshold": 0.8, "strict_type_match": true}"#)?;
/// assert_eq!(config.threshold, 0.8);
/// assert_eq!(config.gram_size, 3);
/// # Ok::<(), kyroql_resolve::ValidationError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Minimum combined score for a pair to become a candidate.
    pub threshold: f64,

    /// Signal weights.
    pub weights: SimilarityWeights,

    /// Subtracted from the score when types differ (non-strict mode).
    pub type_mismatch_penalty: f64,

    /// Differing types score zero and cannot be merged.
    pub strict_type_match: bool,

    /// Blocking n-gram size.
    pub gram_size: usize,

    /// Names longer than this (in characters) are ignored for matching.
    pub max_name_chars: usize,

    /// Compare unblockable nodes among themselves by their raw text.
    pub include_unblockable: bool,

    /// How long a merge waits for the project writer lock (`None` waits forever).
    pub lock_timeout_ms: Option<u64>,

    /// Scan worker pool.
    pub scan: ScanConfig,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            weights: SimilarityWeights::default(),
            type_mismatch_penalty: 0.1,
            strict_type_match: false,
            gram_size: 3,
            max_name_chars: 256,
            include_unblockable: false,
            lock_timeout_ms: Some(5_000),
            scan: ScanConfig::default(),
        }
    }
}

impl ResolutionConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Returns a copy with a different threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Returns a copy with strict type matching toggled.
    #[must_use]
    pub fn with_strict_type_match(mut self, strict: bool) -> Self {
        self.strict_type_match = strict;
        self
    }

    /// Lock acquisition timeout as a `Duration`.
    #[must_use]
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    /// Validates every field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_threshold(self.threshold)?;
        self.weights.validate()?;
        if !self.type_mismatch_penalty.is_finite() || !(0.0..=1.0).contains(&self.type_mismatch_penalty) {
            return Err(ValidationError::InvalidWeight {
                name: "type_mismatch_penalty",
                value: self.type_mismatch_penalty,
            });
        }
        if self.gram_size == 0 || self.gram_size > MAX_GRAM_SIZE {
            return Err(ValidationError::InvalidGramSize {
                value: self.gram_size,
                max: MAX_GRAM_SIZE,
            });
        }
        if self.max_name_chars == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "max_name_chars must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Checks that a threshold lies in `[0, 1]`.
pub fn validate_threshold(threshold: f64) -> Result<(), ValidationError> {
    if threshold.is_finite() && (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(ValidationError::ThresholdOutOfRange { value: threshold })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ResolutionConfig::default();
        config.validate().unwrap();
        assert!((config.weights.signal_total() - 1.0).abs() < 1e-12);
        assert!(config.scan.workers >= 1);
        assert_eq!(config.lock_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn threshold_bounds() {
        assert!(validate_threshold(0.0).is_ok());
        assert!(validate_threshold(1.0).is_ok());
        assert!(matches!(
            validate_threshold(1.01),
            Err(ValidationError::ThresholdOutOfRange { .. })
        ));
        assert!(validate_threshold(f64::NAN).is_err());
    }

    #[test]
    fn rejects_bad_weights() {
        let mut weights = SimilarityWeights::default();
        weights.alias_weight = -0.5;
        assert!(matches!(
            weights.validate(),
            Err(ValidationError::InvalidWeight { name: "alias_weight", .. })
        ));

        let zero = SimilarityWeights {
            label_weight: 0.0,
            alias_weight: 0.0,
            jaccard_weight: 0.0,
            type_bonus: 0.0,
        };
        assert!(matches!(zero.validate(), Err(ValidationError::WeightsSumToZero)));
    }

    #[test]
    fn rejects_bad_gram_size() {
        let config = ResolutionConfig {
            gram_size: 0,
            ..ResolutionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidGramSize { value: 0, .. })
        ));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = ResolutionConfig::from_json_str(
            r#"{"threshold": 0.9, "weights": {"type_bonus": 0.0}, "scan": {"workers": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.threshold, 0.9);
        assert_eq!(config.weights.type_bonus, 0.0);
        assert!((config.weights.label_weight - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(config.scan.workers, 2);
        assert_eq!(config.scan.queue_capacity, 1024);
    }

    #[test]
    fn invalid_json_is_a_validation_error() {
        let err = ResolutionConfig::from_json_str("{\"threshold\": \"high\"}").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidConfig { .. }));

        let err = ResolutionConfig::from_json_str("{\"threshold\": 3.0}").unwrap_err();
        assert!(matches!(err, ValidationError::ThresholdOutOfRange { .. }));
    }
}
