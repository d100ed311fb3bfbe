//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{KyroError, ValidationError};
use crate::inference::DefaultPolicy;

/// Tunables for inference, auditing and default reasoning.
///
/// # Examples
///
/// ```
/// use kyrolog::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{ "max_depth": 64 }"#).unwrap();
/// assert_eq!(config.max_depth, 64);
/// assert!(config.audit_after_write);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum proof-tree depth. Branches deeper than this are cut and the
    /// query reports `DepthExceeded` once its results are exhausted.
    pub max_depth: usize,

    /// How many times a goal may recur on a single proof branch as a
    /// variant (equal up to variable renaming) of one of its ancestors.
    pub max_recursion: usize,

    /// Clause resolution attempts one search may make before it stops and
    /// reports `DepthExceeded`. Bounds searches whose branching grows
    /// exponentially within the depth bound.
    pub max_steps: usize,

    /// Run the consistency auditor after every write batch.
    pub audit_after_write: bool,

    /// Never retract axioms (clauses with no provenance and full
    /// certainty). Contradictions among axioms are reported unresolved.
    pub protect_axioms: bool,

    /// Certainty an answer needs for `QueryAnswer::is_true`.
    pub truth_threshold: f32,

    /// How disagreeing default rules are settled.
    pub default_policy: DefaultPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 512,
            max_recursion: 64,
            max_steps: 250_000,
            audit_after_write: true,
            protect_axioms: true,
            truth_threshold: 0.8,
            default_policy: DefaultPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON configuration document. Missing fields
    /// take their default values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the document does not parse or a value is
    /// out of range.
    pub fn from_json_str(json: &str) -> Result<Self, KyroError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            field: "<document>".to_string(),
            reason: e.to_string(),
        })?;
        Ok(config.validate()?)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` naming the first bad field.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_depth == 0 {
            return Err(invalid("max_depth", "must be at least 1"));
        }
        if self.max_recursion == 0 {
            return Err(invalid("max_recursion", "must be at least 1"));
        }
        if self.max_steps == 0 {
            return Err(invalid("max_steps", "must be at least 1"));
        }
        if self.truth_threshold.is_nan() || !(0.0..=1.0).contains(&self.truth_threshold) {
            return Err(invalid(
                "truth_threshold",
                &format!("must be in [0.0, 1.0] (got {})", self.truth_threshold),
            ));
        }
        Ok(self)
    }

    /// Sets `max_depth`.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Sets `max_recursion`.
    #[must_use]
    pub fn with_max_recursion(mut self, max_recursion: usize) -> Self {
        self.max_recursion = max_recursion;
        self
    }

    /// Sets `max_steps`.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Sets `audit_after_write`.
    #[must_use]
    pub fn with_audit_after_write(mut self, enabled: bool) -> Self {
        self.audit_after_write = enabled;
        self
    }

    /// Sets `protect_axioms`.
    #[must_use]
    pub fn with_protect_axioms(mut self, enabled: bool) -> Self {
        self.protect_axioms = enabled;
        self
    }

    /// Sets `default_policy`.
    #[must_use]
    pub fn with_default_policy(mut self, policy: DefaultPolicy) -> Self {
        self.default_policy = policy;
        self
    }
}

fn invalid(field: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
