//! Certainty and provenance tagging for clauses and beliefs.
//!
//! A certainty is a real value in [0.0, 1.0]: 1.0 means the clause was
//! asserted as plain fact, lower values mean it was extracted or believed
//! with some doubt. Provenance is an opaque source identifier; clauses
//! asserted directly as axioms carry none.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Validated certainty value.
///
/// # Examples
///
/// ```
/// use kyrolog::Certainty;
///
/// let c = Certainty::new(0.9).unwrap();
/// assert_eq!(c.value(), 0.9);
/// assert!(Certainty::new(1.5).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Certainty(f32);

impl Certainty {
    /// Minimum valid certainty value.
    pub const MIN_VALUE: f32 = 0.0;

    /// Maximum valid certainty value.
    pub const MAX_VALUE: f32 = 1.0;

    /// Creates a new certainty with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::CertaintyOutOfRange` if the value is NaN or
    /// not in [0.0, 1.0].
    pub fn new(value: f32) -> Result<Self, ValidationError> {
        if value.is_nan() || !(Self::MIN_VALUE..=Self::MAX_VALUE).contains(&value) {
            return Err(ValidationError::CertaintyOutOfRange { value });
        }
        Ok(Self(value))
    }

    /// Full certainty.
    #[must_use]
    pub const fn one() -> Self {
        Self(1.0)
    }

    /// The raw value in [0, 1].
    #[must_use]
    pub const fn value(self) -> f32 {
        self.0
    }

    /// Conservative conjunction: the weaker of the two.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    /// Returns the larger of the two certainties.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if other.0 > self.0 {
            other
        } else {
            self
        }
    }

    /// Returns true if this certainty meets the given threshold.
    #[must_use]
    pub fn meets(self, threshold: f32) -> bool {
        self.0 >= threshold
    }

    /// Total order over certainty values (values are never NaN).
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Default for Certainty {
    fn default() -> Self {
        Self::one()
    }
}

impl TryFrom<f32> for Certainty {
    type Error = ValidationError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Certainty> for f32 {
    fn from(c: Certainty) -> Self {
        c.0
    }
}

impl fmt::Display for Certainty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Opaque source identifier attached to a clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Provenance(String);

impl Provenance {
    /// Wraps a source identifier.
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    /// The source identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Provenance {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Provenance {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
