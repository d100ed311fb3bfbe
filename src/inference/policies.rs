use serde::{Deserialize, Serialize};

/// How the default reasoner settles applicable defaults that disagree on a
/// goal's truth value.
///
/// Policies are pure (no I/O) so a default conclusion can be reproduced
/// deterministically from the same clause set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DefaultPolicy {
    /// The default with the higher certainty wins; equal certainties are
    /// reported as an unresolved tie.
    HighestCertainty,

    /// Never pick a side; every disagreement is reported as a tie.
    ExplicitConflict,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self::HighestCertainty
    }
}

impl DefaultPolicy {
    /// Returns a short stable identifier suitable for logging/debugging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::HighestCertainty => "highest_certainty",
            Self::ExplicitConflict => "explicit_conflict",
        }
    }
}
