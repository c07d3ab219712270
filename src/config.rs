//! Resolver configuration.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// How the linker picks a primary when single-field matches disagree.
///
/// Under a consistent graph every contact sharing one email (or one phone
/// number) lives in the same cluster, so disagreement signals damage elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrimarySelection {
    /// Fail with `AmbiguousPrimary` when more than one primary is reachable.
    #[default]
    Strict,

    /// Use the primary reached from the highest-id match.
    LastObserved,
}

impl PrimarySelection {
    /// Returns `true` if this is `Strict`.
    pub const fn is_strict(&self) -> bool {
        matches!(self, Self::Strict)
    }
}

/// Tunables for [`crate::IdentityResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Primary selection for the single-field linking path.
    pub primary_selection: PrimarySelection,

    /// Upper bound on contacts a single merge may visit.
    pub max_merge_steps: usize,

    /// Longest accepted email or phone number, in bytes.
    pub max_field_length: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            primary_selection: PrimarySelection::Strict,
            max_merge_steps: 10_000,
            max_field_length: 320,
        }
    }
}

impl ResolverConfig {
    /// Checks the configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a limit is zero.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_merge_steps == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "max_merge_steps must be greater than zero".to_string(),
            });
        }
        if self.max_field_length == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "max_field_length must be greater than zero".to_string(),
            });
        }
        Ok(self)
    }
}
