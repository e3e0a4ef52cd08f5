//! Optimistic concurrency for versioned permission records.

use serde::{Deserialize, Serialize};

/// Optimistic concurrency expectation for a write against a scope key.
///
/// Version `0` means "no live record for this key": never written, or reset.
/// Live versions keep counting across resets and are never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedVersion {
    /// Skip version checking (last write wins).
    #[default]
    Any,
    /// Require the stored record to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Map an optional wire value (`expected_version` field) to an expectation.
    pub fn from_option(v: Option<u64>) -> Self {
        v.map(ExpectedVersion::Exact).unwrap_or(ExpectedVersion::Any)
    }

    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}
