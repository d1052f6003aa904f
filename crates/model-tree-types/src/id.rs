//! Instance identifiers.
//!
//! Ids travel as hex strings (`"0x20000000a1"`) on the wire and as plain `u64`
//! everywhere else.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A 64-bit instance identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Id64(pub u64);

// ─── Id aliases ───────────────────────────────────────────────

pub type ModelId = Id64;
pub type CategoryId = Id64;
pub type SubCategoryId = Id64;
pub type ElementId = Id64;
pub type SubjectId = Id64;
pub type ClassificationId = Id64;
pub type ClassificationTableId = Id64;

/// Set of element ids as held by the always/never-drawn lists.
pub type ElementSet = std::collections::HashSet<ElementId>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid id '{0}': expected a 0x-prefixed hex string")]
pub struct ParseIdError(pub String);

impl fmt::Display for Id64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl FromStr for Id64 {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| ParseIdError(s.to_string()))?;
        u64::from_str_radix(digits, 16)
            .map(Id64)
            .map_err(|_| ParseIdError(s.to_string()))
    }
}

impl TryFrom<String> for Id64 {
    type Error = ParseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Id64> for String {
    fn from(id: Id64) -> Self {
        id.to_string()
    }
}

impl From<u64> for Id64 {
    fn from(raw: u64) -> Self {
        Id64(raw)
    }
}
