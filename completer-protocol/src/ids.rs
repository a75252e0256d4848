//! ID wrapper types for type-safe identifiers.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier for one candidate continuation within a fetch batch.
///
/// Every candidate of every fetch gets a fresh id; pending streams are keyed
/// by it and worker messages carry it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateId(Ulid);

impl CandidateId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CandidateId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for CandidateId {
    fn default() -> Self {
        Self::new()
    }
}
