// Strong Types - identifiers and timestamps shared by every layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::AppError;

/// Length of the Crockford base-32 rendering of an identifier
pub const ID_LEN: usize = 26;

/// Timestamp type carried on nodes and edges
pub type Timestamp = DateTime<Utc>;

/// 128-bit lexicographically sortable identifier for users and posts.
///
/// Ordering of `Id` values matches the ordering of their 26-character
/// renderings, so `ORDER BY id` in a store and `Ord` here agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Id(Ulid);

impl Id {
    pub const MIN: Id = Id(Ulid(0));
    pub const MAX: Id = Id(Ulid(u128::MAX));

    /// Fresh identifier for the current instant
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn from_u128(value: u128) -> Self {
        Self(Ulid(value))
    }

    pub fn as_u128(self) -> u128 {
        self.0 .0
    }

    /// Parse a path or message identifier. Anything that is not exactly 26
    /// Crockford base-32 characters is rejected.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        if raw.len() != ID_LEN {
            return Err(AppError::Validation(format!(
                "identifier '{}' must be {} characters long",
                raw, ID_LEN
            )));
        }
        Ulid::from_string(raw)
            .map(Id)
            .map_err(|e| AppError::Validation(format!("identifier '{}' is invalid: {}", raw, e)))
    }

    /// Parse a list of identifiers, failing on the first invalid entry
    pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Self>, AppError> {
        raw.iter().map(|s| Id::parse(s.as_ref())).collect()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Id {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Id::parse(s)
    }
}

impl TryFrom<String> for Id {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Id::parse(&value)
    }
}

impl From<Id> for String {
    fn from(id: Id) -> Self {
        id.to_string()
    }
}

impl From<Ulid> for Id {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}
