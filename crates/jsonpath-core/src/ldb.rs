//! The logical JSON database name: the service's primary identifier and,
//! once validated, a value that is safe to interpolate as a quoted SQL
//! identifier (table name, NOTIFY channel).

use std::fmt;

use crate::error::StoreError;

/// A validated logical-database name, matching `[a-z0-9_-]+`.
///
/// Validation happens once, at construction, so every downstream consumer
/// (table DDL, LISTEN/NOTIFY channel selection) can treat the inner string
/// as an identifier that cannot carry a SQL injection payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LdbName(String);

impl LdbName {
    pub fn parse(name: impl Into<String>) -> Result<Self, StoreError> {
        let name = name.into();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(StoreError::InvalidPath(format!(
                "invalid database name {name:?}: must match [a-z0-9_-]+"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for LdbName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for LdbName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
