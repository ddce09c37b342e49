//! The change record every mutation emits on its LDB's notification channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The mutation kind a [`ChangeRecord`] reports.
///
/// The upsert algorithm backs both `put` and `delete` (delete writes
/// `null` through the same path, see the storage layer's deep-set), so in
/// practice only `Put` and `Patch` are ever emitted — "delete" is not a
/// distinct wire event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeEvent {
    Put,
    Patch,
}

/// A single mutation, as published on an LDB's notification channel and
/// delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub event: ChangeEvent,
    /// Full path of the mutation, in segment-array form on the wire
    /// (Postgres NOTIFY payload), joined with `/` before delivery to a
    /// subscriber.
    pub path: Vec<String>,
    pub data: Value,
}

impl ChangeRecord {
    /// The `/`-joined path, used for subscription prefix matching and for
    /// the subscriber-facing record shape.
    pub fn joined_path(&self) -> String {
        self.path.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_lowercase_event() {
        let record = ChangeRecord {
            event: ChangeEvent::Put,
            path: vec!["a".into(), "b".into()],
            data: json!({"c": 1}),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["event"], "put");
        assert_eq!(value["path"], json!(["a", "b"]));
    }

    #[test]
    fn joined_path_uses_slash_separator() {
        let record = ChangeRecord {
            event: ChangeEvent::Patch,
            path: vec!["x".into(), "posts".into()],
            data: Value::Null,
        };
        assert_eq!(record.joined_path(), "x/posts");
    }
}
