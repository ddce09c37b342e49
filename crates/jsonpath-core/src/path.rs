//! Parses REST paths (`a/b/c`) into the root key used as a row's primary
//! key and the full segment list used as a JSONB path, and builds the
//! minimal nested object ("skeleton") that places a leaf value at a path.

use serde_json::{Map, Value};

use crate::error::StoreError;

/// A non-empty, validated REST path split into its root key and full
/// segment list. `None` (see [`ParsedPath::parse`]) represents the absent
/// path, i.e. "whole document".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    segments: Vec<String>,
}

impl ParsedPath {
    /// Parses `path`. Returns `Ok(None)` for an absent or empty path
    /// ("whole document"); `Err` for malformed input (empty segments).
    pub fn parse(path: Option<&str>) -> Result<Option<Self>, StoreError> {
        let Some(path) = path.filter(|p| !p.is_empty()) else {
            return Ok(None);
        };

        let segments: Vec<String> = path.split('/').map(str::to_owned).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(StoreError::InvalidPath(format!(
                "path {path:?} contains an empty segment"
            )));
        }

        Ok(Some(Self { segments }))
    }

    /// The first segment: the physical row's primary key within the LDB.
    pub fn root_key(&self) -> &str {
        &self.segments[0]
    }

    /// The full segment list, also used as the canonical JSONB path.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Appends a segment, returning the extended path (used by `post` to
    /// address the freshly generated push id under this path).
    pub fn joined(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_owned());
        Self { segments }
    }

    /// The minimal nested object that places `leaf` at this path.
    pub fn build_skeleton(&self, leaf: Value) -> Value {
        build_skeleton(&self.segments, leaf)
    }
}

/// Builds the minimal nested object that places `leaf` at `segments`.
///
/// A single segment yields `{segments[0]: leaf}`; longer paths nest
/// recursively, e.g. `["a", "b"]` yields `{"a": {"b": leaf}}`.
pub fn build_skeleton(segments: &[String], leaf: Value) -> Value {
    match segments.split_first() {
        None => leaf,
        Some((head, rest)) => {
            let mut map = Map::with_capacity(1);
            map.insert(head.clone(), build_skeleton(rest, leaf));
            Value::Object(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_path_is_whole_document() {
        assert_eq!(ParsedPath::parse(None).unwrap(), None);
        assert_eq!(ParsedPath::parse(Some("")).unwrap(), None);
    }

    #[test]
    fn splits_on_slash() {
        let parsed = ParsedPath::parse(Some("a/b/c")).unwrap().unwrap();
        assert_eq!(parsed.root_key(), "a");
        assert_eq!(parsed.segments(), &["a", "b", "c"]);
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(ParsedPath::parse(Some("a//b")).is_err());
        assert!(ParsedPath::parse(Some("a/")).is_err());
    }

    #[test]
    fn single_segment_skeleton() {
        let parsed = ParsedPath::parse(Some("f")).unwrap().unwrap();
        assert_eq!(parsed.build_skeleton(json!(1)), json!({"f": 1}));
    }

    #[test]
    fn nested_skeleton() {
        let parsed = ParsedPath::parse(Some("a/b/c")).unwrap().unwrap();
        assert_eq!(
            parsed.build_skeleton(json!({"d": 1})),
            json!({"a": {"b": {"c": {"d": 1}}}})
        );
    }

    #[test]
    fn joined_appends_segment() {
        let parsed = ParsedPath::parse(Some("posts")).unwrap().unwrap();
        let joined = parsed.joined("abc123");
        assert_eq!(joined.segments(), &["posts", "abc123"]);
    }
}
