//! # jsonpath-core — shared types for the JSON path storage engine
//!
//! This crate is the pure-contract layer: the path codec, the push-id
//! generator, the change-record shape emitted by every mutation, and the
//! error taxonomy every other crate in the workspace returns.
//!
//! It has no database or HTTP dependency so it can be depended on by both
//! the storage engine and, eventually, alternative client bindings.
//!
//! ## Module overview
//!
//! - [`ldb`] — `LdbName`, the validated `[a-z0-9_-]+` identifier of a logical JSON database
//! - [`path`] — parsing `a/b/c` into root key + segments + canonical JSON path
//! - [`push_id`] — 20-character lexicographically-ordered push ids
//! - [`change`] — `ChangeRecord`, the `{event, path, data}` payload emitted per mutation
//! - [`error`] — `StoreError`, `StoreResult`

pub mod change;
pub mod error;
pub mod ldb;
pub mod path;
pub mod push_id;

pub use change::{ChangeEvent, ChangeRecord};
pub use error::{StoreError, StoreResult};
pub use ldb::LdbName;
pub use path::ParsedPath;
pub use push_id::PushIdGenerator;
