//! Core types for the Fathom document search server.
//!
//! This crate holds everything the schema engine, the shard pool and the
//! HTTP layer agree on:
//!
//! - [`Value`]: the tagged value used both as the wire form of documents
//!   and as the in-memory representation of the schema itself
//! - [`FieldType`] / [`FullType`] / [`TypeIndex`]: the closed type system
//!   driving how fields are indexed
//! - [`serialise`]: canonical, lexicographically-ordered byte encodings
//!   per field type, with type guessing for untyped string values
//! - [`Document`] and the [`Backend`] trait: the built-document model and
//!   the seam to the underlying index engine
//! - [`Endpoint`] / [`Endpoints`]: logical index identifiers with stable
//!   fingerprints used for shard routing

pub mod backend;
pub mod datetime;
pub mod document;
pub mod endpoint;
pub mod error;
pub mod htm;
pub mod query;
pub mod serialise;
pub mod types;
pub mod value;

pub use backend::{Backend, BackendFactory, Hit, MemoryBackend, MemoryBackendFactory};
pub use document::Document;
pub use endpoint::{Endpoint, Endpoints};
pub use error::{Error, Result};
pub use query::Query;
pub use types::{FieldType, FullType, TypeIndex};
pub use value::{Object, Value};

/// Maximum number of terms ORed together at any single accuracy level
/// when synthesising a range query.
pub const MAX_TERMS: usize = 256;

/// Maximum number of dotted path components a field name may have.
pub const LIMIT_PARTIAL_PATHS_DEPTH: usize = 10;

/// Sentinel for "no value slot assigned".
pub const BAD_SLOT: u32 = u32::MAX;

/// Value slot holding the serialised document id.
pub const DB_SLOT_ID: u32 = 0;

/// Slots below this number are reserved for internal data.
pub const DB_SLOT_RESERVED: u32 = 10;

/// Backend metadata key under which the schema is persisted.
pub const DB_META_SCHEMA: &str = "schema";
