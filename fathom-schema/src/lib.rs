//! Schema engine for the Fathom document search server.
//!
//! A schema is a self-describing, dynamically-evolvable properties tree
//! mirroring the structure of the documents it indexes. Every field
//! carries a per-path specification (type, term prefix, value slot,
//! accuracy buckets, tokenisation flags) that is *fed* from the stored
//! schema, overridden by user-supplied reserved keys, and *written*
//! back for newly discovered fields.
//!
//! Entry points:
//!
//! - [`Schema::index`] walks a document, producing the built
//!   [`Document`](fathom_core::Document) plus the stored-data echo
//! - [`Schema::update`] reshapes the schema in place (widening only)
//! - [`Schema::write`] installs a schema wholesale
//! - [`Schema::get_data_field`] resolves a (possibly dynamic) field
//!   path at query time
//! - [`generate_terms`] turns values and ranges into accuracy-bucket
//!   terms and queries

pub mod generate_terms;
pub mod ids;
pub mod reserved;
pub mod schema;
pub mod spc;
pub mod text;

pub use ids::{ScriptHook, ShardStats, SingleShard};
pub use schema::{DataField, IndexOutcome, Schema};
pub use spc::{Flags, Prefix, RequiredSpc, Specification};
