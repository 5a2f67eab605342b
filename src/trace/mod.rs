//! Trace data types and schema.
//!
//! # Module Organization
//!
//! - [`ids`]: Strongly-typed identifiers, one per table
//! - [`models`]: Record structs for all trace store tables
//! - [`schema`]: SQL schema of the trace store
//! - [`constants`]: Table names, instruction tags, time decoding

pub mod constants;
pub mod ids;
pub mod models;
pub mod schema;

pub use ids::*;
pub use models::*;
pub use schema::{create_schema, SCHEMA_SQL, SCHEMA_VERSION};
