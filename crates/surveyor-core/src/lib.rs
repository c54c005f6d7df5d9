//! surveyor-core: Declarative schema model and record shaping for the Surveyor asset graph.
//!
//! This crate holds everything the ingestion engine needs that does not touch
//! a graph store:
//! - The schema model (`NodeSchema`, `RelSchema`, `PropertyRef`) that describes
//!   one entity or relationship type per external resource kind
//! - The property resolver that maps schema references onto raw records and
//!   run parameters
//! - The sanitizer that prunes and type-coerces raw records before ingestion
//! - Run parameters (freshness tag, scope, vendor extras)
//! - Export-sink event types for the optional flat-record tee
//! - Configuration and common error types

pub mod config;
pub mod error;
pub mod events;
pub mod params;
pub mod resolve;
pub mod sanitize;
pub mod schema;

pub use error::{CoreError, SchemaError};
pub use params::RunParams;
pub use schema::{
    AutoFormat, LinkDirection, NodeMatcher, NodeSchema, PropertyRef, RelSchema,
};
