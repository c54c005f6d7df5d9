//! surveyor-graph: the Neo4j ingestion and cleanup engine.
//!
//! This crate turns the declarative schemas from `surveyor-core` into
//! executable graph writes:
//! - `querybuilder` compiles a schema into one parameterized batch-ingestion
//!   query plus idempotent index DDL
//! - `cleanupbuilder` compiles the matching mark-and-sweep delete queries,
//!   scoped so one tenant's sync can never remove another tenant's data
//! - `loader` drives the compiled queries: ensures indexes (with retry),
//!   batches records into transactions, and optionally tees every write to
//!   an export sink
//! - `statement`/`job` sequence compiled or file-authored statements as a
//!   named unit of work
//!
//! The caller owns the store connection: build a [`GraphClient`] from
//! settings and pass it in. The engine holds no global state.

pub mod cleanupbuilder;
pub mod client;
pub mod job;
pub mod loader;
pub mod querybuilder;
pub mod statement;

mod bolt;

pub use client::{GraphClient, GraphError};
pub use job::GraphJob;
pub use loader::{Loader, DEFAULT_BATCH_SIZE};
pub use statement::GraphStatement;
