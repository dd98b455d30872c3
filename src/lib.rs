//! NL2SQL MCP Server Library
//!
//! Answers natural-language questions about PostgreSQL databases. Schemas
//! are introspected, embedded into a vector index and mirrored into a
//! knowledge graph; questions are answered by retrieving the relevant
//! tables, generating one read-only SELECT and running it.

pub mod classifier;
pub mod clients;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod graph;
pub mod indexing;
pub mod mcp;
pub mod models;
pub mod retrieval;
pub mod sql;
pub mod sync;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use engine::{EngineParts, QueryEngine};
pub use error::{EngineError, EngineResult};
pub use mcp::Nl2SqlService;
