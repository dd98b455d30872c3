//! Data models for the NL2SQL MCP Server.
//!
//! This module re-exports all model types used throughout the application.

pub mod answer;
pub mod classification;
pub mod connection;
pub mod retrieval;
pub mod schema;
pub mod sync;

// Re-export commonly used types
pub use answer::{
    AskResponse, ExecutionOutcome, NARRATIVE_ROW_LIMIT, PAYLOAD_ROW_LIMIT, QueryResultPayload, Row,
};
pub use classification::{ColumnClassification, ColumnRole, TableClassification};
pub use connection::{ConnectionProfile, NewConnection, ProfileError, is_loopback_host};
pub use retrieval::{
    ColumnDescriptor, DB_TYPE_POSTGRES, FOREIGN_KEY_RELATIONSHIP, RecordMetadata, Relationship,
    RetrievalOutcome, SCHEMA_RECORD_KIND, SchemaEmbeddingRecord, TableDescriptor, VectorFilter,
    VectorMatch,
};
pub use schema::{
    ColumnSchema, ForeignKey, IndexDefinition, SchemaSnapshot, TableKind, TableSchema,
};
pub use sync::{SyncEvent, SyncReport, SyncStatus};
