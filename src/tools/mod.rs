//! MCP tool implementations.
//!
//! - `connection`: register, list, inspect, delete and resync connections
//! - `ask`: answer a question with generated read-only SQL

pub mod ask;
pub mod connection;

pub use ask::{AskInput, AskToolHandler};
pub use connection::{
    ConnectionIdInput, ConnectionOutput, ConnectionToolHandler, CreateConnectionInput,
    DeleteConnectionOutput, ListConnectionsInput, ListConnectionsOutput, SyncStatusOutput,
};
