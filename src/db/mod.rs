//! Target database access.
//!
//! - Connection pool registry
//! - Schema introspection
//! - Query execution and row conversion
//! - Connection profile storage

pub mod executor;
pub mod pool;
pub mod schema;
pub mod store;
pub mod types;

pub use executor::{QueryExecutor, SqlRunner};
pub use pool::{PoolLease, PoolRegistry};
pub use schema::SchemaIntrospector;
pub use store::{MemoryProfileStore, ProfileStore};
