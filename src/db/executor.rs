//! Query execution.
//!
//! Runs a prepared statement against the connection's pool and shapes the
//! rows into JSON. Every failure becomes [`ExecutionOutcome::Failure`]; the
//! executor never returns an error.
//!
//! Statements go through the simple query protocol, so values arrive in
//! text format and NUMERIC keeps its exact digits.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::db::pool::{PoolRegistry, is_connection_error};
use crate::db::types::RowToJson;
use crate::error::EngineError;
use crate::models::{ConnectionProfile, ExecutionOutcome};

/// Runs a prepared statement for a connection.
#[async_trait]
pub trait SqlRunner: Send + Sync {
    async fn run(&self, profile: &ConnectionProfile, sql: &str) -> ExecutionOutcome;
}

/// Runs validated statements through the pool registry.
pub struct QueryExecutor {
    pools: Arc<PoolRegistry>,
    query_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(pools: Arc<PoolRegistry>, query_timeout: Duration) -> Self {
        Self {
            pools,
            query_timeout,
        }
    }

    /// Execute `sql` on the profile's database.
    pub async fn execute(&self, profile: &ConnectionProfile, sql: &str) -> ExecutionOutcome {
        let start = Instant::now();
        let lease = match self.pools.get_or_create(profile).await {
            Ok(lease) => lease,
            Err(e) => return ExecutionOutcome::failure(e.to_string()),
        };

        debug!(
            connection_id = %profile.id,
            sql = %sql,
            timeout_secs = self.query_timeout.as_secs(),
            "Executing query"
        );

        let fetch = {
            use sqlx::Executor;
            lease.pool().fetch(sql).try_collect::<Vec<_>>()
        };
        let result = timeout(self.query_timeout, fetch).await;
        drop(lease);

        match result {
            Ok(Ok(rows)) => {
                let columns = rows.first().map(|r| r.column_names()).unwrap_or_default();
                let json_rows: Vec<_> = rows.iter().map(|r| r.to_json_map()).collect();
                debug!(
                    connection_id = %profile.id,
                    rows = json_rows.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Query finished"
                );
                ExecutionOutcome::Success {
                    columns,
                    row_count: json_rows.len(),
                    rows: json_rows,
                }
            }
            Ok(Err(e)) => {
                if is_connection_error(&e) {
                    self.pools.invalidate(&profile.id).await;
                }
                warn!(connection_id = %profile.id, error = %e, "Query failed");
                ExecutionOutcome::failure(failure_message(e))
            }
            Err(_) => {
                warn!(
                    connection_id = %profile.id,
                    timeout_secs = self.query_timeout.as_secs(),
                    "Query timed out"
                );
                ExecutionOutcome::failure(
                    EngineError::timeout("query execution", self.query_timeout.as_secs() as u32)
                        .to_string(),
                )
            }
        }
    }
}

#[async_trait]
impl SqlRunner for QueryExecutor {
    async fn run(&self, profile: &ConnectionProfile, sql: &str) -> ExecutionOutcome {
        self.execute(profile, sql).await
    }
}

/// Driver error text shown to the user, with the SQLSTATE when known.
fn failure_message(error: sqlx::Error) -> String {
    match &error {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => format!("{} (SQLSTATE {})", db_err.message(), code),
            None => db_err.message().to_string(),
        },
        _ => EngineError::from(error).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolSettings;
    use crate::models::NewConnection;

    fn unreachable_profile() -> ConnectionProfile {
        ConnectionProfile::new(
            "down",
            NewConnection {
                owner_id: "u".into(),
                name: "down".into(),
                host: "127.0.0.1".into(),
                // port 1 on loopback: connection refused
                port: Some(1),
                database: "db".into(),
                username: "app".into(),
                password: "pw".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_failure_message_for_non_database_errors() {
        assert_eq!(
            failure_message(sqlx::Error::PoolClosed),
            "Connection failed: Connection pool is closed"
        );
    }

    #[tokio::test]
    async fn test_unreachable_database_is_a_failure_outcome() {
        let pools = PoolRegistry::new(PoolSettings {
            connect_timeout: Duration::from_secs(2),
            ..PoolSettings::default()
        });
        let executor = QueryExecutor::new(Arc::clone(&pools), Duration::from_secs(5));

        let outcome = executor.execute(&unreachable_profile(), "SELECT 1").await;
        assert!(!outcome.is_success());
        // the failed pool is discarded
        assert!(!pools.contains("down").await);
    }
}
