//! Error types for the NL2SQL MCP server.
//!
//! Every stage of the question-answering pipeline reports failures through
//! [`EngineError`]. Query-path stages convert these into explanatory answers;
//! background stages record them on the sync supervisor. Only the MCP layer
//! turns them into protocol errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Target database unreachable or credentials rejected.
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    /// Statement rejected by the read-only gate.
    #[error("Permission denied: {operation} - {reason}")]
    Permission { operation: String, reason: String },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Connection not found: {connection_id}")]
    ConnectionNotFound { connection_id: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Embedding, vector index or graph failure while syncing a connection.
    #[error("Indexing failed during {stage}: {message}")]
    Indexing { stage: String, message: String },

    /// Model output was empty or not a SELECT.
    #[error("{message}")]
    Generation { message: String },

    #[error("Invalid SQL: {message}")]
    Validation { message: String },

    /// Non-success response or transport failure from an HTTP collaborator.
    #[error("{service} request failed: {message}")]
    Upstream {
        service: String,
        message: String,
        retryable: bool,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn permission(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Permission {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn connection_not_found(connection_id: impl Into<String>) -> Self {
        Self::ConnectionNotFound {
            connection_id: connection_id.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn indexing(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Indexing {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Upstream failure worth retrying (transport errors, 429, 5xx).
    pub fn upstream_transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Upstream { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Short stage label used in sync status reports.
    pub fn stage(&self) -> &str {
        match self {
            Self::Connection { .. } | Self::ConnectionNotFound { .. } => "connect",
            Self::Database { .. } | Self::Schema { .. } => "introspect",
            Self::Indexing { stage, .. } => stage,
            Self::Upstream { service, .. } => service,
            Self::Timeout { operation, .. } => operation,
            _ => "internal",
        }
    }
}

/// Convert sqlx errors to EngineError.
impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => EngineError::connection(
                msg.to_string(),
                "Check the host, port, database name and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                EngineError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => EngineError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => EngineError::timeout("connection pool acquire", 10),
            sqlx::Error::PoolClosed => EngineError::connection(
                "Connection pool is closed",
                "Retry the request to open a fresh pool",
            ),
            sqlx::Error::Io(io_err) => EngineError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => EngineError::connection(
                format!("TLS error: {}", tls_err),
                "Non-loopback hosts require TLS; verify the server accepts SSL connections",
            ),
            sqlx::Error::Protocol(msg) => EngineError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => EngineError::schema(
                format!("Type not found: {}", type_name),
                type_name.to_string(),
            ),
            sqlx::Error::ColumnNotFound(col) => {
                EngineError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => EngineError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                EngineError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => {
                EngineError::internal(format!("Decode error: {}", source))
            }
            sqlx::Error::WorkerCrashed => EngineError::internal("Database worker crashed"),
            _ => EngineError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Convert reqwest errors to EngineError.
///
/// Timeouts and connect failures are retryable; everything else is terminal.
impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        let service = err
            .url()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());
        if err.is_timeout() || err.is_connect() {
            EngineError::upstream_transient(service, err.to_string())
        } else if let Some(status) = err.status() {
            let message = format!("HTTP {}", status);
            if status.is_server_error() || status.as_u16() == 429 {
                EngineError::upstream_transient(service, message)
            } else {
                EngineError::upstream(service, message)
            }
        } else {
            EngineError::upstream(service, err.to_string())
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::internal(format!("JSON error: {}", err))
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Build suggestion data as JSON value.
fn suggestion_data(suggestion: Option<&str>) -> Option<serde_json::Value> {
    suggestion.map(|s| serde_json::json!({ "suggestion": s }))
}

/// Convert EngineError to MCP ErrorData for semantic error categorization.
/// Includes the suggestion field in the `data` object when available.
impl From<EngineError> for rmcp::ErrorData {
    fn from(err: EngineError) -> Self {
        match &err {
            EngineError::InvalidInput { .. }
            | EngineError::Permission { .. }
            | EngineError::Schema { .. }
            | EngineError::Validation { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), suggestion_data(err.suggestion()))
            }

            EngineError::ConnectionNotFound { .. } => rmcp::ErrorData::resource_not_found(
                err.to_string(),
                suggestion_data(Some("Use list_connections to see registered connections")),
            ),

            EngineError::Connection { suggestion, .. } => {
                rmcp::ErrorData::internal_error(err.to_string(), suggestion_data(Some(suggestion)))
            }
            EngineError::Timeout { .. } => rmcp::ErrorData::internal_error(
                err.to_string(),
                suggestion_data(Some("Retry later or raise the configured timeout")),
            ),

            EngineError::Database {
                message,
                sql_state,
                suggestion,
            } => {
                let msg = match sql_state {
                    Some(code) => format!("{} (SQLSTATE: {})", message, code),
                    None => message.clone(),
                };
                rmcp::ErrorData::invalid_params(msg, suggestion_data(Some(suggestion)))
            }

            EngineError::Indexing { .. }
            | EngineError::Generation { .. }
            | EngineError::Upstream { .. }
            | EngineError::Internal { .. } => {
                rmcp::ErrorData::internal_error(err.to_string(), suggestion_data(err.suggestion()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_generation_error_displays_bare_message() {
        let err = EngineError::generation("Generated query must include SELECT statement");
        assert_eq!(
            err.to_string(),
            "Generated query must include SELECT statement"
        );
    }

    #[test]
    fn test_error_suggestion() {
        let err = EngineError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(EngineError::validation("x").suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(EngineError::timeout("query", 30).is_retryable());
        assert!(EngineError::connection("err", "sugg").is_retryable());
        assert!(EngineError::upstream_transient("api.openai.com", "HTTP 503").is_retryable());
        assert!(!EngineError::upstream("api.openai.com", "HTTP 401").is_retryable());
        assert!(!EngineError::permission("INSERT", "read-only").is_retryable());
        assert!(!EngineError::indexing("embed", "bad dims").is_retryable());
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(EngineError::indexing("upsert", "x").stage(), "upsert");
        assert_eq!(EngineError::connection("x", "y").stage(), "connect");
        assert_eq!(EngineError::internal("x").stage(), "internal");
    }

    #[test]
    fn test_invalid_input_maps_to_invalid_params() {
        let mcp_err: rmcp::ErrorData = EngineError::invalid_input("bad input").into();
        // invalid_params uses -32602
        assert_eq!(mcp_err.code.0, -32602);
    }

    #[test]
    fn test_validation_maps_to_invalid_params() {
        let mcp_err: rmcp::ErrorData = EngineError::validation("unbalanced").into();
        assert_eq!(mcp_err.code.0, -32602);
    }

    #[test]
    fn test_connection_not_found_maps_to_resource_not_found() {
        let mcp_err: rmcp::ErrorData = EngineError::connection_not_found("conn1").into();
        // resource_not_found uses -32002 in rmcp
        assert_eq!(mcp_err.code.0, -32002);
    }

    #[test]
    fn test_connection_maps_to_internal_error() {
        let mcp_err: rmcp::ErrorData = EngineError::connection("failed", "try again").into();
        // internal_error uses -32603
        assert_eq!(mcp_err.code.0, -32603);
        assert!(mcp_err.data.is_some());
    }

    #[test]
    fn test_database_error_includes_sql_state() {
        let err = EngineError::database("relation does not exist", Some("42P01".into()), "x");
        let mcp_err: rmcp::ErrorData = err.into();
        assert!(mcp_err.message.contains("SQLSTATE: 42P01"));
    }
}
