//! Streamable HTTP transport for the MCP server.
//!
//! Each MCP session gets its own `Nl2SqlService`; all of them share one
//! engine.

use crate::engine::QueryEngine;
use crate::error::{EngineError, EngineResult};
use crate::mcp::Nl2SqlService;
use crate::transport::{Transport, wait_for_signal};
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Grace period for open SSE streams after a shutdown signal.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpTransport {
    engine: Arc<QueryEngine>,
    default_owner: String,
    host: String,
    port: u16,
    /// MCP endpoint path, e.g. "/mcp"
    endpoint: String,
}

impl HttpTransport {
    pub fn new(
        engine: Arc<QueryEngine>,
        default_owner: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            default_owner: default_owner.into(),
            host: host.into(),
            port,
            endpoint: endpoint.into(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn router(&self) -> axum::Router {
        let engine = self.engine.clone();
        let default_owner = self.default_owner.clone();
        let service = StreamableHttpService::new(
            move || Ok(Nl2SqlService::new(engine.clone(), default_owner.clone())),
            LocalSessionManager::default().into(),
            Default::default(),
        );

        // nest_service rejects the root path
        if self.endpoint == "/" {
            axum::Router::new().fallback_service(service)
        } else {
            axum::Router::new().nest_service(&self.endpoint, service)
        }
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> EngineResult<()> {
        let bind_addr = self.bind_addr();
        info!(addr = %bind_addr, "Starting MCP server with HTTP transport");

        let app = self.router();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            EngineError::connection(
                format!("Failed to bind to {}: {}", bind_addr, e),
                "Check that the port is available",
            )
        })?;
        info!(endpoint = %self.endpoint, "MCP endpoint ready");

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let notify = shutdown_notify.clone();
        let shutdown_signal = async move {
            wait_for_signal().await;
            notify.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        // open SSE streams can keep the server alive, so the grace period is bounded
        let result = tokio::select! {
            result = server => result.map_err(|e| {
                error!(error = %e, "HTTP server error");
                EngineError::internal(format!("HTTP server error: {}", e))
            }),
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for connections to close (send signal again to force exit)..."
                );
                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => Ok(()),
        };

        if result.is_ok() {
            info!("HTTP server stopped");
        }
        self.engine.shutdown().await;
        result
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn transport(endpoint: &str) -> HttpTransport {
        let engine = QueryEngine::from_config(&Config::default_config()).await.unwrap();
        HttpTransport::new(Arc::new(engine), "local", "127.0.0.1", 8080, endpoint)
    }

    #[tokio::test]
    async fn test_http_transport_creation() {
        let transport = transport("/mcp").await;
        assert_eq!(transport.name(), "http");
        assert_eq!(transport.bind_addr(), "127.0.0.1:8080");
        assert_eq!(transport.endpoint(), "/mcp");
    }

    #[tokio::test]
    async fn test_router_builds_for_root_and_nested_endpoints() {
        let _ = transport("/").await.router();
        let _ = transport("/api/mcp").await.router();
    }
}
