//! Stdio transport for the MCP server.
//!
//! JSON-RPC messages are read from stdin and written to stdout; logs go to
//! stderr.

use crate::engine::QueryEngine;
use crate::error::{EngineError, EngineResult};
use crate::mcp::Nl2SqlService;
use crate::transport::{Transport, wait_for_signal};
use rmcp::{ServiceExt, transport::stdio};
use std::sync::Arc;
use tracing::{info, warn};

pub struct StdioTransport {
    engine: Arc<QueryEngine>,
    default_owner: String,
}

impl StdioTransport {
    pub fn new(engine: Arc<QueryEngine>, default_owner: impl Into<String>) -> Self {
        Self {
            engine,
            default_owner: default_owner.into(),
        }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> EngineResult<()> {
        info!("Starting MCP server with stdio transport");

        let service = Nl2SqlService::new(self.engine.clone(), self.default_owner.clone());
        let running_service = service.serve(stdio()).await.map_err(|e| {
            EngineError::internal(format!("Failed to start stdio transport: {}", e))
        })?;

        let shutdown_requested = tokio::select! {
            result = running_service.waiting() => {
                match result {
                    Ok(_quit_reason) => info!("Stdio transport completed normally"),
                    Err(e) => {
                        warn!(error = %e, "Stdio transport error");
                        self.engine.shutdown().await;
                        return Err(EngineError::internal(format!("Stdio transport error: {}", e)));
                    }
                }
                false
            }
            _ = wait_for_signal() => {
                info!("Shutdown signal received (send again to force exit)");
                true
            }
        };

        if shutdown_requested {
            tokio::spawn(async {
                wait_for_signal().await;
                warn!("Received second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        self.engine.shutdown().await;

        if shutdown_requested {
            // a blocking stdin read cannot be interrupted by select!
            info!("Exiting process");
            std::process::exit(0);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}
