//! Stdio transport for the MCP server.
//!
//! Reads JSON-RPC messages from stdin and writes responses to stdout. Logs
//! go to stderr, so they never corrupt the protocol stream.

use crate::error::{DatabotError, DatabotResult};
use crate::mcp::SnowflakeService;
use crate::transport::{Transport, wait_for_signal};
use rmcp::{ServiceExt, transport::stdio};
use tracing::{info, warn};

pub struct StdioTransport {
    service: SnowflakeService,
}

impl StdioTransport {
    pub fn new(service: SnowflakeService) -> Self {
        Self { service }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> DatabotResult<()> {
        info!("Starting MCP server with stdio transport");

        let running_service = self.service.clone().serve(stdio()).await.map_err(|e| {
            DatabotError::internal(format!("Failed to start stdio transport: {}", e))
        })?;

        tokio::select! {
            result = running_service.waiting() => {
                match result {
                    Ok(_) => info!("Stdio transport completed normally"),
                    Err(e) => {
                        warn!(error = %e, "Stdio transport error");
                        return Err(DatabotError::internal(format!(
                            "Stdio transport error: {}",
                            e
                        )));
                    }
                }
            }
            _ = wait_for_signal() => {
                // the stdin reader can't be interrupted, so exit outright
                info!("Shutdown signal received, exiting");
                std::process::exit(0);
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}
