//! Databot MCP Server - Main entry point.
//!
//! Connects to Snowflake, assembles the SQL toolkit and serves it over MCP
//! under the server name "Snowflake".

use clap::Parser;
use databot_mcp::config::{Config, TransportMode};
use databot_mcp::connection::{ConnectionBuilder, Credential, DialectRegistry};
use databot_mcp::mcp::{AssemblyOptions, SnowflakeService, assemble_toolkit};
use databot_mcp::transport::{HttpTransport, StdioTransport, Transport};
use databot_mcp::{DatabotError, DatabotResult};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; stdout carries the protocol in stdio mode.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(config: Config) -> DatabotResult<()> {
    let params = config.connection_parameters()?;
    info!(
        account = params.account(),
        database = params.database(),
        schemas = %params.schemas().join(","),
        authenticator = %config.authenticator,
        "Connecting to Snowflake"
    );

    let credential = Credential::resolve(config.authenticator)?;
    let builder = ConnectionBuilder::new(DialectRegistry::with_defaults(), config.engine_options());
    let engine = builder.build_connection(&params, credential)?;

    let tools = assemble_toolkit(
        engine,
        AssemblyOptions {
            database: config.database_options(),
            bedrock: config.bedrock_config(),
        },
    )
    .await?;
    let service = SnowflakeService::new(tools);

    match config.transport {
        TransportMode::Stdio => StdioTransport::new(service).run().await,
        TransportMode::Http => {
            let transport = HttpTransport::new(
                service,
                &config.http_host,
                config.http_port,
                &config.mcp_endpoint,
            );
            info!(
                transport = transport.name(),
                address = %transport.bind_addr(),
                endpoint = transport.endpoint(),
                "Using HTTP transport"
            );
            transport.run().await
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), DatabotError> {
    let config = Config::parse();
    init_tracing(&config);

    info!(
        transport = %config.transport,
        "Starting Databot MCP Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = run(config).await {
        match e.suggestion() {
            Some(suggestion) => error!(error = %e, suggestion, "Server error"),
            None => error!(error = %e, "Server error"),
        }
        return Err(e);
    }

    info!("Server shutdown complete");
    Ok(())
}
