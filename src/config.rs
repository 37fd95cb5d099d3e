//! Configuration handling for the Databot MCP server.
//!
//! This module provides configuration management via CLI arguments and environment variables.

use crate::connection::{ConnectionParameters, CredentialMode};
use crate::db::{EngineOptions, SqlDatabaseOptions};
use crate::error::DatabotResult;
use crate::llm::{BedrockConfig, DATABOT_AGENT_MODEL};
use clap::{Parser, ValueEnum};
use std::time::Duration;

pub const DEFAULT_ACCOUNT: &str = "tz45198.eu-central-1";
pub const DEFAULT_USER: &str = "PRD_DATABOT";
pub const DEFAULT_WAREHOUSE: &str = "PRD_DATABOT";
pub const DEFAULT_ROLE: &str = "PRD_DATABOT";
pub const DEFAULT_DATABASE: &str = "PRD_ANALYTICS";
pub const DEFAULT_SCHEMAS: &str = "COMMON,COMMON_MART,INTERCOM,COMPETITOR_ANALYSIS,IDV";

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8000;
pub const DEFAULT_MCP_ENDPOINT: &str = "/mcp";
pub const DEFAULT_AWS_REGION: &str = "eu-central-1";
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SAMPLE_ROWS: u32 = 3;
pub const DEFAULT_MAX_RESULT_ROWS: u32 = 200;

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// Streamable HTTP (default)
    #[default]
    Http,
    /// Standard input/output (for local CLI integration)
    Stdio,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Stdio => write!(f, "stdio"),
        }
    }
}

/// Configuration for the Databot MCP server.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "databot-mcp",
    about = "Connect to Snowflake and expose SQL tools to LLM agents over MCP",
    version,
    author
)]
pub struct Config {
    /// The Snowflake account ID
    #[arg(long, default_value = DEFAULT_ACCOUNT, env = "DATABOT_SNOWFLAKE_ACCOUNT")]
    pub account: String,

    /// The Snowflake user
    #[arg(long, default_value = DEFAULT_USER, env = "DATABOT_SNOWFLAKE_USER")]
    pub user: String,

    /// The Snowflake warehouse
    #[arg(long, default_value = DEFAULT_WAREHOUSE, env = "DATABOT_SNOWFLAKE_WAREHOUSE")]
    pub warehouse: String,

    /// The Snowflake role
    #[arg(long, default_value = DEFAULT_ROLE, env = "DATABOT_SNOWFLAKE_ROLE")]
    pub role: String,

    /// The Snowflake database
    #[arg(long, default_value = DEFAULT_DATABASE, env = "DATABOT_SNOWFLAKE_DATABASE")]
    pub database: String,

    /// The Snowflake schemas, as a string of comma separated values
    #[arg(long, default_value = DEFAULT_SCHEMAS, env = "DATABOT_SNOWFLAKE_SCHEMA")]
    pub schema: String,

    /// How to authenticate against Snowflake
    #[arg(
        long,
        value_enum,
        default_value = "snowflake-jwt",
        env = "DATABOT_SNOWFLAKE_AUTHENTICATOR"
    )]
    pub authenticator: CredentialMode,

    /// Transport mode (http or stdio)
    #[arg(short, long, value_enum, default_value = "http", env = "MCP_TRANSPORT")]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "MCP_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport)
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "MCP_HTTP_PORT")]
    pub http_port: u16,

    /// MCP endpoint path (only used with http transport)
    #[arg(long, default_value = DEFAULT_MCP_ENDPOINT, env = "MCP_ENDPOINT")]
    pub mcp_endpoint: String,

    /// Bedrock model identifier used by the query checker
    #[arg(long, default_value = DATABOT_AGENT_MODEL, env = "DATABOT_AGENT_MODEL")]
    pub model: String,

    /// AWS region hosting the Bedrock runtime
    #[arg(long, default_value = DEFAULT_AWS_REGION, env = "AWS_REGION")]
    pub aws_region: String,

    /// Use the non-streaming Converse API
    #[arg(long, env = "DATABOT_DISABLE_STREAMING")]
    pub disable_streaming: bool,

    /// Statement timeout in seconds (0 for no limit)
    #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT_SECS, env = "DATABOT_QUERY_TIMEOUT")]
    pub query_timeout: u64,

    /// Sample rows included in table descriptions
    #[arg(long, default_value_t = DEFAULT_SAMPLE_ROWS, env = "DATABOT_SAMPLE_ROWS")]
    pub sample_rows: u32,

    /// Maximum rows returned by the query tool
    #[arg(long, default_value_t = DEFAULT_MAX_RESULT_ROWS, env = "DATABOT_MAX_RESULT_ROWS")]
    pub max_result_rows: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DATABOT_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DATABOT_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            account: DEFAULT_ACCOUNT.to_string(),
            user: DEFAULT_USER.to_string(),
            warehouse: DEFAULT_WAREHOUSE.to_string(),
            role: DEFAULT_ROLE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            schema: DEFAULT_SCHEMAS.to_string(),
            authenticator: CredentialMode::KeyPair,
            transport: TransportMode::Http,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            mcp_endpoint: DEFAULT_MCP_ENDPOINT.to_string(),
            model: DATABOT_AGENT_MODEL.to_string(),
            aws_region: DEFAULT_AWS_REGION.to_string(),
            disable_streaming: false,
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            sample_rows: DEFAULT_SAMPLE_ROWS,
            max_result_rows: DEFAULT_MAX_RESULT_ROWS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Build the warehouse connection parameters from the CLI values.
    pub fn connection_parameters(&self) -> DatabotResult<ConnectionParameters> {
        ConnectionParameters::new(
            &self.account,
            &self.user,
            &self.warehouse,
            &self.role,
            &self.database,
            &self.schema,
        )
    }

    /// Build the Bedrock client configuration.
    pub fn bedrock_config(&self) -> BedrockConfig {
        BedrockConfig {
            model_id: self.model.clone(),
            region: self.aws_region.clone(),
            streaming: !self.disable_streaming,
            ..BedrockConfig::default()
        }
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Get the statement timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions::default().with_statement_timeout(self.query_timeout_duration())
    }

    /// Database wrapper options: views included, reflection lazy.
    pub fn database_options(&self) -> SqlDatabaseOptions {
        SqlDatabaseOptions {
            sample_rows_in_table_info: self.sample_rows,
            max_result_rows: self.max_result_rows as usize,
            ..SqlDatabaseOptions::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport, TransportMode::Http);
        assert_eq!(config.authenticator, CredentialMode::KeyPair);
        assert_eq!(config.http_bind_addr(), "127.0.0.1:8000");
        assert_eq!(config.mcp_endpoint, "/mcp");
    }

    #[test]
    fn test_cli_defaults_match_production() {
        let config = Config::try_parse_from(["databot-mcp"]).unwrap();
        assert_eq!(config.account, "tz45198.eu-central-1");
        assert_eq!(config.user, "PRD_DATABOT");
        assert_eq!(config.database, "PRD_ANALYTICS");
        assert_eq!(config.authenticator, CredentialMode::KeyPair);

        let params = config.connection_parameters().unwrap();
        assert_eq!(
            params.schemas(),
            ["COMMON", "COMMON_MART", "INTERCOM", "COMPETITOR_ANALYSIS", "IDV"]
        );
    }

    #[test]
    fn test_cli_overrides() {
        let config = Config::try_parse_from([
            "databot-mcp",
            "--account",
            "xy12345.us-east-1",
            "--schema",
            "COMMON,COMMON_MART",
            "--authenticator",
            "externalbrowser",
            "--transport",
            "stdio",
        ])
        .unwrap();
        assert_eq!(config.account, "xy12345.us-east-1");
        assert_eq!(config.authenticator, CredentialMode::ExternalBrowser);
        assert_eq!(config.transport, TransportMode::Stdio);

        let params = config.connection_parameters().unwrap();
        assert_eq!(params.schemas(), ["COMMON", "COMMON_MART"]);
    }

    #[test]
    fn test_empty_schema_is_configuration_error() {
        let config = Config {
            schema: " , ".to_string(),
            ..Config::default()
        };
        let err = config.connection_parameters().unwrap_err();
        assert!(matches!(err, crate::DatabotError::Configuration { .. }));
    }

    #[test]
    fn test_bedrock_config_streaming_toggle() {
        let config = Config::default();
        assert!(config.bedrock_config().streaming);

        let config = Config {
            disable_streaming: true,
            ..Config::default()
        };
        assert!(!config.bedrock_config().streaming);
        assert_eq!(config.bedrock_config().temperature, 0.0);
    }

    #[test]
    fn test_query_timeout_duration() {
        let config = Config {
            query_timeout: 45,
            ..Config::default()
        };
        assert_eq!(config.query_timeout_duration(), Duration::from_secs(45));
    }

    #[test]
    fn test_zero_query_timeout_is_unlimited() {
        let config = Config::try_parse_from(["databot-mcp", "--query-timeout", "0"]).unwrap();
        assert!(config.engine_options().statement_timeout.is_zero());
    }

    #[test]
    fn test_database_options() {
        let config = Config {
            sample_rows: 5,
            max_result_rows: 50,
            ..Config::default()
        };
        let options = config.database_options();
        assert!(options.view_support);
        assert!(options.lazy_table_reflection);
        assert_eq!(options.sample_rows_in_table_info, 5);
        assert_eq!(options.max_result_rows, 50);
        assert_eq!(
            config.engine_options().statement_timeout,
            Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS)
        );
    }
}
