//! Error types for the Databot MCP server.
//!
//! This module defines all error types using `thiserror`. Startup errors
//! (configuration, credentials, connection, assembly) terminate the process;
//! errors raised while a tool runs are reported back to the calling agent with
//! an actionable suggestion where one exists.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabotError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Credential error: {message}")]
    Credential { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Tool assembly failed for '{tool}': {message}")]
    Assembly { tool: String, message: String },

    #[error("Statement error: {message}")]
    Statement {
        message: String,
        /// e.g., "42S02" for an unknown object
        sql_state: Option<String>,
        /// Snowflake error code, e.g. "002003"
        code: Option<String>,
    },

    #[error("Permission denied: {operation} - {reason}")]
    Permission { operation: String, reason: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Language model error: {message}")]
    Llm { message: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DatabotError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a credential error.
    pub fn credential(message: impl Into<String>) -> Self {
        Self::Credential {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an assembly error for the named tool.
    pub fn assembly(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Assembly {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a statement error with optional SQL state and error code.
    pub fn statement(
        message: impl Into<String>,
        sql_state: Option<String>,
        code: Option<String>,
    ) -> Self {
        Self::Statement {
            message: message.into(),
            sql_state,
            code,
        }
    }

    /// Create a permission error.
    pub fn permission(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Permission {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a language model error.
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Statement { .. } => Some(
                "Rewrite the query, check it with sql_db_query_checker, and verify table names with sql_db_list_tables",
            ),
            Self::Configuration { .. } => {
                Some("Check the command line flags and required environment variables")
            }
            _ => None,
        }
    }

    /// Whether the calling agent can recover from this error by changing its input.
    ///
    /// These are reported as tool results with `isError` set rather than as
    /// protocol errors, so the agent sees the message and retries.
    pub fn is_agent_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Statement { .. }
                | Self::Permission { .. }
                | Self::InvalidInput { .. }
                | Self::Llm { .. }
        )
    }
}

/// Convert reqwest errors to DatabotError.
impl From<reqwest::Error> for DatabotError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DatabotError::timeout("HTTP request", 0)
        } else if err.is_connect() {
            DatabotError::connection(
                format!("Could not reach host: {}", err),
                "Check network connectivity and the account identifier",
            )
        } else if err.is_decode() {
            DatabotError::internal(format!("Failed to decode response: {}", err))
        } else {
            DatabotError::connection(
                format!("HTTP error: {}", err),
                "Check network connectivity and service status",
            )
        }
    }
}

/// Convert serde_json errors to DatabotError.
impl From<serde_json::Error> for DatabotError {
    fn from(err: serde_json::Error) -> Self {
        DatabotError::internal(format!("Failed to decode response: {}", err))
    }
}

/// Result type alias for Databot operations.
pub type DatabotResult<T> = Result<T, DatabotError>;

/// Build suggestion data as JSON value.
fn suggestion_data(suggestion: Option<&str>) -> Option<serde_json::Value> {
    suggestion.map(|s| serde_json::json!({ "suggestion": s }))
}

/// Convert DatabotError to MCP ErrorData for semantic error categorization.
impl From<DatabotError> for rmcp::ErrorData {
    fn from(err: DatabotError) -> Self {
        match &err {
            DatabotError::InvalidInput { .. } | DatabotError::Permission { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), suggestion_data(err.suggestion()))
            }

            DatabotError::Statement {
                message,
                sql_state,
                ..
            } => {
                let msg = match sql_state {
                    Some(state) => format!("{} (SQLSTATE: {})", message, state),
                    None => message.clone(),
                };
                rmcp::ErrorData::invalid_params(msg, suggestion_data(err.suggestion()))
            }

            DatabotError::Timeout { .. } => rmcp::ErrorData::internal_error(
                err.to_string(),
                suggestion_data(Some("Simplify the query or add a LIMIT clause")),
            ),

            DatabotError::Configuration { .. }
            | DatabotError::Credential { .. }
            | DatabotError::Connection { .. }
            | DatabotError::Assembly { .. }
            | DatabotError::Llm { .. }
            | DatabotError::Internal { .. } => {
                rmcp::ErrorData::internal_error(err.to_string(), suggestion_data(err.suggestion()))
            }
        }
    }
}
