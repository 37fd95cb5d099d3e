//! Databot MCP Server Library
//!
//! Connects to a Snowflake warehouse, builds a SQL toolkit over it and a
//! Bedrock chat model, and serves the toolkit's tools over MCP.

pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod llm;
pub mod mcp;
pub mod models;
pub mod toolkit;
pub mod transport;

pub use config::Config;
pub use error::{DatabotError, DatabotResult};
pub use mcp::SnowflakeService;
