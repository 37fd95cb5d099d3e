//! MCP server integration module.
//!
//! Adapts the SQL toolkit into MCP tools and serves them with the rmcp
//! framework.

pub mod adapter;
pub mod service;

pub use adapter::{AdaptedTool, AssemblyOptions, adapt_tools, assemble_toolkit, assemble_with};
pub use service::{SERVER_NAME, SnowflakeService};
