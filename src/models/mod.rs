//! Data models for the Databot MCP server.
//!
//! This module re-exports all model types used throughout the application.

pub mod query;
pub mod schema;

// Re-export commonly used types
pub use query::{ColumnMetadata, QueryResult};
pub use schema::{ColumnDefinition, TableEntry, TableMetadata, TableRef, TableType};
