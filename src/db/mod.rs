//! Database access layer.
//!
//! This module provides:
//! - The Snowflake SQL API engine
//! - Session-token execution over the connector query endpoint
//! - The view-aware [`SqlDatabase`] wrapper with lazy reflection
//! - Decoding of result cells by column type

pub mod database;
pub mod engine;
pub mod session;
pub mod types;

pub use database::{SqlDatabase, SqlDatabaseOptions};
pub use engine::{Engine, EngineOptions, StatementExecutor, http_client};
pub use types::{TypeCategory, categorize_type, decode_cell};
