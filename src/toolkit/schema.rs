//! Schema introspection tools.
//!
//! This module implements `sql_db_schema` and `sql_db_list_tables`.

use crate::db::SqlDatabase;
use crate::error::{DatabotError, DatabotResult};
use crate::toolkit::{Tool, input_schema, parse_input};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub const SCHEMA_TOOL_NAME: &str = "sql_db_schema";
pub const LIST_TABLES_TOOL_NAME: &str = "sql_db_list_tables";

const SCHEMA_DESCRIPTION: &str = "Input to this tool is a comma-separated list of tables, output \
is the schema and sample rows for those tables. Be sure that the tables actually exist by calling \
sql_db_list_tables first! Example Input: COMMON.TABLE1, COMMON_MART.TABLE2";

const LIST_TABLES_DESCRIPTION: &str =
    "Input is an empty string, output is a comma-separated list of tables in the database.";

/// Input for the schema tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SchemaInput {
    /// A comma-separated list of the table names for which to return the schema.
    pub table_names: String,
}

/// Input for the list tables tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListTablesInput {
    /// An empty string
    #[serde(default)]
    pub tool_input: String,
}

/// Split a comma-separated table list, dropping blanks.
fn split_table_names(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Describes tables with DDL and sample rows.
pub struct InfoSqlDatabaseTool {
    db: Arc<SqlDatabase>,
}

impl InfoSqlDatabaseTool {
    pub fn new(db: Arc<SqlDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for InfoSqlDatabaseTool {
    fn name(&self) -> &str {
        SCHEMA_TOOL_NAME
    }

    fn description(&self) -> &str {
        SCHEMA_DESCRIPTION
    }

    fn parameters(&self) -> JsonValue {
        input_schema::<SchemaInput>()
    }

    async fn invoke(&self, input: JsonValue) -> DatabotResult<String> {
        let input: SchemaInput = parse_input(SCHEMA_TOOL_NAME, input)?;
        let names = split_table_names(&input.table_names);
        if names.is_empty() {
            return Err(DatabotError::invalid_input(
                "table_names must list at least one table",
            ));
        }
        self.db.table_info(&names).await
    }
}

/// Lists usable tables.
pub struct ListSqlDatabaseTool {
    db: Arc<SqlDatabase>,
}

impl ListSqlDatabaseTool {
    pub fn new(db: Arc<SqlDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for ListSqlDatabaseTool {
    fn name(&self) -> &str {
        LIST_TABLES_TOOL_NAME
    }

    fn description(&self) -> &str {
        LIST_TABLES_DESCRIPTION
    }

    fn parameters(&self) -> JsonValue {
        input_schema::<ListTablesInput>()
    }

    async fn invoke(&self, input: JsonValue) -> DatabotResult<String> {
        let _: ListTablesInput = parse_input(LIST_TABLES_TOOL_NAME, input)?;
        Ok(self.db.usable_table_names().await?.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::tests::toolkit;
    use serde_json::json;

    fn tool(name: &str) -> Arc<dyn Tool> {
        toolkit("")
            .tools()
            .into_iter()
            .find(|t| t.name() == name)
            .unwrap()
    }

    #[test]
    fn test_split_table_names() {
        assert_eq!(
            split_table_names(" COMMON.USERS, ,COMMON_MART.ORDERS "),
            vec!["COMMON.USERS", "COMMON_MART.ORDERS"]
        );
        assert!(split_table_names(" , ").is_empty());
    }

    #[tokio::test]
    async fn test_list_tables() {
        let out = tool(LIST_TABLES_TOOL_NAME).invoke(json!({})).await.unwrap();
        assert_eq!(out, "COMMON.USERS, COMMON_MART.ORDERS");

        let out = tool(LIST_TABLES_TOOL_NAME)
            .invoke(json!({"tool_input": ""}))
            .await
            .unwrap();
        assert_eq!(out, "COMMON.USERS, COMMON_MART.ORDERS");
    }

    #[tokio::test]
    async fn test_schema_tool() {
        let out = tool(SCHEMA_TOOL_NAME)
            .invoke(json!({"table_names": "COMMON.USERS"}))
            .await
            .unwrap();
        assert!(out.contains("CREATE TABLE COMMON.USERS"));
        assert!(out.contains("3 rows from COMMON.USERS table"));
    }

    #[tokio::test]
    async fn test_schema_tool_unknown_table() {
        let err = tool(SCHEMA_TOOL_NAME)
            .invoke(json!({"table_names": "IDV.NOPE"}))
            .await
            .unwrap_err();
        assert!(err.is_agent_recoverable());
    }

    #[tokio::test]
    async fn test_schema_tool_empty_input() {
        let err = tool(SCHEMA_TOOL_NAME)
            .invoke(json!({"table_names": " "}))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabotError::InvalidInput { .. }));
    }
}
