//! Query execution and query checking tools.

use crate::db::SqlDatabase;
use crate::error::DatabotResult;
use crate::llm::ChatModel;
use crate::toolkit::format::format_as_markdown;
use crate::toolkit::{Tool, input_schema, parse_input, sql_validator};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;

pub const QUERY_TOOL_NAME: &str = "sql_db_query";
pub const QUERY_CHECKER_TOOL_NAME: &str = "sql_db_query_checker";

const QUERY_DESCRIPTION: &str = "Input to this tool is a detailed and correct SQL query, output is a \
result from the database. If the query is not correct, an error message will be returned. If an \
error is returned, rewrite the query, check the query, and try again. If you encounter an issue \
with an invalid identifier, use sql_db_schema to query the correct table fields.";

const QUERY_CHECKER_DESCRIPTION: &str = "Use this tool to double check if your query is correct \
before executing it. Always use this tool before executing a query with sql_db_query!";

const QUERY_CHECKER_SYSTEM: &str = "You are a careful SQL reviewer. You answer with SQL only.";

/// Input for the query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryInput {
    /// A detailed and correct SQL query.
    pub query: String,
}

/// Runs read-only SQL and returns a markdown table.
pub struct QuerySqlDatabaseTool {
    db: Arc<SqlDatabase>,
}

impl QuerySqlDatabaseTool {
    pub fn new(db: Arc<SqlDatabase>) -> Self {
        Self { db }
    }

    pub async fn query(&self, sql: &str) -> DatabotResult<String> {
        sql_validator::validate_readonly(sql)?;
        let result = self.db.run(sql).await?;
        info!(
            rows = result.row_count(),
            truncated = result.truncated,
            execution_time_ms = result.execution_time_ms,
            "Query executed"
        );
        Ok(format_as_markdown(&result))
    }
}

#[async_trait]
impl Tool for QuerySqlDatabaseTool {
    fn name(&self) -> &str {
        QUERY_TOOL_NAME
    }

    fn description(&self) -> &str {
        QUERY_DESCRIPTION
    }

    fn parameters(&self) -> JsonValue {
        input_schema::<QueryInput>()
    }

    async fn invoke(&self, input: JsonValue) -> DatabotResult<String> {
        let input: QueryInput = parse_input(QUERY_TOOL_NAME, input)?;
        self.query(&input.query).await
    }
}

/// Input for the query checker tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryCheckerInput {
    /// A detailed and SQL query to be checked.
    pub query: String,
}

/// Asks the chat model to review a query for common mistakes.
pub struct QueryCheckerTool {
    llm: Arc<dyn ChatModel>,
}

impl QueryCheckerTool {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self { llm }
    }

    /// Prompt sent to the chat model for `query`.
    pub fn prompt(&self, query: &str) -> String {
        format!(
            "{query}\n\
             Double check the {dialect} query above for common mistakes, including:\n\
             - Using NOT IN with NULL values\n\
             - Using UNION when UNION ALL should have been used\n\
             - Using BETWEEN for exclusive ranges\n\
             - Data type mismatch in predicates\n\
             - Properly quoting identifiers\n\
             - Using the correct number of arguments for functions\n\
             - Casting to the correct data type\n\
             - Using the proper columns for joins\n\
             \n\
             If there are any of the above mistakes, rewrite the query. If there are no mistakes, \
             just reproduce the original query.\n\
             \n\
             Output the final SQL query only.\n\
             \n\
             SQL Query: ",
            query = query,
            dialect = crate::connection::url::NATIVE_DIALECT,
        )
    }
}

/// Remove a surrounding markdown code fence, if the model added one.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_suffix("```").unwrap_or(body);
    // drop the info string ("sql") on the opening line
    match body.split_once('\n') {
        Some((info, rest)) if !info.trim().contains(' ') => rest.trim(),
        _ => body.trim(),
    }
}

#[async_trait]
impl Tool for QueryCheckerTool {
    fn name(&self) -> &str {
        QUERY_CHECKER_TOOL_NAME
    }

    fn description(&self) -> &str {
        QUERY_CHECKER_DESCRIPTION
    }

    fn parameters(&self) -> JsonValue {
        input_schema::<QueryCheckerInput>()
    }

    async fn invoke(&self, input: JsonValue) -> DatabotResult<String> {
        let input: QueryCheckerInput = parse_input(QUERY_CHECKER_TOOL_NAME, input)?;
        let reply = self
            .llm
            .complete(QUERY_CHECKER_SYSTEM, &self.prompt(&input.query))
            .await?;
        tracing::debug!(model = self.llm.model(), "Query checked");
        Ok(strip_code_fence(&reply).to_string())
    }
}
