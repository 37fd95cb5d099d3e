//! MCP service implementation using rmcp.
//!
//! `SnowflakeService` serves a fixed list of adapted tools. Tools are
//! assembled at startup, so `list_tools` and `call_tool` are implemented
//! directly instead of through the tool router macros.

use crate::mcp::adapter::AdaptedTool;
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Content, Implementation, ListToolsResult,
        PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo, Tool as McpTool,
    },
    service::RequestContext,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

/// Name the server advertises to clients.
pub const SERVER_NAME: &str = "Snowflake";

#[derive(Clone)]
pub struct SnowflakeService {
    tools: Arc<Vec<AdaptedTool>>,
}

impl SnowflakeService {
    /// Create a service over already adapted tools. An empty list is valid.
    pub fn new(tools: Vec<AdaptedTool>) -> Self {
        Self {
            tools: Arc::new(tools),
        }
    }

    /// Descriptors of every served tool, in assembly order.
    pub fn tool_descriptors(&self) -> Vec<McpTool> {
        self.tools.iter().map(|t| t.descriptor().clone()).collect()
    }

    fn find(&self, name: &str) -> Option<&AdaptedTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Run a tool by name.
    ///
    /// Errors the agent can act on come back as tool results with `isError`
    /// set; everything else is a protocol error.
    pub async fn invoke_tool(
        &self,
        name: &str,
        arguments: Option<JsonValue>,
    ) -> Result<CallToolResult, McpError> {
        let Some(tool) = self.find(name) else {
            return Err(McpError::invalid_params(
                format!("Unknown tool '{}'", name),
                Some(serde_json::json!({
                    "suggestion": "Call tools/list to see the available tools"
                })),
            ));
        };

        info!(tool = name, "Calling tool");
        match tool.invoke(arguments.unwrap_or(JsonValue::Null)).await {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) if e.is_agent_recoverable() => {
                warn!(tool = name, error = %e, "Tool returned an error");
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "Error: {}",
                    e
                ))]))
            }
            Err(e) => {
                warn!(tool = name, error = %e, "Tool failed");
                Err(e.into())
            }
        }
    }
}

impl std::fmt::Debug for SnowflakeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeService")
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl ServerHandler for SnowflakeService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_owned(),
                title: Some("Snowflake SQL toolkit".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "SQL tools for the Snowflake analytics warehouse.\n\
                \n\
                ## Workflow\n\
                1. Call `sql_db_list_tables` to see the available tables\n\
                2. Call `sql_db_schema` with the relevant tables (e.g. `COMMON.USERS`)\n\
                3. Write a query and check it with `sql_db_query_checker`\n\
                4. Run it with `sql_db_query`\n\
                \n\
                Only read-only statements are allowed. Tables are named `SCHEMA.TABLE`."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.tool_descriptors()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.invoke_tool(&request.name, request.arguments.map(JsonValue::Object))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::adapter::adapt_tools;
    use crate::toolkit::tests::toolkit;
    use serde_json::json;

    fn service() -> SnowflakeService {
        SnowflakeService::new(adapt_tools(&toolkit("SELECT 1")).unwrap())
    }

    fn text(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.clone()))
            .collect()
    }

    #[test]
    fn test_server_info() {
        let info = service().get_info();
        assert_eq!(info.server_info.name, "Snowflake");
        assert!(info.capabilities.tools.is_some());
    }

    #[test]
    fn test_empty_service_advertises_no_tools() {
        let service = SnowflakeService::new(Vec::new());
        assert!(service.tool_descriptors().is_empty());
        assert_eq!(service.get_info().server_info.name, "Snowflake");
    }

    #[tokio::test]
    async fn test_call_list_tables() {
        let result = service()
            .invoke_tool("sql_db_list_tables", None)
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));
        assert_eq!(text(&result), "COMMON.USERS, COMMON_MART.ORDERS");
    }

    #[tokio::test]
    async fn test_recoverable_error_is_tool_error() {
        let result = service()
            .invoke_tool("sql_db_query", Some(json!({"query": "DELETE FROM COMMON.USERS"})))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert!(text(&result).starts_with("Error: Permission denied"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_invalid_params() {
        let err = service().invoke_tool("drop_everything", None).await.unwrap_err();
        assert!(err.message.contains("Unknown tool"));
    }
}
