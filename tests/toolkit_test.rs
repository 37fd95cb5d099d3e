//! End-to-end tests: mock warehouse, engine, toolkit and MCP service.

use async_trait::async_trait;
use databot_mcp::connection::{
    AuthToken, Authenticator, ConnectionBuilder, ConnectionParameters, ConnectionUrl, Credential,
    DIALECT_NAME, DialectRegistry, TokenKind,
};
use databot_mcp::db::{Engine, EngineOptions, SqlDatabaseOptions, http_client};
use databot_mcp::error::DatabotResult;
use databot_mcp::llm::ChatModel;
use databot_mcp::mcp::{AssemblyOptions, SnowflakeService, assemble_toolkit, assemble_with};
use mockito::Matcher;
use rmcp::model::CallToolResult;
use serde_json::json;
use std::sync::Arc;

struct StaticAuthenticator;

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn token(&self) -> DatabotResult<AuthToken> {
        Ok(AuthToken {
            kind: TokenKind::KeyPairJwt,
            token: "test-jwt".to_string(),
            expires_at: i64::MAX,
        })
    }

    async fn invalidate(&self) {}

    fn name(&self) -> &'static str {
        "static"
    }
}

struct EchoChat;

#[async_trait]
impl ChatModel for EchoChat {
    async fn complete(&self, _system: &str, prompt: &str) -> DatabotResult<String> {
        let query = prompt.lines().next().unwrap_or_default();
        Ok(format!("```sql\n{}\n```", query))
    }

    fn model(&self) -> &str {
        "echo"
    }
}

fn params() -> ConnectionParameters {
    ConnectionParameters::new(
        "tz45198.eu-central-1",
        "PRD_DATABOT",
        "PRD_DATABOT",
        "PRD_DATABOT",
        "PRD_ANALYTICS",
        "COMMON,COMMON_MART",
    )
    .unwrap()
}

fn engine(base_url: &str) -> Engine {
    let params = params();
    let url = ConnectionUrl::native(&params, None)
        .unwrap()
        .with_dialect(DIALECT_NAME)
        .unwrap();
    let dialect = DialectRegistry::with_defaults().resolve(url.scheme()).unwrap();
    Engine::new(
        http_client().unwrap(),
        params,
        url,
        dialect,
        Arc::new(StaticAuthenticator),
        &EngineOptions::default().with_base_url(base_url),
    )
}

fn text_result(columns: &[&str], data: serde_json::Value) -> String {
    let row_type: Vec<_> = columns
        .iter()
        .map(|c| json!({"name": c, "type": "text", "nullable": true}))
        .collect();
    let rows = data.as_array().map(|a| a.len()).unwrap_or(0);
    json!({
        "statementHandle": "h",
        "resultSetMetaData": {"numRows": rows, "rowType": row_type, "partitionInfo": [{"rowCount": rows}]},
        "data": data
    })
    .to_string()
}

async fn service(server: &mockito::ServerGuard) -> SnowflakeService {
    let tools = assemble_with(
        Arc::new(engine(&server.url())),
        Arc::new(EchoChat),
        SqlDatabaseOptions::default(),
    )
    .await
    .unwrap();
    SnowflakeService::new(tools)
}

fn text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|c| c.as_text().map(|t| t.text.clone()))
        .collect()
}

#[tokio::test]
async fn test_list_tables_through_service() {
    let mut server = mockito::Server::new_async().await;
    let tables = server
        .mock("POST", "/api/v2/statements")
        .match_query(Matcher::Any)
        .match_body(Matcher::Regex("information_schema.tables".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(text_result(
            &["TABLE_SCHEMA", "TABLE_NAME", "TABLE_TYPE"],
            json!([
                ["COMMON", "USERS", "BASE TABLE"],
                ["COMMON_MART", "DAILY_ORDERS", "VIEW"]
            ]),
        ))
        .expect(1)
        .create_async()
        .await;

    let service = service(&server).await;
    for _ in 0..2 {
        let result = service.invoke_tool("sql_db_list_tables", Some(json!({}))).await.unwrap();
        assert_eq!(text(&result), "COMMON.USERS, COMMON_MART.DAILY_ORDERS");
    }
    // lazy reflection caches the table list
    tables.assert_async().await;
}

#[tokio::test]
async fn test_query_through_service() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/v2/statements")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({"statement": "SELECT NAME FROM COMMON.USERS"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(text_result(&["NAME"], json!([["Alice"], ["Bob"]])))
        .create_async()
        .await;

    let service = service(&server).await;
    let result = service
        .invoke_tool("sql_db_query", Some(json!({"query": "SELECT NAME FROM COMMON.USERS"})))
        .await
        .unwrap();
    assert_ne!(result.is_error, Some(true));
    assert_eq!(
        text(&result),
        "| NAME  |\n|-------|\n| Alice |\n| Bob   |\n\n*2 rows*"
    );
}

#[tokio::test]
async fn test_statement_error_is_tool_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/v2/statements")
        .match_query(Matcher::Any)
        .with_status(422)
        .with_body(
            json!({"sqlState": "42000", "code": "001003", "message": "syntax error line 1"})
                .to_string(),
        )
        .create_async()
        .await;

    let service = service(&server).await;
    let result = service
        .invoke_tool("sql_db_query", Some(json!({"query": "SELECT NAME FROM COMMON.USERS"})))
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(true));
    assert!(text(&result).contains("syntax error line 1"));
}

#[tokio::test]
async fn test_query_checker_through_service() {
    let server = mockito::Server::new_async().await;
    let service = service(&server).await;
    let result = service
        .invoke_tool(
            "sql_db_query_checker",
            Some(json!({"query": "SELECT * FROM COMMON.USERS"})),
        )
        .await
        .unwrap();
    assert_eq!(text(&result), "SELECT * FROM COMMON.USERS");
}

#[tokio::test]
async fn test_assembling_twice_is_deterministic() {
    let options = || AssemblyOptions {
        database: SqlDatabaseOptions::default(),
        ..AssemblyOptions::default()
    };
    let build = || {
        ConnectionBuilder::default()
            .build_connection(&params(), Credential::ExternalBrowser)
            .unwrap()
    };

    let first = assemble_toolkit(build(), options()).await.unwrap();
    let second = assemble_toolkit(build(), options()).await.unwrap();

    let describe = |tools: &[databot_mcp::mcp::AdaptedTool]| -> Vec<(String, serde_json::Value)> {
        tools
            .iter()
            .map(|t| {
                let d = t.descriptor();
                (
                    d.name.to_string(),
                    serde_json::Value::Object((*d.input_schema).clone()),
                )
            })
            .collect()
    };
    assert_eq!(describe(&first), describe(&second));
    assert_eq!(first.len(), 4);
}
