//! Adapting toolkit tools into MCP tool descriptors.
//!
//! Every toolkit tool becomes one [`AdaptedTool`]: an rmcp [`McpTool`]
//! descriptor plus the handle that runs it. Adaptation is deterministic, so
//! assembling the same toolkit twice yields identical descriptors.

use crate::db::{Engine, SqlDatabase, SqlDatabaseOptions, StatementExecutor};
use crate::error::{DatabotError, DatabotResult};
use crate::llm::bedrock::BedrockChat;
use crate::llm::{BedrockConfig, ChatModel};
use crate::toolkit::{Tool, Toolkit};
use rmcp::model::{JsonObject, Tool as McpTool};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// A toolkit tool paired with its MCP descriptor.
#[derive(Clone)]
pub struct AdaptedTool {
    descriptor: McpTool,
    tool: Arc<dyn Tool>,
}

impl AdaptedTool {
    /// Adapt one tool. Its parameter schema must be a JSON object.
    pub fn new(tool: Arc<dyn Tool>) -> DatabotResult<Self> {
        let schema: JsonObject = match tool.parameters() {
            JsonValue::Object(map) => map,
            other => {
                return Err(DatabotError::assembly(
                    tool.name(),
                    format!("parameter schema must be a JSON object, got {}", json_kind(&other)),
                ));
            }
        };
        if tool.name().trim().is_empty() {
            return Err(DatabotError::assembly("<unnamed>", "tool name must not be empty"));
        }

        let descriptor = McpTool::new(
            tool.name().to_string(),
            tool.description().to_string(),
            Arc::new(schema),
        );
        Ok(Self { descriptor, tool })
    }

    pub fn name(&self) -> &str {
        self.tool.name()
    }

    pub fn descriptor(&self) -> &McpTool {
        &self.descriptor
    }

    /// Forward a call to the underlying tool.
    pub async fn invoke(&self, arguments: JsonValue) -> DatabotResult<String> {
        self.tool.invoke(arguments).await
    }
}

impl std::fmt::Debug for AdaptedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptedTool")
            .field("name", &self.name())
            .finish()
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Adapt a list of tools, keeping their order.
///
/// Duplicate names fail with an assembly error.
pub fn adapt(tools: Vec<Arc<dyn Tool>>) -> DatabotResult<Vec<AdaptedTool>> {
    let mut seen = HashSet::with_capacity(tools.len());
    let mut adapted = Vec::with_capacity(tools.len());
    for tool in tools {
        if !seen.insert(tool.name().to_string()) {
            return Err(DatabotError::assembly(tool.name(), "duplicate tool name"));
        }
        let tool = AdaptedTool::new(tool)?;
        debug!(tool = tool.name(), "Adapted tool");
        adapted.push(tool);
    }
    Ok(adapted)
}

/// Adapt every tool of a toolkit.
pub fn adapt_tools(toolkit: &Toolkit) -> DatabotResult<Vec<AdaptedTool>> {
    adapt(toolkit.tools())
}

/// Options for toolkit assembly.
#[derive(Debug, Clone, Default)]
pub struct AssemblyOptions {
    pub database: SqlDatabaseOptions,
    pub bedrock: BedrockConfig,
}

/// Build the toolkit over an executor and chat model and adapt its tools.
pub async fn assemble_with(
    executor: Arc<dyn StatementExecutor>,
    llm: Arc<dyn ChatModel>,
    options: SqlDatabaseOptions,
) -> DatabotResult<Vec<AdaptedTool>> {
    let db = SqlDatabase::connect(executor, options).await?;
    let toolkit = Toolkit::new(Arc::new(db), llm);
    let tools = adapt_tools(&toolkit)?;
    info!(
        tools = tools.len(),
        model = toolkit.llm().model(),
        "Assembled toolkit"
    );
    Ok(tools)
}

/// Wrap the engine, build the Bedrock chat model and adapt the toolkit.
pub async fn assemble_toolkit(
    engine: Engine,
    options: AssemblyOptions,
) -> DatabotResult<Vec<AdaptedTool>> {
    let llm = BedrockChat::from_env(options.bedrock)?;
    assemble_with(Arc::new(engine), Arc::new(llm), options.database).await
}
