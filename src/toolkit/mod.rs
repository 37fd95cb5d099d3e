//! SQL toolkit exposed to the agent.
//!
//! The toolkit bundles a [`SqlDatabase`] and a [`ChatModel`] and derives four
//! tools from them, always in this order:
//! - `sql_db_query`: run a read-only query
//! - `sql_db_schema`: describe tables with sample rows
//! - `sql_db_list_tables`: list usable tables
//! - `sql_db_query_checker`: have the chat model review a query

pub mod format;
pub mod query;
pub mod schema;
pub mod sql_validator;

pub use query::{QueryCheckerInput, QueryCheckerTool, QueryInput, QuerySqlDatabaseTool};
pub use schema::{InfoSqlDatabaseTool, ListSqlDatabaseTool, ListTablesInput, SchemaInput};

use crate::db::SqlDatabase;
use crate::error::{DatabotError, DatabotResult};
use crate::llm::ChatModel;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// A named, schema-described callable offered to the agent.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the tool's arguments object.
    fn parameters(&self) -> JsonValue;

    /// Run the tool with JSON arguments and return its text output.
    async fn invoke(&self, input: JsonValue) -> DatabotResult<String>;
}

/// JSON schema for a tool input type.
pub fn input_schema<T: JsonSchema>() -> JsonValue {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(JsonValue::Null)
}

/// Deserialize tool arguments, treating a missing object as empty.
pub fn parse_input<T: DeserializeOwned>(tool: &str, input: JsonValue) -> DatabotResult<T> {
    let input = match input {
        JsonValue::Null => JsonValue::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(input)
        .map_err(|e| DatabotError::invalid_input(format!("Invalid arguments for {}: {}", tool, e)))
}

/// Database and chat model shared by the SQL tools.
#[derive(Clone)]
pub struct Toolkit {
    db: Arc<SqlDatabase>,
    llm: Arc<dyn ChatModel>,
}

impl Toolkit {
    pub fn new(db: Arc<SqlDatabase>, llm: Arc<dyn ChatModel>) -> Self {
        Self { db, llm }
    }

    pub fn db(&self) -> &Arc<SqlDatabase> {
        &self.db
    }

    pub fn llm(&self) -> &Arc<dyn ChatModel> {
        &self.llm
    }

    /// The toolkit's tools, in a fixed order.
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(QuerySqlDatabaseTool::new(self.db.clone())),
            Arc::new(InfoSqlDatabaseTool::new(self.db.clone())),
            Arc::new(ListSqlDatabaseTool::new(self.db.clone())),
            Arc::new(QueryCheckerTool::new(self.llm.clone())),
        ]
    }
}

impl std::fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolkit")
            .field("db", &self.db)
            .field("llm", &self.llm.model())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::database::tests::FakeExecutor;
    use crate::db::SqlDatabaseOptions;
    use std::sync::Mutex;

    /// Chat model returning a canned reply and recording prompts.
    pub(crate) struct FakeChat {
        pub(crate) reply: String,
        pub(crate) prompts: Mutex<Vec<String>>,
    }

    impl FakeChat {
        pub(crate) fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for FakeChat {
        async fn complete(&self, _system: &str, prompt: &str) -> DatabotResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }

        fn model(&self) -> &str {
            "fake"
        }
    }

    pub(crate) fn toolkit(reply: &str) -> Toolkit {
        let db = SqlDatabase::new(Arc::new(FakeExecutor::new()), SqlDatabaseOptions::default());
        Toolkit::new(Arc::new(db), Arc::new(FakeChat::new(reply)))
    }

    #[test]
    fn test_tool_order() {
        let names: Vec<String> = toolkit("")
            .tools()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "sql_db_query",
                "sql_db_schema",
                "sql_db_list_tables",
                "sql_db_query_checker"
            ]
        );
    }

    #[test]
    fn test_parameters_are_objects() {
        for tool in toolkit("").tools() {
            let schema = tool.parameters();
            assert_eq!(schema["type"], "object", "{}", tool.name());
            assert!(!tool.description().is_empty());
        }
    }

    #[test]
    fn test_parse_input_null_is_empty_object() {
        let input: ListTablesInput = parse_input("sql_db_list_tables", JsonValue::Null).unwrap();
        assert_eq!(input.tool_input, "");

        let err = parse_input::<QueryInput>("sql_db_query", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, DatabotError::InvalidInput { .. }));
    }
}
