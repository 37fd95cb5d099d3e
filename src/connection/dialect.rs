//! SQL dialects and the dialect registry.
//!
//! A dialect decides which schemas are introspected, how tables are named to
//! the agent, and which catalog queries the database wrapper runs. Dialects
//! are looked up by the connection URL's scheme, so the dialect must be
//! registered before the engine is built.

use crate::error::{DatabotError, DatabotResult};
use crate::models::TableRef;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Name of the multi-schema dialect the server binds its connection to.
pub const DIALECT_NAME: &str = "MultiSchema";

/// SQL generation and introspection adapter for a warehouse connection.
pub trait Dialect: Send + Sync + std::fmt::Debug {
    /// Registered name. Lookups are case-insensitive.
    fn name(&self) -> &str;

    /// Schemas whose tables are visible through this dialect.
    fn introspected_schemas(&self, configured: &[String]) -> Vec<String>;

    /// Name under which a table is presented to the agent.
    fn display_name(&self, table: &TableRef) -> String;

    /// Resolve a name typed by the agent back to a table reference.
    fn resolve_table_name(&self, name: &str, configured: &[String]) -> Option<TableRef>;

    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Fully qualified, quoted `"DB"."SCHEMA"."TABLE"` reference.
    fn qualified_name(&self, database: &str, table: &TableRef) -> String {
        format!(
            "{}.{}.{}",
            self.quote_identifier(database),
            self.quote_identifier(&table.schema),
            self.quote_identifier(&table.name)
        )
    }

    /// Catalog query listing `(table_schema, table_name, table_type)`.
    fn list_tables_sql(&self, database: &str, configured: &[String], include_views: bool) -> String {
        let schemas = self
            .introspected_schemas(configured)
            .iter()
            .map(|s| self.quote_literal(s))
            .collect::<Vec<_>>()
            .join(", ");
        let types = if include_views {
            "'BASE TABLE', 'VIEW', 'MATERIALIZED VIEW'"
        } else {
            "'BASE TABLE'"
        };
        format!(
            "SELECT table_schema, table_name, table_type \
             FROM {}.information_schema.tables \
             WHERE table_schema IN ({}) AND table_type IN ({}) \
             ORDER BY table_schema, table_name",
            self.quote_identifier(database),
            schemas,
            types
        )
    }

    /// Catalog query listing the columns of one table in ordinal order.
    fn columns_sql(&self, database: &str, table: &TableRef) -> String {
        format!(
            "SELECT column_name, data_type, is_nullable, column_default, comment \
             FROM {}.information_schema.columns \
             WHERE table_schema = {} AND table_name = {} \
             ORDER BY ordinal_position",
            self.quote_identifier(database),
            self.quote_literal(&table.schema),
            self.quote_literal(&table.name)
        )
    }

    /// Query returning up to `limit` sample rows of a table.
    fn sample_rows_sql(&self, database: &str, table: &TableRef, limit: u32) -> String {
        format!(
            "SELECT * FROM {} LIMIT {}",
            self.qualified_name(database, table),
            limit
        )
    }
}

/// The native single-schema dialect: only the session's default schema is
/// visible and tables are named without a schema prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnowflakeDialect;

impl Dialect for SnowflakeDialect {
    fn name(&self) -> &str {
        crate::connection::url::NATIVE_DIALECT
    }

    fn introspected_schemas(&self, configured: &[String]) -> Vec<String> {
        configured.iter().take(1).cloned().collect()
    }

    fn display_name(&self, table: &TableRef) -> String {
        table.name.clone()
    }

    fn resolve_table_name(&self, name: &str, configured: &[String]) -> Option<TableRef> {
        let schema = configured.first()?;
        match split_identifier_path(name)?.as_slice() {
            [table] => Some(TableRef::new(schema.clone(), table.clone())),
            [qualifier, table] if qualifier.eq_ignore_ascii_case(schema) => {
                Some(TableRef::new(qualifier.clone(), table.clone()))
            }
            _ => None,
        }
    }
}

/// Dialect spanning every configured schema.
///
/// Tables are presented as `SCHEMA.TABLE` so that identically named tables in
/// different schemas stay distinguishable.
#[derive(Debug, Default, Clone, Copy)]
pub struct MultiSchemaDialect;

impl Dialect for MultiSchemaDialect {
    fn name(&self) -> &str {
        DIALECT_NAME
    }

    fn introspected_schemas(&self, configured: &[String]) -> Vec<String> {
        configured.to_vec()
    }

    fn display_name(&self, table: &TableRef) -> String {
        format!("{}.{}", table.schema, table.name)
    }

    fn resolve_table_name(&self, name: &str, configured: &[String]) -> Option<TableRef> {
        match split_identifier_path(name)?.as_slice() {
            [schema, table] => configured
                .iter()
                .any(|s| s.eq_ignore_ascii_case(schema))
                .then(|| TableRef::new(schema.clone(), table.clone())),
            // Unqualified names resolve against the default schema.
            [table] => configured
                .first()
                .map(|schema| TableRef::new(schema.clone(), table.clone())),
            _ => None,
        }
    }
}

/// Normalize a single identifier the way Snowflake resolves it.
///
/// Unquoted names fold to uppercase; double-quoted names keep their case with
/// `""` unescaped. Returns `None` for empty or dotted input.
pub fn normalize_identifier(ident: &str) -> Option<String> {
    match split_identifier_path(ident)?.as_slice() {
        [single] => Some(single.clone()),
        _ => None,
    }
}

/// Split a dotted identifier path such as `common."Orders"` into normalized
/// parts. Dots inside double quotes do not split.
pub fn split_identifier_path(path: &str) -> Option<Vec<String>> {
    let mut parts = Vec::new();
    let mut chars = path.trim().chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let part = if chars.next_if_eq(&'"').is_some() {
            let mut quoted = String::new();
            loop {
                match chars.next()? {
                    '"' if chars.next_if_eq(&'"').is_some() => quoted.push('"'),
                    '"' => break,
                    c => quoted.push(c),
                }
            }
            quoted
        } else {
            let mut bare = String::new();
            while let Some(c) = chars.next_if(|c| *c != '.') {
                bare.push(c);
            }
            bare.trim().to_ascii_uppercase()
        };
        if part.is_empty() {
            return None;
        }
        parts.push(part);

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        match chars.next() {
            None => return Some(parts),
            Some('.') => {}
            Some(_) => return None,
        }
    }
}

/// Registry mapping dialect names to implementations.
///
/// Passed explicitly to the connection builder. Registering a name twice keeps
/// the first registration.
#[derive(Debug, Clone, Default)]
pub struct DialectRegistry {
    dialects: HashMap<String, Arc<dyn Dialect>>,
}

impl DialectRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the native and multi-schema dialects.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(Arc::new(SnowflakeDialect))
            .register(Arc::new(MultiSchemaDialect));
        registry
    }

    /// Register a dialect under its lowercase name.
    pub fn register(&mut self, dialect: Arc<dyn Dialect>) -> &mut Self {
        let key = dialect.name().to_ascii_lowercase();
        if self.dialects.contains_key(&key) {
            debug!(dialect = %key, "Dialect already registered");
        } else {
            debug!(dialect = %key, "Registering dialect");
            self.dialects.insert(key, dialect);
        }
        self
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.dialects.contains_key(&name.to_ascii_lowercase())
    }

    /// Resolve a dialect by name or URL scheme.
    pub fn resolve(&self, name: &str) -> DatabotResult<Arc<dyn Dialect>> {
        self.dialects
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| {
                let mut known: Vec<_> = self.dialects.keys().cloned().collect();
                known.sort();
                DatabotError::configuration(format!(
                    "Can't load plugin: dialect '{}' is not registered (registered: {})",
                    name,
                    if known.is_empty() {
                        "none".to_string()
                    } else {
                        known.join(", ")
                    }
                ))
            })
    }
}
