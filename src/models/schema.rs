//! Schema-related data models.
//!
//! This module defines types for warehouse table reflection.

use serde::{Deserialize, Serialize};

/// A table addressed by schema and name, both in Snowflake's stored case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Type of warehouse table object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    Table,
    View,
    MaterializedView,
}

impl TableType {
    /// Parse the `information_schema.tables.table_type` value.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "VIEW" => Self::View,
            "MATERIALIZED VIEW" => Self::MaterializedView,
            _ => Self::Table,
        }
    }

    pub fn is_view(&self) -> bool {
        !matches!(self, Self::Table)
    }

    /// Keyword used in DDL-like descriptions.
    pub fn ddl_keyword(&self) -> &'static str {
        match self {
            Self::Table => "TABLE",
            Self::View => "VIEW",
            Self::MaterializedView => "MATERIALIZED VIEW",
        }
    }
}

impl std::fmt::Display for TableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::View => write!(f, "view"),
            Self::MaterializedView => write!(f, "materialized_view"),
        }
    }
}

/// A table visible to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub table: TableRef,
    pub table_type: TableType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Warehouse type, e.g. `NUMBER`, `TEXT`, `TIMESTAMP_NTZ`
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnDefinition {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            default_value: None,
            comment: None,
        }
    }

    /// Set the default value expression.
    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    /// Set the column comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Reflected metadata for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub table: TableRef,
    pub table_type: TableType,
    pub columns: Vec<ColumnDefinition>,
}

impl TableMetadata {
    pub fn new(table: TableRef, table_type: TableType) -> Self {
        Self {
            table,
            table_type,
            columns: Vec::new(),
        }
    }

    /// Add a column definition.
    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    /// Render a `CREATE TABLE`-style description under `display_name`.
    pub fn to_ddl(&self, display_name: &str) -> String {
        let mut out = format!("CREATE {} {} (\n", self.table_type.ddl_keyword(), display_name);
        let lines: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                let mut line = format!("\t{} {}", col.name, col.data_type);
                if !col.nullable {
                    line.push_str(" NOT NULL");
                }
                if let Some(default) = &col.default_value {
                    line.push_str(&format!(" DEFAULT {}", default));
                }
                if let Some(comment) = col.comment.as_deref().filter(|c| !c.is_empty()) {
                    line.push_str(&format!(" COMMENT '{}'", comment.replace('\'', "''")));
                }
                line
            })
            .collect();
        out.push_str(&lines.join(",\n"));
        out.push_str("\n)");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_type_parse() {
        assert_eq!(TableType::parse("BASE TABLE"), TableType::Table);
        assert_eq!(TableType::parse("view"), TableType::View);
        assert_eq!(TableType::parse("MATERIALIZED VIEW"), TableType::MaterializedView);
        assert!(TableType::View.is_view());
        assert!(!TableType::Table.is_view());
    }

    #[test]
    fn test_to_ddl() {
        let meta = TableMetadata::new(TableRef::new("COMMON", "USERS"), TableType::Table)
            .with_column(ColumnDefinition::new("ID", "NUMBER", false))
            .with_column(ColumnDefinition::new("EMAIL", "TEXT", true).with_comment("user's mail"))
            .with_column(
                ColumnDefinition::new("CREATED_AT", "TIMESTAMP_NTZ", true)
                    .with_default("CURRENT_TIMESTAMP()"),
            );
        let ddl = meta.to_ddl("COMMON.USERS");
        assert_eq!(
            ddl,
            "CREATE TABLE COMMON.USERS (\n\tID NUMBER NOT NULL,\n\tEMAIL TEXT COMMENT 'user''s mail',\n\tCREATED_AT TIMESTAMP_NTZ DEFAULT CURRENT_TIMESTAMP()\n)"
        );
    }

    #[test]
    fn test_table_ref_display() {
        assert_eq!(TableRef::new("IDV", "CHECKS").to_string(), "IDV.CHECKS");
    }
}
