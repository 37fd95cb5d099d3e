//! SQL database wrapper used by the toolkit.
//!
//! Wraps a [`StatementExecutor`] and reflects tables through its dialect.
//! With lazy reflection the table list and each table's columns are fetched
//! on first access and cached for the lifetime of the process.

use crate::connection::dialect::Dialect;
use crate::db::engine::StatementExecutor;
use crate::error::{DatabotError, DatabotResult};
use crate::models::{ColumnDefinition, QueryResult, TableEntry, TableMetadata, TableRef, TableType};
use crate::toolkit::format::format_value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

/// Sample cell values longer than this are cut in table descriptions.
const SAMPLE_VALUE_MAX_CHARS: usize = 100;

/// Options controlling reflection and result size.
#[derive(Debug, Clone)]
pub struct SqlDatabaseOptions {
    /// Include views and materialized views in the usable tables.
    pub view_support: bool,
    /// Reflect on first access instead of at construction.
    pub lazy_table_reflection: bool,
    /// Sample rows appended to each table description.
    pub sample_rows_in_table_info: u32,
    /// Rows returned by [`SqlDatabase::run`].
    pub max_result_rows: usize,
}

impl Default for SqlDatabaseOptions {
    fn default() -> Self {
        Self {
            view_support: true,
            lazy_table_reflection: true,
            sample_rows_in_table_info: 3,
            max_result_rows: 200,
        }
    }
}

/// View-aware database handle with cached reflection.
pub struct SqlDatabase {
    executor: Arc<dyn StatementExecutor>,
    dialect: Arc<dyn Dialect>,
    options: SqlDatabaseOptions,
    tables: OnceCell<Vec<TableEntry>>,
    metadata: RwLock<HashMap<TableRef, TableMetadata>>,
}

impl SqlDatabase {
    /// Wrap an executor. Performs no I/O.
    ///
    /// When lazy reflection is disabled, call [`SqlDatabase::reflect`] before use.
    pub fn new(executor: Arc<dyn StatementExecutor>, options: SqlDatabaseOptions) -> Self {
        let dialect = executor.dialect();
        Self {
            executor,
            dialect,
            options,
            tables: OnceCell::new(),
            metadata: RwLock::new(HashMap::new()),
        }
    }

    /// Wrap an executor, reflecting eagerly unless lazy reflection is enabled.
    pub async fn connect(
        executor: Arc<dyn StatementExecutor>,
        options: SqlDatabaseOptions,
    ) -> DatabotResult<Self> {
        let db = Self::new(executor, options);
        if !db.options.lazy_table_reflection {
            db.reflect().await?;
        }
        Ok(db)
    }

    pub fn options(&self) -> &SqlDatabaseOptions {
        &self.options
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Reflect the table list and every table's columns now.
    pub async fn reflect(&self) -> DatabotResult<()> {
        let tables = self.tables().await?.to_vec();
        for entry in &tables {
            self.table_metadata(entry).await?;
        }
        info!(tables = tables.len(), "Reflected database schema");
        Ok(())
    }

    async fn tables(&self) -> DatabotResult<&[TableEntry]> {
        let tables = self
            .tables
            .get_or_try_init(|| async {
                let sql = self.dialect.list_tables_sql(
                    self.executor.database(),
                    self.executor.schemas(),
                    self.options.view_support,
                );
                let result = self.executor.execute(&sql, None).await?;
                let mut tables = Vec::with_capacity(result.row_count());
                for row in 0..result.row_count() {
                    let (Some(schema), Some(name)) = (
                        result.get_str(row, "table_schema"),
                        result.get_str(row, "table_name"),
                    ) else {
                        continue;
                    };
                    let table_type = result
                        .get_str(row, "table_type")
                        .map(|t| TableType::parse(&t))
                        .unwrap_or(TableType::Table);
                    tables.push(TableEntry {
                        table: TableRef::new(schema, name),
                        table_type,
                    });
                }
                debug!(count = tables.len(), "Loaded table list");
                Ok::<_, DatabotError>(tables)
            })
            .await?;
        Ok(tables.as_slice())
    }

    /// Names of all usable tables, sorted, as presented to the agent.
    pub async fn usable_table_names(&self) -> DatabotResult<Vec<String>> {
        let mut names: Vec<String> = self
            .tables()
            .await?
            .iter()
            .map(|entry| self.dialect.display_name(&entry.table))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Resolve an agent-supplied name to a known table.
    ///
    /// A name exactly as listed by [`SqlDatabase::usable_table_names`] always
    /// resolves. Otherwise the name is parsed as an identifier path and
    /// matched exactly, then case-insensitively when that is unambiguous.
    async fn find_table(&self, name: &str) -> DatabotResult<Option<TableEntry>> {
        let tables = self.tables().await?;
        let name = name.trim();
        if let Some(entry) = tables
            .iter()
            .find(|entry| self.dialect.display_name(&entry.table) == name)
        {
            return Ok(Some(entry.clone()));
        }

        let Some(wanted) = self
            .dialect
            .resolve_table_name(name, self.executor.schemas())
        else {
            return Ok(None);
        };
        if let Some(entry) = tables.iter().find(|entry| entry.table == wanted) {
            return Ok(Some(entry.clone()));
        }

        let mut folded = tables.iter().filter(|entry| {
            entry.table.schema.eq_ignore_ascii_case(&wanted.schema)
                && entry.table.name.eq_ignore_ascii_case(&wanted.name)
        });
        match (folded.next(), folded.next()) {
            (Some(entry), None) => Ok(Some(entry.clone())),
            _ => Ok(None),
        }
    }

    async fn table_metadata(&self, entry: &TableEntry) -> DatabotResult<TableMetadata> {
        if let Some(meta) = self.metadata.read().await.get(&entry.table) {
            return Ok(meta.clone());
        }

        let sql = self
            .dialect
            .columns_sql(self.executor.database(), &entry.table);
        let result = self.executor.execute(&sql, None).await?;

        let mut meta = TableMetadata::new(entry.table.clone(), entry.table_type);
        for row in 0..result.row_count() {
            let Some(name) = result.get_str(row, "column_name") else {
                continue;
            };
            let data_type = result
                .get_str(row, "data_type")
                .unwrap_or_else(|| "UNKNOWN".to_string());
            let nullable = result
                .get_str(row, "is_nullable")
                .map(|v| v.eq_ignore_ascii_case("YES"))
                .unwrap_or(true);
            let mut column = ColumnDefinition::new(name, data_type, nullable);
            if let Some(default) = result.get_str(row, "column_default") {
                column = column.with_default(default);
            }
            if let Some(comment) = result.get_str(row, "comment") {
                column = column.with_comment(comment);
            }
            meta = meta.with_column(column);
        }

        debug!(table = %entry.table, columns = meta.columns.len(), "Reflected table");
        self.metadata
            .write()
            .await
            .insert(entry.table.clone(), meta.clone());
        Ok(meta)
    }

    /// DDL-like descriptions of the named tables, each followed by sample rows.
    ///
    /// Every name must be a usable table; unknown names fail the whole call.
    pub async fn table_info(&self, table_names: &[String]) -> DatabotResult<String> {
        let mut entries = Vec::with_capacity(table_names.len());
        let mut missing = Vec::new();
        for name in table_names {
            match self.find_table(name).await? {
                Some(entry) if !entries.contains(&entry) => entries.push(entry),
                Some(_) => {}
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(DatabotError::invalid_input(format!(
                "table_names {{{}}} not found in database",
                missing.join(", ")
            )));
        }

        let mut sections = Vec::with_capacity(entries.len());
        for entry in &entries {
            let meta = self.table_metadata(entry).await?;
            let display = self.dialect.display_name(&entry.table);
            let mut section = meta.to_ddl(&display);
            if self.options.sample_rows_in_table_info > 0 {
                section.push_str("\n\n/*\n");
                section.push_str(&self.sample_rows(&display, &entry.table).await);
                section.push_str("*/");
            }
            sections.push(section);
        }
        Ok(sections.join("\n\n"))
    }

    async fn sample_rows(&self, display: &str, table: &TableRef) -> String {
        let limit = self.options.sample_rows_in_table_info;
        let sql = self
            .dialect
            .sample_rows_sql(self.executor.database(), table, limit);
        let mut out = format!("{} rows from {} table:\n", limit, display);

        match self.executor.execute(&sql, Some(limit as usize)).await {
            Ok(result) => {
                let header: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
                out.push_str(&header.join("\t"));
                out.push('\n');
                for row in &result.rows {
                    let cells: Vec<String> = row
                        .iter()
                        .map(|v| format_value(v).chars().take(SAMPLE_VALUE_MAX_CHARS).collect())
                        .collect();
                    out.push_str(&cells.join("\t"));
                    out.push('\n');
                }
            }
            Err(e) => {
                warn!(table = %table, error = %e, "Failed to fetch sample rows");
            }
        }
        out
    }

    /// Run a statement, returning at most `max_result_rows` rows.
    pub async fn run(&self, sql: &str) -> DatabotResult<QueryResult> {
        self.executor
            .execute(sql, Some(self.options.max_result_rows))
            .await
    }
}

impl std::fmt::Debug for SqlDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlDatabase")
            .field("dialect", &self.dialect.name())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::connection::dialect::MultiSchemaDialect;
    use crate::models::ColumnMetadata;
    use async_trait::async_trait;
    use serde_json::{Value as JsonValue, json};
    use std::sync::Mutex;

    /// Executor answering catalog queries from fixed tables.
    pub(crate) struct FakeExecutor {
        schemas: Vec<String>,
        catalog: Vec<[&'static str; 3]>,
        pub(crate) statements: Mutex<Vec<String>>,
    }

    impl FakeExecutor {
        pub(crate) fn new() -> Self {
            Self::with_catalog(vec![
                ["COMMON_MART", "ORDERS", "VIEW"],
                ["COMMON", "USERS", "BASE TABLE"],
            ])
        }

        pub(crate) fn with_catalog(catalog: Vec<[&'static str; 3]>) -> Self {
            Self {
                schemas: vec!["COMMON".to_string(), "COMMON_MART".to_string()],
                catalog,
                statements: Mutex::new(Vec::new()),
            }
        }

        fn count(&self, prefix: &str) -> usize {
            self.statements
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.contains(prefix))
                .count()
        }
    }

    fn text_result(columns: &[&str], rows: Vec<Vec<JsonValue>>) -> QueryResult {
        QueryResult {
            columns: columns
                .iter()
                .map(|c| ColumnMetadata::new(*c, "text", true))
                .collect(),
            total_rows: rows.len() as u64,
            rows,
            truncated: false,
            execution_time_ms: 1,
            statement_handle: None,
        }
    }

    #[async_trait]
    impl StatementExecutor for FakeExecutor {
        async fn execute(&self, sql: &str, _max_rows: Option<usize>) -> DatabotResult<QueryResult> {
            self.statements.lock().unwrap().push(sql.to_string());
            if sql.contains("information_schema.tables") {
                Ok(text_result(
                    &["TABLE_SCHEMA", "TABLE_NAME", "TABLE_TYPE"],
                    self.catalog
                        .iter()
                        .map(|row| row.iter().map(|v| json!(v)).collect())
                        .collect(),
                ))
            } else if sql.contains("information_schema.columns") {
                Ok(text_result(
                    &["COLUMN_NAME", "DATA_TYPE", "IS_NULLABLE", "COLUMN_DEFAULT", "COMMENT"],
                    vec![
                        vec![json!("ID"), json!("NUMBER"), json!("NO"), JsonValue::Null, JsonValue::Null],
                        vec![json!("EMAIL"), json!("TEXT"), json!("YES"), JsonValue::Null, json!("login")],
                    ],
                ))
            } else if sql.starts_with("SELECT * FROM") {
                Ok(text_result(
                    &["ID", "EMAIL"],
                    vec![vec![json!(1), json!("a@example.com")], vec![json!(2), JsonValue::Null]],
                ))
            } else {
                Err(DatabotError::statement("unexpected", None, None))
            }
        }

        fn dialect(&self) -> Arc<dyn Dialect> {
            Arc::new(MultiSchemaDialect)
        }

        fn database(&self) -> &str {
            "PRD_ANALYTICS"
        }

        fn schemas(&self) -> &[String] {
            &self.schemas
        }
    }

    #[tokio::test]
    async fn test_usable_table_names_sorted_and_qualified() {
        let db = SqlDatabase::new(Arc::new(FakeExecutor::new()), SqlDatabaseOptions::default());
        let names = db.usable_table_names().await.unwrap();
        assert_eq!(names, vec!["COMMON.USERS", "COMMON_MART.ORDERS"]);
    }

    #[tokio::test]
    async fn test_lazy_reflection_caches() {
        let executor = Arc::new(FakeExecutor::new());
        let db = SqlDatabase::connect(executor.clone(), SqlDatabaseOptions::default())
            .await
            .unwrap();
        assert_eq!(executor.count(""), 0);

        db.usable_table_names().await.unwrap();
        db.usable_table_names().await.unwrap();
        assert_eq!(executor.count("information_schema.tables"), 1);

        let names = vec!["COMMON.USERS".to_string()];
        db.table_info(&names).await.unwrap();
        db.table_info(&names).await.unwrap();
        assert_eq!(executor.count("information_schema.columns"), 1);
    }

    #[tokio::test]
    async fn test_eager_reflection() {
        let executor = Arc::new(FakeExecutor::new());
        let options = SqlDatabaseOptions {
            lazy_table_reflection: false,
            ..SqlDatabaseOptions::default()
        };
        SqlDatabase::connect(executor.clone(), options).await.unwrap();
        assert_eq!(executor.count("information_schema.tables"), 1);
        assert_eq!(executor.count("information_schema.columns"), 2);
    }

    #[tokio::test]
    async fn test_table_info_includes_ddl_and_samples() {
        let db = SqlDatabase::new(Arc::new(FakeExecutor::new()), SqlDatabaseOptions::default());
        let info = db.table_info(&["common.users".to_string()]).await.unwrap();
        assert!(info.starts_with("CREATE TABLE COMMON.USERS (\n\tID NUMBER NOT NULL"));
        assert!(info.contains("EMAIL TEXT COMMENT 'login'"));
        assert!(info.contains("3 rows from COMMON.USERS table:\nID\tEMAIL\n1\ta@example.com\n2\tNULL\n*/"));
    }

    #[tokio::test]
    async fn test_table_info_view_keyword() {
        let db = SqlDatabase::new(Arc::new(FakeExecutor::new()), SqlDatabaseOptions::default());
        let info = db.table_info(&["COMMON_MART.ORDERS".to_string()]).await.unwrap();
        assert!(info.starts_with("CREATE VIEW COMMON_MART.ORDERS"));
    }

    #[tokio::test]
    async fn test_table_info_unknown_table() {
        let db = SqlDatabase::new(Arc::new(FakeExecutor::new()), SqlDatabaseOptions::default());
        let err = db
            .table_info(&["COMMON.USERS".to_string(), "IDV.CHECKS".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, DatabotError::InvalidInput { .. }));
        assert!(err.to_string().contains("IDV.CHECKS"));
    }

    #[tokio::test]
    async fn test_listed_mixed_case_names_resolve() {
        let executor = FakeExecutor::with_catalog(vec![
            ["COMMON", "Orders", "BASE TABLE"],
            ["COMMON", "USERS", "BASE TABLE"],
        ]);
        let db = SqlDatabase::new(Arc::new(executor), SqlDatabaseOptions::default());

        let listed = db.usable_table_names().await.unwrap();
        assert_eq!(listed, vec!["COMMON.Orders", "COMMON.USERS"]);
        let info = db.table_info(&listed).await.unwrap();
        assert!(info.contains("CREATE TABLE COMMON.Orders ("));
        assert!(info.contains("CREATE TABLE COMMON.USERS ("));

        for name in ["common.orders", "COMMON.\"Orders\"", "orders"] {
            let info = db.table_info(&[name.to_string()]).await.unwrap();
            assert!(info.starts_with("CREATE TABLE COMMON.Orders"), "{}", name);
        }
    }

    #[tokio::test]
    async fn test_ambiguous_case_folding_is_not_found() {
        let executor = FakeExecutor::with_catalog(vec![
            ["COMMON", "Orders", "BASE TABLE"],
            ["COMMON", "orders", "BASE TABLE"],
        ]);
        let db = SqlDatabase::new(Arc::new(executor), SqlDatabaseOptions::default());

        assert!(db.table_info(&["COMMON.orders".to_string()]).await.is_ok());
        let err = db.table_info(&["COMMON.ORDERS".to_string()]).await.unwrap_err();
        assert!(matches!(err, DatabotError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_no_sample_rows() {
        let executor = Arc::new(FakeExecutor::new());
        let options = SqlDatabaseOptions {
            sample_rows_in_table_info: 0,
            ..SqlDatabaseOptions::default()
        };
        let db = SqlDatabase::new(executor.clone(), options);
        let info = db.table_info(&["COMMON.USERS".to_string()]).await.unwrap();
        assert!(!info.contains("rows from"));
        assert_eq!(executor.count("SELECT * FROM"), 0);
    }
}
