//! SQL statement validation for read-only enforcement.
//!
//! The query tool only runs read-only statements (SELECT, SHOW, DESCRIBE,
//! EXPLAIN). Everything else is rejected before it reaches the warehouse,
//! including statements the parser doesn't recognise.
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) with its Snowflake dialect, so
//! formatting tricks and comments can't smuggle a write past the check.

use crate::error::{DatabotError, DatabotResult};
use sqlparser::ast::Statement;
use sqlparser::dialect::SnowflakeDialect;
use sqlparser::parser::Parser;

/// Type of SQL statement detected by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStatementType {
    /// SELECT and other read-only queries (SELECT, SHOW, DESCRIBE, EXPLAIN)
    Select,
    /// INSERT, UPDATE, DELETE, MERGE, COPY
    DmlWrite,
    /// CREATE, DROP, ALTER, TRUNCATE, COMMENT
    Ddl,
    /// BEGIN, COMMIT, ROLLBACK, SAVEPOINT
    Transaction,
    /// CALL, EXECUTE
    ProcedureCall,
    /// GRANT, REVOKE, SET, USE, KILL
    Administrative,
    /// Unknown or unparseable statement
    Unknown,
}

/// Error messages for each statement type category.
mod error_messages {
    pub const DML_WRITE: &str =
        "Write operations are not allowed. This connection is read-only; use SELECT.";
    pub const DDL: &str = "DDL operations are not allowed. This connection cannot modify the schema.";
    pub const TRANSACTION: &str = "Transaction control is not allowed. Each query runs on its own.";
    pub const PROCEDURE: &str = "Procedure calls are not allowed. Their effects cannot be verified.";
    pub const ADMINISTRATIVE: &str =
        "Session and administrative statements are not allowed. Use fully qualified names instead of USE.";
    pub const UNKNOWN: &str = "Unrecognized SQL statement. Only SELECT queries are allowed.";
    pub const PARSE_ERROR: &str = "Failed to parse SQL statement.";
}

/// Validate SQL for read-only execution.
///
/// Returns `Err(DatabotError::Permission)` for anything that isn't read-only
/// and `Err(DatabotError::InvalidInput)` for empty or unparseable SQL.
///
/// # Examples
///
/// ```
/// use databot_mcp::toolkit::sql_validator::validate_readonly;
///
/// assert!(validate_readonly("SELECT * FROM common.users").is_ok());
/// assert!(validate_readonly("DELETE FROM common.users").is_err());
/// ```
pub fn validate_readonly(sql: &str) -> DatabotResult<()> {
    let statements = Parser::parse_sql(&SnowflakeDialect {}, sql).map_err(|e| {
        DatabotError::invalid_input(format!("{} Error: {}", error_messages::PARSE_ERROR, e))
    })?;

    if statements.is_empty() {
        return Err(DatabotError::invalid_input("Empty SQL statement"));
    }

    for stmt in &statements {
        validate_statement(stmt)?;
    }

    Ok(())
}

/// Validate a single parsed statement.
fn validate_statement(stmt: &Statement) -> DatabotResult<()> {
    let (stmt_type, operation_name) = classify_statement(stmt);

    let reason = match stmt_type {
        SqlStatementType::Select => return Ok(()),
        SqlStatementType::DmlWrite => error_messages::DML_WRITE,
        SqlStatementType::Ddl => error_messages::DDL,
        SqlStatementType::Transaction => error_messages::TRANSACTION,
        SqlStatementType::ProcedureCall => error_messages::PROCEDURE,
        SqlStatementType::Administrative => error_messages::ADMINISTRATIVE,
        SqlStatementType::Unknown => error_messages::UNKNOWN,
    };
    Err(DatabotError::permission(operation_name, reason))
}

/// Classify a parsed statement into a statement type.
pub fn classify_statement(stmt: &Statement) -> (SqlStatementType, &'static str) {
    match stmt {
        // Read-only
        Statement::Query { .. } => (SqlStatementType::Select, "SELECT"),
        Statement::ShowTables { .. } => (SqlStatementType::Select, "SHOW TABLES"),
        Statement::ShowColumns { .. } => (SqlStatementType::Select, "SHOW COLUMNS"),
        Statement::ShowDatabases { .. } => (SqlStatementType::Select, "SHOW DATABASES"),
        Statement::ShowSchemas { .. } => (SqlStatementType::Select, "SHOW SCHEMAS"),
        Statement::ShowCreate { .. } => (SqlStatementType::Select, "SHOW CREATE"),
        Statement::ShowFunctions { .. } => (SqlStatementType::Select, "SHOW FUNCTIONS"),
        Statement::ShowVariable { .. } => (SqlStatementType::Select, "SHOW VARIABLE"),
        Statement::ShowVariables { .. } => (SqlStatementType::Select, "SHOW VARIABLES"),
        Statement::ExplainTable { .. } => (SqlStatementType::Select, "DESCRIBE"),

        // EXPLAIN is only as safe as the statement it wraps
        Statement::Explain { statement, .. } => {
            let (inner_type, inner_name) = classify_statement(statement);
            if inner_type == SqlStatementType::Select {
                (SqlStatementType::Select, "EXPLAIN")
            } else {
                (inner_type, inner_name)
            }
        }

        // DML
        Statement::Insert { .. } => (SqlStatementType::DmlWrite, "INSERT"),
        Statement::Update { .. } => (SqlStatementType::DmlWrite, "UPDATE"),
        Statement::Delete { .. } => (SqlStatementType::DmlWrite, "DELETE"),
        Statement::Merge { .. } => (SqlStatementType::DmlWrite, "MERGE"),
        Statement::Copy { .. } => (SqlStatementType::DmlWrite, "COPY"),
        Statement::CopyIntoSnowflake { .. } => (SqlStatementType::DmlWrite, "COPY INTO"),
        Statement::Unload { .. } => (SqlStatementType::DmlWrite, "UNLOAD"),

        // DDL
        Statement::CreateTable { .. } => (SqlStatementType::Ddl, "CREATE TABLE"),
        Statement::CreateView { .. } => (SqlStatementType::Ddl, "CREATE VIEW"),
        Statement::CreateIndex { .. } => (SqlStatementType::Ddl, "CREATE INDEX"),
        Statement::CreateSchema { .. } => (SqlStatementType::Ddl, "CREATE SCHEMA"),
        Statement::CreateDatabase { .. } => (SqlStatementType::Ddl, "CREATE DATABASE"),
        Statement::CreateSequence { .. } => (SqlStatementType::Ddl, "CREATE SEQUENCE"),
        Statement::CreateFunction { .. } => (SqlStatementType::Ddl, "CREATE FUNCTION"),
        Statement::CreateProcedure { .. } => (SqlStatementType::Ddl, "CREATE PROCEDURE"),
        Statement::CreateRole { .. } => (SqlStatementType::Ddl, "CREATE ROLE"),
        Statement::CreateStage { .. } => (SqlStatementType::Ddl, "CREATE STAGE"),
        Statement::AlterTable { .. } => (SqlStatementType::Ddl, "ALTER TABLE"),
        Statement::AlterView { .. } => (SqlStatementType::Ddl, "ALTER VIEW"),
        Statement::AlterRole { .. } => (SqlStatementType::Ddl, "ALTER ROLE"),
        Statement::AlterSession { .. } => (SqlStatementType::Ddl, "ALTER SESSION"),
        Statement::Drop { .. } => (SqlStatementType::Ddl, "DROP"),
        Statement::DropFunction { .. } => (SqlStatementType::Ddl, "DROP FUNCTION"),
        Statement::DropProcedure { .. } => (SqlStatementType::Ddl, "DROP PROCEDURE"),
        Statement::Truncate { .. } => (SqlStatementType::Ddl, "TRUNCATE"),
        Statement::Comment { .. } => (SqlStatementType::Ddl, "COMMENT"),

        // Transaction control
        Statement::StartTransaction { .. } => (SqlStatementType::Transaction, "BEGIN"),
        Statement::Commit { .. } => (SqlStatementType::Transaction, "COMMIT"),
        Statement::Rollback { .. } => (SqlStatementType::Transaction, "ROLLBACK"),
        Statement::Savepoint { .. } => (SqlStatementType::Transaction, "SAVEPOINT"),

        // Procedures
        Statement::Call { .. } => (SqlStatementType::ProcedureCall, "CALL"),
        Statement::Execute { .. } => (SqlStatementType::ProcedureCall, "EXECUTE"),

        // Administrative
        Statement::Grant { .. } => (SqlStatementType::Administrative, "GRANT"),
        Statement::Revoke { .. } => (SqlStatementType::Administrative, "REVOKE"),
        Statement::Set { .. } => (SqlStatementType::Administrative, "SET"),
        Statement::Use { .. } => (SqlStatementType::Administrative, "USE"),
        Statement::Kill { .. } => (SqlStatementType::Administrative, "KILL"),

        // Anything else is blocked
        _ => (SqlStatementType::Unknown, "Unknown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_readonly_select_ok() {
        assert!(validate_readonly("SELECT * FROM COMMON.USERS").is_ok());
    }

    #[test]
    fn test_snowflake_syntax_accepted() {
        let sql = r#"
            SELECT u.id, u.payload:country::string AS country
            FROM "PRD_ANALYTICS"."COMMON"."USERS" u
            QUALIFY ROW_NUMBER() OVER (PARTITION BY u.id ORDER BY u.created_at DESC) = 1
            LIMIT 10
        "#;
        assert!(validate_readonly(sql).is_ok());
    }

    #[test]
    fn test_show_and_describe_ok() {
        assert!(validate_readonly("SHOW TABLES").is_ok());
        assert!(validate_readonly("DESCRIBE TABLE COMMON.USERS").is_ok());
    }

    #[test]
    fn test_validate_readonly_insert_error() {
        let err = validate_readonly("INSERT INTO users VALUES (1)").unwrap_err();
        assert!(matches!(err, DatabotError::Permission { .. }));
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn test_ddl_and_dml_blocked() {
        for sql in [
            "UPDATE users SET name = 'test'",
            "DELETE FROM users",
            "CREATE TABLE test (id INT)",
            "DROP TABLE users",
            "TRUNCATE TABLE users",
            "MERGE INTO t USING s ON t.id = s.id WHEN MATCHED THEN DELETE",
            "GRANT SELECT ON users TO analyst",
            "COMMIT",
            "USE SCHEMA COMMON",
        ] {
            let err = validate_readonly(sql).unwrap_err();
            assert!(
                matches!(err, DatabotError::Permission { .. }),
                "{} should be blocked",
                sql
            );
        }
    }

    #[test]
    fn test_select_with_union() {
        assert!(validate_readonly("SELECT a FROM t1 UNION ALL SELECT b FROM t2").is_ok());
    }

    #[test]
    fn test_multiple_statements_blocked() {
        assert!(validate_readonly("SELECT 1; INSERT INTO users VALUES (1)").is_err());
    }

    #[test]
    fn test_insert_select_blocked() {
        let sql = "INSERT INTO archive SELECT * FROM users WHERE created_at < '2020-01-01'";
        assert!(validate_readonly(sql).is_err());
    }

    #[test]
    fn test_explain_follows_inner_statement() {
        assert!(validate_readonly("EXPLAIN SELECT * FROM users").is_ok());
        assert!(validate_readonly("EXPLAIN DELETE FROM users").is_err());
    }

    #[test]
    fn test_empty_and_garbage_are_invalid_input() {
        assert!(matches!(
            validate_readonly("").unwrap_err(),
            DatabotError::InvalidInput { .. }
        ));
        assert!(matches!(
            validate_readonly("SELEC * FORM").unwrap_err(),
            DatabotError::InvalidInput { .. } | DatabotError::Permission { .. }
        ));
    }
}
