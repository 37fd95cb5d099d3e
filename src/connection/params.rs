//! Warehouse connection parameters.

use crate::connection::dialect::normalize_identifier;
use crate::error::{DatabotError, DatabotResult};

/// Connection parameters for a Snowflake warehouse session.
///
/// All fields are required and non-empty. The schema list keeps the order
/// given on the command line; the first entry is the session's default schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    account: String,
    user: String,
    warehouse: String,
    role: String,
    database: String,
    schemas: Vec<String>,
}

impl ConnectionParameters {
    /// Build parameters from raw CLI values.
    ///
    /// `schemas` is a comma-separated list, e.g. `"COMMON,COMMON_MART"`.
    pub fn new(
        account: &str,
        user: &str,
        warehouse: &str,
        role: &str,
        database: &str,
        schemas: &str,
    ) -> DatabotResult<Self> {
        Ok(Self {
            account: required("account", account)?,
            user: required("user", user)?,
            warehouse: required("warehouse", warehouse)?,
            role: required("role", role)?,
            database: required("database", database)?,
            schemas: parse_schema_list(schemas)?,
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn warehouse(&self) -> &str {
        &self.warehouse
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn schemas(&self) -> &[String] {
        &self.schemas
    }

    /// The session's default schema (first in the list).
    pub fn default_schema(&self) -> &str {
        // non-empty is checked in parse_schema_list
        &self.schemas[0]
    }

    /// Account locator used in key-pair JWT claims.
    ///
    /// Region and cloud suffixes are dropped (`tz45198.eu-central-1` becomes
    /// `TZ45198`) and the result is uppercased.
    pub fn account_locator(&self) -> String {
        self.account
            .split('.')
            .next()
            .unwrap_or(&self.account)
            .to_ascii_uppercase()
    }

    /// Host name of the account's Snowflake endpoint.
    pub fn host(&self) -> String {
        let account = self.account.to_ascii_lowercase();
        if account.ends_with(".snowflakecomputing.com") {
            account
        } else {
            format!("{}.snowflakecomputing.com", account)
        }
    }
}

fn required(field: &str, value: &str) -> DatabotResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DatabotError::configuration(format!(
            "Snowflake {} must not be empty",
            field
        )));
    }
    Ok(trimmed.to_string())
}

/// Split a comma-separated schema list, preserving order.
///
/// Unquoted names are folded to uppercase, as Snowflake stores them;
/// double-quoted names keep their case.
pub fn parse_schema_list(value: &str) -> DatabotResult<Vec<String>> {
    let mut schemas = Vec::new();
    for part in value.split(',') {
        let name = part.trim();
        if name.is_empty() {
            if value.trim().is_empty() {
                break;
            }
            return Err(DatabotError::configuration(format!(
                "Empty schema name in schema list '{}'",
                value
            )));
        }
        let schema = normalize_identifier(name).ok_or_else(|| {
            DatabotError::configuration(format!("Invalid schema name '{}'", name))
        })?;
        if !schemas.contains(&schema) {
            schemas.push(schema);
        }
    }

    if schemas.is_empty() {
        return Err(DatabotError::configuration(
            "At least one Snowflake schema must be configured",
        ));
    }
    Ok(schemas)
}
