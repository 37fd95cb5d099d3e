//! Statement execution engine.
//!
//! The engine talks to the Snowflake SQL API v2:
//! - `POST /api/v2/statements` submits a statement with the session defaults
//! - `202 Accepted` responses are polled at `GET /api/v2/statements/{handle}`
//! - result partitions beyond the first are fetched with `?partition=N`
//!
//! Session tokens from the browser login are not accepted by the SQL API;
//! those statements go through the connector query endpoint instead (see
//! [`crate::db::session`]).
//!
//! Constructing an engine performs no network I/O. Authentication happens on
//! the first statement, so connectivity and credential problems surface there.

use crate::connection::auth::{AuthToken, Authenticator, TokenKind};
use crate::connection::dialect::Dialect;
use crate::connection::params::ConnectionParameters;
use crate::connection::url::ConnectionUrl;
use crate::db::session::SessionQuery;
use crate::db::types::decode_cell;
use crate::error::{DatabotError, DatabotResult};
use crate::models::{ColumnMetadata, QueryResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default statement timeout.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for a single HTTP round trip. Long statements come back as 202
/// and are polled, so this stays short.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(500);
pub(crate) const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);

const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";

/// SQLSTATE raised for missing privileges.
pub(crate) const INSUFFICIENT_PRIVILEGES: &str = "42501";

/// Local polling deadline for a statement timeout.
///
/// A zero timeout means no limit on the warehouse side, so none is applied
/// locally either. Otherwise the warehouse gets one HTTP round trip to report
/// its own timeout first.
pub(crate) fn local_deadline(statement_timeout: Duration) -> Option<Duration> {
    (!statement_timeout.is_zero()).then(|| statement_timeout + HTTP_TIMEOUT)
}

/// Executes SQL against the warehouse.
///
/// Implemented by [`Engine`]; the database wrapper depends on this trait only.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Run one statement, decoding at most `max_rows` rows when given.
    async fn execute(&self, sql: &str, max_rows: Option<usize>) -> DatabotResult<QueryResult>;

    /// Dialect bound to this connection.
    fn dialect(&self) -> Arc<dyn Dialect>;

    /// Database the session runs in.
    fn database(&self) -> &str;

    /// Configured schemas, default schema first.
    fn schemas(&self) -> &[String];
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub statement_timeout: Duration,
    /// Overrides `https://<account>.snowflakecomputing.com`
    pub base_url: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
            base_url: None,
        }
    }
}

impl EngineOptions {
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Resolve the API base URL for the given account.
    pub fn resolve_base_url(&self, params: &ConnectionParameters) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}", params.host()))
            .trim_end_matches('/')
            .to_string()
    }
}

/// Build the HTTP client shared by the engine and its authenticator.
pub fn http_client() -> DatabotResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| DatabotError::internal(format!("Failed to build HTTP client: {}", e)))
}

#[derive(Debug, Serialize)]
struct SubmitStatement<'a> {
    statement: &'a str,
    timeout: u64,
    database: &'a str,
    schema: &'a str,
    warehouse: &'a str,
    role: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    sql_state: Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    num_rows: u64,
    #[serde(default)]
    row_type: Vec<RowType>,
    #[serde(default)]
    partition_info: Vec<PartitionInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RowType {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default = "default_nullable")]
    nullable: bool,
    #[serde(default)]
    scale: Option<i64>,
}

fn default_nullable() -> bool {
    true
}

impl From<RowType> for ColumnMetadata {
    fn from(rt: RowType) -> Self {
        ColumnMetadata {
            name: rt.name,
            type_name: rt.type_name.to_ascii_lowercase(),
            nullable: rt.nullable,
            scale: rt.scale,
        }
    }
}

/// Undecoded rows and column metadata of a finished statement.
pub(crate) struct RawResult {
    pub(crate) columns: Vec<ColumnMetadata>,
    pub(crate) rows: Vec<Vec<Option<String>>>,
    pub(crate) total_rows: u64,
    pub(crate) statement_handle: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartitionInfo {
    #[serde(default)]
    row_count: u64,
}

#[derive(Debug, Default, Deserialize)]
struct PartitionResponse {
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

/// A connection to one Snowflake account, bound to a dialect.
pub struct Engine {
    client: reqwest::Client,
    base_url: String,
    url: ConnectionUrl,
    params: ConnectionParameters,
    dialect: Arc<dyn Dialect>,
    authenticator: Arc<dyn Authenticator>,
    statement_timeout: Duration,
    sequence: AtomicU64,
}

impl Engine {
    pub fn new(
        client: reqwest::Client,
        params: ConnectionParameters,
        url: ConnectionUrl,
        dialect: Arc<dyn Dialect>,
        authenticator: Arc<dyn Authenticator>,
        options: &EngineOptions,
    ) -> Self {
        Self {
            client,
            base_url: options.resolve_base_url(&params),
            url,
            params,
            dialect,
            authenticator,
            statement_timeout: options.statement_timeout,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn url(&self) -> &ConnectionUrl {
        &self.url
    }

    pub fn params(&self) -> &ConnectionParameters {
        &self.params
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn authenticator_name(&self) -> &'static str {
        self.authenticator.name()
    }

    fn headers(&self, token: &AuthToken) -> DatabotResult<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(5);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&token.authorization())
                .map_err(|_| DatabotError::credential("Auth token is not a valid header value"))?,
        );
        if let Some(token_type) = token.token_type() {
            headers.insert(TOKEN_TYPE_HEADER, HeaderValue::from_static(token_type));
        }
        Ok(headers)
    }

    async fn submit(&self, sql: &str, headers: &HeaderMap) -> DatabotResult<reqwest::Response> {
        let body = SubmitStatement {
            statement: sql,
            timeout: self.statement_timeout.as_secs(),
            database: self.params.database(),
            schema: self.params.default_schema(),
            warehouse: self.params.warehouse(),
            role: self.params.role(),
        };
        let request_id = uuid::Uuid::new_v4().to_string();

        Ok(self
            .client
            .post(format!("{}/api/v2/statements", self.base_url))
            .query(&[("requestId", request_id.as_str())])
            .headers(headers.clone())
            .json(&body)
            .send()
            .await?)
    }

    async fn poll(
        &self,
        handle: &str,
        headers: &HeaderMap,
        started: Instant,
    ) -> DatabotResult<StatementResponse> {
        let mut interval = POLL_INTERVAL;
        let deadline = local_deadline(self.statement_timeout);

        loop {
            if deadline.is_some_and(|d| started.elapsed() > d) {
                self.cancel(handle, headers).await;
                return Err(DatabotError::timeout(
                    "statement",
                    started.elapsed().as_secs(),
                ));
            }
            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(MAX_POLL_INTERVAL);

            let response = self
                .client
                .get(format!("{}/api/v2/statements/{}", self.base_url, handle))
                .headers(headers.clone())
                .send()
                .await?;

            if response.status() == StatusCode::ACCEPTED {
                debug!(handle, "Statement still running");
                continue;
            }
            return self.read_response(response).await;
        }
    }

    async fn cancel(&self, handle: &str, headers: &HeaderMap) {
        let result = self
            .client
            .post(format!("{}/api/v2/statements/{}/cancel", self.base_url, handle))
            .headers(headers.clone())
            .send()
            .await;
        if let Err(e) = result {
            warn!(handle, error = %e, "Failed to cancel statement");
        }
    }

    /// Map a final (non-202) response onto a result or an error.
    async fn read_response(&self, response: reqwest::Response) -> DatabotResult<StatementResponse> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: StatementResponse = serde_json::from_str(&body).unwrap_or_default();
        let message = parsed
            .message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("HTTP {}: {}", status, body.trim()));

        match status {
            StatusCode::UNPROCESSABLE_ENTITY => {
                if parsed.sql_state.as_deref() == Some(INSUFFICIENT_PRIVILEGES) {
                    Err(DatabotError::permission("statement", message))
                } else {
                    Err(DatabotError::statement(message, parsed.sql_state, parsed.code))
                }
            }
            StatusCode::UNAUTHORIZED => {
                self.authenticator.invalidate().await;
                Err(DatabotError::connection(
                    format!("Snowflake rejected the credentials: {}", message),
                    "Check that the public key is registered for the user and the passphrase is correct",
                ))
            }
            StatusCode::FORBIDDEN => Err(DatabotError::connection(
                format!("Access forbidden: {}", message),
                "Check the role and network policy for the account",
            )),
            StatusCode::REQUEST_TIMEOUT => Err(DatabotError::timeout(
                "statement",
                self.statement_timeout.as_secs(),
            )),
            _ => Err(DatabotError::connection(
                message,
                "Check the account identifier and Snowflake service status",
            )),
        }
    }

    async fn fetch_partition(
        &self,
        handle: &str,
        partition: usize,
        headers: &HeaderMap,
    ) -> DatabotResult<Vec<Vec<Option<String>>>> {
        let response = self
            .client
            .get(format!("{}/api/v2/statements/{}", self.base_url, handle))
            .query(&[("partition", partition.to_string())])
            .headers(headers.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(DatabotError::connection(
                format!("Failed to fetch result partition {}: HTTP {}", partition, status),
                "Retry the query",
            ));
        }
        let partition: PartitionResponse = response.json().await?;
        Ok(partition.data)
    }
}

impl Engine {
    /// Run a statement through the SQL API with a key-pair JWT.
    async fn execute_statement(
        &self,
        sql: &str,
        token: &AuthToken,
        limit: usize,
        started: Instant,
    ) -> DatabotResult<RawResult> {
        let headers = self.headers(token)?;

        let response = self.submit(sql, &headers).await?;
        let response = if response.status() == StatusCode::ACCEPTED {
            let accepted: StatementResponse = response.json().await?;
            let handle = accepted.statement_handle.ok_or_else(|| {
                DatabotError::internal("Snowflake accepted the statement without a handle")
            })?;
            self.poll(&handle, &headers, started).await?
        } else {
            self.read_response(response).await?
        };

        let meta = response.result_set_meta_data.unwrap_or_default();
        let mut rows = response.data;
        if rows.len() < limit && meta.partition_info.len() > 1 {
            if let Some(handle) = response.statement_handle.as_deref() {
                for partition in 1..meta.partition_info.len() {
                    if rows.len() >= limit {
                        break;
                    }
                    rows.extend(self.fetch_partition(handle, partition, &headers).await?);
                }
            }
        }

        Ok(RawResult {
            columns: meta.row_type.into_iter().map(ColumnMetadata::from).collect(),
            rows,
            total_rows: meta.num_rows,
            statement_handle: response.statement_handle,
        })
    }

    /// Run a statement through the connector query endpoint with a session token.
    async fn execute_session(
        &self,
        sql: &str,
        token: &AuthToken,
        limit: usize,
        started: Instant,
    ) -> DatabotResult<RawResult> {
        let query = SessionQuery {
            client: &self.client,
            base_url: &self.base_url,
            authenticator: self.authenticator.as_ref(),
            statement_timeout: self.statement_timeout,
        };
        let sequence_id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        query.run(sql, token, sequence_id, limit, started).await
    }
}

#[async_trait]
impl StatementExecutor for Engine {
    async fn execute(&self, sql: &str, max_rows: Option<usize>) -> DatabotResult<QueryResult> {
        let started = Instant::now();
        debug!(sql = %sql, max_rows = ?max_rows, "Executing statement");

        let token = self.authenticator.token().await?;
        let limit = max_rows.unwrap_or(usize::MAX);
        let raw = match token.kind {
            TokenKind::KeyPairJwt => self.execute_statement(sql, &token, limit, started).await?,
            TokenKind::Session => self.execute_session(sql, &token, limit, started).await?,
        };

        let columns = raw.columns;
        let available = raw.rows.len();
        let rows: Vec<Vec<serde_json::Value>> = raw
            .rows
            .into_iter()
            .take(limit)
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| decode_cell(row.get(i).and_then(|c| c.as_deref()), col))
                    .collect()
            })
            .collect();

        let total_rows = raw.total_rows.max(available as u64);
        let truncated = (rows.len() as u64) < total_rows;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        debug!(
            rows = rows.len(),
            total_rows,
            truncated,
            execution_time_ms,
            "Statement completed"
        );

        Ok(QueryResult {
            columns,
            rows,
            total_rows,
            truncated,
            execution_time_ms,
            statement_handle: raw.statement_handle,
        })
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    fn database(&self) -> &str {
        self.params.database()
    }

    fn schemas(&self) -> &[String] {
        self.params.schemas()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("url", &self.url.as_str())
            .field("base_url", &self.base_url)
            .field("dialect", &self.dialect.name())
            .field("authenticator", &self.authenticator.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_response_parses_result_set() {
        let body = r#"{
            "statementHandle": "01b2-abc",
            "resultSetMetaData": {
                "numRows": 2,
                "format": "jsonv2",
                "rowType": [
                    {"name": "ID", "type": "fixed", "scale": 0, "nullable": false},
                    {"name": "NAME", "type": "text", "nullable": true}
                ],
                "partitionInfo": [{"rowCount": 2, "uncompressedSize": 40}]
            },
            "data": [["1", "alice"], ["2", null]]
        }"#;
        let parsed: StatementResponse = serde_json::from_str(body).unwrap();
        let meta = parsed.result_set_meta_data.unwrap();
        assert_eq!(meta.num_rows, 2);
        assert_eq!(meta.row_type[0].scale, Some(0));
        assert!(!meta.row_type[0].nullable);
        assert_eq!(parsed.data[1][1], None);
    }

    #[test]
    fn test_error_response_parses() {
        let body = r#"{
            "code": "002003",
            "sqlState": "42S02",
            "message": "SQL compilation error:\nObject 'FOO' does not exist or not authorized.",
            "statementHandle": "01b2-def"
        }"#;
        let parsed: StatementResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.sql_state.as_deref(), Some("42S02"));
        assert_eq!(parsed.code.as_deref(), Some("002003"));
        assert!(parsed.result_set_meta_data.is_none());
    }

    #[test]
    fn test_zero_timeout_has_no_local_deadline() {
        assert_eq!(local_deadline(Duration::ZERO), None);
        assert_eq!(
            local_deadline(Duration::from_secs(10)),
            Some(Duration::from_secs(10) + HTTP_TIMEOUT)
        );
    }

    #[test]
    fn test_options_base_url() {
        let params =
            ConnectionParameters::new("tz45198.eu-central-1", "u", "w", "r", "d", "S").unwrap();
        assert_eq!(
            EngineOptions::default().resolve_base_url(&params),
            "https://tz45198.eu-central-1.snowflakecomputing.com"
        );
        assert_eq!(
            EngineOptions::default()
                .with_base_url("http://127.0.0.1:1234/")
                .resolve_base_url(&params),
            "http://127.0.0.1:1234"
        );
    }
}
