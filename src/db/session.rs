//! Statement execution for session-token connections.
//!
//! The browser login yields a connector session token, which the SQL API does
//! not accept. Those statements go to `POST /queries/v1/query-request`;
//! queries still running are polled at the returned result URL, and results
//! too large for the first response are downloaded chunk by chunk.

use crate::connection::auth::{AuthToken, Authenticator};
use crate::db::engine::{
    INSUFFICIENT_PRIVILEGES, MAX_POLL_INTERVAL, POLL_INTERVAL, RawResult, RowType, local_deadline,
};
use crate::error::{DatabotError, DatabotResult};
use crate::models::ColumnMetadata;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

const QUERY_IN_PROGRESS: &str = "333333";
const QUERY_IN_PROGRESS_ASYNC: &str = "333334";
const SESSION_EXPIRED: &str = "390112";

const SNOWFLAKE_CONTENT_TYPE: &str = "application/snowflake";

const SSE_C_ALGORITHM: &str = "x-amz-server-side-encryption-customer-algorithm";
const SSE_C_KEY: &str = "x-amz-server-side-encryption-customer-key";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    sql_text: &'a str,
    async_exec: bool,
    sequence_id: u64,
    query_submission_time: i64,
    parameters: QueryParameters,
}

#[derive(Debug, Serialize)]
struct QueryParameters {
    #[serde(rename = "STATEMENT_TIMEOUT_IN_SECONDS")]
    statement_timeout: u64,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    #[serde(default)]
    query_id: Option<String>,
    #[serde(default)]
    get_result_url: Option<String>,
    #[serde(default, rename = "rowtype")]
    row_type: Vec<RowType>,
    #[serde(default, rename = "rowset")]
    row_set: Vec<Vec<Option<String>>>,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    query_result_format: Option<String>,
    #[serde(default)]
    chunks: Vec<Chunk>,
    #[serde(default)]
    chunk_headers: HashMap<String, String>,
    #[serde(default)]
    qrmk: Option<String>,
    #[serde(default)]
    sql_state: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Chunk {
    url: String,
    #[serde(default)]
    row_count: u64,
}

impl QueryResponse {
    fn in_progress(&self) -> bool {
        matches!(
            self.code.as_deref(),
            Some(QUERY_IN_PROGRESS | QUERY_IN_PROGRESS_ASYNC)
        )
    }
}

/// One statement against the connector query endpoint.
pub(crate) struct SessionQuery<'a> {
    pub(crate) client: &'a reqwest::Client,
    pub(crate) base_url: &'a str,
    pub(crate) authenticator: &'a dyn Authenticator,
    pub(crate) statement_timeout: Duration,
}

impl SessionQuery<'_> {
    pub(crate) async fn run(
        &self,
        sql: &str,
        token: &AuthToken,
        sequence_id: u64,
        limit: usize,
        started: Instant,
    ) -> DatabotResult<RawResult> {
        let headers = session_headers(token)?;
        let request = QueryRequest {
            sql_text: sql,
            async_exec: false,
            sequence_id,
            query_submission_time: chrono::Utc::now().timestamp_millis(),
            parameters: QueryParameters {
                statement_timeout: self.statement_timeout.as_secs(),
            },
        };
        let request_id = uuid::Uuid::new_v4().to_string();

        let response = self
            .client
            .post(format!("{}/queries/v1/query-request", self.base_url))
            .query(&[("requestId", request_id.as_str())])
            .headers(headers.clone())
            .json(&request)
            .send()
            .await?;
        let mut response = self.read(response).await?;

        let deadline = local_deadline(self.statement_timeout);
        let mut interval = POLL_INTERVAL;
        while response.in_progress() {
            if deadline.is_some_and(|d| started.elapsed() > d) {
                return Err(DatabotError::timeout("statement", started.elapsed().as_secs()));
            }
            let result_url = response
                .data
                .as_ref()
                .and_then(|d| d.get_result_url.clone())
                .ok_or_else(|| {
                    DatabotError::internal("Snowflake reported a running query without a result URL")
                })?;
            debug!(result_url = %result_url, "Query still running");
            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(MAX_POLL_INTERVAL);

            let next = self
                .client
                .get(format!("{}{}", self.base_url, result_url))
                .headers(headers.clone())
                .send()
                .await?;
            response = self.read(next).await?;
        }

        let data = self.finished(response).await?;
        if let Some(format) = data.query_result_format.as_deref() {
            if !format.eq_ignore_ascii_case("json") {
                return Err(DatabotError::internal(format!(
                    "Unsupported query result format '{}'",
                    format
                )));
            }
        }

        let mut rows = data.row_set;
        for chunk in &data.chunks {
            if rows.len() >= limit {
                break;
            }
            debug!(rows = chunk.row_count, "Downloading result chunk");
            let chunk_rows =
                fetch_chunk(self.client, chunk, &data.chunk_headers, data.qrmk.as_deref()).await?;
            rows.extend(chunk_rows);
        }

        Ok(RawResult {
            columns: data.row_type.into_iter().map(ColumnMetadata::from).collect(),
            rows,
            total_rows: data.total,
            statement_handle: data.query_id,
        })
    }

    async fn read(&self, response: reqwest::Response) -> DatabotResult<QueryResponse> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.authenticator.invalidate().await;
            return Err(DatabotError::connection(
                "Snowflake rejected the session token",
                "Log in through the browser again",
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DatabotError::connection(
                format!("HTTP {}: {}", status, body.trim()),
                "Check the account identifier and Snowflake service status",
            ));
        }
        Ok(response.json().await?)
    }

    /// Unwrap a completed response, mapping failures onto errors.
    async fn finished(&self, response: QueryResponse) -> DatabotResult<QueryData> {
        if response.success {
            return Ok(response.data.unwrap_or_default());
        }

        let message = response
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "Query failed without a message".to_string());
        if response.code.as_deref() == Some(SESSION_EXPIRED) {
            self.authenticator.invalidate().await;
            return Err(DatabotError::connection(
                format!("Snowflake session expired: {}", message),
                "Retry the call to log in again",
            ));
        }

        let data = response.data.unwrap_or_default();
        if data.sql_state.as_deref() == Some(INSUFFICIENT_PRIVILEGES) {
            return Err(DatabotError::permission("statement", message));
        }
        Err(DatabotError::statement(
            message,
            data.sql_state,
            data.error_code.or(response.code),
        ))
    }
}

fn session_headers(token: &AuthToken) -> DatabotResult<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(3);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static(SNOWFLAKE_CONTENT_TYPE));
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&token.authorization())
            .map_err(|_| DatabotError::credential("Auth token is not a valid header value"))?,
    );
    Ok(headers)
}

/// Download one result chunk. Chunks hold comma-separated JSON row arrays
/// without the enclosing brackets.
async fn fetch_chunk(
    client: &reqwest::Client,
    chunk: &Chunk,
    chunk_headers: &HashMap<String, String>,
    qrmk: Option<&str>,
) -> DatabotResult<Vec<Vec<Option<String>>>> {
    let mut request = client.get(&chunk.url);
    if !chunk_headers.is_empty() {
        for (name, value) in chunk_headers {
            request = request.header(name.as_str(), value.as_str());
        }
    } else if let Some(key) = qrmk {
        request = request.header(SSE_C_ALGORITHM, "AES256").header(SSE_C_KEY, key);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(DatabotError::connection(
            format!("Failed to download result chunk: HTTP {}", response.status()),
            "Retry the query",
        ));
    }
    let body = response.text().await?;
    Ok(serde_json::from_str(&format!("[{}]", body.trim()))?)
}
