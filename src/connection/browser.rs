//! External-browser SSO authentication.
//!
//! Nothing secret is held by the process. On first use the authenticator asks
//! Snowflake for an SSO URL, waits for the identity provider to redirect the
//! browser to a localhost callback carrying the SAML token, and then exchanges
//! that token for a session token. Session tokens are only accepted by the
//! connector query endpoint, so the engine routes these statements there.

use crate::connection::auth::{AuthToken, Authenticator, TokenKind};
use crate::connection::params::ConnectionParameters;
use crate::error::{DatabotError, DatabotResult};
use async_trait::async_trait;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

/// How long to wait for the user to finish the browser login.
const BROWSER_TIMEOUT: Duration = Duration::from_secs(120);

/// Snowflake session tokens are valid for four hours; renew well before that.
const SESSION_LIFETIME_SECS: i64 = 3 * 60 * 60;

const CLIENT_APP_ID: &str = env!("CARGO_PKG_NAME");
const CLIENT_APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize)]
struct LoginEnvelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SsoData {
    sso_url: String,
    proof_key: String,
}

#[derive(Debug, Deserialize)]
struct SessionData {
    token: String,
}

/// Authenticator for `authenticator=externalbrowser` connections.
pub struct ExternalBrowserAuthenticator {
    client: reqwest::Client,
    base_url: String,
    account: String,
    user: String,
    params: ConnectionParameters,
    cached: Mutex<Option<AuthToken>>,
}

impl ExternalBrowserAuthenticator {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, params: &ConnectionParameters) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            account: params.account_locator(),
            user: params.user().to_string(),
            params: params.clone(),
            cached: Mutex::new(None),
        }
    }

    async fn request_sso_url(&self, port: u16) -> DatabotResult<SsoData> {
        let body = json!({
            "data": {
                "ACCOUNT_NAME": self.account,
                "LOGIN_NAME": self.user,
                "AUTHENTICATOR": "EXTERNALBROWSER",
                "BROWSER_MODE_REDIRECT_PORT": port.to_string(),
                "CLIENT_APP_ID": CLIENT_APP_ID,
                "CLIENT_APP_VERSION": CLIENT_APP_VERSION,
            }
        });

        let envelope: LoginEnvelope<SsoData> = self
            .client
            .post(format!("{}/session/authenticator-request", self.base_url))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        unwrap_envelope(envelope, "authenticator request")
    }

    async fn login(&self, saml_token: &str, proof_key: &str) -> DatabotResult<SessionData> {
        let body = json!({
            "data": {
                "ACCOUNT_NAME": self.account,
                "LOGIN_NAME": self.user,
                "AUTHENTICATOR": "EXTERNALBROWSER",
                "TOKEN": saml_token,
                "PROOF_KEY": proof_key,
                "CLIENT_APP_ID": CLIENT_APP_ID,
                "CLIENT_APP_VERSION": CLIENT_APP_VERSION,
            }
        });

        let envelope: LoginEnvelope<SessionData> = self
            .client
            .post(format!("{}/session/v1/login-request", self.base_url))
            .query(&[
                ("databaseName", self.params.database()),
                ("schemaName", self.params.default_schema()),
                ("warehouse", self.params.warehouse()),
                ("roleName", self.params.role()),
            ])
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        unwrap_envelope(envelope, "login request")
    }

    async fn authenticate(&self) -> DatabotResult<AuthToken> {
        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|e| {
            DatabotError::connection(
                format!("Failed to bind browser callback listener: {}", e),
                "Check that a localhost port can be opened",
            )
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| DatabotError::internal(e.to_string()))?
            .port();

        let sso = self.request_sso_url(port).await?;
        info!(url = %sso.sso_url, "Open this URL in a browser to authenticate to Snowflake");

        let saml_token = tokio::time::timeout(BROWSER_TIMEOUT, accept_token(listener))
            .await
            .map_err(|_| DatabotError::timeout("browser authentication", BROWSER_TIMEOUT.as_secs()))??;

        let session = self.login(&saml_token, &sso.proof_key).await?;
        info!(user = %self.user, "Browser authentication succeeded");

        Ok(AuthToken {
            kind: TokenKind::Session,
            token: session.token,
            expires_at: chrono::Utc::now().timestamp() + SESSION_LIFETIME_SECS,
        })
    }
}

#[async_trait]
impl Authenticator for ExternalBrowserAuthenticator {
    async fn token(&self) -> DatabotResult<AuthToken> {
        let now = chrono::Utc::now().timestamp();
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > now) {
            return Ok(token.clone());
        }
        let token = self.authenticate().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    fn name(&self) -> &'static str {
        "externalbrowser"
    }
}

fn unwrap_envelope<T>(envelope: LoginEnvelope<T>, step: &str) -> DatabotResult<T> {
    match envelope.data {
        Some(data) if envelope.success => Ok(data),
        _ => Err(DatabotError::connection(
            format!(
                "Snowflake rejected the {}: {}",
                step,
                envelope.message.unwrap_or_else(|| "no message".to_string())
            ),
            "Check the user name and that SSO is enabled for the account",
        )),
    }
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Clone, Default)]
struct CallbackState {
    token: Arc<Mutex<Option<String>>>,
    received: Arc<Notify>,
}

async fn callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, &'static str) {
    match params.token.filter(|t| !t.is_empty()) {
        Some(token) => {
            state.token.lock().await.get_or_insert(token);
            state.received.notify_one();
            (
                StatusCode::OK,
                "Snowflake authentication complete. You can close this window.",
            )
        }
        None => {
            debug!("Browser callback without a token");
            (
                StatusCode::BAD_REQUEST,
                "Snowflake authentication failed: no token received.",
            )
        }
    }
}

/// Serve the SSO callback until a request carries a `token` query parameter.
///
/// Requests without a token are answered and ignored, so browser preconnects
/// and stray requests do not end the login.
async fn accept_token(listener: TcpListener) -> DatabotResult<String> {
    let state = CallbackState::default();
    let app = Router::new()
        .route("/", get(callback))
        .with_state(state.clone());

    let received = state.received.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { received.notified().await })
        .await
        .map_err(|e| {
            DatabotError::connection(format!("Browser callback failed: {}", e), "Retry the login")
        })?;

    state.token.lock().await.take().ok_or_else(|| {
        DatabotError::credential("Browser callback did not carry an authentication token")
    })
}
