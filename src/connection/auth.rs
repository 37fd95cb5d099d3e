//! Request authentication for the Snowflake SQL API.
//!
//! Key-pair authentication signs a short-lived JWT with the decrypted private
//! key. The token is cached and re-issued shortly before it expires.

use crate::connection::credentials::PrivateKey;
use crate::connection::params::ConnectionParameters;
use crate::error::{DatabotError, DatabotResult};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs1::EncodeRsaPrivateKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Lifetime of an issued key-pair JWT. Snowflake accepts at most one hour.
pub const JWT_LIFETIME: Duration = Duration::from_secs(59 * 60);

/// Tokens are renewed when less than this remains.
const RENEW_MARGIN: Duration = Duration::from_secs(5 * 60);

/// How the token is presented to Snowflake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `Authorization: Bearer <jwt>` with `KEYPAIR_JWT` token type
    KeyPairJwt,
    /// `Authorization: Snowflake Token="<session>"`
    Session,
}

/// A credential ready to attach to a request.
#[derive(Clone)]
pub struct AuthToken {
    pub kind: TokenKind,
    pub token: String,
    /// Unix seconds after which the token is no longer usable.
    pub expires_at: i64,
}

impl AuthToken {
    /// `Authorization` header value.
    pub fn authorization(&self) -> String {
        match self.kind {
            TokenKind::KeyPairJwt => format!("Bearer {}", self.token),
            TokenKind::Session => format!("Snowflake Token=\"{}\"", self.token),
        }
    }

    /// `X-Snowflake-Authorization-Token-Type` header value, if one is needed.
    pub fn token_type(&self) -> Option<&'static str> {
        match self.kind {
            TokenKind::KeyPairJwt => Some("KEYPAIR_JWT"),
            TokenKind::Session => None,
        }
    }

    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at - now > RENEW_MARGIN.as_secs() as i64
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("kind", &self.kind)
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies authentication tokens to the engine.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Return a usable token, authenticating if needed.
    async fn token(&self) -> DatabotResult<AuthToken>;

    /// Drop any cached token, forcing re-authentication on next use.
    async fn invalidate(&self);

    fn name(&self) -> &'static str;
}

/// Claims of a Snowflake key-pair JWT.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyPairClaims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs key-pair JWTs and caches the current one.
pub struct KeyPairAuthenticator {
    encoding_key: EncodingKey,
    qualified_user: String,
    fingerprint: String,
    cached: Mutex<Option<AuthToken>>,
}

impl KeyPairAuthenticator {
    pub fn new(params: &ConnectionParameters, key: &PrivateKey) -> DatabotResult<Self> {
        let fingerprint = key.public_key_fingerprint()?;
        // jsonwebtoken's RSA DER loader expects PKCS#1.
        let pkcs1 = key
            .rsa_key()?
            .to_pkcs1_der()
            .map_err(|e| DatabotError::credential(format!("Failed to encode signing key: {}", e)))?;
        let encoding_key = EncodingKey::from_rsa_der(pkcs1.as_bytes());

        Ok(Self {
            encoding_key,
            qualified_user: format!(
                "{}.{}",
                params.account_locator(),
                params.user().to_ascii_uppercase()
            ),
            fingerprint,
            cached: Mutex::new(None),
        })
    }

    /// Public key fingerprint registered on the Snowflake user.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Build the claims for a token issued at `now` (unix seconds).
    pub fn claims(&self, now: i64) -> KeyPairClaims {
        KeyPairClaims {
            iss: format!("{}.{}", self.qualified_user, self.fingerprint),
            sub: self.qualified_user.clone(),
            iat: now,
            exp: now + JWT_LIFETIME.as_secs() as i64,
        }
    }

    /// Sign a new token issued at `now`.
    pub fn issue(&self, now: i64) -> DatabotResult<AuthToken> {
        let claims = self.claims(now);
        let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| DatabotError::credential(format!("Failed to sign JWT: {}", e)))?;
        Ok(AuthToken {
            kind: TokenKind::KeyPairJwt,
            token,
            expires_at: claims.exp,
        })
    }
}

#[async_trait]
impl Authenticator for KeyPairAuthenticator {
    async fn token(&self) -> DatabotResult<AuthToken> {
        let now = chrono::Utc::now().timestamp();
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.clone());
        }

        debug!(subject = %self.qualified_user, "Issuing key-pair JWT");
        let token = self.issue(now)?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    fn name(&self) -> &'static str {
        "snowflake_jwt"
    }
}
