//! Warehouse connection construction.
//!
//! [`ConnectionBuilder`] turns [`ConnectionParameters`] and a [`Credential`]
//! into an [`Engine`] bound to a registered dialect. Both credential
//! strategies share one construction path:
//!
//! 1. build the native `snowflake://` URL
//! 2. rebind its scheme to the multi-schema dialect
//! 3. resolve that dialect in the registry
//! 4. construct the engine with the matching authenticator
//!
//! No network I/O happens here; authentication runs on the first statement.

pub mod auth;
pub mod browser;
pub mod credentials;
pub mod dialect;
pub mod params;
pub mod url;

pub use auth::{AuthToken, Authenticator, KeyPairAuthenticator, TokenKind};
pub use browser::ExternalBrowserAuthenticator;
pub use credentials::{Credential, CredentialMode, PrivateKey};
pub use dialect::{DIALECT_NAME, Dialect, DialectRegistry, MultiSchemaDialect, SnowflakeDialect};
pub use params::ConnectionParameters;
pub use self::url::ConnectionUrl;

use crate::db::{Engine, EngineOptions, http_client};
use crate::error::DatabotResult;
use std::sync::Arc;
use tracing::info;

/// Builds engines from connection parameters and credentials.
#[derive(Debug, Clone)]
pub struct ConnectionBuilder {
    registry: DialectRegistry,
    options: EngineOptions,
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new(DialectRegistry::with_defaults(), EngineOptions::default())
    }
}

impl ConnectionBuilder {
    pub fn new(registry: DialectRegistry, options: EngineOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &DialectRegistry {
        &self.registry
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// The connection URL for these inputs, rebound to the multi-schema dialect.
    pub fn connection_url(
        &self,
        params: &ConnectionParameters,
        credential: &Credential,
    ) -> DatabotResult<ConnectionUrl> {
        ConnectionUrl::native(params, credential.url_authenticator())?.with_dialect(DIALECT_NAME)
    }

    /// Build an engine for `params`, authenticating with `credential`.
    ///
    /// Fails with a configuration error when the URL's dialect isn't
    /// registered.
    pub fn build_connection(
        &self,
        params: &ConnectionParameters,
        credential: Credential,
    ) -> DatabotResult<Engine> {
        let url = self.connection_url(params, &credential)?;
        let dialect = self.registry.resolve(url.scheme())?;
        let client = http_client()?;

        let authenticator: Arc<dyn Authenticator> = match &credential {
            Credential::KeyPair(key) => Arc::new(KeyPairAuthenticator::new(params, key)?),
            Credential::ExternalBrowser => Arc::new(ExternalBrowserAuthenticator::new(
                client.clone(),
                self.options.resolve_base_url(params),
                params,
            )),
        };

        info!(
            url = %url,
            dialect = dialect.name(),
            authenticator = authenticator.name(),
            "Built warehouse connection"
        );

        Ok(Engine::new(
            client,
            params.clone(),
            url,
            dialect,
            authenticator,
            &self.options,
        ))
    }
}
