//! Connection URL construction.
//!
//! URLs follow the Snowflake connector layout
//! `snowflake://<user>@<account>/<database>?role=..&schemas=..&warehouse=..`
//! and are then rebound to a registered dialect by rewriting the scheme.

use crate::connection::params::ConnectionParameters;
use crate::error::{DatabotError, DatabotResult};
use url::Url;

/// Scheme of the native warehouse dialect.
pub const NATIVE_DIALECT: &str = "snowflake";

/// A warehouse connection URL. Never carries secret material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    url: Url,
}

impl ConnectionUrl {
    /// Build a URL with the native `snowflake` scheme.
    ///
    /// `authenticator` is added as a query parameter when present
    /// (e.g. `externalbrowser`).
    pub fn native(params: &ConnectionParameters, authenticator: Option<&str>) -> DatabotResult<Self> {
        let mut url = Url::parse(&format!("{}://{}/", NATIVE_DIALECT, params.account()))
            .map_err(|e| {
                DatabotError::configuration(format!(
                    "Invalid account identifier '{}': {}",
                    params.account(),
                    e
                ))
            })?;

        url.set_username(params.user()).map_err(|_| {
            DatabotError::configuration(format!("Invalid user name '{}'", params.user()))
        })?;

        url.path_segments_mut()
            .map_err(|_| DatabotError::internal("Connection URL cannot carry a database path"))?
            .clear()
            .push(params.database());

        {
            let mut query = url.query_pairs_mut();
            if let Some(authenticator) = authenticator {
                query.append_pair("authenticator", authenticator);
            }
            query
                .append_pair("role", params.role())
                .append_pair("schemas", &params.schemas().join(","))
                .append_pair("warehouse", params.warehouse());
        }

        Ok(Self { url })
    }

    /// Rebind the URL to another dialect by replacing its scheme.
    ///
    /// Dialect names are case-insensitive; the scheme is always lowercase.
    pub fn with_dialect(mut self, dialect_name: &str) -> DatabotResult<Self> {
        let scheme = dialect_name.to_ascii_lowercase();
        self.url.set_scheme(&scheme).map_err(|_| {
            DatabotError::configuration(format!(
                "Dialect name '{}' is not a valid URL scheme",
                dialect_name
            ))
        })?;
        Ok(self)
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Look up a query parameter.
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Schema list carried by the URL, in order.
    pub fn schemas(&self) -> Vec<String> {
        self.query_param("schemas")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn database(&self) -> Option<String> {
        self.url
            .path_segments()
            .and_then(|mut segments| segments.next().map(String::from))
            .filter(|s| !s.is_empty())
    }

    pub fn authenticator(&self) -> Option<String> {
        self.query_param("authenticator")
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl std::fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}
