//! Credential strategies for the warehouse connection.
//!
//! Two strategies exist: interactive external-browser SSO, where this process
//! holds no secret, and key-pair authentication, where an encrypted PKCS#8
//! private key is read from the environment and decrypted in memory.

use crate::error::{DatabotError, DatabotResult};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use clap::ValueEnum;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Environment variable holding the PEM-encoded encrypted private key.
pub const PRIVATE_KEY_ENV: &str = "DATABOT_SNOWFLAKE_PRIVATE_KEY";

/// Environment variable holding the private key passphrase.
pub const PASSPHRASE_ENV: &str = "DATABOT_SNOWFLAKE_PASSPHRASE";

/// Authenticator value carried by browser-authenticated connection URLs.
pub const EXTERNAL_BROWSER_AUTHENTICATOR: &str = "externalbrowser";

/// How the server authenticates against Snowflake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CredentialMode {
    /// Key-pair JWT authentication with an encrypted private key
    #[default]
    #[value(name = "snowflake-jwt", alias = "snowflake_jwt")]
    KeyPair,
    /// Interactive SSO through the system browser
    #[value(name = "externalbrowser")]
    ExternalBrowser,
}

impl std::fmt::Display for CredentialMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyPair => write!(f, "snowflake_jwt"),
            Self::ExternalBrowser => write!(f, "{}", EXTERNAL_BROWSER_AUTHENTICATOR),
        }
    }
}

/// An unencrypted PKCS#8 DER private key, zeroed on drop.
pub struct PrivateKey {
    der: Zeroizing<Vec<u8>>,
}

impl PrivateKey {
    /// Decrypt an encrypted PKCS#8 PEM key and re-encode it as unencrypted DER.
    pub fn decrypt_pem(pem: &str, passphrase: &[u8]) -> DatabotResult<Self> {
        // Secret stores often flatten newlines into literal "\n".
        let pem = Zeroizing::new(pem.trim().replace("\\n", "\n"));

        if pem.contains("BEGIN RSA PRIVATE KEY") {
            return Err(DatabotError::credential(
                "PKCS#1 keys are not supported; convert the key with `openssl pkcs8 -topk8`",
            ));
        }
        if pem.contains("BEGIN PRIVATE KEY") {
            return Err(DatabotError::credential(
                "Private key is not encrypted, but a passphrase was supplied",
            ));
        }
        if !pem.contains("BEGIN ENCRYPTED PRIVATE KEY") {
            return Err(DatabotError::credential(
                "Could not find an encrypted PKCS#8 PEM block in the private key",
            ));
        }

        let key = RsaPrivateKey::from_pkcs8_encrypted_pem(&pem, passphrase).map_err(|e| {
            DatabotError::credential(format!(
                "Failed to decrypt private key (wrong passphrase or malformed key): {}",
                e
            ))
        })?;

        let der = key
            .to_pkcs8_der()
            .map_err(|e| DatabotError::credential(format!("Failed to encode private key: {}", e)))?;

        Ok(Self {
            der: Zeroizing::new(der.as_bytes().to_vec()),
        })
    }

    /// Unencrypted PKCS#8 DER bytes.
    pub fn pkcs8_der(&self) -> &[u8] {
        &self.der
    }

    /// Decode the key for signing.
    pub fn rsa_key(&self) -> DatabotResult<RsaPrivateKey> {
        RsaPrivateKey::from_pkcs8_der(&self.der)
            .map_err(|e| DatabotError::credential(format!("Invalid PKCS#8 key: {}", e)))
    }

    /// Snowflake public key fingerprint: `SHA256:` + base64 of the SHA-256
    /// digest of the DER-encoded SubjectPublicKeyInfo.
    pub fn public_key_fingerprint(&self) -> DatabotResult<String> {
        let public = self
            .rsa_key()?
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| DatabotError::credential(format!("Failed to encode public key: {}", e)))?;
        let digest = Sha256::digest(public.as_bytes());
        Ok(format!("SHA256:{}", STANDARD.encode(digest)))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("der", &format_args!("<{} bytes redacted>", self.der.len()))
            .finish()
    }
}

/// Resolved credential material for one connection.
#[derive(Debug)]
pub enum Credential {
    /// Authentication happens in the browser at first connect.
    ExternalBrowser,
    /// Decrypted key used to sign key-pair JWTs.
    KeyPair(PrivateKey),
}

impl Credential {
    /// Resolve credentials for the given mode, reading the process environment.
    pub fn resolve(mode: CredentialMode) -> DatabotResult<Self> {
        match mode {
            CredentialMode::ExternalBrowser => Ok(Self::ExternalBrowser),
            CredentialMode::KeyPair => Self::key_pair_from_values(
                std::env::var(PRIVATE_KEY_ENV).ok(),
                std::env::var(PASSPHRASE_ENV).ok(),
            ),
        }
    }

    /// Build key-pair credentials from already loaded values.
    ///
    /// Fails with a configuration error when either value is missing or
    /// empty, and with a credential error when the key can't be decrypted.
    pub fn key_pair_from_values(
        private_key_pem: Option<String>,
        passphrase: Option<String>,
    ) -> DatabotResult<Self> {
        let pem = Zeroizing::new(non_empty(private_key_pem, PRIVATE_KEY_ENV)?);
        let passphrase = Zeroizing::new(non_empty(passphrase, PASSPHRASE_ENV)?);
        let key = PrivateKey::decrypt_pem(&pem, passphrase.as_bytes())?;
        Ok(Self::KeyPair(key))
    }

    pub fn mode(&self) -> CredentialMode {
        match self {
            Self::ExternalBrowser => CredentialMode::ExternalBrowser,
            Self::KeyPair(_) => CredentialMode::KeyPair,
        }
    }

    /// `authenticator` URL parameter for this strategy, if any.
    pub fn url_authenticator(&self) -> Option<&'static str> {
        match self {
            Self::ExternalBrowser => Some(EXTERNAL_BROWSER_AUTHENTICATOR),
            Self::KeyPair(_) => None,
        }
    }

    /// The `private_key` connect argument, if any.
    pub fn private_key(&self) -> Option<&PrivateKey> {
        match self {
            Self::KeyPair(key) => Some(key),
            Self::ExternalBrowser => None,
        }
    }
}

fn non_empty(value: Option<String>, name: &str) -> DatabotResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(DatabotError::configuration(format!(
            "Environment variable {} is required for key-pair authentication",
            name
        ))),
    }
}
