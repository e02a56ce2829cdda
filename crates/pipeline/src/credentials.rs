//! Application identity: the key material the agent authenticates with.
//!
//! [`ApplicationCredentials`] is assembled once at start-up by a
//! [`CredentialProvider`] and is immutable afterwards. Secret-bearing fields
//! redact themselves from `Debug` output so credentials can sit inside
//! structures that get logged.

use crate::{AppId, CredentialError, InstallationId};

// ---------------------------------------------------------------------------
// Secret wrappers
// ---------------------------------------------------------------------------

/// PEM-encoded RSA private key of the GitHub App.
///
/// Opaque: the pipeline never inspects the key. Parsing happens when the
/// session is built, where a malformed key becomes
/// [`CredentialError::MalformedPrivateKey`].
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    /// Wraps raw PEM bytes.
    pub fn from_pem(pem: impl Into<Vec<u8>>) -> Self {
        Self(pem.into())
    }

    /// Returns the raw PEM bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Shared secret GitHub uses to sign webhook deliveries.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    /// Creates a secret, returning `None` if the value is empty.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        if v.is_empty() {
            None
        } else {
            Some(Self(v))
        }
    }

    /// Returns the secret bytes used as the HMAC key.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WebhookSecret(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Everything needed to act as the installed GitHub App.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationCredentials {
    app_id: AppId,
    private_key: PrivateKey,
    webhook_secret: WebhookSecret,
    installation_id: Option<InstallationId>,
}

impl ApplicationCredentials {
    /// Validates and assembles credentials from raw configuration values.
    ///
    /// Blank app ids and secrets are rejected here; the private key is only
    /// checked for presence; its format is validated when a session is built.
    pub fn new(
        app_id: &str,
        private_key: PrivateKey,
        webhook_secret: &str,
        installation_id: Option<InstallationId>,
    ) -> Result<Self, CredentialError> {
        let app_id = AppId::new(app_id).ok_or(CredentialError::MissingAppId)?;
        let webhook_secret =
            WebhookSecret::new(webhook_secret).ok_or(CredentialError::MissingWebhookSecret)?;
        if private_key.as_bytes().iter().all(u8::is_ascii_whitespace) {
            return Err(CredentialError::MalformedPrivateKey {
                reason: "key is empty".into(),
            });
        }
        Ok(Self {
            app_id,
            private_key,
            webhook_secret,
            installation_id,
        })
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn webhook_secret(&self) -> &WebhookSecret {
        &self.webhook_secret
    }

    pub fn installation_id(&self) -> Option<InstallationId> {
        self.installation_id
    }
}

/// Source of the application identity (environment, files, a vault, ...).
///
/// Called once during start-up; a failure aborts the process.
pub trait CredentialProvider {
    fn load(&self) -> Result<ApplicationCredentials, CredentialError>;
}
