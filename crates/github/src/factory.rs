//! Construction of the two GitHub-facing clients: the authenticated query
//! session and the webhook signature verifier.
//!
//! Nothing here touches the network; tokens are obtained on first use.

use std::time::Duration;

use pipeline::{ApplicationCredentials, CredentialError, WebhookSecret};
use thiserror::Error;

use crate::{AppJwtSigner, InstallationSession, WebhookSignatureVerifier};

/// Public GitHub API root.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Settings for the outbound HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// API root, without trailing slash (GitHub Enterprise:
    /// `https://HOST/api/v3`).
    pub api_url: String,
    /// GitHub rejects requests without a `User-Agent`.
    pub user_agent: String,
    /// Per-request timeout; an elapsed timeout surfaces as a transport error.
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            user_agent: format!("boardwatch/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Failures while building a session.
#[derive(Debug, Error)]
pub enum SessionBuildError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("HTTP client could not be initialised: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Builds the installation-scoped session used for correlation queries.
///
/// # Errors
///
/// [`SessionBuildError::Credential`] if the private key is not a valid RSA
/// PEM key; [`SessionBuildError::HttpClient`] if the TLS backend cannot be
/// initialised.
pub fn build_session(
    credentials: &ApplicationCredentials,
    options: &ClientOptions,
) -> Result<InstallationSession, SessionBuildError> {
    let signer = AppJwtSigner::from_credentials(credentials)?;
    let http = reqwest::Client::builder()
        .user_agent(options.user_agent.as_str())
        .timeout(options.request_timeout)
        .build()?;
    Ok(InstallationSession::new(
        http,
        signer,
        credentials.installation_id(),
        &options.api_url,
    ))
}

/// Builds the verifier for inbound webhook deliveries.
pub fn build_verifier(secret: &WebhookSecret) -> WebhookSignatureVerifier {
    WebhookSignatureVerifier::new(secret.clone())
}
