//! Command-line and environment configuration.
//!
//! Every option can be given as a flag or an environment variable; a `.env`
//! file in the working directory is loaded before parsing. The four identity
//! settings use the variable names GitHub's App setup guide uses (`APP_ID`,
//! `WEBHOOK_SECRET`, `PRIVATE_KEY_PATH`, `INSTALLATION_ID`).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use github::{ClientOptions, DEFAULT_API_URL};
use listener::DEFAULT_WEBHOOK_PATH;
use pipeline::{
    ApplicationCredentials, CredentialError, CredentialProvider, InstallationId, PrivateKey,
};

/// Output format of the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Receives GitHub webhook deliveries and correlates comments with project boards.
#[derive(Parser)]
#[command(name = "boardwatch", version)]
pub struct Config {
    /// GitHub App id (or client id).
    #[arg(long, env = "APP_ID")]
    pub app_id: Option<String>,

    /// Secret configured on the App's webhook.
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,

    /// Path of the App's PEM private key.
    #[arg(long, env = "PRIVATE_KEY_PATH")]
    pub private_key_path: Option<PathBuf>,

    /// Installation whose token signs outbound queries.
    #[arg(long, env = "INSTALLATION_ID")]
    pub installation_id: Option<u64>,

    #[arg(long, env = "BOARDWATCH_HOST", default_value = "localhost")]
    pub host: String,

    #[arg(long, env = "BOARDWATCH_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Route deliveries are accepted on.
    #[arg(
        long,
        env = "BOARDWATCH_WEBHOOK_PATH",
        default_value = DEFAULT_WEBHOOK_PATH
    )]
    pub webhook_path: String,

    /// GitHub API root (GitHub Enterprise: `https://HOST/api/v3`).
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Timeout for each outbound HTTP request, in seconds.
    #[arg(long, env = "BOARDWATCH_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(
        long,
        env = "BOARDWATCH_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text
    )]
    pub log_format: LogFormat,

    /// OTLP/gRPC collector endpoint; span export is disabled when unset.
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// `host:port` for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            api_url: self.api_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..ClientOptions::default()
        }
    }
}

impl CredentialProvider for Config {
    fn load(&self) -> Result<ApplicationCredentials, CredentialError> {
        let Some(path) = &self.private_key_path else {
            return Err(CredentialError::PrivateKeyUnreadable {
                path: "<unset>".into(),
                reason: "PRIVATE_KEY_PATH is not set".into(),
            });
        };
        let pem = std::fs::read(path).map_err(|e| CredentialError::PrivateKeyUnreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        ApplicationCredentials::new(
            self.app_id.as_deref().unwrap_or_default(),
            PrivateKey::from_pem(pem),
            self.webhook_secret.as_deref().unwrap_or_default(),
            self.installation_id.map(InstallationId::new),
        )
    }
}
