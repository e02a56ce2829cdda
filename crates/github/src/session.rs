//! Installation-scoped GraphQL session.
//!
//! [`InstallationSession`] implements [`pipeline::QuerySession`]. It holds the
//! App's JWT signer and lazily exchanges App JWTs for installation access
//! tokens, which GitHub issues with a one hour lifetime. The cached token is
//! the only mutable state; it sits behind an async mutex so concurrent
//! handlers that find it stale trigger exactly one exchange.
//!
//! Network I/O happens at two points only: the token exchange and the GraphQL
//! request itself.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use pipeline::{CorrelationQueryError, InstallationId, QuerySession};
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::AppJwtSigner;

/// Tokens this close to expiry are treated as already expired.
const REFRESH_MARGIN_SECS: i64 = 60;

const GITHUB_JSON: &str = "application/vnd.github+json";
const API_VERSION_HEADER: &str = "X-GitHub-Api-Version";
const API_VERSION: &str = "2022-11-28";

/// Longest response body quoted in an error message.
const MAX_ERROR_BODY: usize = 512;

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Clone)]
struct InstallationToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl InstallationToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > TimeDelta::seconds(REFRESH_MARGIN_SECS)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Authenticated access to GitHub's API on behalf of one installation.
pub struct InstallationSession {
    http: reqwest::Client,
    signer: AppJwtSigner,
    installation_id: Option<InstallationId>,
    api_url: String,
    token: Mutex<Option<InstallationToken>>,
}

impl InstallationSession {
    pub(crate) fn new(
        http: reqwest::Client,
        signer: AppJwtSigner,
        installation_id: Option<InstallationId>,
        api_url: &str,
    ) -> Self {
        Self {
            http,
            signer,
            installation_id,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        }
    }

    /// Returns a usable installation token, exchanging a fresh App JWT when the
    /// cached one is missing or about to expire.
    async fn installation_token(&self) -> Result<String, CorrelationQueryError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }
        let fresh = self.exchange_token().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Drops the cached token if it is still `rejected`; a concurrent caller
    /// may already have replaced it.
    async fn invalidate(&self, rejected: &str) {
        let mut cached = self.token.lock().await;
        if cached.as_ref().is_some_and(|t| t.value == rejected) {
            *cached = None;
        }
    }

    async fn exchange_token(&self) -> Result<InstallationToken, CorrelationQueryError> {
        let Some(installation) = self.installation_id else {
            return Err(CorrelationQueryError::Authorization {
                status: None,
                message: "no installation id is configured".into(),
            });
        };
        let jwt = self.signer.sign(Utc::now())?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, installation
        );

        let response = self
            .http
            .post(url)
            .bearer_auth(jwt)
            .header(ACCEPT, GITHUB_JSON)
            .header(API_VERSION_HEADER, API_VERSION)
            .send()
            .await
            .map_err(transport_error)?;
        let token: AccessTokenResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(malformed_response)?;

        debug!(
            installation = %installation,
            expires_at = %token.expires_at,
            "Obtained installation token"
        );
        Ok(InstallationToken {
            value: token.token,
            expires_at: token.expires_at,
        })
    }

    async fn post_graphql(
        &self,
        token: &str,
        body: &Value,
    ) -> Result<Value, CorrelationQueryError> {
        let response = self
            .http
            .post(format!("{}/graphql", self.api_url))
            .bearer_auth(token)
            .header(ACCEPT, GITHUB_JSON)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        let envelope: GraphQlEnvelope = check_status(response)
            .await?
            .json()
            .await
            .map_err(malformed_response)?;

        if !envelope.errors.is_empty() {
            return Err(CorrelationQueryError::GraphQl {
                messages: envelope.errors.into_iter().map(|e| e.message).collect(),
            });
        }
        envelope
            .data
            .ok_or_else(|| CorrelationQueryError::MalformedResponse {
                message: "response carries neither data nor errors".into(),
            })
    }
}

impl std::fmt::Debug for InstallationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationSession")
            .field("app_id", self.signer.app_id())
            .field("installation_id", &self.installation_id)
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl QuerySession for InstallationSession {
    fn installation_id(&self) -> Option<InstallationId> {
        self.installation_id
    }

    async fn graphql(&self, query: &str, variables: Value) -> Result<Value, CorrelationQueryError> {
        let body = json!({ "query": query, "variables": variables });
        let token = self.installation_token().await?;
        match self.post_graphql(&token, &body).await {
            // The token may have been revoked before its advertised expiry.
            Err(CorrelationQueryError::Authorization { status, .. }) if status == Some(401) => {
                warn!("Installation token rejected; refreshing and retrying once");
                self.invalidate(&token).await;
                let token = self.installation_token().await?;
                self.post_graphql(&token, &body).await
            }
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Response classification
// ---------------------------------------------------------------------------

fn transport_error(err: reqwest::Error) -> CorrelationQueryError {
    let message = if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        err.to_string()
    };
    CorrelationQueryError::Transport { message }
}

fn malformed_response(err: reqwest::Error) -> CorrelationQueryError {
    if err.is_decode() {
        CorrelationQueryError::MalformedResponse {
            message: err.to_string(),
        }
    } else {
        transport_error(err)
    }
}

/// Passes successful responses through and maps the rest onto
/// [`CorrelationQueryError`].
async fn check_status(response: Response) -> Result<Response, CorrelationQueryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    // GitHub signals secondary rate limits with a 403.
    let headers = response.headers();
    let quota_exhausted = header_u64(headers, "x-ratelimit-remaining") == Some(0);
    let secondary_limit = headers.contains_key(RETRY_AFTER) || quota_exhausted;
    let forbidden = status == StatusCode::FORBIDDEN;
    if status == StatusCode::TOO_MANY_REQUESTS || (forbidden && secondary_limit) {
        return Err(CorrelationQueryError::RateLimited {
            retry_after: retry_after(headers, Utc::now()),
        });
    }

    let mut message = response.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|&i| message.is_char_boundary(i))
            .unwrap_or(0);
        message.truncate(cut);
    }
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CorrelationQueryError::Authorization {
            status: Some(status.as_u16()),
            message,
        },
        _ => CorrelationQueryError::UnexpectedStatus {
            status: status.as_u16(),
            message,
        },
    })
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Delay from `Retry-After` (seconds), else from `x-ratelimit-reset` (epoch
/// seconds).
fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(secs) = header_u64(headers, RETRY_AFTER.as_str()) {
        return Some(Duration::from_secs(secs));
    }
    let reset = i64::try_from(header_u64(headers, "x-ratelimit-reset")?).ok()?;
    u64::try_from(reset - now.timestamp())
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn retry_after_prefers_explicit_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("17"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("9999999999"));

        assert_eq!(
            retry_after(&headers, Utc::now()),
            Some(Duration::from_secs(17))
        );
    }

    #[test]
    fn retry_after_falls_back_to_reset_epoch() {
        let now = Utc::now();
        let mut headers = HeaderMap::new();
        let reset = (now.timestamp() + 90).to_string();
        headers.insert("x-ratelimit-reset", HeaderValue::from_str(&reset).unwrap());

        assert_eq!(retry_after(&headers, now), Some(Duration::from_secs(90)));
    }

    #[test]
    fn reset_in_the_past_gives_no_delay_hint() {
        let now = Utc::now();
        let mut headers = HeaderMap::new();
        let reset = (now.timestamp() - 5).to_string();
        headers.insert("x-ratelimit-reset", HeaderValue::from_str(&reset).unwrap());

        assert_eq!(retry_after(&headers, now), None);
    }

    #[test]
    fn tokens_inside_refresh_margin_are_stale() {
        let now = Utc::now();
        let token = |secs| InstallationToken {
            value: "ghs_x".into(),
            expires_at: now + TimeDelta::seconds(secs),
        };

        assert!(token(3600).is_fresh(now));
        assert!(!token(30).is_fresh(now));
        assert!(!token(-1).is_fresh(now));
    }
}
