//! Error and retry-policy types for the event pipeline.
//!
//! The taxonomy follows the point at which a failure is detected:
//!
//! - [`CredentialError`]: start-up. Fatal; the process never begins serving.
//! - [`DeliveryError`]: one inbound delivery. Isolated to that delivery and
//!   reported through the [`crate::ErrorSink`]; never propagated to other
//!   in-flight deliveries.
//! - [`CorrelationQueryError`]: the outbound GraphQL exchange made by a
//!   handler. Always surfaces wrapped in [`DeliveryError::CorrelationQuery`].
//!
//! [`RetryPolicy`] is a cross-cutting concern: the pipeline itself never retries
//! a delivery, but every error records whether a retry would be safe so the
//! sink can say so.

use std::time::Duration;

use thiserror::Error;

use crate::{DeliveryId, EventName, InstallationId, SubjectNodeId};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt (e.g. derived from a
        /// `Retry-After` or `x-ratelimit-reset` header). `None` means the
        /// caller's own back-off schedule applies.
        after: Option<Duration>,
    },
    /// The operation must not be retried without operator intervention.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Start-up errors
// ---------------------------------------------------------------------------

/// The application identity could not be assembled or is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// No (or a blank) App identifier was configured.
    #[error("GitHub App id is missing")]
    MissingAppId,

    /// No (or a blank) webhook secret was configured.
    #[error("webhook secret is missing")]
    MissingWebhookSecret,

    /// The private key file could not be read.
    #[error("private key at '{path}' could not be read: {reason}")]
    PrivateKeyUnreadable {
        /// Configured path of the key file.
        path: String,
        /// Underlying I/O failure.
        reason: String,
    },

    /// The private key is not a usable RSA PEM key.
    #[error("private key is malformed: {reason}")]
    MalformedPrivateKey {
        /// Parser diagnostics.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Outbound query errors
// ---------------------------------------------------------------------------

/// The correlation query (or the token exchange that precedes it) failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationQueryError {
    /// The request never produced an HTTP response (connect failure, timeout,
    /// broken body).
    #[error("transport failure: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// GitHub refused the credentials, or no installation token could be
    /// obtained.
    #[error("authorization failed{}: {message}", status_suffix(.status))]
    Authorization {
        /// HTTP status, when one was received.
        status: Option<u16>,
        /// Response body or local reason.
        message: String,
    },

    /// GitHub's primary or secondary rate limit was hit.
    #[error("rate limited by GitHub")]
    RateLimited {
        /// Delay advertised by GitHub, when present.
        retry_after: Option<Duration>,
    },

    /// GitHub answered with a non-success status not covered above.
    #[error("unexpected HTTP status {status}: {message}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Response body (possibly truncated).
        message: String,
    },

    /// The GraphQL response carried an `errors` array.
    #[error("GraphQL errors: {}", .messages.join("; "))]
    GraphQl {
        /// The `message` of every reported error, in order.
        messages: Vec<String>,
    },

    /// The response could not be decoded into the expected shape.
    #[error("malformed response: {message}")]
    MalformedResponse {
        /// Decoder diagnostics.
        message: String,
    },

    /// The queried node does not exist or is not visible to the installation.
    #[error("subject {node_id} was not found")]
    SubjectNotFound {
        /// The node id that was queried.
        node_id: SubjectNodeId,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl CorrelationQueryError {
    /// Classifies this error for retry purposes.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Transport { .. } => RetryPolicy::Retryable { after: None },
            Self::RateLimited { retry_after } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::UnexpectedStatus { status, .. } if *status >= 500 => {
                RetryPolicy::Retryable { after: None }
            }
            _ => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-delivery errors
// ---------------------------------------------------------------------------

/// A single delivery could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The signature header is absent, malformed, or does not match the body.
    ///
    /// The delivery is dropped unprocessed.
    #[error("webhook signature does not match payload and secret")]
    SignatureMismatch,

    /// A field the handler depends on is absent or has the wrong type, or the
    /// body is not a JSON document at all.
    #[error("malformed payload: missing or invalid '{field}'")]
    MalformedPayload {
        /// Dotted path of the offending field (e.g. `"issue.node_id"`).
        field: String,
    },

    /// The payload belongs to a different installation than the session.
    #[error("delivery is for installation {actual}, expected {expected}")]
    InstallationMismatch {
        /// Installation the session was built for.
        expected: InstallationId,
        /// Installation named in the payload.
        actual: InstallationId,
    },

    /// The handler's outbound query failed.
    #[error("correlation query failed: {0}")]
    CorrelationQuery(#[from] CorrelationQueryError),

    /// Several handlers for one delivery failed.
    #[error("{} handlers failed for {event} (delivery {delivery})", .causes.len())]
    Aggregate {
        /// Routing key of the delivery.
        event: EventName,
        /// Delivery the failures belong to.
        delivery: DeliveryId,
        /// Individual handler failures, in registration order.
        causes: Vec<DeliveryError>,
    },
}

impl DeliveryError {
    /// Shorthand for [`DeliveryError::MalformedPayload`].
    pub fn malformed(field: impl Into<String>) -> Self {
        Self::MalformedPayload {
            field: field.into(),
        }
    }

    /// Classifies this error for retry purposes.
    ///
    /// An aggregate is retryable only when every cause is.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::CorrelationQuery(inner) => inner.retry_policy(),
            Self::Aggregate { causes, .. } if all_retryable(causes) => {
                RetryPolicy::Retryable { after: None }
            }
            _ => RetryPolicy::NonRetryable,
        }
    }
}

fn all_retryable(causes: &[DeliveryError]) -> bool {
    !causes.is_empty() && causes.iter().all(|c| c.retry_policy().is_retryable())
}
