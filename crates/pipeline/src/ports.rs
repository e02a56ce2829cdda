//! Port traits: the seams between the pipeline and its collaborators.
//!
//! Infrastructure crates implement [`DeliveryVerifier`] and [`QuerySession`];
//! the pipeline supplies [`EventHandler`] and [`ErrorSink`] implementations of
//! its own and leaves [`DecisionStep`] open for the workflow rules that act on
//! a correlation result.

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    Action, CorrelationQueryError, CorrelationResult, DeliveryError, InboundEvent, InstallationId,
};

/// Checks that a raw delivery body was produced by the holder of the webhook
/// secret.
pub trait DeliveryVerifier: Send + Sync {
    /// Verifies `signature` (the full header value) over the exact `body`
    /// bytes.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::SignatureMismatch`] when the header is malformed or the
    /// digest differs.
    fn verify(&self, body: &[u8], signature: &str) -> Result<(), DeliveryError>;
}

/// An authenticated channel to the platform's GraphQL API.
///
/// One session is built at start-up and shared read-only by every concurrent
/// handler invocation. Implementations attach credentials to each request and
/// renew short-lived tokens themselves.
#[async_trait]
pub trait QuerySession: Send + Sync {
    /// The installation every request from this session is scoped to.
    fn installation_id(&self) -> Option<InstallationId>;

    /// Executes one GraphQL operation and returns its `data` member.
    ///
    /// # Errors
    ///
    /// Any [`CorrelationQueryError`]; a response with a non-empty `errors`
    /// array is reported as [`CorrelationQueryError::GraphQl`].
    async fn graphql(&self, query: &str, variables: Value) -> Result<Value, CorrelationQueryError>;
}

/// Processes one kind of inbound event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Handles `event`, issuing any outbound queries through `session`.
    async fn handle(
        &self,
        event: &InboundEvent,
        session: &dyn QuerySession,
    ) -> Result<(), DeliveryError>;
}

/// Terminal point of the per-delivery failure path.
///
/// Implementations must never panic and must tolerate concurrent calls; each
/// report is an independent write.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &DeliveryError);
}

/// Turns enriched state into an action.
pub trait DecisionStep: Send + Sync {
    fn decide(&self, result: &CorrelationResult) -> Action;
}

/// Decision step that never acts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoActionDecision;

impl DecisionStep for NoActionDecision {
    fn decide(&self, _result: &CorrelationResult) -> Action {
        Action::NoAction
    }
}
