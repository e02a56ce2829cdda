//! Value types flowing through the pipeline.
//!
//! A raw [`Delivery`] arrives from the transport, becomes an [`InboundEvent`]
//! once its signature has been verified and its body parsed, and a handler
//! turns the event into a [`CorrelationQuery`] whose answer is a
//! [`CorrelationResult`]. None of these outlive the delivery that created them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DeliveryId, EventName, InstallationId, SubjectNodeId};

/// Upper bound on the board memberships fetched for one subject.
///
/// Subjects linked to more boards are truncated; consumers must not treat the
/// associations as exhaustive.
pub const MAX_ASSOCIATIONS: usize = 5;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A webhook delivery exactly as the transport received it.
///
/// `body` is kept as raw bytes: the signature covers those bytes, and
/// re-serialising a parsed document would not reproduce them.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Value of the `X-GitHub-Event` header.
    pub event: String,
    /// Value of the `X-Hub-Signature-256` header, if sent.
    pub signature: Option<String>,
    /// Value of the `X-GitHub-Delivery` header, if sent.
    pub delivery_id: Option<DeliveryId>,
    /// Unmodified request body.
    pub body: Vec<u8>,
}

/// A verified, parsed delivery ready for routing.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Routing key, qualified with the payload's action when it has one.
    pub name: EventName,
    pub delivery_id: DeliveryId,
    /// Installation named in the payload's `installation.id`, if any.
    pub installation_id: Option<InstallationId>,
    pub payload: Value,
}

impl InboundEvent {
    /// Builds an event from a webhook event name and its parsed payload.
    pub fn new(event: EventName, delivery_id: DeliveryId, payload: Value) -> Self {
        let name = match payload.get("action").and_then(Value::as_str) {
            Some(action) if !action.is_empty() => event.with_action(action),
            _ => event,
        };
        let installation_id = payload
            .pointer("/installation/id")
            .and_then(Value::as_u64)
            .map(InstallationId::new);
        Self {
            name,
            delivery_id,
            installation_id,
            payload,
        }
    }

    /// Looks up a string field by JSON pointer, returning
    /// [`crate::DeliveryError::MalformedPayload`] naming the dotted path when
    /// it is absent or not a string.
    pub fn str_field(&self, pointer: &str) -> Result<&str, crate::DeliveryError> {
        let field = self.payload.pointer(pointer).and_then(Value::as_str);
        field.ok_or_else(|| crate::DeliveryError::malformed(dotted(pointer)))
    }
}

/// `/issue/node_id` -> `issue.node_id`
fn dotted(pointer: &str) -> String {
    pointer.trim_start_matches('/').replace('/', ".")
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

/// Identifies the entity whose related state must be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationQuery {
    pub subject_node_id: SubjectNodeId,
}

/// One board the subject is linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardAssociation {
    pub board_url: String,
    pub board_title: String,
}

/// The enriched state produced for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationResult {
    subject_title: String,
    associations: Vec<BoardAssociation>,
}

impl CorrelationResult {
    /// Creates a result, keeping at most [`MAX_ASSOCIATIONS`] associations in
    /// their original order.
    pub fn new(
        subject_title: impl Into<String>,
        associations: impl IntoIterator<Item = BoardAssociation>,
    ) -> Self {
        Self {
            subject_title: subject_title.into(),
            associations: associations.into_iter().take(MAX_ASSOCIATIONS).collect(),
        }
    }

    pub fn subject_title(&self) -> &str {
        &self.subject_title
    }

    pub fn associations(&self) -> &[BoardAssociation] {
        &self.associations
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Outcome of the decision step for one correlation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Action {
    /// Nothing to do for this event.
    NoAction,
}
