//! Core event domain for Boardwatch.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type and error type used to turn a GitHub webhook delivery into enriched
//! board state. Infrastructure crates implement the port traits defined here;
//! they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate performs no network I/O.
//! It defines *what* is needed (a signature check, an authenticated GraphQL
//! session); the `github` and `listener` crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`AppId`, `InstallationId`, `SubjectNodeId`, etc.) |
//! | [`credentials`] | Application identity and the `CredentialProvider` port |
//! | [`types`] | Deliveries, events, correlation queries and results |
//! | [`errors`] | Error taxonomy and retry policy |
//! | [`ports`] | Traits implemented by infrastructure and by handlers |
//! | [`router`] | Signature check, parsing and dispatch of deliveries |
//! | [`correlation`] | The `issue_comment.created` correlation handler |
//! | [`sink`] | `tracing`-backed error sink |

pub mod correlation;
pub mod credentials;
pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod router;
pub mod sink;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use correlation::{CommentCorrelationHandler, ISSUE_COMMENT_CREATED};
pub use credentials::{ApplicationCredentials, CredentialProvider, PrivateKey, WebhookSecret};
pub use errors::{CorrelationQueryError, CredentialError, DeliveryError, RetryPolicy};
pub use identifiers::{AppId, DeliveryId, EventName, InstallationId, SubjectNodeId};
pub use ports::{
    DecisionStep, DeliveryVerifier, ErrorSink, EventHandler, NoActionDecision, QuerySession,
};
pub use router::{DeliveryOutcome, EventRouter};
pub use sink::TracingErrorSink;
pub use types::{
    Action, BoardAssociation, CorrelationQuery, CorrelationResult, Delivery, InboundEvent,
    MAX_ASSOCIATIONS,
};
