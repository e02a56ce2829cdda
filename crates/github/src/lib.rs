//! Boardwatch GitHub infrastructure adapter.
//!
//! Implements the GitHub-facing ports defined in the [`pipeline`] crate:
//!
//! - [`InstallationSession`]: [`pipeline::QuerySession`] over GitHub's GraphQL
//!   API, authenticated as one installation of the App.
//! - [`WebhookSignatureVerifier`]: [`pipeline::DeliveryVerifier`] for the
//!   `X-Hub-Signature-256` header.
//!
//! Both are built by the functions in [`factory`].
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. All GitHub
//! API details (JWT minting, token exchange and renewal, status and rate-limit
//! classification) are handled here; the [`pipeline`] crate never sees them.

pub mod factory;
pub mod jwt;
pub mod session;
pub mod verifier;

pub use factory::{
    build_session, build_verifier, ClientOptions, SessionBuildError, DEFAULT_API_URL,
};
pub use jwt::{AppClaims, AppJwtSigner};
pub use session::InstallationSession;
pub use verifier::WebhookSignatureVerifier;
