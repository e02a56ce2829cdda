//! Newtype domain identifiers.
//!
//! Every identity that crosses a boundary (webhook header, payload field, API
//! path segment) is represented as a distinct newtype wrapping a primitive. This
//! prevents accidentally passing, for example, an issue's GraphQL node id where
//! a delivery id is expected, even though both are strings under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty
            /// or only whitespace.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.trim().is_empty() {
                    None
                } else {
                    Some(Self(v))
                }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for u64-wrapped newtypes (GitHub-assigned integers).
// Generates: struct (Copy), new(), as_u64(), Display.
// ---------------------------------------------------------------------------
macro_rules! u64_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new identifier from a raw integer.
            pub fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the underlying integer value.
            pub fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: GitHub-integer-backed
// ---------------------------------------------------------------------------

u64_id! {
    /// Identifies one installation of the GitHub App on an account or
    /// organisation. Installation tokens are scoped to exactly one installation.
    InstallationId
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed
// ---------------------------------------------------------------------------

string_id! {
    /// The GitHub App identifier used as the `iss` claim of App JWTs.
    ///
    /// GitHub accepts either the numeric App ID or the App's client ID here, so
    /// the value is kept as an opaque string.
    AppId
}

string_id! {
    /// A GraphQL global node id (e.g. `"I_kwDOABCD"` for an issue).
    ///
    /// This is the subject of a correlation query.
    SubjectNodeId
}

string_id! {
    /// The routing key of an inbound event.
    ///
    /// Either a bare webhook event name (`"issue_comment"`) or an event name
    /// qualified with the payload's action (`"issue_comment.created"`).
    EventName
}

impl EventName {
    /// Builds the qualified `"<event>.<action>"` name.
    pub fn with_action(&self, action: &str) -> Self {
        Self(format!("{}.{}", self.0, action))
    }

    /// Returns the bare event name with any `.action` suffix removed.
    pub fn base(&self) -> &str {
        self.0
            .split_once('.')
            .map_or(self.0.as_str(), |(base, _)| base)
    }
}

string_id! {
    /// Identifies a single webhook delivery (`X-GitHub-Delivery`).
    ///
    /// GitHub re-uses the same id when a delivery is redelivered, so it is a
    /// correlation handle for logs, not a uniqueness guarantee.
    DeliveryId
}

impl DeliveryId {
    /// Generates a fresh random id for deliveries that arrive without one.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}
