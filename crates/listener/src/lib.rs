//! Boardwatch webhook event source.
//!
//! Binds an HTTP server with a single `POST` route (by default
//! `/api/webhook`), collects the raw body and the three GitHub headers, and
//! hands them to [`pipeline::EventRouter::handle_delivery`]. The transport
//! never parses or re-encodes the body.
//!
//! | Outcome | Status |
//! |---------|--------|
//! | handled / ignored | `200 OK` |
//! | signature missing or wrong | `401 Unauthorized` |
//! | event header missing, body not JSON | `400 Bad Request` |
//! | handler failure (already reported) | `500 Internal Server Error` |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Transport details live here. The [`pipeline`] crate
//! sees only [`pipeline::Delivery`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use pipeline::{Delivery, DeliveryId, DeliveryOutcome, EventRouter};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

/// Default route GitHub is configured to deliver to.
pub const DEFAULT_WEBHOOK_PATH: &str = "/api/webhook";

pub const EVENT_HEADER: &str = "x-github-event";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// Failures that stop the listener itself. Per-delivery failures never do.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("webhook path {path:?} must start with '/'")]
    InvalidPath { path: String },

    #[error("server terminated: {0}")]
    Serve(#[source] std::io::Error),
}

/// axum panics on routes without a leading `/`.
fn check_path(path: &str) -> Result<(), ListenerError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(ListenerError::InvalidPath {
            path: path.to_string(),
        })
    }
}

/// Builds the axum router serving `path`.
///
/// # Errors
///
/// [`ListenerError::InvalidPath`] if `path` does not start with `/`.
pub fn webhook_router(path: &str, router: Arc<EventRouter>) -> Result<Router, ListenerError> {
    check_path(path)?;
    let app = Router::new()
        .route(path, post(receive_delivery))
        .with_state(router);
    Ok(app)
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn receive_delivery(
    State(router): State<Arc<EventRouter>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let delivery = Delivery {
        event: header(&headers, EVENT_HEADER).unwrap_or_default(),
        signature: header(&headers, SIGNATURE_HEADER),
        delivery_id: header(&headers, DELIVERY_HEADER).and_then(DeliveryId::new),
        body: body.to_vec(),
    };
    match router.handle_delivery(delivery).await {
        DeliveryOutcome::Handled { .. } | DeliveryOutcome::Ignored => StatusCode::OK,
        DeliveryOutcome::Rejected => StatusCode::UNAUTHORIZED,
        DeliveryOutcome::Malformed => StatusCode::BAD_REQUEST,
        DeliveryOutcome::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Accepts deliveries on `addr` until `shutdown` resolves.
pub struct WebhookListener {
    addr: String,
    path: String,
    router: Arc<EventRouter>,
}

impl WebhookListener {
    /// # Errors
    ///
    /// [`ListenerError::InvalidPath`] if `path` does not start with `/`.
    pub fn new(
        addr: impl Into<String>,
        path: impl Into<String>,
        router: Arc<EventRouter>,
    ) -> Result<Self, ListenerError> {
        let path = path.into();
        check_path(&path)?;
        Ok(Self {
            addr: addr.into(),
            path,
            router,
        })
    }

    /// Binds the socket and serves until `shutdown` completes.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ListenerError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = webhook_router(&self.path, self.router)?;
        let bound = TcpListener::bind(&self.addr).await;
        let addr = self.addr;
        let listener = bound.map_err(|source| ListenerError::Bind { addr, source })?;
        let local: SocketAddr = listener.local_addr().map_err(ListenerError::Serve)?;
        info!(
            url = %format!("http://{}{}", local, self.path),
            "Server is listening for events"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ListenerError::Serve)
    }
}
