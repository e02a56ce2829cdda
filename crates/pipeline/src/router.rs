//! Verification and dispatch of inbound deliveries.
//!
//! [`EventRouter::handle_delivery`] is the single entry point the transport
//! calls. Within one delivery the order is fixed: signature verification, then
//! parsing, then routing, then the handlers' queries. Separate deliveries share
//! nothing but the read-only session and the sink, so any number may be in
//! flight at once without ordering between them.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    Delivery, DeliveryError, DeliveryId, DeliveryVerifier, ErrorSink, EventHandler, EventName,
    InboundEvent, QuerySession,
};

/// What happened to a delivery. Failures have already been reported to the
/// sink by the time this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Signature missing or wrong; dropped without processing.
    Rejected,
    /// Signature valid but the event header or body was unusable.
    Malformed,
    /// No handler is registered for the event.
    Ignored,
    /// Every matching handler succeeded.
    Handled {
        /// Number of handlers that ran.
        handlers: usize,
    },
    /// At least one handler failed.
    Failed,
}

/// Maps event names to handlers and drives each delivery through them.
pub struct EventRouter {
    verifier: Arc<dyn DeliveryVerifier>,
    session: Arc<dyn QuerySession>,
    sink: Arc<dyn ErrorSink>,
    handlers: HashMap<EventName, Vec<Arc<dyn EventHandler>>>,
}

impl EventRouter {
    pub fn new(
        verifier: Arc<dyn DeliveryVerifier>,
        session: Arc<dyn QuerySession>,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            verifier,
            session,
            sink,
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `event`.
    ///
    /// `event` may be a bare name (`"issue_comment"`, every action) or a
    /// qualified one (`"issue_comment.created"`). Handlers registered under
    /// both forms all run for a matching delivery.
    #[must_use]
    pub fn on(mut self, event: EventName, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.entry(event).or_default().push(handler);
        self
    }

    /// Returns the handlers matching `name`: qualified registrations first,
    /// then bare ones.
    fn handlers_for(&self, name: &EventName) -> Vec<Arc<dyn EventHandler>> {
        let mut matched: Vec<Arc<dyn EventHandler>> =
            self.handlers.get(name).cloned().unwrap_or_default();
        if name.base() != name.as_str() {
            let bare = EventName::new(name.base());
            if let Some(base) = bare.and_then(|b| self.handlers.get(&b)) {
                matched.extend(base.iter().cloned());
            }
        }
        matched
    }

    /// Verifies, parses and dispatches one delivery.
    ///
    /// Never returns an error: signature failures are dropped silently (logged
    /// at `WARN`, not reported), everything else that goes wrong is reported to
    /// the sink exactly once.
    #[tracing::instrument(
        name = "delivery",
        skip_all,
        fields(event = %delivery.event, delivery_id = tracing::field::Empty)
    )]
    pub async fn handle_delivery(&self, delivery: Delivery) -> DeliveryOutcome {
        let delivery_id = delivery
            .delivery_id
            .clone()
            .unwrap_or_else(DeliveryId::generate);
        tracing::Span::current().record("delivery_id", tracing::field::display(&delivery_id));

        let signature = delivery.signature.as_deref().unwrap_or_default();
        if let Err(err) = self.verifier.verify(&delivery.body, signature) {
            warn!(error = %err, "Dropping delivery");
            return DeliveryOutcome::Rejected;
        }

        let Some(event) = EventName::new(delivery.event) else {
            self.sink.report(&DeliveryError::malformed("X-GitHub-Event"));
            return DeliveryOutcome::Malformed;
        };
        let payload = match serde_json::from_slice(&delivery.body) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(error = %err, "Body is not JSON");
                self.sink.report(&DeliveryError::malformed("body"));
                return DeliveryOutcome::Malformed;
            }
        };
        let event = InboundEvent::new(event, delivery_id, payload);

        let handlers = self.handlers_for(&event.name);
        if handlers.is_empty() {
            debug!(event = %event.name, "No handler registered; ignoring");
            return DeliveryOutcome::Ignored;
        }

        if let (Some(expected), Some(actual)) =
            (self.session.installation_id(), event.installation_id)
        {
            if expected != actual {
                self.sink
                    .report(&DeliveryError::InstallationMismatch { expected, actual });
                return DeliveryOutcome::Failed;
            }
        }

        let session = self.session.as_ref();
        let runs = handlers.iter().map(|handler| {
            handler
                .handle(&event, session)
                .instrument(info_span!("handler", handler = handler.name()))
        });
        let mut failures: Vec<DeliveryError> = join_all(runs)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        match failures.len() {
            0 => {
                info!(event = %event.name, handlers = handlers.len(), "Delivery handled");
                DeliveryOutcome::Handled {
                    handlers: handlers.len(),
                }
            }
            1 => {
                if let Some(err) = failures.pop() {
                    self.sink.report(&err);
                }
                DeliveryOutcome::Failed
            }
            _ => {
                self.sink.report(&DeliveryError::Aggregate {
                    event: event.name.clone(),
                    delivery: event.delivery_id.clone(),
                    causes: failures,
                });
                DeliveryOutcome::Failed
            }
        }
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut events: Vec<&str> = self.handlers.keys().map(EventName::as_str).collect();
        events.sort_unstable();
        f.debug_struct("EventRouter")
            .field("events", &events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::{CorrelationQueryError, InstallationId};

    // -- fakes ---------------------------------------------------------------

    /// Accepts exactly the signature `"valid"`.
    struct FixedVerifier;

    impl DeliveryVerifier for FixedVerifier {
        fn verify(&self, _body: &[u8], signature: &str) -> Result<(), DeliveryError> {
            if signature == "valid" {
                Ok(())
            } else {
                Err(DeliveryError::SignatureMismatch)
            }
        }
    }

    struct NullSession(Option<InstallationId>);

    #[async_trait]
    impl QuerySession for NullSession {
        fn installation_id(&self) -> Option<InstallationId> {
            self.0
        }

        async fn graphql(&self, _: &str, _: Value) -> Result<Value, CorrelationQueryError> {
            Ok(Value::Null)
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<DeliveryError>>);

    impl RecordingSink {
        fn reports(&self) -> Vec<DeliveryError> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ErrorSink for RecordingSink {
        fn report(&self, error: &DeliveryError) {
            self.0.lock().unwrap().push(error.clone());
        }
    }

    struct CountingHandler {
        calls: AtomicUsize,
        fail_with: Option<DeliveryError>,
    }

    impl CountingHandler {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_with: None,
            })
        }

        fn failing(err: DeliveryError) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_with: Some(err),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(
            &self,
            _: &InboundEvent,
            _: &dyn QuerySession,
        ) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }

    fn router(sink: Arc<RecordingSink>, installation: Option<u64>) -> EventRouter {
        EventRouter::new(
            Arc::new(FixedVerifier),
            Arc::new(NullSession(installation.map(InstallationId::new))),
            sink,
        )
    }

    const CREATED: &str = "issue_comment.created";

    fn event(name: &str) -> EventName {
        EventName::new(name).unwrap()
    }

    fn delivery(event: &str, signature: &str, body: Value) -> Delivery {
        Delivery {
            event: event.into(),
            signature: Some(signature.into()),
            delivery_id: DeliveryId::new("d-1"),
            body: serde_json::to_vec(&body).unwrap(),
        }
    }

    fn comment_created() -> Delivery {
        delivery("issue_comment", "valid", json!({ "action": "created" }))
    }

    // -- tests ---------------------------------------------------------------

    #[tokio::test]
    async fn invalid_signature_is_dropped_without_report() {
        let sink = Arc::new(RecordingSink::default());
        let handler = CountingHandler::ok();
        let router = router(sink.clone(), None).on(event(CREATED), handler.clone());

        let outcome = router
            .handle_delivery(delivery(
                "issue_comment",
                "sha256=bogus",
                json!({ "action": "created" }),
            ))
            .await;

        assert_eq!(outcome, DeliveryOutcome::Rejected);
        assert_eq!(handler.calls(), 0);
        assert!(sink.reports().is_empty());
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone(), None);
        let mut unsigned = delivery("issue_comment", "valid", json!({}));
        unsigned.signature = None;

        assert_eq!(
            router.handle_delivery(unsigned).await,
            DeliveryOutcome::Rejected
        );
        assert!(sink.reports().is_empty());
    }

    #[tokio::test]
    async fn unregistered_event_is_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let handler = CountingHandler::ok();
        let router = router(sink.clone(), None).on(event(CREATED), handler.clone());

        let outcome = router
            .handle_delivery(delivery("issues", "valid", json!({ "action": "opened" })))
            .await;

        assert_eq!(outcome, DeliveryOutcome::Ignored);
        assert_eq!(handler.calls(), 0);
        assert!(sink.reports().is_empty());
    }

    #[tokio::test]
    async fn qualified_and_bare_registrations_both_run() {
        let sink = Arc::new(RecordingSink::default());
        let qualified = CountingHandler::ok();
        let bare = CountingHandler::ok();
        let other_action = CountingHandler::ok();
        let router = router(sink.clone(), None)
            .on(event(CREATED), qualified.clone())
            .on(event("issue_comment"), bare.clone())
            .on(event("issue_comment.deleted"), other_action.clone());

        let outcome = router.handle_delivery(comment_created()).await;

        assert_eq!(outcome, DeliveryOutcome::Handled { handlers: 2 });
        assert_eq!(qualified.calls(), 1);
        assert_eq!(bare.calls(), 1);
        assert_eq!(other_action.calls(), 0);
    }

    #[tokio::test]
    async fn non_json_body_is_reported_as_malformed() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone(), None);
        let mut broken = delivery("issue_comment", "valid", json!({}));
        broken.body = b"{not json".to_vec();

        assert_eq!(
            router.handle_delivery(broken).await,
            DeliveryOutcome::Malformed
        );
        assert_eq!(sink.reports(), vec![DeliveryError::malformed("body")]);
    }

    #[tokio::test]
    async fn single_handler_failure_is_reported_directly() {
        let sink = Arc::new(RecordingSink::default());
        let failing = CountingHandler::failing(DeliveryError::malformed("issue.node_id"));
        let router = router(sink.clone(), None).on(event(CREATED), failing);

        let outcome = router.handle_delivery(comment_created()).await;

        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert_eq!(
            sink.reports(),
            vec![DeliveryError::malformed("issue.node_id")]
        );
    }

    #[tokio::test]
    async fn several_handler_failures_are_aggregated() {
        let sink = Arc::new(RecordingSink::default());
        let router = router(sink.clone(), None)
            .on(
                event(CREATED),
                CountingHandler::failing(DeliveryError::malformed("comment.body")),
            )
            .on(
                event("issue_comment"),
                CountingHandler::failing(DeliveryError::malformed("issue.node_id")),
            );

        router.handle_delivery(comment_created()).await;

        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        match &reports[0] {
            DeliveryError::Aggregate {
                event,
                delivery,
                causes,
            } => {
                assert_eq!(event.as_str(), "issue_comment.created");
                assert_eq!(delivery.as_str(), "d-1");
                assert_eq!(causes.len(), 2);
            }
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn foreign_installation_is_refused_before_handlers_run() {
        let sink = Arc::new(RecordingSink::default());
        let handler = CountingHandler::ok();
        let router = router(sink.clone(), Some(1)).on(event(CREATED), handler.clone());

        let outcome = router
            .handle_delivery(delivery(
                "issue_comment",
                "valid",
                json!({ "action": "created", "installation": { "id": 2 } }),
            ))
            .await;

        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert_eq!(handler.calls(), 0);
        assert_eq!(
            sink.reports(),
            vec![DeliveryError::InstallationMismatch {
                expected: InstallationId::new(1),
                actual: InstallationId::new(2),
            }]
        );
    }
}
