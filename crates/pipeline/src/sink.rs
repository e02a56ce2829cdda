//! Error sink backed by `tracing`.

use tracing::error;

use crate::{DeliveryError, ErrorSink};

/// Reports delivery failures as `ERROR` events.
///
/// Aggregate failures are summarised (event, delivery, cause count) rather than
/// enumerated; every other error is logged with its message.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, err: &DeliveryError) {
        let retryable = err.retry_policy().is_retryable();
        match err {
            DeliveryError::Aggregate {
                event,
                delivery,
                causes,
            } => error!(
                event = %event,
                delivery_id = %delivery,
                causes = causes.len(),
                retryable,
                "Error processing request"
            ),
            other => error!(error = %other, retryable, "Error processing request"),
        }
    }
}
