//! Webhook signature verification (`X-Hub-Signature-256`).
//!
//! GitHub signs every delivery with HMAC-SHA256 over the exact request body,
//! keyed with the webhook secret, and sends `sha256=<lowercase hex>`.

use hmac::{Hmac, Mac};
use pipeline::{DeliveryError, DeliveryVerifier, WebhookSecret};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verifies deliveries against the shared webhook secret.
#[derive(Clone)]
pub struct WebhookSignatureVerifier {
    secret: WebhookSecret,
}

impl WebhookSignatureVerifier {
    pub fn new(secret: WebhookSecret) -> Self {
        Self { secret }
    }

    fn mac(&self) -> HmacSha256 {
        match HmacSha256::new_from_slice(self.secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
        }
    }

    /// Produces the `X-Hub-Signature-256` header value for `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(body);
        let digest = hex::encode(mac.finalize().into_bytes());
        format!("{SIGNATURE_PREFIX}{digest}")
    }
}

impl DeliveryVerifier for WebhookSignatureVerifier {
    fn verify(&self, body: &[u8], signature: &str) -> Result<(), DeliveryError> {
        let digest = signature
            .trim()
            .strip_prefix(SIGNATURE_PREFIX)
            .and_then(|hex_digest| hex::decode(hex_digest).ok())
            .ok_or(DeliveryError::SignatureMismatch)?;

        let mut mac = self.mac();
        mac.update(body);
        // Constant-time comparison.
        mac.verify_slice(&digest)
            .map_err(|_| DeliveryError::SignatureMismatch)
    }
}

impl std::fmt::Debug for WebhookSignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSignatureVerifier")
            .finish_non_exhaustive()
    }
}
