//! HMAC-signed webhook delivery with retries and circuit breaking.
//!
//! The signature covers the exact serialized bytes sent on the wire;
//! receivers must verify against the raw body, never a reserialization.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use tracing::{debug, error, warn};
use uuid::Uuid;

use contex_core::defaults::WEBHOOK_TIMEOUT_SECS;
use contex_core::{Error, Result};

use crate::circuit::CircuitRegistry;
use crate::retry::RetryPolicy;

type HmacSha256 = Hmac<Sha256>;

/// Compute the `X-Contex-Signature` header value for a payload.
pub fn sign_payload(secret: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature header against the raw request body.
///
/// Constant-time comparison; for use by webhook receivers.
pub fn verify_signature(secret: &str, body: &str, signature_header: &str) -> bool {
    let Some(hex_part) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Outcome of a delivery attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    /// A 2xx response was received.
    Delivered { attempts: u32 },
    /// The destination circuit is open; no request was issued.
    CircuitOpen,
    /// The retry budget was exhausted or the response was non-retryable.
    Failed { attempts: u32 },
}

impl DeliveryResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryResult::Delivered { .. })
    }
}

/// Webhook sender with per-destination circuit breakers.
pub struct WebhookSender {
    client: Client,
    policy: RetryPolicy,
    circuits: Arc<CircuitRegistry>,
    timeout: Duration,
}

impl WebhookSender {
    pub fn new(policy: RetryPolicy, circuits: Arc<CircuitRegistry>) -> Result<Self> {
        let client = Client::builder()
            .tcp_keepalive(Duration::from_secs(60))
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            policy,
            circuits,
            timeout: Duration::from_secs(WEBHOOK_TIMEOUT_SECS),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deliver a payload to a webhook URL.
    ///
    /// Retries transport errors, 5xx, 408, and 429 with exponential backoff;
    /// other 4xx responses are treated as poisoned and not retried. The
    /// circuit breaker for the URL is consulted before any request and
    /// advanced on the final outcome.
    pub async fn send(
        &self,
        url: &str,
        event_type: &str,
        body: &str,
        secret: Option<&str>,
    ) -> DeliveryResult {
        let breaker = self.circuits.get(url);
        if !breaker.try_acquire() {
            warn!(
                subsystem = "dispatch",
                component = "webhook",
                destination = url,
                "Delivery dropped, circuit open"
            );
            return DeliveryResult::CircuitOpen;
        }

        // One delivery id across all attempts so receivers can deduplicate.
        let delivery_id = Uuid::new_v4();
        let signature = secret.map(|s| sign_payload(s, body));

        let mut attempts = 0;
        for attempt in 0..self.policy.max_attempts {
            attempts = attempt + 1;
            match self
                .attempt(url, event_type, body, &signature, delivery_id)
                .await
            {
                AttemptOutcome::Success => {
                    breaker.record_success();
                    debug!(
                        subsystem = "dispatch",
                        component = "webhook",
                        destination = url,
                        attempt = attempts,
                        "Webhook delivered"
                    );
                    return DeliveryResult::Delivered { attempts };
                }
                AttemptOutcome::Poisoned(status) => {
                    error!(
                        subsystem = "dispatch",
                        component = "webhook",
                        destination = url,
                        status,
                        "Webhook client error, not retrying"
                    );
                    breaker.record_failure();
                    return DeliveryResult::Failed { attempts };
                }
                AttemptOutcome::Retryable(reason) => {
                    warn!(
                        subsystem = "dispatch",
                        component = "webhook",
                        destination = url,
                        attempt = attempts,
                        max_attempts = self.policy.max_attempts,
                        error = %reason,
                        "Webhook attempt failed"
                    );
                    if attempt + 1 < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.delay(attempt)).await;
                    }
                }
            }
        }

        error!(
            subsystem = "dispatch",
            component = "webhook",
            destination = url,
            attempts,
            "Webhook delivery failed after all retries"
        );
        breaker.record_failure();
        DeliveryResult::Failed { attempts }
    }

    async fn attempt(
        &self,
        url: &str,
        event_type: &str,
        body: &str,
        signature: &Option<String>,
        delivery_id: Uuid,
    ) -> AttemptOutcome {
        let mut request = self
            .client
            .post(url)
            .timeout(self.timeout)
            .header("Content-Type", "application/json")
            .header("X-Contex-Event", event_type)
            .header("X-Contex-Delivery", delivery_id.to_string())
            .header("User-Agent", "Contex-Webhook/0.3");
        if let Some(signature) = signature {
            request = request.header("X-Contex-Signature", signature);
        }

        match request.body(body.to_string()).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    AttemptOutcome::Success
                } else if status.is_client_error()
                    && status.as_u16() != 408
                    && status.as_u16() != 429
                {
                    AttemptOutcome::Poisoned(status.as_u16())
                } else {
                    AttemptOutcome::Retryable(format!("status {status}"))
                }
            }
            Err(e) => AttemptOutcome::Retryable(e.to_string()),
        }
    }
}

enum AttemptOutcome {
    Success,
    /// 4xx other than 408/429: the payload will never succeed.
    Poisoned(u16),
    Retryable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    // Golden vector: receivers can validate their implementation against it.
    #[test]
    fn test_signature_matches_reference() {
        let signature = sign_payload("s", r#"{"type":"data_update"}"#);
        assert!(signature.starts_with("sha256="));
        let hex_part = &signature["sha256=".len()..];
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));

        let mut mac = HmacSha256::new_from_slice(b"s").unwrap();
        mac.update(br#"{"type":"data_update"}"#);
        let expected = hex::encode(mac.finalize().into_bytes());
        assert_eq!(signature, format!("sha256={expected}"));
    }

    #[test]
    fn test_signature_deterministic() {
        let a = sign_payload("secret", "payload");
        let b = sign_payload("secret", "payload");
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_sensitive_to_body_and_secret() {
        let base = sign_payload("secret", "payload");
        assert_ne!(base, sign_payload("secret", "payload2"));
        assert_ne!(base, sign_payload("secret2", "payload"));
    }

    #[test]
    fn test_verify_round_trip() {
        let body = r#"{"type":"data_update","sequence":1}"#;
        let signature = sign_payload("s", body);
        assert!(verify_signature("s", body, &signature));
        assert!(!verify_signature("wrong", body, &signature));
        assert!(!verify_signature("s", "tampered", &signature));
    }

    #[test]
    fn test_verify_rejects_malformed_headers() {
        assert!(!verify_signature("s", "body", ""));
        assert!(!verify_signature("s", "body", "md5=abc"));
        assert!(!verify_signature("s", "body", "sha256=nothex"));
    }
}
