use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::GatewayIntent;
use crate::workflows::admissions::clock::{system_clock, Clock};

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const EVENT_INTENT_FAILED: &str = "payment_intent.payment_failed";

const SIGNATURE_SCHEME: &str = "v1";

/// Webhook payload failed authenticity checks. Never causes a state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("webhook secret is not configured")]
    MissingSecret,
    #[error("signature header is malformed")]
    MalformedHeader,
    #[error("signature timestamp is {age_secs}s outside the tolerance window")]
    Stale { age_secs: i64 },
    #[error("signature does not match payload")]
    Mismatch,
    #[error("payload is not a valid event: {0}")]
    InvalidPayload(String),
}

/// Authenticated gateway event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub event_id: String,
    pub kind: WebhookEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
    IntentSucceeded(GatewayIntent),
    IntentFailed {
        intent: GatewayIntent,
        reason: Option<String>,
    },
    Other(String),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

/// Verifies `t=<unix>,v1=<hex hmac-sha256("<t>.<payload>")>` signature headers.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: i64,
    clock: Clock,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Produce the header value the provider would send for `payload` at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, SignatureError> {
        let digest = self.digest(payload, timestamp)?;
        Ok(format!(
            "t={timestamp},{SIGNATURE_SCHEME}={}",
            hex::encode(digest)
        ))
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> Result<WebhookEvent, SignatureError> {
        if self.secret.is_empty() {
            return Err(SignatureError::MissingSecret);
        }
        let (timestamp, candidates) = parse_header(header)?;

        let age_secs = (self.clock)()
            .timestamp()
            .checked_sub(timestamp)
            .and_then(i64::checked_abs)
            .unwrap_or(i64::MAX);
        if age_secs > self.tolerance_secs {
            return Err(SignatureError::Stale { age_secs });
        }

        let expected = self.digest(payload, timestamp)?;
        let matched = candidates.iter().any(|candidate| {
            hex::decode(candidate)
                .map(|bytes| {
                    bytes.len() == expected.len() && bool::from(bytes.ct_eq(expected.as_slice()))
                })
                .unwrap_or(false)
        });
        if !matched {
            return Err(SignatureError::Mismatch);
        }

        parse_event(payload)
    }

    fn digest(&self, payload: &[u8], timestamp: i64) -> Result<Vec<u8>, SignatureError> {
        if self.secret.is_empty() {
            return Err(SignatureError::MissingSecret);
        }
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| SignatureError::MissingSecret)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn parse_header(header: &str) -> Result<(i64, Vec<&str>), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or(SignatureError::MalformedHeader)?;
        match key {
            "t" => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::MalformedHeader)?,
                )
            }
            SIGNATURE_SCHEME => candidates.push(value),
            _ => {}
        }
    }

    match timestamp {
        Some(timestamp) if !candidates.is_empty() => Ok((timestamp, candidates)),
        _ => Err(SignatureError::MalformedHeader),
    }
}

fn parse_event(payload: &[u8]) -> Result<WebhookEvent, SignatureError> {
    let raw: RawEvent = serde_json::from_slice(payload)
        .map_err(|err| SignatureError::InvalidPayload(err.to_string()))?;

    let kind = match raw.event_type.as_str() {
        EVENT_INTENT_SUCCEEDED => WebhookEventKind::IntentSucceeded(intent_from(&raw.data.object)?),
        EVENT_INTENT_FAILED => WebhookEventKind::IntentFailed {
            intent: intent_from(&raw.data.object)?,
            reason: raw
                .data
                .object
                .pointer("/last_payment_error/message")
                .and_then(|message| message.as_str())
                .map(str::to_string),
        },
        other => WebhookEventKind::Other(other.to_string()),
    };

    Ok(WebhookEvent {
        event_id: raw.id,
        kind,
    })
}

fn intent_from(object: &serde_json::Value) -> Result<GatewayIntent, SignatureError> {
    GatewayIntent::deserialize(object).map_err(|err| SignatureError::InvalidPayload(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::admissions::clock::fixed_clock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn unix_now(clock: &Clock) -> i64 {
        clock().timestamp()
    }

    fn verifier() -> WebhookVerifier {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().expect("valid");
        WebhookVerifier::new("whsec_test", 300).with_clock(fixed_clock(now))
    }

    fn payload(event_type: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": event_type,
            "data": { "object": {
                "id": "pi_abc",
                "status": "succeeded",
                "amount": 5000,
                "currency": "usd",
                "metadata": { "application_id": "MIU-2025-0001" },
                "last_payment_error": { "message": "card declined" }
            }}
        }))
        .expect("payload serializes")
    }

    #[test]
    fn accepts_fresh_signed_payload() {
        let verifier = verifier();
        let body = payload(EVENT_INTENT_SUCCEEDED);
        let now = unix_now(&verifier.clock);
        let header = verifier.sign(&body, now - 10).expect("signs");

        let event = verifier.verify(&body, &header).expect("verifies");
        match event.kind {
            WebhookEventKind::IntentSucceeded(intent) => {
                assert_eq!(intent.intent_id.0, "pi_abc");
                assert_eq!(intent.amount_minor, 5000);
                assert_eq!(
                    intent.application_id().map(|id| id.0),
                    Some("MIU-2025-0001".to_string())
                );
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn rejects_tampered_payload() {
        let verifier = verifier();
        let body = payload(EVENT_INTENT_SUCCEEDED);
        let header = verifier
            .sign(&body, unix_now(&verifier.clock))
            .expect("signs");
        let mut tampered = body.clone();
        tampered.extend_from_slice(b" ");

        assert_eq!(
            verifier.verify(&tampered, &header),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_stale_and_malformed_headers() {
        let verifier = verifier();
        let body = payload(EVENT_INTENT_SUCCEEDED);
        let stale = verifier
            .sign(&body, unix_now(&verifier.clock) - 3_600)
            .expect("signs");

        assert!(matches!(
            verifier.verify(&body, &stale),
            Err(SignatureError::Stale { .. })
        ));
        assert_eq!(
            verifier.verify(&body, "garbage"),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verifier.verify(&body, "t=1740830400"),
            Err(SignatureError::MalformedHeader)
        );
    }

    #[test]
    fn extreme_timestamps_are_stale_not_overflows() {
        let verifier = verifier();
        let body = payload(EVENT_INTENT_SUCCEEDED);

        for header in [
            "t=-9223372036854775808,v1=00",
            "t=9223372036854775807,v1=00",
        ] {
            assert!(
                matches!(
                    verifier.verify(&body, header),
                    Err(SignatureError::Stale { .. })
                ),
                "{header} should be stale"
            );
        }
    }

    #[test]
    fn empty_secret_never_verifies() {
        let verifier = WebhookVerifier::new(Vec::new(), 300);
        assert_eq!(
            verifier.verify(b"{}", "t=1,v1=00"),
            Err(SignatureError::MissingSecret)
        );
        assert_eq!(verifier.sign(b"{}", 1), Err(SignatureError::MissingSecret));
    }

    #[test]
    fn failed_events_carry_reason_and_unknown_types_pass_through() {
        let verifier = verifier();
        let now = unix_now(&verifier.clock);

        let body = payload(EVENT_INTENT_FAILED);
        let header = verifier.sign(&body, now).expect("signs");
        match verifier.verify(&body, &header).expect("verifies").kind {
            WebhookEventKind::IntentFailed { reason, .. } => {
                assert_eq!(reason.as_deref(), Some("card declined"))
            }
            other => panic!("unexpected event {other:?}"),
        }

        let body = payload("charge.refunded");
        let header = verifier.sign(&body, now).expect("signs");
        assert_eq!(
            verifier.verify(&body, &header).expect("verifies").kind,
            WebhookEventKind::Other("charge.refunded".to_string())
        );
    }
}
