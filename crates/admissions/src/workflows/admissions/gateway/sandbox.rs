use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde_json::json;

use super::{
    CreatedIntent, GatewayError, GatewayIntent, IntentRequest, IntentStatus, PaymentGateway,
    RefundReceipt, SignatureError, WebhookEvent, WebhookVerifier,
};
use crate::workflows::admissions::domain::IntentId;

/// In-process stand-in for the card provider, used by the demo server and tests.
///
/// Intents are created in `requires_payment_method` and only move when a test or
/// operator calls [`SandboxGateway::complete`] or [`SandboxGateway::fail`].
#[derive(Debug, Default)]
pub struct SandboxGateway {
    state: Mutex<SandboxState>,
    verifier: Option<WebhookVerifier>,
}

#[derive(Debug, Default)]
struct SandboxState {
    intents: BTreeMap<IntentId, GatewayIntent>,
    by_idempotency_key: HashMap<String, IntentId>,
    queued_ids: VecDeque<IntentId>,
    counter: u64,
    created: usize,
    refunds: Vec<(IntentId, u64)>,
    fail_next_create: Option<GatewayError>,
    latency: Duration,
}

impl SandboxGateway {
    pub fn new(verifier: WebhookVerifier) -> Self {
        Self {
            state: Mutex::default(),
            verifier: Some(verifier),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, SandboxState>, GatewayError> {
        self.state
            .lock()
            .map_err(|_| GatewayError::Transport("sandbox state poisoned".to_string()))
    }

    fn with_state<T>(&self, update: impl FnOnce(&mut SandboxState) -> T) -> Option<T> {
        self.state.lock().ok().map(|mut state| update(&mut state))
    }

    /// Use `intent_id` for the next created intent instead of a generated one.
    pub fn queue_intent_id(&self, intent_id: impl Into<String>) {
        self.with_state(|state| state.queued_ids.push_back(IntentId(intent_id.into())));
    }

    pub fn fail_next_create(&self, error: GatewayError) {
        self.with_state(|state| state.fail_next_create = Some(error));
    }

    /// Artificial delay applied to every network-style call.
    pub fn set_latency(&self, latency: Duration) {
        self.with_state(|state| state.latency = latency);
    }

    /// Mark the intent as paid. Returns false for unknown intents.
    pub fn complete(&self, intent_id: &IntentId) -> bool {
        self.set_status(intent_id, IntentStatus::Succeeded)
    }

    pub fn fail(&self, intent_id: &IntentId) -> bool {
        self.set_status(intent_id, IntentStatus::RequiresPaymentMethod)
    }

    /// Number of distinct intents created so far.
    pub fn created_count(&self) -> usize {
        self.with_state(|state| state.created).unwrap_or_default()
    }

    pub fn refunds(&self) -> Vec<(IntentId, u64)> {
        self.with_state(|state| state.refunds.clone())
            .unwrap_or_default()
    }

    pub fn intent(&self, intent_id: &IntentId) -> Option<GatewayIntent> {
        self.with_state(|state| state.intents.get(intent_id).cloned())
            .flatten()
    }

    /// Build a webhook body for a known intent, signed with the sandbox secret at `timestamp`.
    pub fn signed_event(
        &self,
        event_type: &str,
        intent_id: &IntentId,
        timestamp: i64,
    ) -> Result<(Vec<u8>, String), SignatureError> {
        let verifier = self.verifier.as_ref().ok_or(SignatureError::MissingSecret)?;
        let intent = self.intent(intent_id).ok_or_else(|| {
            SignatureError::InvalidPayload(format!("unknown intent {intent_id}"))
        })?;
        let sequence = self.with_state(|state| state.counter).unwrap_or_default();

        let payload = serde_json::to_vec(&json!({
            "id": format!("evt_sandbox_{:06}", sequence),
            "type": event_type,
            "data": { "object": intent },
        }))
        .map_err(|err| SignatureError::InvalidPayload(err.to_string()))?;
        let signature = verifier.sign(&payload, timestamp)?;
        Ok((payload, signature))
    }

    fn set_status(&self, intent_id: &IntentId, status: IntentStatus) -> bool {
        self.with_state(|state| match state.intents.get_mut(intent_id) {
            Some(intent) => {
                intent.status = status;
                true
            }
            None => false,
        })
        .unwrap_or(false)
    }

    fn pause(&self) -> Result<(), GatewayError> {
        let latency = self.state()?.latency;
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        Ok(())
    }
}

impl PaymentGateway for SandboxGateway {
    fn create_intent(&self, request: &IntentRequest) -> Result<CreatedIntent, GatewayError> {
        self.pause()?;
        let mut state = self.state()?;
        if let Some(error) = state.fail_next_create.take() {
            return Err(error);
        }
        if request.amount_minor == 0 {
            return Err(GatewayError::Rejected(
                "amount must be positive".to_string(),
            ));
        }

        if let Some(existing) = state
            .by_idempotency_key
            .get(&request.idempotency_key)
            .and_then(|id| state.intents.get(id))
        {
            return Ok(CreatedIntent {
                intent_id: existing.intent_id.clone(),
                client_secret: existing.client_secret.clone().unwrap_or_default(),
            });
        }

        state.counter += 1;
        let intent_id = match state.queued_ids.pop_front() {
            Some(id) => id,
            None => IntentId(format!("pi_sandbox_{:06}", state.counter)),
        };
        let client_secret = format!("{}_secret_{:06}", intent_id.0, state.counter);
        let intent = GatewayIntent {
            intent_id: intent_id.clone(),
            status: IntentStatus::RequiresPaymentMethod,
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
            metadata: request.metadata.clone(),
            client_secret: Some(client_secret.clone()),
        };
        state.intents.insert(intent_id.clone(), intent);
        state
            .by_idempotency_key
            .insert(request.idempotency_key.clone(), intent_id.clone());
        state.created += 1;

        Ok(CreatedIntent {
            intent_id,
            client_secret,
        })
    }

    fn retrieve_intent(&self, intent_id: &IntentId) -> Result<Option<GatewayIntent>, GatewayError> {
        self.pause()?;
        Ok(self.state()?.intents.get(intent_id).cloned())
    }

    fn refund(
        &self,
        intent_id: &IntentId,
        amount_minor: u64,
    ) -> Result<RefundReceipt, GatewayError> {
        self.pause()?;
        let mut state = self.state()?;
        let intent = state
            .intents
            .get(intent_id)
            .ok_or_else(|| GatewayError::Rejected(format!("no such intent {intent_id}")))?;
        if intent.status != IntentStatus::Succeeded {
            return Err(GatewayError::Rejected(format!(
                "intent {intent_id} is {} and cannot be refunded",
                intent.status
            )));
        }
        if amount_minor > intent.amount_minor {
            return Err(GatewayError::Rejected(
                "refund exceeds captured amount".to_string(),
            ));
        }
        state.refunds.push((intent_id.clone(), amount_minor));
        Ok(RefundReceipt {
            refund_id: format!("re_sandbox_{:06}", state.refunds.len()),
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, SignatureError> {
        match &self.verifier {
            Some(verifier) => verifier.verify(payload, signature),
            None => Err(SignatureError::MissingSecret),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str) -> IntentRequest {
        IntentRequest {
            amount_minor: 5000,
            currency: "usd".to_string(),
            idempotency_key: key.to_string(),
            metadata: BTreeMap::from([(
                "application_id".to_string(),
                "MIU-2025-0001".to_string(),
            )]),
        }
    }

    #[test]
    fn idempotency_key_returns_same_intent() {
        let gateway = SandboxGateway::default();
        let first = gateway.create_intent(&request("a-1")).expect("created");
        let again = gateway.create_intent(&request("a-1")).expect("created");
        let other = gateway.create_intent(&request("a-2")).expect("created");

        assert_eq!(first, again);
        assert_ne!(first.intent_id, other.intent_id);
        assert_eq!(gateway.created_count(), 2);
    }

    #[test]
    fn refunds_require_succeeded_intent() {
        let gateway = SandboxGateway::default();
        let created = gateway.create_intent(&request("a-1")).expect("created");

        assert!(matches!(
            gateway.refund(&created.intent_id, 100),
            Err(GatewayError::Rejected(_))
        ));
        assert!(gateway.complete(&created.intent_id));
        gateway.refund(&created.intent_id, 100).expect("refunded");
        assert_eq!(gateway.refunds(), vec![(created.intent_id, 100)]);
    }

    #[test]
    fn signed_events_verify_with_sandbox_secret() {
        let gateway = SandboxGateway::new(WebhookVerifier::new("whsec_sandbox", 300));
        gateway.queue_intent_id("pi_fixed");
        let created = gateway.create_intent(&request("a-1")).expect("created");
        assert_eq!(created.intent_id.0, "pi_fixed");
        gateway.complete(&created.intent_id);

        let now = chrono::Utc::now().timestamp();
        let (payload, signature) = gateway
            .signed_event(super::super::EVENT_INTENT_SUCCEEDED, &created.intent_id, now)
            .expect("signed");
        let event = gateway
            .verify_webhook(&payload, &signature)
            .expect("verifies");
        assert_eq!(
            event.kind,
            super::super::WebhookEventKind::IntentSucceeded(
                gateway.intent(&created.intent_id).expect("known")
            )
        );
    }
}
