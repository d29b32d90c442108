use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::{
    CreatedIntent, GatewayError, GatewayIntent, IntentRequest, PaymentGateway, RefundReceipt,
    SignatureError, WebhookEvent,
};
use crate::workflows::admissions::domain::IntentId;

/// Bounds every outbound gateway call. A call that outlives the bound is abandoned
/// and reported as [`GatewayError::Timeout`]; its eventual result is dropped.
pub struct TimeoutGateway<G> {
    inner: Arc<G>,
    timeout: Duration,
}

impl<G> TimeoutGateway<G>
where
    G: PaymentGateway + 'static,
{
    pub fn new(inner: Arc<G>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &Arc<G> {
        &self.inner
    }

    fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, GatewayError>
    where
        T: Send + 'static,
        F: FnOnce(&G) -> Result<T, GatewayError> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let inner = Arc::clone(&self.inner);
        let started = Instant::now();

        thread::Builder::new()
            .name(format!("gateway-{operation}"))
            .spawn(move || {
                let _ = tx.send(call(&inner));
            })
            .map_err(|err| GatewayError::Transport(err.to_string()))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(operation, timeout = ?self.timeout, "gateway call timed out");
                Err(GatewayError::Timeout {
                    operation,
                    elapsed: started.elapsed(),
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(GatewayError::Transport(format!(
                "gateway {operation} worker exited without a result"
            ))),
        }
    }
}

impl<G> PaymentGateway for TimeoutGateway<G>
where
    G: PaymentGateway + 'static,
{
    fn create_intent(&self, request: &IntentRequest) -> Result<CreatedIntent, GatewayError> {
        let request = request.clone();
        self.bounded("create_intent", move |gateway| gateway.create_intent(&request))
    }

    fn retrieve_intent(&self, intent_id: &IntentId) -> Result<Option<GatewayIntent>, GatewayError> {
        let intent_id = intent_id.clone();
        self.bounded("retrieve_intent", move |gateway| {
            gateway.retrieve_intent(&intent_id)
        })
    }

    fn refund(
        &self,
        intent_id: &IntentId,
        amount_minor: u64,
    ) -> Result<RefundReceipt, GatewayError> {
        let intent_id = intent_id.clone();
        self.bounded("refund", move |gateway| gateway.refund(&intent_id, amount_minor))
    }

    // Local computation, no network round trip to bound.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, SignatureError> {
        self.inner.verify_webhook(payload, signature)
    }
}
