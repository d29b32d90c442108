//! Contract with the external card-processing provider.

mod sandbox;
mod timeout;
mod webhook;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::domain::{ApplicationId, IntentId};

pub use sandbox::SandboxGateway;
pub use timeout::TimeoutGateway;
pub use webhook::{
    SignatureError, WebhookEvent, WebhookEventKind, WebhookVerifier, EVENT_INTENT_FAILED,
    EVENT_INTENT_SUCCEEDED,
};

/// Metadata key carrying the application id on every intent we create.
pub const APPLICATION_METADATA_KEY: &str = "application_id";

/// Parameters for a new payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRequest {
    pub amount_minor: u64,
    pub currency: String,
    /// Same key, same intent: lets a retried create converge at the provider.
    pub idempotency_key: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIntent {
    pub intent_id: IntentId,
    pub client_secret: String,
}

/// Provider-side intent status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    Succeeded,
    Canceled,
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IntentStatus::RequiresPaymentMethod => "requires_payment_method",
            IntentStatus::RequiresConfirmation => "requires_confirmation",
            IntentStatus::RequiresAction => "requires_action",
            IntentStatus::Processing => "processing",
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::Canceled => "canceled",
        };
        f.write_str(label)
    }
}

/// Authoritative view of an intent as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayIntent {
    #[serde(rename = "id")]
    pub intent_id: IntentId,
    pub status: IntentStatus,
    #[serde(rename = "amount")]
    pub amount_minor: u64,
    pub currency: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl GatewayIntent {
    pub fn application_id(&self) -> Option<ApplicationId> {
        self.metadata
            .get(APPLICATION_METADATA_KEY)
            .map(|id| ApplicationId(id.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReceipt {
    pub refund_id: String,
}

/// Adapter over the provider's API. Calls are blocking from the caller's point of view.
pub trait PaymentGateway: Send + Sync {
    fn create_intent(&self, request: &IntentRequest) -> Result<CreatedIntent, GatewayError>;
    /// `Ok(None)` when the provider does not know the intent.
    fn retrieve_intent(&self, intent_id: &IntentId) -> Result<Option<GatewayIntent>, GatewayError>;
    fn refund(&self, intent_id: &IntentId, amount_minor: u64)
        -> Result<RefundReceipt, GatewayError>;
    fn verify_webhook(&self, payload: &[u8], signature: &str)
        -> Result<WebhookEvent, SignatureError>;
}

/// Transient failure talking to the provider. Always safe to retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway {operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },
    #[error("gateway transport failure: {0}")]
    Transport(String),
    #[error("gateway rejected request: {0}")]
    Rejected(String),
}
