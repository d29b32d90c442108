//! Convergence of the three payment-success writers.
//!
//! The client confirmation call, gateway webhooks, and the staff override all funnel into
//! [`AdmissionsService::settle`], which upserts the ledger row keyed by intent id under the
//! intent and application locks. Delivery order and duplication do not change the end state.

use std::collections::BTreeMap;

use serde::Serialize;

use super::domain::{
    ApplicationId, ApplicationRecord, ApplicationStatus, IntentId, PaymentRecord, PaymentStatus,
    ReconcileSource, StaffId,
};
use super::error::AdmissionError;
use super::gateway::{
    GatewayIntent, IntentStatus, PaymentGateway, WebhookEvent, WebhookEventKind,
    APPLICATION_METADATA_KEY, EVENT_INTENT_FAILED,
};
use super::locks::LockKey;
use super::notifications::NotificationKind;
use super::service::{applicant_notice, payment_reference, AdmissionsService, Outcome};
use super::store::AdmissionsStore;

/// How a success observation changed the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// First sighting of the intent; the row was created as successful.
    Recorded,
    /// A pending or failed row became successful.
    Confirmed,
    /// Already successful; nothing but a missing `paid_at` was touched.
    Duplicate,
    /// The row was refunded; a late success does not revive it.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    pub outcome: ReconcileOutcome,
    pub payment: PaymentRecord,
    pub application: ApplicationRecord,
}

/// What a verified webhook delivery did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum WebhookDisposition {
    Reconciled(Reconciliation),
    /// The application was already paid by another intent; the charge needs a refund.
    DuplicateCharge {
        intent_id: IntentId,
        application_id: ApplicationId,
    },
    PaymentFailed { payment: PaymentRecord },
    Ignored { event_type: String },
}

impl<S, G> AdmissionsService<S, G>
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
{
    /// The payer returned from the gateway's hosted flow. The gateway is the source of truth.
    pub fn confirm_payment(
        &self,
        application_id: &ApplicationId,
        intent_id: &IntentId,
    ) -> Result<Outcome<Reconciliation>, AdmissionError> {
        let intent = self
            .gateway
            .retrieve_intent(intent_id)?
            .ok_or_else(|| AdmissionError::PaymentNotFound(intent_id.clone()))?;
        if intent.status != IntentStatus::Succeeded {
            return Err(AdmissionError::PaymentNotSucceeded {
                intent_id: intent_id.clone(),
                status: intent.status,
            });
        }
        let owner = match intent.application_id() {
            Some(owner) => owner,
            None => self
                .store
                .payment_by_intent(intent_id)?
                .map(|payment| payment.application_id)
                .ok_or_else(|| {
                    AdmissionError::Validation(format!(
                        "intent {intent_id} carries no application reference"
                    ))
                })?,
        };
        if owner != *application_id {
            return Err(AdmissionError::Validation(format!(
                "intent {intent_id} belongs to application {owner}, not {application_id}"
            )));
        }

        self.settle(&intent, application_id, ReconcileSource::ClientConfirmation)
    }

    /// Verify the signature header and apply the event. Nothing changes on a bad signature.
    pub fn handle_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<Outcome<WebhookDisposition>, AdmissionError> {
        let event = self.gateway.verify_webhook(payload, signature)?;
        tracing::debug!(event_id = %event.event_id, "webhook verified");
        self.reconcile_webhook_event(&event)
    }

    /// Apply an already-authenticated gateway event. Safe under redelivery.
    pub fn reconcile_webhook_event(
        &self,
        event: &WebhookEvent,
    ) -> Result<Outcome<WebhookDisposition>, AdmissionError> {
        match &event.kind {
            WebhookEventKind::IntentSucceeded(intent) => {
                let application_id = self.owning_application(intent)?;
                match self.settle(intent, &application_id, ReconcileSource::Webhook) {
                    Ok(outcome) => Ok(Outcome::with_notifications(
                        WebhookDisposition::Reconciled(outcome.value),
                        outcome.notifications,
                    )),
                    // Redelivery cannot resolve a second charge; acknowledge it and leave the
                    // refund to the finance desk.
                    Err(AdmissionError::Conflict(reason)) => {
                        tracing::warn!(
                            %application_id,
                            intent_id = %intent.intent_id,
                            %reason,
                            "duplicate charge acknowledged"
                        );
                        Ok(Outcome::quiet(WebhookDisposition::DuplicateCharge {
                            intent_id: intent.intent_id.clone(),
                            application_id,
                        }))
                    }
                    Err(err) => Err(err),
                }
            }
            WebhookEventKind::IntentFailed { intent, reason } => {
                if self.store.payment_by_intent(&intent.intent_id)?.is_none() {
                    tracing::debug!(intent_id = %intent.intent_id, "failure for unknown intent");
                    return Ok(Outcome::quiet(WebhookDisposition::Ignored {
                        event_type: EVENT_INTENT_FAILED.to_string(),
                    }));
                }
                let reason = reason.as_deref().unwrap_or("payment failed at gateway");
                let payment = self.mark_payment_failed(&intent.intent_id, reason)?;
                Ok(Outcome::quiet(WebhookDisposition::PaymentFailed { payment }))
            }
            WebhookEventKind::Other(event_type) => {
                tracing::debug!(event_id = %event.event_id, %event_type, "webhook ignored");
                Ok(Outcome::quiet(WebhookDisposition::Ignored {
                    event_type: event_type.clone(),
                }))
            }
        }
    }

    /// Staff marks a locally known payment as paid, e.g. after a bank transfer.
    pub fn override_payment_success(
        &self,
        intent_id: &IntentId,
        staff: StaffId,
    ) -> Result<Outcome<Reconciliation>, AdmissionError> {
        let payment = self
            .store
            .payment_by_intent(intent_id)?
            .ok_or_else(|| AdmissionError::PaymentNotFound(intent_id.clone()))?;
        tracing::info!(%intent_id, staff = %staff.0, "manual payment override");

        let intent = GatewayIntent {
            intent_id: payment.intent_id.clone(),
            status: IntentStatus::Succeeded,
            amount_minor: payment.amount_minor,
            currency: payment.currency.clone(),
            metadata: BTreeMap::from([(
                APPLICATION_METADATA_KEY.to_string(),
                payment.application_id.0.clone(),
            )]),
            client_secret: None,
        };
        self.settle(&intent, &payment.application_id, ReconcileSource::ManualOverride)
    }

    fn owning_application(&self, intent: &GatewayIntent) -> Result<ApplicationId, AdmissionError> {
        if let Some(application_id) = intent.application_id() {
            return Ok(application_id);
        }
        self.store
            .payment_by_intent(&intent.intent_id)?
            .map(|payment| payment.application_id)
            .ok_or_else(|| {
                AdmissionError::Validation(format!(
                    "intent {} carries no application reference",
                    intent.intent_id
                ))
            })
    }

    /// Upsert the ledger row for a succeeded intent and propagate to the application.
    ///
    /// `Conflict` is returned only when another intent already paid the application.
    pub(super) fn settle(
        &self,
        intent: &GatewayIntent,
        application_id: &ApplicationId,
        source: ReconcileSource,
    ) -> Result<Outcome<Reconciliation>, AdmissionError> {
        let _intent_guard = self.lock(LockKey::Intent(intent.intent_id.clone()))?;
        let _application_guard = self.lock(LockKey::Application(application_id.clone()))?;
        let mut application = self.fetch_required(application_id)?;
        let now = self.now();

        let (payment, outcome) = match self.store.payment_by_intent(&intent.intent_id)? {
            None => {
                self.ensure_single_success(application_id, &intent.intent_id)?;
                let payment = self.store.insert_payment(PaymentRecord {
                    reference: payment_reference(&intent.intent_id),
                    intent_id: intent.intent_id.clone(),
                    application_id: application_id.clone(),
                    amount_minor: intent.amount_minor,
                    currency: intent.currency.clone(),
                    status: PaymentStatus::Success,
                    client_secret: None,
                    settled_via: Some(source),
                    failure_reason: None,
                    created_at: now,
                    paid_at: Some(now),
                    updated_at: now,
                })?;
                (payment, ReconcileOutcome::Recorded)
            }
            Some(payment) if payment.application_id != *application_id => {
                return Err(AdmissionError::Validation(format!(
                    "intent {} is recorded against {}, not {application_id}",
                    payment.intent_id, payment.application_id
                )));
            }
            Some(mut payment) => match payment.status {
                PaymentStatus::Success => {
                    if payment.paid_at.is_none() {
                        payment.paid_at = Some(now);
                        payment.updated_at = now;
                        self.store.update_payment(payment.clone())?;
                    }
                    (payment, ReconcileOutcome::Duplicate)
                }
                PaymentStatus::Pending | PaymentStatus::Failed => {
                    self.ensure_single_success(application_id, &intent.intent_id)?;
                    payment.status = PaymentStatus::Success;
                    payment.paid_at = Some(now);
                    payment.settled_via = Some(source);
                    payment.failure_reason = None;
                    payment.updated_at = now;
                    self.store.update_payment(payment.clone())?;
                    (payment, ReconcileOutcome::Confirmed)
                }
                PaymentStatus::Refunded => (payment, ReconcileOutcome::Ignored),
            },
        };

        if outcome != ReconcileOutcome::Ignored {
            let advance = application.status.awaits_payment();
            let mirror = application.payment_status != PaymentStatus::Success;
            if advance {
                application.status = ApplicationStatus::PaymentComplete;
            }
            if mirror {
                application.payment_status = PaymentStatus::Success;
            }
            if advance || mirror {
                application.updated_at = now;
                self.store.update_application(application.clone())?;
            }
        }

        tracing::info!(
            %application_id,
            intent_id = %intent.intent_id,
            ?source,
            ?outcome,
            status = %application.status,
            "payment reconciled"
        );

        let notifications = match outcome {
            ReconcileOutcome::Recorded | ReconcileOutcome::Confirmed => {
                applicant_notice(&application, NotificationKind::PaymentReceipt)
                    .map(|notice| {
                        notice
                            .with_detail("reference", payment.reference.0.clone())
                            .with_detail("amount_minor", payment.amount_minor.to_string())
                            .with_detail("currency", payment.currency.clone())
                    })
                    .into_iter()
                    .collect()
            }
            ReconcileOutcome::Duplicate | ReconcileOutcome::Ignored => Vec::new(),
        };

        Ok(Outcome::with_notifications(
            Reconciliation {
                outcome,
                payment,
                application,
            },
            notifications,
        ))
    }

    /// At most one successful payment per application.
    fn ensure_single_success(
        &self,
        application_id: &ApplicationId,
        intent_id: &IntentId,
    ) -> Result<(), AdmissionError> {
        let other = self
            .store
            .payments_for_application(application_id)?
            .into_iter()
            .find(|payment| payment.is_success() && payment.intent_id != *intent_id);
        match other {
            Some(payment) => Err(AdmissionError::Conflict(format!(
                "application {application_id} is already paid by intent {}",
                payment.intent_id
            ))),
            None => Ok(()),
        }
    }
}
