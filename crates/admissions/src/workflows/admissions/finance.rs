//! Finance desk operations over the payment ledger: refunds, failures, and reporting.

use std::collections::BTreeMap;
use std::io;

use serde::{Deserialize, Serialize};

use super::domain::{IntentId, PaymentRecord, PaymentStatus, ReconcileSource, StaffId};
use super::error::AdmissionError;
use super::gateway::PaymentGateway;
use super::locks::LockKey;
use super::service::AdmissionsService;
use super::store::AdmissionsStore;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefundRequest {
    pub amount_minor: u64,
    pub reason: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundOutcome {
    pub refund_id: String,
    pub payment: PaymentRecord,
}

/// Ledger totals for the finance dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PaymentSummary {
    pub total: usize,
    pub successful: usize,
    pub pending: usize,
    pub failed: usize,
    pub refunded: usize,
    /// Successful amounts per currency, in minor units.
    pub collected: BTreeMap<String, u64>,
    pub success_rate_pct: f64,
}

impl PaymentSummary {
    fn from_ledger(payments: &[PaymentRecord]) -> Self {
        let mut summary = Self {
            total: payments.len(),
            ..Self::default()
        };
        for payment in payments {
            match payment.status {
                PaymentStatus::Pending => summary.pending += 1,
                PaymentStatus::Failed => summary.failed += 1,
                PaymentStatus::Refunded => summary.refunded += 1,
                PaymentStatus::Success => {
                    summary.successful += 1;
                    *summary
                        .collected
                        .entry(payment.currency.clone())
                        .or_default() += payment.amount_minor;
                }
            }
        }
        if summary.total > 0 {
            let rate = summary.successful as f64 / summary.total as f64 * 100.0;
            summary.success_rate_pct = (rate * 10.0).round() / 10.0;
        }
        summary
    }
}

#[derive(Debug, Serialize)]
struct LedgerRow<'a> {
    reference: &'a str,
    intent_id: &'a str,
    application_id: &'a str,
    amount_minor: u64,
    currency: &'a str,
    status: &'static str,
    settled_via: &'static str,
    created_at: String,
    paid_at: String,
    note: &'a str,
}

impl<'a> From<&'a PaymentRecord> for LedgerRow<'a> {
    fn from(payment: &'a PaymentRecord) -> Self {
        Self {
            reference: &payment.reference.0,
            intent_id: &payment.intent_id.0,
            application_id: &payment.application_id.0,
            amount_minor: payment.amount_minor,
            currency: &payment.currency,
            status: payment.status.label(),
            settled_via: match payment.settled_via {
                Some(ReconcileSource::ClientConfirmation) => "client_confirmation",
                Some(ReconcileSource::Webhook) => "webhook",
                Some(ReconcileSource::ManualOverride) => "manual_override",
                None => "",
            },
            created_at: payment.created_at.to_rfc3339(),
            paid_at: payment
                .paid_at
                .map(|paid_at| paid_at.to_rfc3339())
                .unwrap_or_default(),
            note: payment.failure_reason.as_deref().unwrap_or_default(),
        }
    }
}

impl<S, G> AdmissionsService<S, G>
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
{
    /// Refund a successful payment through the gateway, then record it.
    ///
    /// The application keeps its status; only the mirrored payment flag changes.
    pub fn refund_payment(
        &self,
        intent_id: &IntentId,
        request: RefundRequest,
        staff: StaffId,
    ) -> Result<RefundOutcome, AdmissionError> {
        let _intent_guard = self.lock(LockKey::Intent(intent_id.clone()))?;
        let mut payment = self
            .store
            .payment_by_intent(intent_id)?
            .ok_or_else(|| AdmissionError::PaymentNotFound(intent_id.clone()))?;
        let _application_guard =
            self.lock(LockKey::Application(payment.application_id.clone()))?;

        if payment.status != PaymentStatus::Success {
            return Err(AdmissionError::Conflict(format!(
                "only successful payments can be refunded; {} is {}",
                payment.reference.0, payment.status
            )));
        }
        if request.amount_minor == 0 || request.amount_minor > payment.amount_minor {
            return Err(AdmissionError::Validation(format!(
                "refund amount must be between 1 and {} {}",
                payment.amount_minor, payment.currency
            )));
        }
        let reason = request.reason.trim();
        if reason.is_empty() {
            return Err(AdmissionError::Validation(
                "a refund reason is required".to_string(),
            ));
        }

        let receipt = self.gateway.refund(intent_id, request.amount_minor)?;

        let now = self.now();
        let mut note = format!(
            "Refunded {} {} by {} ({}): {reason}",
            request.amount_minor, payment.currency, staff.0, receipt.refund_id
        );
        if let Some(notes) = request.notes.as_deref().map(str::trim) {
            if !notes.is_empty() {
                note.push_str(" | ");
                note.push_str(notes);
            }
        }
        payment.status = PaymentStatus::Refunded;
        payment.failure_reason = Some(note);
        payment.updated_at = now;
        self.store.update_payment(payment.clone())?;

        let mut application = self.fetch_required(&payment.application_id)?;
        application.payment_status = PaymentStatus::Refunded;
        application.updated_at = now;
        self.store.update_application(application)?;

        tracing::info!(
            %intent_id,
            application_id = %payment.application_id,
            amount_minor = request.amount_minor,
            refund_id = %receipt.refund_id,
            "payment refunded"
        );
        Ok(RefundOutcome {
            refund_id: receipt.refund_id,
            payment,
        })
    }

    /// Mark a pending payment as failed. Successful and refunded rows are returned untouched.
    pub fn mark_payment_failed(
        &self,
        intent_id: &IntentId,
        reason: &str,
    ) -> Result<PaymentRecord, AdmissionError> {
        let _intent_guard = self.lock(LockKey::Intent(intent_id.clone()))?;
        let mut payment = self
            .store
            .payment_by_intent(intent_id)?
            .ok_or_else(|| AdmissionError::PaymentNotFound(intent_id.clone()))?;
        let _application_guard =
            self.lock(LockKey::Application(payment.application_id.clone()))?;

        if payment.status != PaymentStatus::Pending {
            tracing::debug!(%intent_id, status = %payment.status, "failure not applied");
            return Ok(payment);
        }

        let now = self.now();
        payment.status = PaymentStatus::Failed;
        payment.failure_reason = Some(reason.trim().to_string());
        payment.client_secret = None;
        payment.updated_at = now;
        self.store.update_payment(payment.clone())?;

        let mut application = self.fetch_required(&payment.application_id)?;
        if application.payment_status == PaymentStatus::Pending {
            application.payment_status = PaymentStatus::Failed;
            application.updated_at = now;
            self.store.update_application(application)?;
        }

        tracing::info!(%intent_id, application_id = %payment.application_id, "payment failed");
        Ok(payment)
    }

    pub fn payment_summary(&self) -> Result<PaymentSummary, AdmissionError> {
        Ok(PaymentSummary::from_ledger(&self.store.all_payments()?))
    }

    /// Write the ledger as CSV, newest first. Returns the number of rows written.
    pub fn export_ledger_csv<W>(&self, writer: W) -> Result<usize, AdmissionError>
    where
        W: io::Write,
    {
        let payments = self.store.all_payments()?;
        let mut csv = csv::Writer::from_writer(writer);
        for payment in &payments {
            csv.serialize(LedgerRow::from(payment))?;
        }
        csv.flush().map_err(csv::Error::from)?;
        Ok(payments.len())
    }
}
