//! Side effects requested by state transitions.
//!
//! Operations return [`Notification`] values instead of sending anything; the caller hands them
//! to a [`NotificationDispatcher`] after the transition has committed.

use std::collections::BTreeMap;

use serde::Serialize;

use super::domain::ApplicationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentReceipt,
    DocumentConfirmation,
    DocumentUploadedAlert,
    SubmissionConfirmation,
    SubmissionAlert,
    DecisionNotice,
    AcceptanceConfirmation,
    AdmissionNumberIssued,
}

impl NotificationKind {
    pub const fn template(self) -> &'static str {
        match self {
            NotificationKind::PaymentReceipt => "payment_receipt",
            NotificationKind::DocumentConfirmation => "document_confirmation",
            NotificationKind::DocumentUploadedAlert => "document_uploaded_alert",
            NotificationKind::SubmissionConfirmation => "submission_confirmation",
            NotificationKind::SubmissionAlert => "submission_alert",
            NotificationKind::DecisionNotice => "decision_notice",
            NotificationKind::AcceptanceConfirmation => "acceptance_confirmation",
            NotificationKind::AdmissionNumberIssued => "admission_number_issued",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "to", rename_all = "snake_case")]
pub enum Recipient {
    Applicant { email: String },
    Admissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub application_id: ApplicationId,
    pub recipient: Recipient,
    pub details: BTreeMap<String, String>,
}

impl Notification {
    pub fn to_applicant(
        kind: NotificationKind,
        application_id: &ApplicationId,
        email: &str,
    ) -> Self {
        Self {
            kind,
            application_id: application_id.clone(),
            recipient: Recipient::Applicant {
                email: email.to_string(),
            },
            details: BTreeMap::new(),
        }
    }

    pub fn to_admissions(kind: NotificationKind, application_id: &ApplicationId) -> Self {
        Self {
            kind,
            application_id: application_id.clone(),
            recipient: Recipient::Admissions,
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Fire-and-forget delivery channel (email, queue, ...).
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, notification: &Notification) -> Result<(), DispatchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
    #[error("notification rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Deliver every notification, logging failures. Never fails the caller: the transition that
/// produced these notifications has already committed.
pub fn dispatch_all<D>(dispatcher: &D, notifications: &[Notification]) -> DispatchReport
where
    D: NotificationDispatcher + ?Sized,
{
    let mut report = DispatchReport::default();
    for notification in notifications {
        match dispatcher.dispatch(notification) {
            Ok(()) => report.delivered += 1,
            Err(error) => {
                report.failed += 1;
                tracing::warn!(
                    application_id = %notification.application_id,
                    template = notification.kind.template(),
                    %error,
                    "notification delivery failed"
                );
            }
        }
    }
    report
}
