//! Transition guards for the application state machine.
//!
//! Status only ever moves forward along [`ApplicationStatus`]'s declared order. Guards here are
//! pure; the service takes the row lock, consults them, and writes the result.

use serde::Serialize;

use super::domain::ApplicationStatus;
use super::error::{AdmissionError, SubmissionBlocker};

/// Statuses in which an application counts against its owner's single open slot.
pub const OPEN_STATUSES: [ApplicationStatus; 6] = [
    ApplicationStatus::Draft,
    ApplicationStatus::PendingPayment,
    ApplicationStatus::PaymentComplete,
    ApplicationStatus::DocumentsUploaded,
    ApplicationStatus::Submitted,
    ApplicationStatus::UnderReview,
];

impl ApplicationStatus {
    pub fn is_open(self) -> bool {
        OPEN_STATUSES.contains(&self)
    }

    /// Payment confirmation only moves applications that have not progressed past payment.
    pub fn awaits_payment(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Draft | ApplicationStatus::PendingPayment
        )
    }

    pub fn allows_document_upload(self) -> bool {
        matches!(
            self,
            ApplicationStatus::PaymentComplete | ApplicationStatus::DocumentsUploaded
        )
    }
}

/// Result of an advance that may already have happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEffect {
    Applied,
    AlreadyApplied,
}

/// Operations of the state machine, named for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SaveDraft,
    BindOwner,
    RequestPayment,
    MarkUnderReview,
    MarkReviewed,
    MakeDecision,
    ApproveAdmission,
    AcceptAdmission,
    IssueAdmissionNumber,
    ApproveDepartment,
}

impl Operation {
    pub const fn label(self) -> &'static str {
        match self {
            Operation::SaveDraft => "save draft",
            Operation::BindOwner => "bind owner",
            Operation::RequestPayment => "request payment",
            Operation::MarkUnderReview => "mark under review",
            Operation::MarkReviewed => "mark reviewed",
            Operation::MakeDecision => "make decision",
            Operation::ApproveAdmission => "approve admission",
            Operation::AcceptAdmission => "accept admission",
            Operation::IssueAdmissionNumber => "issue admission number",
            Operation::ApproveDepartment => "approve department access",
        }
    }
}

/// Reject unless `current` is one of `allowed`.
pub fn require_status(
    operation: Operation,
    current: ApplicationStatus,
    allowed: &[ApplicationStatus],
) -> Result<(), AdmissionError> {
    if allowed.contains(&current) {
        Ok(())
    } else {
        Err(AdmissionError::InvalidTransition {
            operation: operation.label(),
            status: current,
        })
    }
}

/// `submitted -> under_review`; a no-op once the application is further along.
pub fn under_review_effect(current: ApplicationStatus) -> Result<TransitionEffect, AdmissionError> {
    match current {
        ApplicationStatus::Submitted => Ok(TransitionEffect::Applied),
        status if status >= ApplicationStatus::UnderReview => Ok(TransitionEffect::AlreadyApplied),
        status => Err(AdmissionError::InvalidTransition {
            operation: Operation::MarkUnderReview.label(),
            status,
        }),
    }
}

/// Submission requires a settled payment, at least one document, and a pre-submission status.
pub fn check_submission(
    current: ApplicationStatus,
    is_paid: bool,
    document_count: usize,
) -> Result<(), AdmissionError> {
    if !is_paid {
        return Err(AdmissionError::SubmissionBlocked(SubmissionBlocker::Unpaid));
    }
    if document_count == 0 {
        return Err(AdmissionError::SubmissionBlocked(
            SubmissionBlocker::MissingDocuments,
        ));
    }
    if !current.allows_document_upload() {
        return Err(AdmissionError::SubmissionBlocked(
            SubmissionBlocker::Status(current),
        ));
    }
    Ok(())
}
