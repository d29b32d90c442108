use std::fmt;

use super::domain::{ApplicationId, ApplicationStatus, IntentId};
use super::gateway::{GatewayError, IntentStatus, SignatureError};
use super::store::StoreError;

/// Typed failure of every admissions operation. The HTTP layer maps these to responses.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("cannot {operation} while application is {status}")]
    InvalidTransition {
        operation: &'static str,
        status: ApplicationStatus,
    },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("payment intent {0} not found")]
    PaymentNotFound(IntentId),
    #[error("payment intent {intent_id} has not succeeded (gateway status {status})")]
    PaymentNotSucceeded {
        intent_id: IntentId,
        status: IntentStatus,
    },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("documents cannot be uploaded while application is {0}")]
    UploadNotAllowed(ApplicationStatus),
    #[error("submission blocked: {0}")]
    SubmissionBlocked(SubmissionBlocker),
    #[error("admission already accepted for {0}")]
    AlreadyAccepted(ApplicationId),
    #[error("application {0} not found")]
    NotFound(ApplicationId),
    #[error("ledger export failed: {0}")]
    Export(#[from] csv::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdmissionError {
    /// Whether repeating the same call later may succeed without any other change.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            AdmissionError::Gateway(_) | AdmissionError::Store(StoreError::Unavailable(_))
        )
    }
}

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionBlocker {
    Unpaid,
    MissingDocuments,
    Status(ApplicationStatus),
}

impl fmt::Display for SubmissionBlocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionBlocker::Unpaid => f.write_str("application fee has not been paid"),
            SubmissionBlocker::MissingDocuments => {
                f.write_str("at least one supporting document is required")
            }
            SubmissionBlocker::Status(status) => {
                write!(f, "application cannot be submitted while {status}")
            }
        }
    }
}
