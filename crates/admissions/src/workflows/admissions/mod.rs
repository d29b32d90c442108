//! Admissions application lifecycle and payment reconciliation.
//!
//! [`AdmissionsService`] is the entry point: it validates and executes state transitions,
//! keeps the payment ledger consistent across racing writers, and returns the notifications a
//! caller should send instead of sending them itself.

pub mod clock;
pub mod documents;
pub mod domain;
pub mod error;
pub mod finance;
pub mod gateway;
pub mod lifecycle;
pub(crate) mod locks;
pub mod memory;
pub mod notifications;
pub mod reconciliation;
pub mod router;
pub mod service;
pub mod store;

#[cfg(test)]
mod tests;

pub use clock::{fixed_clock, system_clock, Clock};
pub use documents::{DocumentUpload, UploadPolicy};
pub use domain::{
    AdmissionDecision, AdmissionNumber, ApplicationId, ApplicationRecord, ApplicationStatus,
    ApplicationStatusView, ContactDetails, DocumentId, DocumentRecord, DocumentType, DraftFields,
    IntentId, OwnerId, PaymentRecord, PaymentReference, PaymentStatus, ProgramSelection,
    ReconcileSource, StaffId, StudyMode,
};
pub use error::{AdmissionError, SubmissionBlocker};
pub use finance::{PaymentSummary, RefundOutcome, RefundRequest};
pub use gateway::{
    CreatedIntent, GatewayError, GatewayIntent, IntentRequest, IntentStatus, PaymentGateway,
    RefundReceipt, SandboxGateway, SignatureError, TimeoutGateway, WebhookEvent, WebhookEventKind,
    WebhookVerifier,
};
pub use lifecycle::TransitionEffect;
pub use memory::MemoryStore;
pub use notifications::{
    dispatch_all, DispatchError, DispatchReport, Notification, NotificationDispatcher,
    NotificationKind, Recipient,
};
pub use reconciliation::{ReconcileOutcome, Reconciliation, WebhookDisposition};
pub use router::{admissions_router, AdmissionsState, SIGNATURE_HEADER};
pub use service::{AdmissionsService, Outcome, PaymentHandle};
pub use store::{AdmissionsStore, ApplicationStore, DocumentStore, PaymentLedger, StoreError};
