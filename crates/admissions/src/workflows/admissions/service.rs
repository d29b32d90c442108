use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::clock::{system_clock, Clock};
use super::documents::{content_type_for, DocumentUpload, UploadPolicy};
use super::domain::{
    AdmissionDecision, AdmissionNumber, ApplicationId, ApplicationRecord, ApplicationStatus,
    ApplicationStatusView, DocumentId, DocumentRecord, DraftFields, IntentId, OwnerId,
    PaymentRecord, PaymentReference, PaymentStatus, StaffId,
};
use super::error::AdmissionError;
use super::gateway::{IntentRequest, PaymentGateway, APPLICATION_METADATA_KEY};
use super::lifecycle::{
    check_submission, require_status, under_review_effect, Operation, TransitionEffect,
};
use super::locks::{LockKey, RowGuard, RowLocks};
use super::notifications::{Notification, NotificationKind};
use super::store::{AdmissionsStore, SequenceSeries};
use crate::config::AdmissionsConfig;

/// Result of a committed operation plus the notifications the caller should dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub notifications: Vec<Notification>,
}

impl<T> Outcome<T> {
    pub fn quiet(value: T) -> Self {
        Self {
            value,
            notifications: Vec::new(),
        }
    }

    pub fn with_notifications(value: T, notifications: Vec<Notification>) -> Self {
        Self {
            value,
            notifications,
        }
    }
}

/// What the payer needs to finish paying at the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentHandle {
    pub application_id: ApplicationId,
    pub intent_id: IntentId,
    pub reference: PaymentReference,
    pub client_secret: String,
    pub amount_minor: u64,
    pub currency: String,
    /// True when an existing pending intent was handed back instead of creating one.
    pub reused: bool,
}

/// Facade over the application state machine and the payment ledger.
///
/// Every read-modify-write runs under the relevant row locks; see [`LockKey`] for the order.
pub struct AdmissionsService<S, G> {
    pub(super) store: Arc<S>,
    pub(super) gateway: Arc<G>,
    pub(super) config: AdmissionsConfig,
    pub(super) policy: UploadPolicy,
    pub(super) locks: RowLocks,
    pub(super) clock: Clock,
}

impl<S, G> AdmissionsService<S, G>
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(store: Arc<S>, gateway: Arc<G>, config: AdmissionsConfig) -> Self {
        let policy = UploadPolicy::new(config.max_upload_bytes);
        Self {
            store,
            gateway,
            config,
            policy,
            locks: RowLocks::default(),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &AdmissionsConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// Open a new draft. An owner may only hold one open application at a time.
    pub fn create_draft(
        &self,
        owner: Option<OwnerId>,
        fields: DraftFields,
    ) -> Result<ApplicationRecord, AdmissionError> {
        validate_fields(&fields)?;

        let _owner_guard = match &owner {
            Some(owner) => {
                let guard = self.lock(LockKey::Owner(owner.clone()))?;
                self.ensure_no_open_application(owner, None)?;
                Some(guard)
            }
            None => None,
        };

        let now = self.now();
        let sequence = self
            .store
            .next_sequence(SequenceSeries::Application, now.year())?;
        let application_id =
            ApplicationId::compose(&self.config.application_id_prefix, now.year(), sequence);

        let mut record = ApplicationRecord::new_draft(application_id, owner, now);
        record.apply_draft_fields(&fields);
        let stored = self.store.insert_application(record)?;

        tracing::info!(application_id = %stored.application_id, "draft created");
        Ok(stored)
    }

    /// Merge fields into a draft. Repeating the same save is harmless.
    pub fn save_draft(
        &self,
        application_id: &ApplicationId,
        fields: DraftFields,
    ) -> Result<ApplicationRecord, AdmissionError> {
        validate_fields(&fields)?;
        let _guard = self.lock(LockKey::Application(application_id.clone()))?;
        let mut record = self.fetch_required(application_id)?;
        require_status(Operation::SaveDraft, record.status, &[ApplicationStatus::Draft])?;

        record.apply_draft_fields(&fields);
        record.updated_at = self.now();
        self.store.update_application(record.clone())?;
        Ok(record)
    }

    /// Attach an anonymous draft to an account. The owner, once set, never changes.
    pub fn bind_owner(
        &self,
        application_id: &ApplicationId,
        owner: OwnerId,
    ) -> Result<TransitionEffect, AdmissionError> {
        let _owner_guard = self.lock(LockKey::Owner(owner.clone()))?;
        let _guard = self.lock(LockKey::Application(application_id.clone()))?;
        let mut record = self.fetch_required(application_id)?;

        match &record.owner {
            Some(current) if *current == owner => return Ok(TransitionEffect::AlreadyApplied),
            Some(_) => {
                return Err(AdmissionError::Conflict(format!(
                    "application {application_id} already belongs to another account"
                )))
            }
            None => {}
        }
        if record.is_open() {
            self.ensure_no_open_application(&owner, Some(application_id))?;
        }

        record.owner = Some(owner);
        record.updated_at = self.now();
        self.store.update_application(record)?;
        tracing::info!(%application_id, "owner bound to application");
        Ok(TransitionEffect::Applied)
    }

    /// Create (or hand back) the gateway intent for the application fee.
    ///
    /// Holds the application lock across the gateway call so concurrent callers create at most
    /// one intent. A gateway failure leaves nothing behind, so a retry starts clean.
    pub fn request_payment(
        &self,
        application_id: &ApplicationId,
    ) -> Result<PaymentHandle, AdmissionError> {
        let _guard = self.lock(LockKey::Application(application_id.clone()))?;
        let mut record = self.fetch_required(application_id)?;
        require_status(
            Operation::RequestPayment,
            record.status,
            &[ApplicationStatus::Draft, ApplicationStatus::PendingPayment],
        )?;

        let attempts = self.store.payments_for_application(application_id)?;
        let handle = match attempts
            .iter()
            .find(|payment| payment.status == PaymentStatus::Pending)
        {
            Some(pending) => self.reuse_pending(pending)?,
            None => self.create_pending(&record, attempts.len() + 1)?,
        };

        if record.status != ApplicationStatus::PendingPayment {
            record.status = ApplicationStatus::PendingPayment;
            record.payment_status = PaymentStatus::Pending;
            record.updated_at = self.now();
            self.store.update_application(record)?;
        }

        tracing::info!(
            %application_id,
            intent_id = %handle.intent_id,
            reused = handle.reused,
            "payment requested"
        );
        Ok(handle)
    }

    fn reuse_pending(&self, pending: &PaymentRecord) -> Result<PaymentHandle, AdmissionError> {
        let client_secret = match &pending.client_secret {
            Some(secret) => secret.clone(),
            None => self
                .gateway
                .retrieve_intent(&pending.intent_id)?
                .and_then(|intent| intent.client_secret)
                .ok_or_else(|| AdmissionError::PaymentNotFound(pending.intent_id.clone()))?,
        };
        Ok(PaymentHandle {
            application_id: pending.application_id.clone(),
            intent_id: pending.intent_id.clone(),
            reference: pending.reference.clone(),
            client_secret,
            amount_minor: pending.amount_minor,
            currency: pending.currency.clone(),
            reused: true,
        })
    }

    fn create_pending(
        &self,
        record: &ApplicationRecord,
        attempt: usize,
    ) -> Result<PaymentHandle, AdmissionError> {
        let application_id = &record.application_id;
        let mut metadata = BTreeMap::new();
        metadata.insert(APPLICATION_METADATA_KEY.to_string(), application_id.0.clone());
        if !record.contact.email.is_empty() {
            metadata.insert("email".to_string(), record.contact.email.clone());
        }
        let request = IntentRequest {
            amount_minor: self.config.application_fee_minor,
            currency: self.config.currency.clone(),
            idempotency_key: format!("{application_id}-attempt-{attempt}"),
            metadata,
        };
        let created = self.gateway.create_intent(&request)?;

        let now = self.now();
        let payment = self.store.insert_payment(PaymentRecord {
            reference: payment_reference(&created.intent_id),
            intent_id: created.intent_id,
            application_id: application_id.clone(),
            amount_minor: request.amount_minor,
            currency: request.currency,
            status: PaymentStatus::Pending,
            client_secret: Some(created.client_secret.clone()),
            settled_via: None,
            failure_reason: None,
            created_at: now,
            paid_at: None,
            updated_at: now,
        })?;

        Ok(PaymentHandle {
            application_id: application_id.clone(),
            intent_id: payment.intent_id,
            reference: payment.reference,
            client_secret: created.client_secret,
            amount_minor: payment.amount_minor,
            currency: payment.currency,
            reused: false,
        })
    }

    /// True once the ledger holds a successful payment for the application.
    pub fn is_paid(&self, application_id: &ApplicationId) -> Result<bool, AdmissionError> {
        Ok(self
            .store
            .payments_for_application(application_id)?
            .iter()
            .any(PaymentRecord::is_success))
    }

    /// Record an uploaded document. Only allowed once payment has completed.
    pub fn upload_document(
        &self,
        application_id: &ApplicationId,
        upload: DocumentUpload,
    ) -> Result<Outcome<DocumentRecord>, AdmissionError> {
        let _guard = self.lock(LockKey::Application(application_id.clone()))?;
        let mut record = self.fetch_required(application_id)?;
        if !record.status.allows_document_upload() || !self.is_paid(application_id)? {
            return Err(AdmissionError::UploadNotAllowed(record.status));
        }
        let filename = self.policy.validate(&upload)?;

        let existing = self.store.documents_for_application(application_id)?;
        let now = self.now();
        let document = self.store.insert_document(DocumentRecord {
            document_id: DocumentId(format!("DOC-{application_id}-{:03}", existing.len() + 1)),
            application_id: application_id.clone(),
            file_type: upload.file_type,
            content_type: content_type_for(&filename),
            original_filename: filename,
            size_bytes: upload.size_bytes,
            uploaded_at: now,
        })?;

        if record.status == ApplicationStatus::PaymentComplete {
            record.status = ApplicationStatus::DocumentsUploaded;
        }
        record.updated_at = now;
        self.store.update_application(record.clone())?;

        tracing::info!(
            %application_id,
            document_id = %document.document_id.0,
            size = %document.size_display(),
            "document uploaded"
        );

        let mut notifications: Vec<Notification> = applicant_notice(
            &record,
            NotificationKind::DocumentConfirmation,
        )
        .map(|notice| notice.with_detail("filename", document.original_filename.clone()))
        .into_iter()
        .collect();
        notifications.push(
            Notification::to_admissions(NotificationKind::DocumentUploadedAlert, application_id)
                .with_detail("document_id", document.document_id.0.clone())
                .with_detail("file_type", format!("{:?}", document.file_type)),
        );
        Ok(Outcome::with_notifications(document, notifications))
    }

    pub fn submit(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Outcome<ApplicationRecord>, AdmissionError> {
        let _guard = self.lock(LockKey::Application(application_id.clone()))?;
        let mut record = self.fetch_required(application_id)?;
        let is_paid = self.is_paid(application_id)?;
        let documents = self.store.documents_for_application(application_id)?;
        check_submission(record.status, is_paid, documents.len())?;

        let now = self.now();
        record.status = ApplicationStatus::Submitted;
        record.submitted_at = Some(now);
        record.updated_at = now;
        self.store.update_application(record.clone())?;
        tracing::info!(%application_id, documents = documents.len(), "application submitted");

        let mut notifications: Vec<Notification> =
            applicant_notice(&record, NotificationKind::SubmissionConfirmation)
                .into_iter()
                .collect();
        notifications.push(
            Notification::to_admissions(NotificationKind::SubmissionAlert, application_id)
                .with_detail("full_name", record.contact.full_name.clone())
                .with_detail(
                    "program",
                    record.selection.program.clone().unwrap_or_default(),
                ),
        );
        Ok(Outcome::with_notifications(record, notifications))
    }

    /// Staff opened the application. Never regresses a record that is further along.
    pub fn mark_under_review(
        &self,
        application_id: &ApplicationId,
    ) -> Result<TransitionEffect, AdmissionError> {
        let _guard = self.lock(LockKey::Application(application_id.clone()))?;
        let mut record = self.fetch_required(application_id)?;
        let effect = under_review_effect(record.status)?;
        if effect == TransitionEffect::Applied {
            record.status = ApplicationStatus::UnderReview;
            record.updated_at = self.now();
            self.store.update_application(record)?;
            tracing::info!(%application_id, "application under review");
        }
        Ok(effect)
    }

    pub fn mark_reviewed(
        &self,
        application_id: &ApplicationId,
        reviewer: StaffId,
    ) -> Result<ApplicationRecord, AdmissionError> {
        let _guard = self.lock(LockKey::Application(application_id.clone()))?;
        let mut record = self.fetch_required(application_id)?;
        require_status(
            Operation::MarkReviewed,
            record.status,
            &[ApplicationStatus::UnderReview, ApplicationStatus::Submitted],
        )?;

        let now = self.now();
        record.status = ApplicationStatus::Reviewed;
        record.reviewer = Some(reviewer);
        record.reviewed_at = Some(now);
        record.updated_at = now;
        self.store.update_application(record.clone())?;
        tracing::info!(%application_id, "application reviewed");
        Ok(record)
    }

    /// Record the admissions decision. `decision` must be accepted, rejected, or waitlisted.
    pub fn make_decision(
        &self,
        application_id: &ApplicationId,
        decision: &str,
        notes: &str,
        staff: StaffId,
    ) -> Result<Outcome<ApplicationRecord>, AdmissionError> {
        let _guard = self.lock(LockKey::Application(application_id.clone()))?;
        let mut record = self.fetch_required(application_id)?;
        require_status(
            Operation::MakeDecision,
            record.status,
            &[ApplicationStatus::Reviewed],
        )?;
        let decision = match decision.parse::<AdmissionDecision>() {
            Ok(AdmissionDecision::Pending) | Err(_) => {
                return Err(AdmissionError::Validation(format!(
                    "decision must be accepted, rejected, or waitlisted; got {decision:?}"
                )))
            }
            Ok(decision) => decision,
        };

        let now = self.now();
        record.decision = decision;
        record.decision_notes = notes.trim().to_string();
        record.decided_by = Some(staff);
        record.decision_date = Some(now);
        record.status = ApplicationStatus::DecisionMade;
        record.updated_at = now;
        self.store.update_application(record.clone())?;
        tracing::info!(%application_id, decision = %decision, "decision recorded");

        let notifications = applicant_notice(&record, NotificationKind::DecisionNotice)
            .map(|notice| notice.with_detail("decision", decision.label()))
            .into_iter()
            .collect();
        Ok(Outcome::with_notifications(record, notifications))
    }

    /// Administrative sign-off that turns an accepted decision into an offer.
    pub fn approve_admission(
        &self,
        application_id: &ApplicationId,
        staff: StaffId,
    ) -> Result<ApplicationRecord, AdmissionError> {
        let _guard = self.lock(LockKey::Application(application_id.clone()))?;
        let mut record = self.fetch_required(application_id)?;
        require_status(
            Operation::ApproveAdmission,
            record.status,
            &[ApplicationStatus::DecisionMade],
        )?;
        if record.decision != AdmissionDecision::Accepted {
            return Err(AdmissionError::Conflict(format!(
                "only accepted decisions can be approved; {application_id} is {}",
                record.decision
            )));
        }

        record.status = ApplicationStatus::Approved;
        record.approved_by = Some(staff);
        record.updated_at = self.now();
        self.store.update_application(record.clone())?;
        tracing::info!(%application_id, "admission approved");
        Ok(record)
    }

    /// The applicant takes up the offer.
    pub fn accept_admission(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Outcome<ApplicationRecord>, AdmissionError> {
        let _guard = self.lock(LockKey::Application(application_id.clone()))?;
        let mut record = self.fetch_required(application_id)?;
        require_status(
            Operation::AcceptAdmission,
            record.status,
            &[ApplicationStatus::Approved],
        )?;
        if record.decision != AdmissionDecision::Accepted {
            return Err(AdmissionError::InvalidTransition {
                operation: Operation::AcceptAdmission.label(),
                status: record.status,
            });
        }
        if record.admission_accepted {
            return Err(AdmissionError::AlreadyAccepted(application_id.clone()));
        }

        let now = self.now();
        record.admission_accepted = true;
        record.accepted_at = Some(now);
        record.updated_at = now;
        self.store.update_application(record.clone())?;
        tracing::info!(%application_id, "admission accepted");

        let notifications = applicant_notice(&record, NotificationKind::AcceptanceConfirmation)
            .into_iter()
            .collect();
        Ok(Outcome::with_notifications(record, notifications))
    }

    /// Assign the admission number once. Later calls return the number already issued.
    pub fn issue_admission_number(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Outcome<AdmissionNumber>, AdmissionError> {
        let _guard = self.lock(LockKey::Application(application_id.clone()))?;
        let mut record = self.fetch_required(application_id)?;
        if !record.admission_accepted {
            return Err(AdmissionError::InvalidTransition {
                operation: Operation::IssueAdmissionNumber.label(),
                status: record.status,
            });
        }
        if let Some(number) = &record.admission_number {
            return Ok(Outcome::quiet(number.clone()));
        }

        let now = self.now();
        let sequence = self
            .store
            .next_sequence(SequenceSeries::AdmissionNumber, now.year())?;
        let number = AdmissionNumber(format!(
            "{}-{}-{sequence:04}",
            self.config.admission_number_prefix,
            now.year()
        ));
        record.admission_number = Some(number.clone());
        record.updated_at = now;
        self.store.update_application(record.clone())?;
        tracing::info!(%application_id, admission_number = %number, "admission number issued");

        let notifications = applicant_notice(&record, NotificationKind::AdmissionNumberIssued)
            .map(|notice| notice.with_detail("admission_number", number.0.clone()))
            .into_iter()
            .collect();
        Ok(Outcome::with_notifications(number, notifications))
    }

    /// Open the student portal gate for an accepted admission.
    pub fn approve_department(
        &self,
        application_id: &ApplicationId,
        staff: StaffId,
    ) -> Result<TransitionEffect, AdmissionError> {
        let _guard = self.lock(LockKey::Application(application_id.clone()))?;
        let mut record = self.fetch_required(application_id)?;
        if !record.admission_accepted {
            return Err(AdmissionError::InvalidTransition {
                operation: Operation::ApproveDepartment.label(),
                status: record.status,
            });
        }
        if record.department_approved {
            return Ok(TransitionEffect::AlreadyApplied);
        }

        record.department_approved = true;
        record.updated_at = self.now();
        self.store.update_application(record)?;
        tracing::info!(%application_id, staff = %staff.0, "department approval granted");
        Ok(TransitionEffect::Applied)
    }

    pub fn get(&self, application_id: &ApplicationId) -> Result<ApplicationRecord, AdmissionError> {
        self.fetch_required(application_id)
    }

    pub fn status(
        &self,
        application_id: &ApplicationId,
    ) -> Result<ApplicationStatusView, AdmissionError> {
        Ok(self.fetch_required(application_id)?.status_view())
    }

    pub fn documents(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<DocumentRecord>, AdmissionError> {
        self.fetch_required(application_id)?;
        Ok(self.store.documents_for_application(application_id)?)
    }

    pub fn payments(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<PaymentRecord>, AdmissionError> {
        self.fetch_required(application_id)?;
        Ok(self.store.payments_for_application(application_id)?)
    }

    pub fn applications_for_owner(
        &self,
        owner: &OwnerId,
    ) -> Result<Vec<ApplicationRecord>, AdmissionError> {
        Ok(self.store.applications_for_owner(owner)?)
    }

    pub(super) fn lock(&self, key: LockKey) -> Result<RowGuard<'_>, AdmissionError> {
        Ok(self.locks.acquire(key)?)
    }

    pub(super) fn fetch_required(
        &self,
        application_id: &ApplicationId,
    ) -> Result<ApplicationRecord, AdmissionError> {
        self.store
            .fetch_application(application_id)?
            .ok_or_else(|| AdmissionError::NotFound(application_id.clone()))
    }

    pub(super) fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn ensure_no_open_application(
        &self,
        owner: &OwnerId,
        except: Option<&ApplicationId>,
    ) -> Result<(), AdmissionError> {
        let open = self
            .store
            .applications_for_owner(owner)?
            .into_iter()
            .find(|record| record.is_open() && Some(&record.application_id) != except);
        match open {
            Some(record) => Err(AdmissionError::Conflict(format!(
                "owner already has open application {} ({})",
                record.application_id, record.status
            ))),
            None => Ok(()),
        }
    }
}

/// Internal ledger reference derived from the intent id, e.g. `PAY-3F2A9C01B7DE`.
pub fn payment_reference(intent_id: &IntentId) -> PaymentReference {
    let digest = Sha256::digest(intent_id.0.as_bytes());
    let mut encoded = hex::encode_upper(digest);
    encoded.truncate(12);
    PaymentReference(format!("PAY-{encoded}"))
}

pub(super) fn applicant_notice(
    record: &ApplicationRecord,
    kind: NotificationKind,
) -> Option<Notification> {
    if record.contact.email.is_empty() {
        return None;
    }
    Some(Notification::to_applicant(
        kind,
        &record.application_id,
        &record.contact.email,
    ))
}

fn validate_fields(fields: &DraftFields) -> Result<(), AdmissionError> {
    if let Some(email) = &fields.email {
        let email = email.trim();
        let valid = email
            .split_once('@')
            .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
            .unwrap_or(false);
        if !valid {
            return Err(AdmissionError::Validation(format!(
                "{email:?} is not a valid email address"
            )));
        }
    }
    if let Some(name) = &fields.full_name {
        if name.trim().is_empty() {
            return Err(AdmissionError::Validation(
                "full name cannot be blank".to_string(),
            ));
        }
    }
    Ok(())
}
