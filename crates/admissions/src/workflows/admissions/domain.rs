use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Human-readable application identifier, e.g. `MIU-2025-0001`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(pub String);

impl ApplicationId {
    pub fn compose(prefix: &str, year: i32, sequence: u32) -> Self {
        Self(format!("{prefix}-{year}-{sequence:04}"))
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated account that owns an application.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

/// Staff member acting on an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaffId(pub String);

/// Opaque gateway payment intent id; the deduplication key of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(pub String);

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentReference(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

/// Issued once, on acceptance, and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdmissionNumber(pub String);

impl fmt::Display for AdmissionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyMode {
    FullTime,
    PartTime,
    Online,
    Blended,
}

/// Contact details as declared by the applicant. Frozen once the draft leaves `draft`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub full_name: String,
    pub email: String,
    pub phone: String,
}

/// What the applicant applied for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSelection {
    pub program: Option<String>,
    pub intake: Option<String>,
    pub study_mode: Option<StudyMode>,
}

/// Partial update accepted while an application is still a draft.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftFields {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub program: Option<String>,
    pub intake: Option<String>,
    pub study_mode: Option<StudyMode>,
    pub personal_statement: Option<String>,
}

/// Lifecycle status; variant order is the order of progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    PendingPayment,
    PaymentComplete,
    DocumentsUploaded,
    Submitted,
    UnderReview,
    Reviewed,
    DecisionMade,
    Approved,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::PendingPayment => "pending_payment",
            ApplicationStatus::PaymentComplete => "payment_complete",
            ApplicationStatus::DocumentsUploaded => "documents_uploaded",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::UnderReview => "under_review",
            ApplicationStatus::Reviewed => "reviewed",
            ApplicationStatus::DecisionMade => "decision_made",
            ApplicationStatus::Approved => "approved",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Admission decision, tracked separately from status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionDecision {
    Pending,
    Accepted,
    Rejected,
    Waitlisted,
}

impl AdmissionDecision {
    pub const fn label(self) -> &'static str {
        match self {
            AdmissionDecision::Pending => "pending",
            AdmissionDecision::Accepted => "accepted",
            AdmissionDecision::Rejected => "rejected",
            AdmissionDecision::Waitlisted => "waitlisted",
        }
    }
}

impl fmt::Display for AdmissionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown decision '{0}'")]
pub struct UnknownDecision(pub String);

impl FromStr for AdmissionDecision {
    type Err = UnknownDecision;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "waitlisted" => Ok(Self::Waitlisted),
            _ => Err(UnknownDecision(raw.to_string())),
        }
    }
}

/// Payment outcome, used both by ledger rows and the application's mirrored flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which writer settled a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileSource {
    ClientConfirmation,
    Webhook,
    ManualOverride,
}

/// One admission attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub application_id: ApplicationId,
    pub owner: Option<OwnerId>,
    pub contact: ContactDetails,
    pub selection: ProgramSelection,
    pub personal_statement: String,
    pub status: ApplicationStatus,
    pub decision: AdmissionDecision,
    pub decision_notes: String,
    pub decided_by: Option<StaffId>,
    pub decision_date: Option<DateTime<Utc>>,
    pub payment_status: PaymentStatus,
    pub reviewer: Option<StaffId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_by: Option<StaffId>,
    pub admission_accepted: bool,
    pub accepted_at: Option<DateTime<Utc>>,
    pub admission_number: Option<AdmissionNumber>,
    pub department_approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationRecord {
    pub fn new_draft(
        application_id: ApplicationId,
        owner: Option<OwnerId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            application_id,
            owner,
            contact: ContactDetails::default(),
            selection: ProgramSelection::default(),
            personal_statement: String::new(),
            status: ApplicationStatus::Draft,
            decision: AdmissionDecision::Pending,
            decision_notes: String::new(),
            decided_by: None,
            decision_date: None,
            payment_status: PaymentStatus::Pending,
            reviewer: None,
            reviewed_at: None,
            submitted_at: None,
            approved_by: None,
            admission_accepted: false,
            accepted_at: None,
            admission_number: None,
            department_approved: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge the supplied fields, leaving absent ones untouched.
    pub fn apply_draft_fields(&mut self, fields: &DraftFields) {
        if let Some(full_name) = &fields.full_name {
            self.contact.full_name = full_name.trim().to_string();
        }
        if let Some(email) = &fields.email {
            self.contact.email = email.trim().to_string();
        }
        if let Some(phone) = &fields.phone {
            self.contact.phone = phone.trim().to_string();
        }
        if let Some(program) = &fields.program {
            self.selection.program = Some(program.trim().to_string());
        }
        if let Some(intake) = &fields.intake {
            self.selection.intake = Some(intake.trim().to_string());
        }
        if fields.study_mode.is_some() {
            self.selection.study_mode = fields.study_mode;
        }
        if let Some(statement) = &fields.personal_statement {
            self.personal_statement = statement.clone();
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn is_reviewed(&self) -> bool {
        self.status >= ApplicationStatus::Reviewed
    }

    pub fn is_decided(&self) -> bool {
        self.status >= ApplicationStatus::DecisionMade
    }

    /// Student portal access requires both the applicant's acceptance and the department gate.
    pub fn has_portal_access(&self) -> bool {
        self.admission_accepted && self.department_approved
    }

    pub fn status_view(&self) -> ApplicationStatusView {
        ApplicationStatusView {
            application_id: self.application_id.clone(),
            status: self.status.label(),
            decision: self.is_decided().then(|| self.decision.label()),
            payment_status: self.payment_status.label(),
            admission_accepted: self.admission_accepted,
            admission_number: self.admission_number.clone(),
            portal_access: self.has_portal_access(),
        }
    }
}

/// Sanitized representation of an application's exposed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationStatusView {
    pub application_id: ApplicationId,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<&'static str>,
    pub payment_status: &'static str,
    pub admission_accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission_number: Option<AdmissionNumber>,
    pub portal_access: bool,
}

/// One payment attempt against a gateway intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub reference: PaymentReference,
    pub intent_id: IntentId,
    pub application_id: ApplicationId,
    pub amount_minor: u64,
    pub currency: String,
    pub status: PaymentStatus,
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    pub settled_via: Option<ReconcileSource>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn is_success(&self) -> bool {
        self.status == PaymentStatus::Success
    }
}

/// Kinds of supporting document an applicant may upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Transcript,
    Certificate,
    EnglishTest,
    #[serde(rename = "id")]
    IdDocument,
    Cv,
    Recommendation,
    Other,
}

/// Metadata of an uploaded file. Never mutated; re-uploads add new records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: DocumentId,
    pub application_id: ApplicationId,
    pub file_type: DocumentType,
    pub original_filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn size_display(&self) -> String {
        let mut size = self.size_bytes as f64;
        for unit in ["bytes", "KB", "MB", "GB"] {
            if size < 1024.0 {
                return format!("{size:.1} {unit}");
            }
            size /= 1024.0;
        }
        format!("{size:.1} TB")
    }
}
