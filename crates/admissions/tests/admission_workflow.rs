use std::sync::Arc;

use admissions::config::AdmissionsConfig;
use admissions::workflows::admissions::{
    fixed_clock, AdmissionDecision, AdmissionError, AdmissionsService, ApplicationId,
    ApplicationStatus, DocumentType, DocumentUpload, DraftFields, IntentId, MemoryStore, OwnerId,
    PaymentStatus, ReconcileOutcome, SandboxGateway, StaffId, WebhookDisposition,
    WebhookVerifier,
};
use chrono::{TimeZone, Utc};

const SECRET: &str = "whsec_integration";

fn build() -> (
    AdmissionsService<MemoryStore, SandboxGateway>,
    Arc<SandboxGateway>,
) {
    let now = Utc
        .with_ymd_and_hms(2025, 6, 2, 9, 30, 0)
        .single()
        .expect("valid timestamp");
    let gateway = Arc::new(SandboxGateway::new(
        WebhookVerifier::new(SECRET, 300).with_clock(fixed_clock(now)),
    ));
    let config = AdmissionsConfig {
        webhook_secret: SECRET.to_string(),
        ..AdmissionsConfig::default()
    };
    let service = AdmissionsService::new(Arc::new(MemoryStore::default()), gateway.clone(), config)
        .with_clock(fixed_clock(now));
    (service, gateway)
}

fn fields() -> DraftFields {
    DraftFields {
        full_name: Some("Grace Hopper".to_string()),
        email: Some("grace@example.edu".to_string()),
        program: Some("MSc Software Engineering".to_string()),
        ..DraftFields::default()
    }
}

#[test]
fn payment_is_created_once_and_reconciled_once() {
    let (service, gateway) = build();
    gateway.queue_intent_id("pi_abc");
    let id = service
        .create_draft(Some(OwnerId("grace".to_string())), fields())
        .expect("draft")
        .application_id;
    assert_eq!(id, ApplicationId("MIU-2025-0001".to_string()));

    let first = service.request_payment(&id).expect("payment requested");
    let second = service.request_payment(&id).expect("payment requested again");
    assert_eq!(first.intent_id, IntentId("pi_abc".to_string()));
    assert_eq!(second.intent_id, first.intent_id);
    assert_eq!(
        service.get(&id).expect("present").status,
        ApplicationStatus::PendingPayment
    );

    assert!(gateway.complete(&first.intent_id));
    let confirmed = service
        .confirm_payment(&id, &first.intent_id)
        .expect("confirmed");
    assert_eq!(confirmed.value.payment.status, PaymentStatus::Success);
    assert_eq!(
        confirmed.value.application.status,
        ApplicationStatus::PaymentComplete
    );

    let timestamp = Utc
        .with_ymd_and_hms(2025, 6, 2, 9, 31, 0)
        .single()
        .expect("valid timestamp")
        .timestamp();
    let (payload, signature) = gateway
        .signed_event("payment_intent.succeeded", &first.intent_id, timestamp)
        .expect("signed");
    let late = service
        .handle_webhook(&payload, &signature)
        .expect("webhook handled");
    match late.value {
        WebhookDisposition::Reconciled(reconciliation) => {
            assert_eq!(reconciliation.outcome, ReconcileOutcome::Duplicate)
        }
        other => panic!("unexpected disposition {other:?}"),
    }

    assert_eq!(service.payments(&id).expect("listed").len(), 1);
    assert_eq!(gateway.created_count(), 1);
    assert_eq!(
        service.get(&id).expect("present").status,
        ApplicationStatus::PaymentComplete
    );
}

#[test]
fn document_limits_apply_before_status_advances() {
    let (service, gateway) = build();
    let id = service
        .create_draft(Some(OwnerId("grace".to_string())), fields())
        .expect("draft")
        .application_id;
    let handle = service.request_payment(&id).expect("requested");
    gateway.complete(&handle.intent_id);
    service
        .confirm_payment(&id, &handle.intent_id)
        .expect("confirmed");

    let oversized = service.upload_document(
        &id,
        DocumentUpload {
            file_type: DocumentType::Transcript,
            filename: "transcript.pdf".to_string(),
            size_bytes: 6 * 1024 * 1024,
        },
    );
    assert!(matches!(oversized, Err(AdmissionError::Validation(_))));

    service
        .upload_document(
            &id,
            DocumentUpload {
                file_type: DocumentType::Transcript,
                filename: "transcript.pdf".to_string(),
                size_bytes: 1024 * 1024,
            },
        )
        .expect("accepted");
    assert_eq!(
        service.get(&id).expect("present").status,
        ApplicationStatus::DocumentsUploaded
    );
}

#[test]
fn full_lifecycle_through_admission_number() {
    let (service, gateway) = build();
    let staff = StaffId("dean".to_string());
    let id = service
        .create_draft(Some(OwnerId("grace".to_string())), fields())
        .expect("draft")
        .application_id;
    let handle = service.request_payment(&id).expect("requested");
    gateway.complete(&handle.intent_id);
    service
        .confirm_payment(&id, &handle.intent_id)
        .expect("confirmed");
    service
        .upload_document(
            &id,
            DocumentUpload {
                file_type: DocumentType::Certificate,
                filename: "degree.pdf".to_string(),
                size_bytes: 300_000,
            },
        )
        .expect("uploaded");
    service.submit(&id).expect("submitted");
    service.mark_under_review(&id).expect("under review");
    service
        .mark_reviewed(&id, staff.clone())
        .expect("reviewed");

    let decided = service
        .make_decision(&id, "accepted", "Strong profile", staff.clone())
        .expect("decided");
    assert_eq!(decided.value.decision, AdmissionDecision::Accepted);
    assert_eq!(decided.value.status, ApplicationStatus::DecisionMade);
    assert!(matches!(
        service.make_decision(&id, "accepted", "again", staff.clone()),
        Err(AdmissionError::InvalidTransition { .. })
    ));

    service
        .approve_admission(&id, staff.clone())
        .expect("approved");
    service.accept_admission(&id).expect("accepted");
    let number = service
        .issue_admission_number(&id)
        .expect("issued")
        .value;
    service
        .approve_department(&id, staff)
        .expect("department approval");

    let view = service.status(&id).expect("view");
    assert_eq!(view.status, "approved");
    assert_eq!(view.admission_number, Some(number));
    assert!(view.admission_accepted);
    assert!(view.portal_access);
}
