use super::common::*;
use crate::workflows::admissions::domain::{ApplicationStatus, DocumentType};
use crate::workflows::admissions::documents::DocumentUpload;
use crate::workflows::admissions::error::AdmissionError;
use crate::workflows::admissions::notifications::{NotificationKind, Recipient};

const MIB: u64 = 1024 * 1024;

#[test]
fn uploads_wait_for_payment() {
    let harness = harness();
    let draft = harness.draft("ada");
    assert!(matches!(
        harness
            .service
            .upload_document(&draft, upload("transcript.pdf", MIB)),
        Err(AdmissionError::UploadNotAllowed(ApplicationStatus::Draft))
    ));

    harness.service.request_payment(&draft).expect("requested");
    assert!(matches!(
        harness
            .service
            .upload_document(&draft, upload("transcript.pdf", MIB)),
        Err(AdmissionError::UploadNotAllowed(
            ApplicationStatus::PendingPayment
        ))
    ));
    assert!(harness.service.documents(&draft).expect("listed").is_empty());
}

#[test]
fn oversized_upload_is_rejected_then_valid_upload_advances() {
    let harness = harness();
    let id = harness.paid("ada");

    assert!(matches!(
        harness
            .service
            .upload_document(&id, upload("transcript.pdf", 6 * MIB)),
        Err(AdmissionError::Validation(_))
    ));
    assert_eq!(
        harness.service.get(&id).expect("present").status,
        ApplicationStatus::PaymentComplete
    );

    let outcome = harness
        .service
        .upload_document(&id, upload("transcript.pdf", MIB))
        .expect("uploaded");

    let document = outcome.value;
    assert_eq!(document.document_id.0, format!("DOC-{id}-001"));
    assert_eq!(document.content_type, "application/pdf");
    assert_eq!(document.size_display(), "1.0 MB");
    assert_eq!(document.uploaded_at, now());
    assert_eq!(
        harness.service.get(&id).expect("present").status,
        ApplicationStatus::DocumentsUploaded
    );

    let recipients: Vec<_> = outcome
        .notifications
        .iter()
        .map(|notification| (notification.kind, notification.recipient.clone()))
        .collect();
    assert_eq!(
        recipients,
        vec![
            (
                NotificationKind::DocumentConfirmation,
                Recipient::Applicant {
                    email: "ada@example.edu".to_string()
                }
            ),
            (NotificationKind::DocumentUploadedAlert, Recipient::Admissions),
        ]
    );
}

#[test]
fn further_uploads_add_records_without_changing_status() {
    let harness = harness();
    let id = harness.with_document("ada");

    harness
        .service
        .upload_document(
            &id,
            DocumentUpload {
                file_type: DocumentType::IdDocument,
                filename: "passport.JPG".to_string(),
                size_bytes: 512 * 1024,
            },
        )
        .expect("second upload");
    harness
        .service
        .upload_document(&id, upload("transcript.pdf", 2 * MIB))
        .expect("re-upload supersedes");

    let documents = harness.service.documents(&id).expect("listed");
    assert_eq!(documents.len(), 3);
    assert_eq!(documents[1].content_type, "image/jpeg");
    assert_eq!(documents[1].size_display(), "512.0 KB");
    assert_eq!(
        harness.service.get(&id).expect("present").status,
        ApplicationStatus::DocumentsUploaded
    );
}

#[test]
fn disallowed_extension_is_a_validation_error() {
    let harness = harness();
    let id = harness.paid("ada");

    assert!(matches!(
        harness
            .service
            .upload_document(&id, upload("statement.docx", MIB)),
        Err(AdmissionError::Validation(_))
    ));
}

#[test]
fn uploads_close_after_submission() {
    let harness = harness();
    let id = harness.submitted("ada");

    assert!(matches!(
        harness
            .service
            .upload_document(&id, upload("late.pdf", MIB)),
        Err(AdmissionError::UploadNotAllowed(ApplicationStatus::Submitted))
    ));
}
