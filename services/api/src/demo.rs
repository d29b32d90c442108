use crate::infra::{sandbox_service, SandboxService};
use admissions::config::AdmissionsConfig;
use admissions::error::AppError;
use admissions::workflows::admissions::{
    AdmissionDecision, AdmissionError, ApplicationId, DocumentType, DocumentUpload, DraftFields,
    IntentId, Notification, OwnerId, Recipient, StaffId, StudyMode,
};
use clap::Args;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Applicant name shown on the draft
    #[arg(long, default_value = "Ada Lovelace")]
    pub(crate) name: String,
    /// Applicant email that receives notifications
    #[arg(long, default_value = "ada@example.edu")]
    pub(crate) email: String,
    /// Program the applicant applies to
    #[arg(long, default_value = "BSc Computing")]
    pub(crate) program: String,
    /// Decision recorded by the demo reviewer (accepted, rejected, waitlisted)
    #[arg(long, default_value = "accepted")]
    pub(crate) decision: String,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AdmissionsConfig {
        webhook_secret: "whsec_demo".to_string(),
        ..AdmissionsConfig::default()
    };
    let service = sandbox_service(&config);
    let staff = StaffId("demo-registrar".to_string());

    println!("Admissions workflow demo");
    let draft = service.create_draft(
        Some(OwnerId("demo-applicant".to_string())),
        DraftFields {
            full_name: Some(args.name),
            email: Some(args.email),
            program: Some(args.program),
            study_mode: Some(StudyMode::FullTime),
            ..DraftFields::default()
        },
    )?;
    let id = draft.application_id;
    println!("- Draft {} created", id);

    let handle = service.request_payment(&id)?;
    println!(
        "- Payment {} requested: {} {} (intent {})",
        handle.reference.0, handle.amount_minor, handle.currency, handle.intent_id
    );
    settle_in_sandbox(&service, &id, &handle.intent_id)?;

    let upload = service.upload_document(
        &id,
        DocumentUpload {
            file_type: DocumentType::Transcript,
            filename: "transcript.pdf".to_string(),
            size_bytes: 1_048_576,
        },
    )?;
    println!(
        "- Uploaded {} ({}, {})",
        upload.value.document_id.0,
        upload.value.content_type,
        upload.value.size_display()
    );
    print_notifications(&upload.notifications);

    let submitted = service.submit(&id)?;
    println!("- Submitted -> status {}", submitted.value.status);
    print_notifications(&submitted.notifications);

    service.mark_under_review(&id)?;
    service.mark_reviewed(&id, staff.clone())?;
    let decided =
        service.make_decision(&id, &args.decision, "Scripted demo decision", staff.clone())?;
    println!("- Decision: {}", decided.value.decision);
    print_notifications(&decided.notifications);

    if decided.value.decision == AdmissionDecision::Accepted {
        service.approve_admission(&id, staff.clone())?;
        let accepted = service.accept_admission(&id)?;
        print_notifications(&accepted.notifications);
        let number = service.issue_admission_number(&id)?;
        println!("- Admission number {} issued", number.value.0);
        print_notifications(&number.notifications);
        service.approve_department(&id, staff)?;
    }

    let view = service.status(&id)?;
    match serde_json::to_string_pretty(&view) {
        Ok(json) => println!("\nPublic status payload:\n{}", json),
        Err(err) => println!("\nPublic status payload unavailable: {}", err),
    }

    let summary = service.payment_summary()?;
    println!(
        "\nLedger: {} payments | {} successful | {:.1}% success rate",
        summary.total, summary.successful, summary.success_rate_pct
    );
    let mut csv = Vec::new();
    service.export_ledger_csv(&mut csv)?;
    print!("{}", String::from_utf8_lossy(&csv));

    Ok(())
}

/// Completes the intent at the sandbox and delivers the signed webhook, as the gateway would.
fn settle_in_sandbox(
    service: &SandboxService,
    id: &ApplicationId,
    intent_id: &IntentId,
) -> Result<(), AppError> {
    let sandbox = service.gateway().inner();
    sandbox.complete(intent_id);
    let (payload, signature) = sandbox
        .signed_event(
            "payment_intent.succeeded",
            intent_id,
            chrono::Utc::now().timestamp(),
        )
        .map_err(AdmissionError::from)?;
    let webhook = service.handle_webhook(&payload, &signature)?;
    println!("- Webhook delivered for {}", id);
    print_notifications(&webhook.notifications);

    let confirmed = service.confirm_payment(id, intent_id)?;
    println!(
        "- Client confirmation -> {:?}, status {}",
        confirmed.value.outcome, confirmed.value.application.status
    );
    Ok(())
}

fn print_notifications(notifications: &[Notification]) {
    for notification in notifications {
        let recipient = match &notification.recipient {
            Recipient::Applicant { email } => email.as_str(),
            Recipient::Admissions => "admissions office",
        };
        println!("    notify {} <- {}", recipient, notification.kind.template());
    }
}
