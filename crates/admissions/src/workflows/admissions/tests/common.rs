use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::config::AdmissionsConfig;
use crate::workflows::admissions::documents::DocumentUpload;
use crate::workflows::admissions::domain::{
    ApplicationId, DocumentType, DraftFields, IntentId, OwnerId, StaffId, StudyMode,
};
use crate::workflows::admissions::gateway::{SandboxGateway, WebhookVerifier};
use crate::workflows::admissions::memory::MemoryStore;
use crate::workflows::admissions::notifications::{
    DispatchError, Notification, NotificationDispatcher,
};
use crate::workflows::admissions::{
    admissions_router, fixed_clock, AdmissionsService, AdmissionsState,
};

pub(super) const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub(super) type TestService = AdmissionsService<MemoryStore, SandboxGateway>;

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn config() -> AdmissionsConfig {
    AdmissionsConfig {
        webhook_secret: WEBHOOK_SECRET.to_string(),
        ..AdmissionsConfig::default()
    }
}

pub(super) fn owner(name: &str) -> OwnerId {
    OwnerId(name.to_string())
}

pub(super) fn staff() -> StaffId {
    StaffId("registrar-01".to_string())
}

pub(super) fn draft_fields() -> DraftFields {
    DraftFields {
        full_name: Some("Ada Lovelace".to_string()),
        email: Some("ada@example.edu".to_string()),
        phone: Some("+44 20 7946 0000".to_string()),
        program: Some("BSc Computing".to_string()),
        intake: Some("2025-09".to_string()),
        study_mode: Some(StudyMode::FullTime),
        personal_statement: Some("I like engines.".to_string()),
    }
}

pub(super) fn upload(filename: &str, size_bytes: u64) -> DocumentUpload {
    DocumentUpload {
        file_type: DocumentType::Transcript,
        filename: filename.to_string(),
        size_bytes,
    }
}

pub(super) struct Harness {
    pub(super) service: Arc<TestService>,
    pub(super) store: Arc<MemoryStore>,
    pub(super) gateway: Arc<SandboxGateway>,
}

pub(super) fn harness() -> Harness {
    let store = Arc::new(MemoryStore::default());
    let verifier = WebhookVerifier::new(WEBHOOK_SECRET, 300).with_clock(fixed_clock(now()));
    let gateway = Arc::new(SandboxGateway::new(verifier));
    let service = AdmissionsService::new(store.clone(), gateway.clone(), config())
        .with_clock(fixed_clock(now()));
    Harness {
        service: Arc::new(service),
        store,
        gateway,
    }
}

impl Harness {
    pub(super) fn draft(&self, owner_name: &str) -> ApplicationId {
        self.service
            .create_draft(Some(owner(owner_name)), draft_fields())
            .expect("draft created")
            .application_id
    }

    /// Draft whose fee was requested and then paid at the gateway, not yet confirmed locally.
    pub(super) fn paid_at_gateway(&self, owner_name: &str) -> (ApplicationId, IntentId) {
        let id = self.draft(owner_name);
        let handle = self.service.request_payment(&id).expect("payment requested");
        assert!(self.gateway.complete(&handle.intent_id));
        (id, handle.intent_id)
    }

    pub(super) fn paid(&self, owner_name: &str) -> ApplicationId {
        let (id, intent_id) = self.paid_at_gateway(owner_name);
        self.service
            .confirm_payment(&id, &intent_id)
            .expect("payment confirmed");
        id
    }

    pub(super) fn with_document(&self, owner_name: &str) -> ApplicationId {
        let id = self.paid(owner_name);
        self.service
            .upload_document(&id, upload("transcript.pdf", 1024 * 1024))
            .expect("document uploaded");
        id
    }

    pub(super) fn submitted(&self, owner_name: &str) -> ApplicationId {
        let id = self.with_document(owner_name);
        self.service.submit(&id).expect("submitted");
        id
    }

    pub(super) fn reviewed(&self, owner_name: &str) -> ApplicationId {
        let id = self.submitted(owner_name);
        self.service.mark_under_review(&id).expect("under review");
        self.service
            .mark_reviewed(&id, staff())
            .expect("reviewed");
        id
    }

    pub(super) fn approved(&self, owner_name: &str) -> ApplicationId {
        let id = self.reviewed(owner_name);
        self.service
            .make_decision(&id, "accepted", "Strong profile", staff())
            .expect("decided");
        self.service
            .approve_admission(&id, staff())
            .expect("approved");
        id
    }

    pub(super) fn signed_event(&self, event_type: &str, intent_id: &IntentId) -> (Vec<u8>, String) {
        self.gateway
            .signed_event(event_type, intent_id, now().timestamp())
            .expect("event signed")
    }
}

#[derive(Default)]
pub(super) struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub(super) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("dispatcher mutex poisoned").clone()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, notification: &Notification) -> Result<(), DispatchError> {
        self.sent
            .lock()
            .expect("dispatcher mutex poisoned")
            .push(notification.clone());
        Ok(())
    }
}

pub(super) struct FailingDispatcher;

impl NotificationDispatcher for FailingDispatcher {
    fn dispatch(&self, _notification: &Notification) -> Result<(), DispatchError> {
        Err(DispatchError::Unavailable("smtp relay offline".to_string()))
    }
}

pub(super) fn router_for<N>(harness: &Harness, notifier: Arc<N>) -> axum::Router
where
    N: NotificationDispatcher + 'static,
{
    admissions_router(AdmissionsState::new(harness.service.clone(), notifier))
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
