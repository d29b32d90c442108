use admissions::config::AdmissionsConfig;
use admissions::workflows::admissions::{
    AdmissionsService, DispatchError, MemoryStore, Notification, NotificationDispatcher,
    Recipient, SandboxGateway, TimeoutGateway, WebhookVerifier,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub(crate) type SandboxService = AdmissionsService<MemoryStore, TimeoutGateway<SandboxGateway>>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Writes notifications to the log stream in place of a mail relay.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn dispatch(&self, notification: &Notification) -> Result<(), DispatchError> {
        let recipient = match &notification.recipient {
            Recipient::Applicant { email } => email.as_str(),
            Recipient::Admissions => "admissions-office",
        };
        tracing::info!(
            template = notification.kind.template(),
            application_id = %notification.application_id,
            recipient,
            details = ?notification.details,
            "notification dispatched"
        );
        Ok(())
    }
}

/// In-memory store behind a sandbox gateway bounded by the configured timeout.
pub(crate) fn sandbox_service(config: &AdmissionsConfig) -> Arc<SandboxService> {
    let verifier = WebhookVerifier::new(
        config.webhook_secret.as_bytes().to_vec(),
        config.webhook_tolerance_secs,
    );
    let gateway = TimeoutGateway::new(
        Arc::new(SandboxGateway::new(verifier)),
        config.gateway_timeout,
    );
    Arc::new(AdmissionsService::new(
        Arc::new(MemoryStore::default()),
        Arc::new(gateway),
        config.clone(),
    ))
}
