use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::documents::DocumentUpload;
use super::domain::{ApplicationId, DraftFields, IntentId, OwnerId, StaffId};
use super::error::AdmissionError;
use super::finance::RefundRequest;
use super::gateway::{GatewayError, PaymentGateway, SignatureError};
use super::lifecycle::TransitionEffect;
use super::notifications::{dispatch_all, NotificationDispatcher};
use super::service::{AdmissionsService, Outcome};
use super::store::{AdmissionsStore, StoreError};

/// Header carrying the gateway's webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Shared handler state: the service plus the channel notifications are dispatched on.
pub struct AdmissionsState<S, G, N> {
    pub service: Arc<AdmissionsService<S, G>>,
    pub notifier: Arc<N>,
}

impl<S, G, N> Clone for AdmissionsState<S, G, N> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<S, G, N> AdmissionsState<S, G, N>
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(service: Arc<AdmissionsService<S, G>>, notifier: Arc<N>) -> Self {
        Self { service, notifier }
    }

    /// Run a blocking service call off the async executor, then dispatch its notifications.
    async fn run<T, F>(&self, operation: F) -> Result<T, AdmissionError>
    where
        T: Send + 'static,
        F: FnOnce(&AdmissionsService<S, G>) -> Result<Outcome<T>, AdmissionError>
            + Send
            + 'static,
    {
        let service = Arc::clone(&self.service);
        let notifier = Arc::clone(&self.notifier);
        tokio::task::spawn_blocking(move || {
            let outcome = operation(service.as_ref())?;
            dispatch_all(notifier.as_ref(), &outcome.notifications);
            Ok(outcome.value)
        })
        .await
        .map_err(|err| {
            AdmissionError::Store(StoreError::Unavailable(format!(
                "admissions worker failed: {err}"
            )))
        })?
    }
}

/// Router builder exposing the applicant, staff, and payment endpoints.
pub fn admissions_router<S, G, N>(state: AdmissionsState<S, G, N>) -> Router
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    Router::new()
        .route(
            "/api/v1/admissions/applications",
            post(create_draft_handler::<S, G, N>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id",
            get(status_handler::<S, G, N>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/draft",
            put(save_draft_handler::<S, G, N>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/owner",
            post(bind_owner_handler::<S, G, N>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/payment",
            post(request_payment_handler::<S, G, N>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/payment/confirm",
            post(confirm_payment_handler::<S, G, N>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/documents",
            post(upload_document_handler::<S, G, N>).get(documents_handler::<S, G, N>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/submit",
            post(submit_handler::<S, G, N>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/review/start",
            post(under_review_handler::<S, G, N>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/review",
            post(reviewed_handler::<S, G, N>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/decision",
            post(decision_handler::<S, G, N>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/approval",
            post(approve_admission_handler::<S, G, N>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/acceptance",
            post(accept_admission_handler::<S, G, N>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/admission-number",
            post(admission_number_handler::<S, G, N>),
        )
        .route(
            "/api/v1/admissions/applications/:application_id/department-approval",
            post(department_approval_handler::<S, G, N>),
        )
        .route("/api/v1/payments/webhook", post(webhook_handler::<S, G, N>))
        .route("/api/v1/payments/summary", get(summary_handler::<S, G, N>))
        .route("/api/v1/payments/ledger.csv", get(ledger_handler::<S, G, N>))
        .route(
            "/api/v1/payments/:intent_id/override",
            post(override_handler::<S, G, N>),
        )
        .route(
            "/api/v1/payments/:intent_id/refund",
            post(refund_handler::<S, G, N>),
        )
        .route(
            "/api/v1/payments/:intent_id/fail",
            post(fail_handler::<S, G, N>),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateDraftRequest {
    #[serde(default)]
    owner: Option<OwnerId>,
    #[serde(flatten)]
    fields: DraftFields,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwnerRequest {
    owner: OwnerId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConfirmPaymentRequest {
    intent_id: IntentId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StaffRequest {
    staff: StaffId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionRequest {
    decision: String,
    #[serde(default)]
    notes: String,
    staff: StaffId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StaffRefundRequest {
    staff: StaffId,
    #[serde(flatten)]
    refund: RefundRequest,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FailureRequest {
    reason: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct EffectBody {
    application_id: ApplicationId,
    effect: TransitionEffect,
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, AdmissionError>) -> Response {
    match result {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn create_draft_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    axum::Json(request): axum::Json<CreateDraftRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let result = state
        .run(move |service| {
            service
                .create_draft(request.owner, request.fields)
                .map(Outcome::quiet)
        })
        .await;
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn status_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| service.status(&id).map(Outcome::quiet))
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn save_draft_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
    axum::Json(fields): axum::Json<DraftFields>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| service.save_draft(&id, fields).map(Outcome::quiet))
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn bind_owner_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<OwnerRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| {
            let effect = service.bind_owner(&id, request.owner)?;
            Ok(Outcome::quiet(EffectBody {
                application_id: id,
                effect,
            }))
        })
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn request_payment_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| service.request_payment(&id).map(Outcome::quiet))
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn confirm_payment_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<ConfirmPaymentRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| service.confirm_payment(&id, &request.intent_id))
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn upload_document_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
    axum::Json(upload): axum::Json<DocumentUpload>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| service.upload_document(&id, upload))
        .await;
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn documents_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| {
            let documents = service.documents(&id)?;
            let listing: Vec<_> = documents
                .into_iter()
                .map(|document| {
                    json!({
                        "size_display": document.size_display(),
                        "document": document,
                    })
                })
                .collect();
            Ok(Outcome::quiet(listing))
        })
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn submit_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| {
            let outcome = service.submit(&id)?;
            Ok(Outcome::with_notifications(
                outcome.value.status_view(),
                outcome.notifications,
            ))
        })
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn under_review_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| {
            let effect = service.mark_under_review(&id)?;
            Ok(Outcome::quiet(EffectBody {
                application_id: id,
                effect,
            }))
        })
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn reviewed_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<StaffRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| {
            service
                .mark_reviewed(&id, request.staff)
                .map(|record| Outcome::quiet(record.status_view()))
        })
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn decision_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<DecisionRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| {
            let outcome =
                service.make_decision(&id, &request.decision, &request.notes, request.staff)?;
            Ok(Outcome::with_notifications(
                outcome.value.status_view(),
                outcome.notifications,
            ))
        })
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn approve_admission_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<StaffRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| {
            service
                .approve_admission(&id, request.staff)
                .map(|record| Outcome::quiet(record.status_view()))
        })
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn accept_admission_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| {
            let outcome = service.accept_admission(&id)?;
            Ok(Outcome::with_notifications(
                outcome.value.status_view(),
                outcome.notifications,
            ))
        })
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn admission_number_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| {
            let outcome = service.issue_admission_number(&id)?;
            Ok(Outcome::with_notifications(
                json!({
                    "application_id": id,
                    "admission_number": outcome.value,
                }),
                outcome.notifications,
            ))
        })
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn department_approval_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<StaffRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = ApplicationId(application_id);
    let result = state
        .run(move |service| {
            let effect = service.approve_department(&id, request.staff)?;
            Ok(Outcome::quiet(EffectBody {
                application_id: id,
                effect,
            }))
        })
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn webhook_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let signature = match headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(signature) => signature.to_string(),
        None => return AdmissionError::Signature(SignatureError::MalformedHeader).into_response(),
    };
    let result = state
        .run(move |service| service.handle_webhook(&body, &signature))
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn override_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(intent_id): Path<String>,
    axum::Json(request): axum::Json<StaffRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let intent_id = IntentId(intent_id);
    let result = state
        .run(move |service| service.override_payment_success(&intent_id, request.staff))
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn refund_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(intent_id): Path<String>,
    axum::Json(request): axum::Json<StaffRefundRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let intent_id = IntentId(intent_id);
    let result = state
        .run(move |service| {
            service
                .refund_payment(&intent_id, request.refund, request.staff)
                .map(Outcome::quiet)
        })
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn fail_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
    Path(intent_id): Path<String>,
    axum::Json(request): axum::Json<FailureRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let intent_id = IntentId(intent_id);
    let result = state
        .run(move |service| {
            service
                .mark_payment_failed(&intent_id, &request.reason)
                .map(Outcome::quiet)
        })
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn summary_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let result = state
        .run(|service| service.payment_summary().map(Outcome::quiet))
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn ledger_handler<S, G, N>(
    State(state): State<AdmissionsState<S, G, N>>,
) -> Response
where
    S: AdmissionsStore + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    let result = state
        .run(|service| {
            let mut buffer = Vec::new();
            service.export_ledger_csv(&mut buffer)?;
            Ok(Outcome::quiet(buffer))
        })
        .await;
    match result {
        Ok(csv) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            csv,
        )
            .into_response(),
        Err(error) => error.into_response(),
    }
}

impl AdmissionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdmissionError::Conflict(_)
            | AdmissionError::InvalidTransition { .. }
            | AdmissionError::AlreadyAccepted(_) => StatusCode::CONFLICT,
            AdmissionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AdmissionError::PaymentNotSucceeded { .. } => StatusCode::PAYMENT_REQUIRED,
            AdmissionError::PaymentNotFound(_) | AdmissionError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AdmissionError::Signature(_) => StatusCode::BAD_REQUEST,
            AdmissionError::UploadNotAllowed(_) | AdmissionError::SubmissionBlocked(_) => {
                StatusCode::FORBIDDEN
            }
            AdmissionError::Gateway(GatewayError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            AdmissionError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AdmissionError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AdmissionError::Export(_) | AdmissionError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "admissions request failed");
        }
        let payload = json!({
            "error": self.to_string(),
            "retriable": self.is_retriable(),
        });
        (status, axum::Json(payload)).into_response()
    }
}
