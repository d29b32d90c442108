use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;
use crate::workflows::admissions::domain::ApplicationStatus;
use crate::workflows::admissions::gateway::{IntentRequest, PaymentGateway, EVENT_INTENT_SUCCEEDED};
use crate::workflows::admissions::notifications::NotificationKind;
use crate::workflows::admissions::SIGNATURE_HEADER;

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::post(uri)
        .body(Body::empty())
        .expect("request builds")
}

#[tokio::test(flavor = "multi_thread")]
async fn create_draft_route_returns_created_record() {
    let harness = harness();
    let router = router_for(&harness, Arc::new(RecordingDispatcher::default()));

    let response = router
        .oneshot(post_json(
            "/api/v1/admissions/applications",
            json!({
                "owner": "ada",
                "full_name": "Ada Lovelace",
                "email": "ada@example.edu",
                "program": "BSc Computing",
                "study_mode": "part_time"
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["application_id"], "MIU-2025-0001");
    assert_eq!(payload["status"], "draft");
    assert_eq!(payload["selection"]["study_mode"], "part_time");
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_open_application_maps_to_conflict() {
    let harness = harness();
    harness.draft("ada");
    let router = router_for(&harness, Arc::new(RecordingDispatcher::default()));

    let response = router
        .oneshot(post_json(
            "/api/v1/admissions/applications",
            json!({ "owner": "ada" }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let payload = read_json_body(response).await;
    assert_eq!(payload["retriable"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn payment_route_hides_nothing_the_payer_needs() {
    let harness = harness();
    let id = harness.draft("ada");
    let router = router_for(&harness, Arc::new(RecordingDispatcher::default()));

    let response = router
        .oneshot(post_empty(&format!(
            "/api/v1/admissions/applications/{id}/payment"
        )))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["application_id"], id.0.as_str());
    assert!(payload["client_secret"]
        .as_str()
        .is_some_and(|secret| !secret.is_empty()));
    assert_eq!(payload["reused"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn unconfirmed_payment_maps_to_payment_required() {
    let harness = harness();
    let id = harness.draft("ada");
    let handle = harness.service.request_payment(&id).expect("requested");
    let router = router_for(&harness, Arc::new(RecordingDispatcher::default()));

    let response = router
        .oneshot(post_json(
            &format!("/api/v1/admissions/applications/{id}/payment/confirm"),
            json!({ "intent_id": handle.intent_id }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test(flavor = "multi_thread")]
async fn webhook_route_verifies_and_dispatches_receipt() {
    let harness = harness();
    let (id, intent_id) = harness.paid_at_gateway("ada");
    let (payload, signature) = harness.signed_event(EVENT_INTENT_SUCCEEDED, &intent_id);
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let router = router_for(&harness, dispatcher.clone());

    let response = router
        .oneshot(
            Request::post("/api/v1/payments/webhook")
                .header(SIGNATURE_HEADER, signature)
                .body(Body::from(payload))
                .expect("request builds"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["disposition"], "reconciled");
    assert_eq!(body["outcome"], "confirmed");
    assert_eq!(
        harness.service.get(&id).expect("present").status,
        ApplicationStatus::PaymentComplete
    );
    let sent: Vec<_> = dispatcher.sent().iter().map(|n| n.kind).collect();
    assert_eq!(sent, vec![NotificationKind::PaymentReceipt]);
}

#[tokio::test(flavor = "multi_thread")]
async fn webhook_route_acknowledges_duplicate_charge() {
    let harness = harness();
    let id = harness.paid("ada");
    let stray = harness
        .gateway
        .create_intent(&IntentRequest {
            amount_minor: 5000,
            currency: "usd".to_string(),
            idempotency_key: "second-checkout".to_string(),
            metadata: BTreeMap::from([("application_id".to_string(), id.0.clone())]),
        })
        .expect("intent created");
    harness.gateway.complete(&stray.intent_id);
    let (payload, signature) = harness.signed_event(EVENT_INTENT_SUCCEEDED, &stray.intent_id);
    let router = router_for(&harness, Arc::new(RecordingDispatcher::default()));

    let response = router
        .oneshot(
            Request::post("/api/v1/payments/webhook")
                .header(SIGNATURE_HEADER, signature)
                .body(Body::from(payload))
                .expect("request builds"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["disposition"], "duplicate_charge");
    assert_eq!(body["intent_id"], stray.intent_id.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn webhook_route_rejects_missing_or_bad_signatures() {
    let harness = harness();
    let (id, intent_id) = harness.paid_at_gateway("ada");
    let (payload, _) = harness.signed_event(EVENT_INTENT_SUCCEEDED, &intent_id);
    let router = router_for(&harness, Arc::new(RecordingDispatcher::default()));

    let missing = router
        .clone()
        .oneshot(
            Request::post("/api/v1/payments/webhook")
                .body(Body::from(payload.clone()))
                .expect("request builds"),
        )
        .await
        .expect("route executes");
    let forged = router
        .oneshot(
            Request::post("/api/v1/payments/webhook")
                .header(SIGNATURE_HEADER, "t=1740830400,v1=deadbeef")
                .body(Body::from(payload))
                .expect("request builds"),
        )
        .await
        .expect("route executes");

    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(forged.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        harness.service.get(&id).expect("present").status,
        ApplicationStatus::PendingPayment
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_route_maps_gating_and_validation() {
    let harness = harness();
    let draft = harness.draft("ada");
    let paid = harness.paid("grace");
    let router = router_for(&harness, Arc::new(RecordingDispatcher::default()));

    let gated = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/admissions/applications/{draft}/documents"),
            json!({ "file_type": "transcript", "filename": "t.pdf", "size_bytes": 1024 }),
        ))
        .await
        .expect("route executes");
    let oversized = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/admissions/applications/{paid}/documents"),
            json!({ "file_type": "transcript", "filename": "t.pdf", "size_bytes": 6_291_456 }),
        ))
        .await
        .expect("route executes");
    let accepted = router
        .oneshot(post_json(
            &format!("/api/v1/admissions/applications/{paid}/documents"),
            json!({ "file_type": "id", "filename": "passport.png", "size_bytes": 1024 }),
        ))
        .await
        .expect("route executes");

    assert_eq!(gated.status(), StatusCode::FORBIDDEN);
    assert_eq!(oversized.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(accepted.status(), StatusCode::CREATED);
    let body = read_json_body(accepted).await;
    assert_eq!(body["file_type"], "id");
    assert_eq!(body["content_type"], "image/png");
}

#[tokio::test(flavor = "multi_thread")]
async fn notification_failures_do_not_fail_the_request() {
    let harness = harness();
    let id = harness.with_document("ada");
    let router = router_for(&harness, Arc::new(FailingDispatcher));

    let response = router
        .oneshot(post_empty(&format!(
            "/api/v1/admissions/applications/{id}/submit"
        )))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["status"], "submitted");
    assert_eq!(
        harness.service.get(&id).expect("present").status,
        ApplicationStatus::Submitted
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn staff_routes_drive_the_decision_flow() {
    let harness = harness();
    let id = harness.submitted("ada");
    let router = router_for(&harness, Arc::new(RecordingDispatcher::default()));
    let base = format!("/api/v1/admissions/applications/{id}");

    let opened = router
        .clone()
        .oneshot(post_empty(&format!("{base}/review/start")))
        .await
        .expect("route executes");
    assert_eq!(read_json_body(opened).await["effect"], "applied");

    let reviewed = router
        .clone()
        .oneshot(post_json(
            &format!("{base}/review"),
            json!({ "staff": "registrar-01" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(reviewed.status(), StatusCode::OK);

    let invalid = router
        .clone()
        .oneshot(post_json(
            &format!("{base}/decision"),
            json!({ "decision": "maybe", "staff": "registrar-01" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let decided = router
        .clone()
        .oneshot(post_json(
            &format!("{base}/decision"),
            json!({ "decision": "accepted", "notes": "Strong profile", "staff": "registrar-01" }),
        ))
        .await
        .expect("route executes");
    let body = read_json_body(decided).await;
    assert_eq!(body["decision"], "accepted");

    let again = router
        .oneshot(post_json(
            &format!("{base}/decision"),
            json!({ "decision": "rejected", "staff": "registrar-01" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(again.status(), StatusCode::CONFLICT);
}

#[tokio::test(flavor = "multi_thread")]
async fn finance_routes_report_the_ledger() {
    let harness = harness();
    harness.paid("ada");
    let router = router_for(&harness, Arc::new(RecordingDispatcher::default()));

    let summary = router
        .clone()
        .oneshot(
            Request::get("/api/v1/payments/summary")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("route executes");
    let body = read_json_body(summary).await;
    assert_eq!(body["successful"], 1);
    assert_eq!(body["collected"]["usd"], 5000);

    let ledger = router
        .oneshot(
            Request::get("/api/v1/payments/ledger.csv")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("route executes");
    assert_eq!(ledger.status(), StatusCode::OK);
    assert_eq!(
        ledger.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("text/csv; charset=utf-8")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_application_maps_to_not_found() {
    let harness = harness();
    let router = router_for(&harness, Arc::new(RecordingDispatcher::default()));

    let response = router
        .oneshot(
            Request::get("/api/v1/admissions/applications/MIU-2025-4242")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
