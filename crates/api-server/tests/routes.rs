//! Router-level tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use outreach_api::ApiServer;
use outreach_channels::ChannelDispatcher;
use outreach_core::config::AppConfig;
use outreach_sequences::demo::demo_contacts;
use outreach_sequences::memory::{InMemoryActivityStore, InMemoryContactStore};
use outreach_sequences::SequenceEngine;

fn app() -> Router {
    let config = AppConfig::default();
    let contacts = Arc::new(InMemoryContactStore::new());
    for contact in demo_contacts() {
        contacts.insert(contact);
    }
    let channels = Arc::new(ChannelDispatcher::from_config(&config));
    let engine = SequenceEngine::builder(
        contacts,
        Arc::new(InMemoryActivityStore::new()),
        channels.clone(),
    )
    .build();

    ApiServer::new(config, engine)
        .with_channels(channels)
        .router()
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_email_sequence(app: &Router, name: &str) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/v1/sequences",
        Some(json!({
            "name": name,
            "is_active": true,
            "steps": [
                {"delay_days": 0, "delay_hours": 0, "action": {"type": "email", "subject": "Hi", "content": "Hello"}}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_probes() {
    let app = app();
    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["node_id"], "node-01");

    let (status, _) = call(&app, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "GET", "/live", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_openapi_document_served() {
    let app = app();
    let (status, body) = call(&app, "GET", "/api-docs/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["info"]["title"], "Outreach Engine API");
    assert!(body["paths"]["/v1/sequences/{id}/enrollments/bulk"].is_object());
}

#[tokio::test]
async fn test_error_mapping() {
    let app = app();

    let (status, body) = call(
        &app,
        "POST",
        "/v1/sequences",
        Some(json!({"name": "", "steps": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let missing = uuid::Uuid::new_v4();
    let (status, body) = call(&app, "GET", &format!("/v1/sequences/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let id = create_email_sequence(&app, "Errors").await;
    let uri = format!("/v1/sequences/{id}/enrollments");
    let (status, _) = call(&app, "POST", &uri, Some(json!({"contact_id": "contact-ada"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = call(&app, "POST", &uri, Some(json!({"contact_id": "contact-ada"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, _) = call(&app, "DELETE", &format!("/v1/sequences/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_lifecycle_routes() {
    let app = app();
    let id = create_email_sequence(&app, "Lifecycle").await;

    let (_, enrollment) = call(
        &app,
        "POST",
        &format!("/v1/sequences/{id}/enrollments"),
        Some(json!({"contact_id": "contact-alan"})),
    )
    .await;
    let enrollment_id = enrollment["id"].as_str().unwrap().to_string();

    let (status, paused) = call(
        &app,
        "POST",
        &format!("/v1/enrollments/{enrollment_id}/pause"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paused["status"], "paused");
    assert!(paused["next_step_at"].is_null());

    let (status, body) = call(
        &app,
        "POST",
        &format!("/v1/enrollments/{enrollment_id}/pause"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalid_state");

    let (status, replied) = call(
        &app,
        "POST",
        &format!("/v1/enrollments/{enrollment_id}/replied"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replied["status"], "replied");

    let (status, _) = call(&app, "DELETE", &format!("/v1/sequences/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, "GET", &format!("/v1/enrollments/{enrollment_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bulk_enroll_reports_per_contact() {
    let app = app();
    let id = create_email_sequence(&app, "Bulk").await;

    let (status, results) = call(
        &app,
        "POST",
        &format!("/v1/sequences/{id}/enrollments/bulk"),
        Some(json!({"contact_ids": ["contact-ada", "contact-ada", "nobody"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[1]["error"], "Already enrolled");
    assert_eq!(results[2]["error"], "Contact not found");

    let (_, sequence) = call(&app, "GET", &format!("/v1/sequences/{id}"), None).await;
    assert_eq!(sequence["enrollment_count"], 1);
}

#[tokio::test]
async fn test_process_and_track_engagement() {
    let app = app();
    let id = create_email_sequence(&app, "Tracked").await;
    let (_, enrollment) = call(
        &app,
        "POST",
        &format!("/v1/sequences/{id}/enrollments"),
        Some(json!({"contact_id": "contact-grace"})),
    )
    .await;
    let enrollment_id = enrollment["id"].as_str().unwrap().to_string();

    let (status, due) = call(&app, "GET", "/v1/scheduler/due?limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(due.as_array().unwrap().len(), 1);

    let (status, report) = call(&app, "POST", "/v1/scheduler/process", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["processed_count"], 1);

    let (_, executions) = call(
        &app,
        "GET",
        &format!("/v1/enrollments/{enrollment_id}/executions"),
        None,
    )
    .await;
    assert_eq!(executions[0]["status"], "sent");
    let provider_id = executions[0]["provider_message_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, tracking) = call(
        &app,
        "POST",
        "/v1/webhooks/tracking",
        Some(json!([
            {"provider_message_id": provider_id, "event": "open"},
            {"provider_message_id": provider_id, "event": "delivered"},
            {"provider_message_id": "sg-unknown", "event": "click"}
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tracking["received"], 3);
    assert_eq!(tracking["applied"], 1);
    assert_eq!(tracking["ignored"], 1);
    assert_eq!(tracking["unknown"], 1);

    let execution_id = executions[0]["id"].as_str().unwrap();
    let (status, updated) = call(
        &app,
        "PATCH",
        &format!("/v1/executions/{execution_id}/status"),
        Some(json!({"status": "clicked"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "clicked");

    let (_, stats) = call(&app, "GET", &format!("/v1/sequences/{id}/stats"), None).await;
    assert_eq!(stats["steps"][0]["sent"], 1);
    assert_eq!(stats["steps"][0]["clicked"], 1);
    assert_eq!(stats["enrollments"]["completed"], 1);
}
