//! HTTP contract tests that need no database: authentication, the role
//! guard, request validation and readiness reporting all answer before the
//! first query.

use std::sync::Arc;
use std::time::Duration;

use clinical_records::app::{cors_layer, router, AppState};
use clinical_records::auth::{HmacTokenAuthority, Principal, TokenAuthority};
use clinical_records::config::{DbConfig, DEFAULT_AUDIENCE, DEFAULT_ISSUER};
use clinical_records::db::Gateway;
use clinical_records::models::UserRole;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

const SECRET: &str = "api-test-secret";

fn tokens() -> HmacTokenAuthority {
    HmacTokenAuthority::new(SECRET, DEFAULT_ISSUER, DEFAULT_AUDIENCE, Duration::from_secs(3600))
}

fn token_for(role: UserRole) -> String {
    tokens()
        .issue(&Principal {
            user_id: 42,
            role,
            display_name: "Test User".to_string(),
        })
        .expect("Failed to issue token")
}

/// Serves the router on an ephemeral port, backed by a database that never
/// answers.
async fn spawn_app() -> String {
    let mut config = DbConfig::new("127.0.0.1", 1, "clinical_records", "postgres", "postgres");
    config.ready_retries = 1;
    config.ready_backoff = Duration::from_millis(10);
    config.acquire_timeout = Duration::from_secs(1);

    let gateway = Arc::new(Gateway::connect_lazy(&config).expect("Failed to build pool"));
    let state = Arc::new(AppState::new(gateway, Arc::new(tokens())));
    let app = router(state, cors_layer(None));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let address = listener.local_addr().expect("Failed to read address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    format!("http://{}", address)
}

fn encounter_body() -> Value {
    json!({
        "patient_record_id": 1,
        "chief_complaint": "Headache",
        "clinical_assessment": "Tension headache"
    })
}

#[tokio::test]
async fn test_health_reports_unavailable_database() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .get(format!("{}/system/health", base_url))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["database"], "unavailable");
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .post(format!("{}/encounters", base_url))
        .json(&encounter_body())
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["error_code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_garbage_token_is_forbidden() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .get(format!("{}/patients", base_url))
        .bearer_auth("not.a.token")
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["error_code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_expired_token_is_forbidden() {
    let base_url = spawn_app().await;
    let issued_long_ago = tokens()
        .issue_at(
            &Principal {
                user_id: 42,
                role: UserRole::Physician,
                display_name: "Dr. Late".to_string(),
            },
            1_000_000,
        )
        .expect("Failed to issue token");

    let response = Client::new()
        .get(format!("{}/encounters/recent", base_url))
        .bearer_auth(issued_long_ago)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_medical_assistant_cannot_create_encounter() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .post(format!("{}/encounters", base_url))
        .bearer_auth(token_for(UserRole::MedicalAssistant))
        .json(&encounter_body())
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["error_code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_administrator_cannot_delete_patient() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .delete(format!("{}/patients/7", base_url))
        .bearer_auth(token_for(UserRole::Administrator))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_invalid_encounter_is_rejected_before_the_database() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .post(format!("{}/encounters", base_url))
        .bearer_auth(token_for(UserRole::Physician))
        .json(&json!({"patient_record_id": 1, "chief_complaint": "   "}))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["error_code"], "VALIDATION_FAILED");
    let fields: Vec<&str> = body["details"]
        .as_array()
        .expect("details should be a list")
        .iter()
        .filter_map(|d| d["field"].as_str())
        .collect();
    assert!(fields.contains(&"chief_complaint"));
    assert!(fields.contains(&"clinical_assessment"));
}

#[tokio::test]
async fn test_malformed_json_is_a_bad_request() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .post(format!("{}/encounters", base_url))
        .bearer_auth(token_for(UserRole::Nurse))
        .header("Content-Type", "application/json")
        .body("{\"chief_complaint\": ")
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_pagination_bounds_are_validated() {
    let base_url = spawn_app().await;
    let client = Client::new();

    for query in ["page=0", "page=92233720368547758&limit=100", "limit=0", "limit=101"] {
        let response = client
            .get(format!("{}/patients?{}", base_url, query))
            .bearer_auth(token_for(UserRole::Nurse))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "query {query}");
    }
}

#[tokio::test]
async fn test_non_numeric_id_is_a_bad_request() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .get(format!("{}/patients/abc", base_url))
        .bearer_auth(token_for(UserRole::Physician))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reads_return_503_while_database_is_down() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .get(format!("{}/encounters/15", base_url))
        .bearer_auth(token_for(UserRole::Physician))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["error_code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_verify_echoes_principal() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .get(format!("{}/auth/verify", base_url))
        .bearer_auth(token_for(UserRole::Nurse))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["principal"]["user_id"], 42);
    assert_eq!(body["principal"]["role"], "nurse");
    assert!(body["user"].is_null());
}

#[tokio::test]
async fn test_huge_page_on_history_is_a_bad_request() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .get(format!(
            "{}/encounters/patient/3?page=92233720368547758&limit=100",
            base_url
        ))
        .bearer_auth(token_for(UserRole::Physician))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["details"][0]["field"], "page");
}

#[tokio::test]
async fn test_register_rejects_weak_input_before_the_database() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .post(format!("{}/auth/register", base_url))
        .json(&json!({
            "email_address": "foreman@clinic.org",
            "password": "short",
            "full_name": "Eric Foreman"
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["details"][0]["field"], "password");
}

#[tokio::test]
async fn test_login_needs_both_fields() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .post(format!("{}/auth/login", base_url))
        .json(&json!({"email": "foreman@clinic.org", "password": " "}))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_returns_503_while_database_is_down() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .post(format!("{}/auth/login", base_url))
        .json(&json!({"email": "foreman@clinic.org", "password": "a good password"}))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_password_change_requires_a_token() {
    let base_url = spawn_app().await;

    let response = Client::new()
        .put(format!("{}/auth/password", base_url))
        .json(&json!({"current_password": "old password", "new_password": "new password"}))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
