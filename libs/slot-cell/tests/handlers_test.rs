use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use shared_config::AppConfig;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};
use slot_cell::store::InMemorySlotStore;
use slot_cell::{slot_routes, SlotState};

fn create_test_app(config: &AppConfig) -> Router {
    let store = Arc::new(InMemorySlotStore::new(true, config.lock_timeout_ms));
    slot_routes(SlotState::new(Arc::new(config.clone()), store))
}

fn days_ahead(days: i64) -> String {
    (Utc::now() + Duration::days(days)).format("%Y-%m-%d").to_string()
}

fn token_for(user: &TestUser, config: &AppConfig) -> String {
    JwtTestUtils::create_test_token(user, &config.supabase_jwt_secret, Some(1))
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn legacy_body(date: &str, start: &str, end: &str) -> Value {
    json!({
        "entity_type": "OPD",
        "date": date,
        "start_time": start,
        "end_time": end,
        "capacity": 4
    })
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let config = TestConfig::default().to_app_config();
    let app = create_test_app(&config);

    let (status, body) = send(&app, "POST", "/", None, Some(legacy_body(&days_ahead(2), "09:00", "10:00"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let doctor = TestUser::doctor("doc@example.com");
    let expired = JwtTestUtils::create_expired_token(&doctor, &config.supabase_jwt_secret);
    let (status, _) = send(&app, "GET", "/mine", Some(&expired), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = JwtTestUtils::create_invalid_signature_token(&doctor);
    let (status, _) = send(&app, "GET", "/mine", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_then_conflict() {
    let config = TestConfig::default().to_app_config();
    let app = create_test_app(&config);
    let token = token_for(&TestUser::doctor("doc@example.com"), &config);
    let date = days_ahead(2);

    let (status, body) = send(&app, "POST", "/", Some(&token), Some(legacy_body(&date, "09:00", "10:00"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["slot"]["mode"], "legacy");
    assert_eq!(body["slot"]["booked"], 0);

    let (status, body) = send(&app, "POST", "/", Some(&token), Some(legacy_body(&date, "09:30", "10:30"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SLOT_OVERLAP");
}

#[tokio::test]
async fn test_validation_errors_list_every_field() {
    let config = TestConfig::default().to_app_config();
    let app = create_test_app(&config);
    let token = token_for(&TestUser::doctor("doc@example.com"), &config);

    let request = json!({
        "entity_type": "OPD",
        "date": days_ahead(2),
        "time_slots": [
            { "start_time": "09:00", "end_time": "08:00", "capacity": 1 },
            { "start_time": "10:00", "end_time": "10:30", "capacity": 0 }
        ]
    });
    let (status, body) = send(&app, "POST", "/", Some(&token), Some(request)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let fields: Vec<&str> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["time_slots[0].end_time", "time_slots[1].capacity"]);
}

#[tokio::test]
async fn test_patients_cannot_publish_slots() {
    let config = TestConfig::default().to_app_config();
    let app = create_test_app(&config);
    let token = token_for(&TestUser::patient("patient@example.com"), &config);

    let (status, body) = send(&app, "POST", "/", Some(&token), Some(legacy_body(&days_ahead(2), "09:00", "10:00"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_slot_lifecycle_over_http() {
    let config = TestConfig::default().to_app_config();
    let app = create_test_app(&config);
    let doctor = TestUser::doctor("doc@example.com");
    let token = token_for(&doctor, &config);
    let patient_token = token_for(&TestUser::patient("patient@example.com"), &config);
    let date = days_ahead(3);

    let request = json!({
        "entity_type": "OPD",
        "date": date,
        "time_slots": [
            { "start_time": "09:00", "end_time": "09:30", "capacity": 2 },
            { "start_time": "09:30", "end_time": "10:00", "capacity": 2 }
        ]
    });
    let (status, body) = send(&app, "POST", "/", Some(&token), Some(request)).await;
    assert_eq!(status, StatusCode::CREATED);
    let slot_id = body["slot"]["id"].as_str().unwrap().to_string();

    // Anyone signed in can read it and see it as available.
    let (status, body) = send(&app, "GET", &format!("/{}", slot_id), Some(&patient_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["slot"]["mode"], "multi_window");

    let uri = format!(
        "/availability?provider_id={}&date={}&start_time=09:15&end_time=09:45",
        doctor.id, date
    );
    let (status, body) = send(&app, "GET", &uri, Some(&patient_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["slots"][0]["windows"].as_array().unwrap().len(), 2);

    let update = json!({
        "time_slots": [
            { "start_time": "09:00", "end_time": "09:30", "capacity": 3 }
        ]
    });
    let (status, body) = send(&app, "PUT", &format!("/{}", slot_id), Some(&token), Some(update)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["slot"]["time_slots"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, "GET", "/mine", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, _) = send(&app, "DELETE", &format!("/{}", slot_id), Some(&patient_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "DELETE", &format!("/{}", slot_id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "deleted");

    let (status, body) = send(&app, "GET", &format!("/{}", slot_id), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_bulk_create_over_http() {
    let config = TestConfig::default().to_app_config();
    let app = create_test_app(&config);
    let token = token_for(&TestUser::doctor("doc@example.com"), &config);
    let date = days_ahead(4);

    let request = json!({
        "slots": [
            legacy_body(&date, "09:00", "10:00"),
            legacy_body(&date, "10:00", "11:00")
        ]
    });
    let (status, body) = send(&app, "POST", "/bulk", Some(&token), Some(request)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["count"], 2);

    let request = json!({
        "slots": [
            legacy_body(&date, "11:00", "12:00"),
            legacy_body(&date, "10:30", "11:30")
        ]
    });
    let (status, body) = send(&app, "POST", "/bulk", Some(&token), Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SLOT_OVERLAP");

    let (_, body) = send(&app, "GET", "/mine", Some(&token), None).await;
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn test_availability_ignores_a_lone_range_bound() {
    let config = TestConfig::default().to_app_config();
    let app = create_test_app(&config);
    let doctor = TestUser::doctor("doc@example.com");
    let token = token_for(&doctor, &config);
    let patient_token = token_for(&TestUser::patient("patient@example.com"), &config);

    let (status, _) = send(&app, "POST", "/", Some(&token), Some(legacy_body(&days_ahead(2), "09:00", "10:00"))).await;
    assert_eq!(status, StatusCode::CREATED);

    // 15:00 alone would exclude the slot if it were applied as a range.
    let uri = format!("/availability?provider_id={}&start_time=15:00", doctor.id);
    let (status, body) = send(&app, "GET", &uri, Some(&patient_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let uri = format!("/availability?provider_id={}&end_time=25:00", doctor.id);
    let (status, body) = send(&app, "GET", &uri, Some(&patient_token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}
