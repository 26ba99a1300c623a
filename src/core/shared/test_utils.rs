use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{AppConfig, Environment};
use crate::core::shared::models::{Person, Question, Schedule};
use crate::core::shared::state::AppState;
use crate::core::store::{Collection, MemoryStore, PersonPatch, Store};

pub const TEST_KEY: &str = "test-webhook-key";
pub const TEST_SECRET: &str = "test-secret-that-is-long-enough-for-hs256";

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.environment = Environment::Test;
    config.chatfuel.key = TEST_KEY.into();
    config.auth.jwt_secret = TEST_SECRET.into();
    config.reporting.tz_offset_minutes = 0;
    config
}

pub fn state_with(config: AppConfig, store: Arc<MemoryStore>) -> Arc<AppState> {
    Arc::new(AppState::new(config, store).expect("Failed to build test state"))
}

pub fn test_state() -> Arc<AppState> {
    state_with(test_config(), Arc::new(MemoryStore::new()))
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("object literal")
}

pub async fn seed_person(store: &dyn Store, id: &str, province: Option<&str>) -> Person {
    store
        .upsert_person(PersonPatch {
            id: id.into(),
            bot_id: Some("bot-1".into()),
            first_name: Some("Test".into()),
            province: province.map(str::to_string),
            ..Default::default()
        })
        .await
        .expect("seed person")
}

pub async fn seed_schedule(store: &dyn Store, name: &str, day: i32) -> Schedule {
    let doc = store
        .insert_document(Collection::Schedules, object(json!({"name": name, "day": day})))
        .await
        .expect("seed schedule");
    serde_json::from_value(doc).expect("schedule document")
}

pub async fn seed_question(
    store: &dyn Store,
    schedule_id: Option<Uuid>,
    kind: &str,
    correct_answers: &[i32],
) -> Question {
    let doc = store
        .insert_document(
            Collection::Questions,
            object(json!({
                "schedule_id": schedule_id,
                "content": "How many meals should a toddler eat per day?",
                "options": ["Two", "Three", "Five"],
                "correct_answers": correct_answers,
                "kind": kind,
            })),
        )
        .await
        .expect("seed question");
    serde_json::from_value(doc).expect("question document")
}

pub async fn backdate_person(store: &MemoryStore, id: &str, created_at: DateTime<Utc>) {
    store
        .backdate(Collection::People, id, created_at)
        .await
        .expect("backdate person");
}

pub async fn admin_token(state: &AppState) -> String {
    let hash = crate::security::password::hash_password("admin-password").expect("hash");
    let user = state
        .store
        .save_user("admin", &hash, true)
        .await
        .expect("save admin");
    state.jwt.issue(&user).expect("issue token").token
}

pub fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn authed_request(method: Method, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request")
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}
