//! Shared fixtures for callflow-ingest integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use callflow_common::config::Config;
use callflow_common::db::models::db_timestamp;
use callflow_common::db::{init_database, resolve_stage, Deal};
use callflow_common::events::EventBus;
use callflow_ingest::enrichment::ai_client::{AiError, AiService};
use callflow_ingest::provider::{ProviderError, RecordingSource};
use callflow_ingest::{build_router, AppState};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

pub const SECRET: &str = "test-webhook-secret";
pub const SECRET_HEADER: &str = "X-Webhook-Secret";

/// In-process stand-in for the provider API
#[derive(Default)]
pub struct FakeRecordings {
    /// provider call id → recording URL
    pub urls: Mutex<HashMap<String, String>>,
    pub requested: Mutex<Vec<String>>,
    pub audio: Vec<u8>,
}

impl FakeRecordings {
    pub fn with_url(call_id: &str, url: &str) -> Self {
        let fake = Self {
            audio: b"ID3fake-audio".to_vec(),
            ..Default::default()
        };
        fake.urls
            .lock()
            .unwrap()
            .insert(call_id.to_string(), url.to_string());
        fake
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordingSource for FakeRecordings {
    async fn recording_url(&self, call_id: &str) -> Result<Option<String>, ProviderError> {
        self.requested.lock().unwrap().push(call_id.to_string());
        Ok(self.urls.lock().unwrap().get(call_id).cloned())
    }

    async fn download(&self, _url: &str) -> Result<Vec<u8>, ProviderError> {
        Ok(self.audio.clone())
    }
}

/// In-process stand-in for the AI service
#[derive(Default)]
pub struct FakeAi {
    pub transcript: Option<String>,
    /// Completion content; `None` makes extraction fail
    pub completion: Option<String>,
    pub transcribe_calls: Arc<AtomicUsize>,
    pub extract_calls: Arc<AtomicUsize>,
}

impl FakeAi {
    pub fn answering(transcript: &str, completion: &str) -> Self {
        Self {
            transcript: Some(transcript.to_string()),
            completion: Some(completion.to_string()),
            ..Default::default()
        }
    }
}

/// Reads a shared call counter after the fake has moved into the worker
pub fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

#[async_trait]
impl AiService for FakeAi {
    async fn transcribe(&self, _audio: Vec<u8>, _file_name: &str) -> Result<String, AiError> {
        self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
        self.transcript
            .clone()
            .ok_or_else(|| AiError::Api(503, "unavailable".to_string()))
    }

    async fn extract_fields(&self, _text: &str) -> Result<String, AiError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        self.completion
            .clone()
            .ok_or_else(|| AiError::Api(503, "unavailable".to_string()))
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub db: SqlitePool,
    pub config: Config,
    _dir: TempDir,
}

/// Config used by every test unless adjusted
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.webhook.secret = Some(SECRET.to_string());
    config.pipeline.record_lookup_retries = 0;
    config.pipeline.record_lookup_delay_ms = 0;
    config
}

/// On-disk database with the `intake` and `done` stages
pub async fn test_database() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = init_database(&dir.path().join("callflow.db")).await.unwrap();

    for (id, name, position) in [("intake", "Новые заявки", 0), ("done", "Завершено", 9)] {
        sqlx::query("INSERT INTO stages (id, name, position) VALUES (?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(position)
            .execute(&db)
            .await
            .unwrap();
    }

    (db, dir)
}

pub async fn setup() -> TestApp {
    setup_with(test_config(), FakeRecordings::default(), FakeAi::default()).await
}

pub async fn setup_with(config: Config, recordings: FakeRecordings, ai: FakeAi) -> TestApp {
    let (db, dir) = test_database().await;
    let stage = resolve_stage(&db, &config.pipeline.intake_stage_id)
        .await
        .unwrap();

    let (state, _worker) = AppState::start(
        db.clone(),
        Arc::new(config.clone()),
        &stage,
        EventBus::new(100),
        Arc::new(recordings),
        Arc::new(ai),
    );

    TestApp {
        router: build_router(state.clone()),
        state,
        db,
        config,
        _dir: dir,
    }
}

impl TestApp {
    /// POST a JSON notification with the shared secret
    pub async fn notify(&self, body: Value) -> (StatusCode, Value) {
        self.send(notify_request(&body)).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        send_to(self.router.clone(), request).await
    }

    /// POST every payload at once and collect the responses
    pub async fn notify_concurrently(&self, payloads: Vec<Value>) -> Vec<(StatusCode, Value)> {
        let mut tasks = tokio::task::JoinSet::new();
        for payload in payloads {
            let router = self.router.clone();
            tasks.spawn(async move { send_to(router, notify_request(&payload)).await });
        }

        let mut responses = Vec::new();
        while let Some(response) = tasks.join_next().await {
            responses.push(response.unwrap());
        }
        responses
    }

    pub async fn deals(&self) -> Vec<Deal> {
        all_deals(&self.db).await
    }

    pub async fn call_record_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM call_records")
            .fetch_one(&self.db)
            .await
            .unwrap()
    }
}

fn notify_request(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook/calls")
        .header("content-type", "application/json")
        .header(SECRET_HEADER, SECRET)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send_to(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Occurrences of `needle` in a deal's notes
pub fn note_count(deal: &Deal, needle: &str) -> usize {
    deal.notes_text.matches(needle).count()
}

pub async fn all_deals(db: &SqlitePool) -> Vec<Deal> {
    let rows = sqlx::query(&format!("SELECT {} FROM deals ORDER BY id", Deal::COLUMNS))
        .fetch_all(db)
        .await
        .unwrap();
    rows.iter().map(|row| Deal::from_row(row).unwrap()).collect()
}

/// Insert a deal directly, as the CRM would
pub async fn insert_deal(
    db: &SqlitePool,
    stage_id: &str,
    position: i64,
    customer_name: &str,
    phone_number: &str,
    created_at: DateTime<Utc>,
) -> i64 {
    let ts = db_timestamp(created_at);
    let result = sqlx::query(
        r#"
        INSERT INTO deals (stage_id, ordering_position, customer_name, phone_number,
                           notes_text, source_tag, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'Первичное обращение', 'manual', ?, ?)
        "#,
    )
    .bind(stage_id)
    .bind(position)
    .bind(customer_name)
    .bind(phone_number)
    .bind(&ts)
    .bind(&ts)
    .execute(db)
    .await
    .unwrap();
    result.last_insert_rowid()
}

/// Inbound call-ended notification
pub fn call_ended(call_id: &str, caller: &str, disposition: &str, duration: u32) -> Value {
    serde_json::json!({
        "event": "NOTIFY_END",
        "pbx_call_id": call_id,
        "caller_id": caller,
        "called_did": "74951234567",
        "internal": "100",
        "disposition": disposition,
        "duration": duration.to_string(),
    })
}

/// Outbound call-ended notification
pub fn outbound_ended(call_id: &str, destination: &str) -> Value {
    serde_json::json!({
        "event": "NOTIFY_OUT_END",
        "pbx_call_id": call_id,
        "destination": destination,
        "internal": "100",
        "disposition": "answered",
        "duration": "42",
    })
}
