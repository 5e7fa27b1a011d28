//! Fakes shared by the unit tests.

use async_trait::async_trait;
use axum::{
    http::{header::AUTHORIZATION, HeaderMap},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc, Mutex,
};
use uuid::Uuid;

use crate::auth::{AdminGate, Identity, IdentityVerifier};
use crate::config::ProviderConfig;
use crate::error::ServiceError;
use crate::models::{GenerationTask, STATUS_COMPLETED};
use crate::providers::Providers;
use crate::state::AppState;
use crate::storage::BlobStore;
use crate::store::memory::MemoryStore;

pub const USER_EMAIL: &str = "user@studio.test";
pub const ADMIN_EMAIL: &str = "admin@studio.test";
pub const OTHER_EMAIL: &str = "other@studio.test";

pub const USER_ID: Uuid = Uuid::from_u128(0x1111);
pub const ADMIN_ID: Uuid = Uuid::from_u128(0xaaaa);
pub const OTHER_ID: Uuid = Uuid::from_u128(0x2222);

static NEXT_ID: AtomicI64 = AtomicI64::new(1);

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

/// A completed task created `minutes` after [`base_time`].
pub fn task(task_id: &str, email: &str, minutes: i64) -> GenerationTask {
    let at = base_time() + Duration::minutes(minutes);
    GenerationTask {
        id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        task_id: task_id.to_string(),
        task_type: "text-to-image".to_string(),
        status: Some(STATUS_COMPLETED.to_string()),
        email: Some(email.to_string()),
        username: None,
        prompt: None,
        input_image_url: None,
        input_video_url: None,
        output_image_url: None,
        output_video_url: None,
        background_image_url: None,
        character_id: None,
        task_time: Some(at),
        created_at: at,
        started_at: Some(at),
    }
}

pub fn identity(id: Uuid, email: &str) -> Identity {
    Identity {
        id,
        email: email.to_string(),
        display_name: email.to_string(),
    }
}

pub fn user() -> Identity {
    identity(USER_ID, USER_EMAIL)
}

pub fn admin() -> Identity {
    identity(ADMIN_ID, ADMIN_EMAIL)
}

pub fn other() -> Identity {
    identity(OTHER_ID, OTHER_EMAIL)
}

/// Accepts the tokens `user`, `admin` and `other`.
pub struct StaticVerifier;

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, ServiceError> {
        match token {
            "user" => Ok(user()),
            "admin" => Ok(admin()),
            "other" => Ok(other()),
            _ => Err(ServiceError::auth_invalid()),
        }
    }
}

pub fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = format!("Bearer {token}").parse() {
        headers.insert(AUTHORIZATION, value);
    }
    headers
}

/// Records every call; deletes can be made to fail.
#[derive(Default)]
pub struct RecordingBlobStore {
    pub puts: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<String>>,
    pub fail_deletes: bool,
    pub fail_puts_matching: Option<&'static str>,
}

impl RecordingBlobStore {
    pub fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl BlobStore for RecordingBlobStore {
    async fn put_object(
        &self,
        key: &str,
        _body: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, String> {
        if self
            .fail_puts_matching
            .is_some_and(|needle| key.contains(needle))
        {
            return Err("put object failed: injected".to_string());
        }
        self.puts.lock().unwrap().push(key.to_string());
        Ok(format!("https://blobs.test/character-assets/{key}"))
    }

    async fn delete_object(&self, key: &str) -> Result<(), String> {
        self.deletes.lock().unwrap().push(key.to_string());
        if self.fail_deletes {
            return Err("delete object failed: injected".to_string());
        }
        Ok(())
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        crate::storage::object_key_from_url(url, "character-assets")
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub blobs: Arc<RecordingBlobStore>,
}

pub fn harness_with(blobs: RecordingBlobStore, provider_base: &str) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let blobs = Arc::new(blobs);
    let state = AppState {
        store: store.clone(),
        verifier: Arc::new(StaticVerifier),
        admins: Arc::new(AdminGate::new([ADMIN_EMAIL])),
        storage: Some(blobs.clone()),
        providers: Arc::new(Providers::new(
            reqwest::Client::new(),
            &ProviderConfig::for_base_url(provider_base),
        )),
        http: reqwest::Client::new(),
    };
    Harness {
        state,
        store,
        blobs,
    }
}

/// Providers point at a closed local port.
pub fn harness() -> Harness {
    harness_with(RecordingBlobStore::default(), "http://127.0.0.1:9")
}

pub fn test_state() -> AppState {
    harness().state
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_fake(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}
