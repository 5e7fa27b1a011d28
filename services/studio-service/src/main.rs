mod aggregate;
mod app;
mod auth;
mod config;
mod error;
mod handlers;
mod models;
mod poll;
mod providers;
mod service;
mod state;
mod storage;
mod store;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use studio_common::{bind_listener, init_tracing, shutdown_signal};

use crate::auth::{AdminGate, DisabledVerifier, IdentityVerifier, SupabaseVerifier};
use crate::config::{AppConfig, StorageConfig};
use crate::providers::Providers;
use crate::state::AppState;
use crate::storage::{BlobStore, StorageClient};
use crate::store::{memory::MemoryStore, postgres::PgStore, Store};

#[tokio::main]
async fn main() {
    let _guards = init_tracing("studio-service");
    let config = AppConfig::from_env();

    let store: Arc<dyn Store> = match config.database_url.as_deref() {
        Some(url) => Arc::new(PgStore::connect(url).await.expect("connect db")),
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let http = reqwest::Client::new();
    let verifier: Arc<dyn IdentityVerifier> = match config.supabase.clone() {
        Some(supabase) => Arc::new(SupabaseVerifier::new(http.clone(), supabase)),
        None => {
            tracing::warn!("identity provider not configured, every request will be rejected");
            Arc::new(DisabledVerifier)
        }
    };

    let admins = AdminGate::new(&config.admin_emails);
    if admins.is_empty() {
        tracing::warn!("ADMIN_ALLOWED_EMAILS is empty, admin routes are closed");
    } else {
        tracing::info!(admins = admins.len(), "admin allow-list loaded");
    }

    let state = AppState {
        store,
        verifier,
        admins: Arc::new(admins),
        storage: build_storage(config.storage.clone()).await,
        providers: Arc::new(Providers::new(http.clone(), &config.providers)),
        http,
    };

    let app = app::build_router(state);
    let listener = bind_listener(config.port).await.expect("bind listener");
    tracing::info!(port = config.port, "studio-service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("serve");
}

async fn build_storage(config: Option<StorageConfig>) -> Option<Arc<dyn BlobStore>> {
    let Some(config) = config else {
        tracing::warn!("object storage not configured, uploads are disabled");
        return None;
    };
    match StorageClient::new(config).await {
        Ok(client) => Some(Arc::new(client)),
        Err(err) => {
            tracing::warn!(error = %err, "object storage client init failed");
            None
        }
    }
}
