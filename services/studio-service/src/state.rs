use std::sync::Arc;

use crate::auth::{AdminGate, IdentityVerifier};
use crate::providers::Providers;
use crate::storage::BlobStore;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub admins: Arc<AdminGate>,
    pub storage: Option<Arc<dyn BlobStore>>,
    pub providers: Arc<Providers>,
    /// Plain client for proxying downloads.
    pub http: reqwest::Client,
}
