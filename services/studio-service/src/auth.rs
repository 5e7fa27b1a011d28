use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

use crate::config::SupabaseConfig;
use crate::error::ServiceError;
use crate::state::AppState;

/// Verified caller, passed explicitly into every service call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
}

impl Identity {
    pub fn email_lower(&self) -> String {
        self.email.to_lowercase()
    }
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, ServiceError>;
}

/// Checks session tokens against the Supabase auth API.
pub struct SupabaseVerifier {
    http: reqwest::Client,
    config: SupabaseConfig,
}

impl SupabaseVerifier {
    pub fn new(http: reqwest::Client, config: SupabaseConfig) -> Self {
        Self { http, config }
    }
}

#[derive(Deserialize)]
struct SupabaseUser {
    id: String,
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Default, Deserialize)]
struct UserMetadata {
    full_name: Option<String>,
}

impl SupabaseUser {
    fn into_identity(self) -> Option<Identity> {
        let id = Uuid::parse_str(&self.id).ok()?;
        let email = self.email.filter(|email| !email.is_empty())?;
        let display_name = self
            .user_metadata
            .full_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| email.clone());
        Some(Identity {
            id,
            email,
            display_name,
        })
    }
}

#[async_trait]
impl IdentityVerifier for SupabaseVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, ServiceError> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.config.url))
            .header("apikey", &self.config.service_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "identity verifier unreachable");
                ServiceError::internal("identity verifier unreachable")
            })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(ServiceError::auth_invalid());
        }
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "identity verifier failed");
            return Err(ServiceError::internal("identity verifier failed"));
        }

        let user: SupabaseUser = response.json().await.map_err(|err| {
            tracing::error!(error = %err, "identity verifier returned malformed user");
            ServiceError::internal("identity verifier returned malformed user")
        })?;
        user.into_identity().ok_or_else(ServiceError::auth_invalid)
    }
}

/// Stands in when Supabase credentials are absent; every check is a 500.
pub struct DisabledVerifier;

#[async_trait]
impl IdentityVerifier for DisabledVerifier {
    async fn verify(&self, _token: &str) -> Result<Identity, ServiceError> {
        Err(ServiceError::internal("identity verifier is not configured"))
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ServiceError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default();
    if token.is_empty() {
        return Err(ServiceError::auth_missing());
    }
    Ok(token)
}

/// Admin allow-list, fixed at startup. An empty list admits nobody.
#[derive(Clone, Debug, Default)]
pub struct AdminGate {
    emails: HashSet<String>,
}

impl AdminGate {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            emails: emails
                .into_iter()
                .map(|email| email.as_ref().trim().to_lowercase())
                .filter(|email| !email.is_empty())
                .collect(),
        }
    }

    pub fn is_admin(&self, email: &str) -> bool {
        !self.emails.is_empty() && self.emails.contains(&email.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

/// Verifies the bearer token and rejects banned accounts.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, ServiceError> {
    let token = bearer_token(headers)?;
    let identity = state.verifier.verify(token).await?;

    match state.store.is_banned(&identity.email_lower()).await {
        Ok(true) => {
            tracing::info!(email = %identity.email, "banned user rejected");
            Err(ServiceError::banned())
        }
        Ok(false) => Ok(identity),
        Err(err) => {
            tracing::warn!(error = %err, email = %identity.email, "ban lookup failed, allowing");
            Ok(identity)
        }
    }
}

pub async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<Identity, ServiceError> {
    let identity = authenticate(state, headers).await?;
    if !state.admins.is_admin(&identity.email) {
        return Err(ServiceError::forbidden("admin access required"));
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BannedUser;
    use crate::testing::{bearer, test_state, USER_EMAIL};
    use axum::http::StatusCode;
    use chrono::Utc;

    #[test]
    fn empty_allow_list_denies_everyone() {
        let gate = AdminGate::new(Vec::<String>::new());
        assert!(!gate.is_admin("root@x.com"));
        assert!(!gate.is_admin(""));
    }

    #[test]
    fn admin_check_ignores_case() {
        let gate = AdminGate::new(["Boss@Studio.io", " "]);
        assert_eq!(gate.len(), 1);
        assert!(gate.is_admin("boss@studio.io"));
        assert!(gate.is_admin("BOSS@studio.IO"));
        assert!(!gate.is_admin("other@studio.io"));
    }

    #[test]
    fn bearer_must_be_present_and_non_empty() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers).unwrap_err().body.code, "auth_missing");
        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap_err().body.code, "auth_missing");
        headers.insert(AUTHORIZATION, "Bearer   ".parse().unwrap());
        assert!(bearer_token(&headers).is_err());
        headers.insert(AUTHORIZATION, "Bearer tok-1".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "tok-1");
    }

    #[test]
    fn display_name_falls_back_to_email() {
        let user: SupabaseUser = serde_json::from_value(serde_json::json!({
            "id": "6f1c0c43-6a8f-4d0a-9d5a-1b7e1d2b3c4d",
            "email": "a@x.com",
            "user_metadata": { "full_name": "  " }
        }))
        .unwrap();
        assert_eq!(user.into_identity().unwrap().display_name, "a@x.com");
    }

    #[tokio::test]
    async fn unknown_token_is_auth_invalid() {
        let state = test_state();
        let err = authenticate(&state, &bearer("nope")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.body.code, "auth_invalid");
    }

    #[tokio::test]
    async fn banned_user_is_rejected_after_verification() {
        let state = test_state();
        state
            .store
            .upsert_ban(&BannedUser {
                email: USER_EMAIL.to_string(),
                reason: "spam".to_string(),
                banned_by: None,
                banned_at: Utc::now(),
            })
            .await
            .unwrap();
        let err = authenticate(&state, &bearer("user")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.body.code, "user_banned");
    }

    #[tokio::test]
    async fn non_admin_gets_forbidden_not_unauthorized() {
        let state = test_state();
        let err = require_admin(&state, &bearer("user")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.body.code, "forbidden");
        assert!(require_admin(&state, &bearer("admin")).await.is_ok());
    }
}
