//! Adapters for the external generation APIs.
//!
//! Each adapter parses the provider's JSON into typed values at the boundary
//! and reports failures as [`ProviderError`].

pub mod aimovely;
pub mod flux;
pub mod gemini;
pub mod kling;
pub mod qwen;

use axum::http::StatusCode;

use crate::config::ProviderConfig;
use crate::error::ServiceError;
use crate::poll::PollError;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("{provider} request failed ({status}): {message}")]
    Upstream {
        provider: &'static str,
        status: u16,
        message: String,
    },
    /// The provider refused the content (safety filters, moderation).
    #[error("{0}")]
    Rejected(String),
    #[error("{provider} returned an unexpected response: {message}")]
    Parse {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} is unreachable: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} did not finish within {attempts} polls")]
    Timeout {
        provider: &'static str,
        attempts: u32,
    },
    #[error("{provider} job failed: {message}")]
    Remote {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn transport(provider: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |err| Self::Transport {
            provider,
            message: err.to_string(),
        }
    }

    pub fn parse(provider: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |err| Self::Parse {
            provider,
            message: err.to_string(),
        }
    }

    pub fn from_poll(provider: &'static str, err: PollError<ProviderError>) -> Self {
        match err {
            PollError::Remote(message) => Self::Remote { provider, message },
            PollError::Exhausted { attempts } => Self::Timeout { provider, attempts },
            PollError::Fetch(err) => err,
        }
    }
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        let message = err.to_string();
        match err {
            ProviderError::NotConfigured(_) => {
                tracing::error!(error = %message, "provider not configured");
                ServiceError::internal(message)
            }
            ProviderError::Upstream { status, .. } => {
                tracing::warn!(error = %message, status, "provider rejected request");
                ServiceError::upstream(status, message)
            }
            ProviderError::Rejected(_) => ServiceError::validation(message),
            ProviderError::Timeout { .. } => {
                tracing::warn!(error = %message, "provider poll exhausted");
                ServiceError::timeout(message)
            }
            ProviderError::Remote { .. } => {
                tracing::warn!(error = %message, "provider job failed");
                ServiceError::upstream(StatusCode::INTERNAL_SERVER_ERROR.as_u16(), message)
            }
            ProviderError::Parse { .. } | ProviderError::Transport { .. } => {
                tracing::error!(error = %message, "provider call failed");
                ServiceError::internal(message)
            }
        }
    }
}

/// Reads the body of a non-2xx response into an `Upstream` error.
pub(crate) async fn check_status(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ProviderError::Upstream {
        provider,
        status: status.as_u16(),
        message,
    })
}

/// One handle per provider, sharing a connection pool.
#[derive(Clone)]
pub struct Providers {
    pub kling: kling::KlingClient,
    pub flux: flux::FluxClient,
    pub gemini: gemini::GeminiClient,
    pub qwen: qwen::QwenClient,
    pub aimovely: aimovely::AimovelyClient,
}

impl Providers {
    pub fn new(http: reqwest::Client, config: &ProviderConfig) -> Self {
        Self {
            kling: kling::KlingClient::new(http.clone(), config),
            flux: flux::FluxClient::new(http.clone(), config),
            gemini: gemini::GeminiClient::new(http.clone(), config),
            qwen: qwen::QwenClient::new(http.clone(), config),
            aimovely: aimovely::AimovelyClient::new(http, config),
        }
    }
}
