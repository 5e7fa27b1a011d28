use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use super::{check_status, ProviderError};
use crate::config::ProviderConfig;
use crate::poll::{poll_until_terminal, PollPolicy, PollStatus};

const PROVIDER: &str = "flux";

#[derive(Serialize)]
struct KontextRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_image: Option<String>,
}

#[derive(Deserialize)]
struct Accepted {
    id: String,
    polling_url: String,
}

#[derive(Deserialize)]
struct PollBody {
    status: String,
    #[serde(default)]
    result: Option<PollResult>,
}

#[derive(Deserialize)]
struct PollResult {
    sample: Option<String>,
}

impl PollBody {
    fn into_status(self) -> Result<PollStatus<String>, ProviderError> {
        match self.status.as_str() {
            "Ready" => self
                .result
                .and_then(|result| result.sample)
                .map(PollStatus::Ready)
                .ok_or_else(|| ProviderError::Parse {
                    provider: PROVIDER,
                    message: "ready result without sample url".to_string(),
                }),
            "Error" => Ok(PollStatus::Failed("generation failed".to_string())),
            _ => Ok(PollStatus::Pending),
        }
    }
}

/// A finished Flux image, still hosted by the provider.
#[derive(Debug, PartialEq, Eq)]
pub struct FluxImage {
    pub sample_url: String,
    pub request_id: String,
}

#[derive(Clone)]
pub struct FluxClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    poll: PollPolicy,
}

impl FluxClient {
    pub fn new(http: reqwest::Client, config: &ProviderConfig) -> Self {
        Self {
            http,
            api_key: config.bfl_api_key.clone(),
            base_url: config.bfl_base_url.clone(),
            poll: config.flux_poll,
        }
    }

    /// Submits a Kontext Pro job and waits for it within the poll policy.
    pub async fn generate(
        &self,
        prompt: &str,
        input_image: Option<&[u8]>,
    ) -> Result<FluxImage, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::NotConfigured("BFL API key"))?;

        let body = KontextRequest {
            prompt,
            input_image: input_image.map(|bytes| STANDARD.encode(bytes)),
        };
        let response = self
            .http
            .post(format!("{}/v1/flux-kontext-pro", self.base_url))
            .header("accept", "application/json")
            .header("x-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let accepted: Accepted = check_status(PROVIDER, response)
            .await?
            .json()
            .await
            .map_err(ProviderError::parse(PROVIDER))?;
        tracing::info!(request_id = %accepted.id, "flux job accepted");

        let sample_url = poll_until_terminal(self.poll, |attempt| {
            let request = self
                .http
                .get(&accepted.polling_url)
                .header("accept", "application/json")
                .header("x-key", api_key);
            async move {
                tracing::debug!(attempt, "polling flux job");
                let response = request
                    .send()
                    .await
                    .map_err(ProviderError::transport(PROVIDER))?;
                let body: PollBody = check_status(PROVIDER, response)
                    .await?
                    .json()
                    .await
                    .map_err(ProviderError::parse(PROVIDER))?;
                body.into_status()
            }
        })
        .await
        .map_err(|err| ProviderError::from_poll(PROVIDER, err))?;

        Ok(FluxImage {
            sample_url,
            request_id: accepted.id,
        })
    }
}
