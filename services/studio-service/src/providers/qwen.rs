use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{check_status, ProviderError};
use crate::config::ProviderConfig;

const PROVIDER: &str = "qwen";
const WORKFLOW: &str = include_str!("../../assets/qwen_workflow.json");
pub const DEFAULT_SEED: i64 = 10;

#[derive(Serialize)]
struct WorkflowRequest<'a> {
    workflow: &'a str,
    image: String,
    prompt: &'a str,
    seed: i64,
    output_image: &'static str,
}

#[derive(Deserialize)]
struct WorkflowResponse {
    code: i64,
    #[serde(default)]
    data: Option<WorkflowOutput>,
}

#[derive(Deserialize)]
struct WorkflowOutput {
    image: Option<String>,
}

/// Compact workflow JSON, base64-encoded once.
fn encoded_workflow() -> String {
    let compact = serde_json::from_str::<serde_json::Value>(WORKFLOW)
        .and_then(|value| serde_json::to_vec(&value))
        .unwrap_or_else(|_| WORKFLOW.as_bytes().to_vec());
    STANDARD.encode(compact)
}

#[derive(Clone)]
pub struct QwenClient {
    http: reqwest::Client,
    api_url: Option<String>,
    workflow: Arc<str>,
}

impl QwenClient {
    pub fn new(http: reqwest::Client, config: &ProviderConfig) -> Self {
        Self {
            http,
            api_url: config.qwen_api_url.clone(),
            workflow: encoded_workflow().into(),
        }
    }

    /// Runs the image-edit workflow and returns the result as a PNG data URL.
    pub async fn edit_image(
        &self,
        prompt: &str,
        image: &[u8],
        seed: i64,
    ) -> Result<String, ProviderError> {
        let api_url = self
            .api_url
            .as_deref()
            .ok_or(ProviderError::NotConfigured("QWEN_API_URL"))?;

        let body = WorkflowRequest {
            workflow: &self.workflow,
            image: STANDARD.encode(image),
            prompt,
            seed,
            output_image: "",
        };
        let started = std::time::Instant::now();
        let response = self
            .http
            .post(api_url)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let output: WorkflowResponse = check_status(PROVIDER, response)
            .await?
            .json()
            .await
            .map_err(ProviderError::parse(PROVIDER))?;
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            code = output.code,
            "qwen workflow finished"
        );
        into_data_url(output)
    }
}

fn into_data_url(output: WorkflowResponse) -> Result<String, ProviderError> {
    if output.code != 0 {
        return Err(ProviderError::Upstream {
            provider: PROVIDER,
            status: 500,
            message: format!("workflow returned code {}", output.code),
        });
    }
    output
        .data
        .and_then(|data| data.image)
        .filter(|image| !image.is_empty())
        .map(|image| format!("data:image/png;base64,{image}"))
        .ok_or_else(|| ProviderError::Parse {
            provider: PROVIDER,
            message: "no image in workflow output".to_string(),
        })
}
