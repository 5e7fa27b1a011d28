use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{check_status, ProviderError};
use crate::config::ProviderConfig;

const PROVIDER: &str = "gemini";

pub const PHOTO_TO_LIVE_MODEL: &str = "gemini-2.5-flash";
pub const REVERSE_POSE_MODEL: &str = "gemini-3-pro-preview";

const PHOTO_TO_LIVE_INSTRUCTION: &str = "You are a professional videographer who shoots \
short-form social video for Instagram and TikTok. Based on this image, describe a 5 second \
camera shot that would make a good Instagram clip. Reply with the English description only.";
const REVERSE_POSE_INSTRUCTION: &str = "Describe the pose of the person in this image and the \
camera angle. Only describe the pose and the camera angle, nothing else. Reply in English.";

const BLOCKED_FINISH_REASONS: [&str; 2] = ["SAFETY", "RECITATION"];

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    inline_data: Option<InlineData>,
    file_data: Option<FileData>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct FileData {
    file_uri: Option<String>,
}

impl GenerateResponse {
    fn check_blocked(&self) -> Result<(), ProviderError> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            return Err(ProviderError::Rejected(format!(
                "prompt blocked by safety filter ({reason})"
            )));
        }
        Ok(())
    }

    /// Concatenated text of the first candidate.
    pub fn into_text(self) -> Result<String, ProviderError> {
        self.check_blocked()?;
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse {
                provider: PROVIDER,
                message: "no candidates returned".to_string(),
            })?;
        if let Some(reason) = candidate
            .finish_reason
            .as_deref()
            .filter(|reason| BLOCKED_FINISH_REASONS.contains(reason))
        {
            return Err(ProviderError::Rejected(format!(
                "content blocked by safety filter ({reason}), try another image"
            )));
        }
        let text: String = candidate
            .content
            .map(|content| content.parts)
            .unwrap_or_default()
            .into_iter()
            .filter(|part| !part.thought)
            .filter_map(|part| part.text)
            .collect();
        let text = text.trim();
        if text.is_empty() {
            return Err(ProviderError::Parse {
                provider: PROVIDER,
                message: "empty text response".to_string(),
            });
        }
        Ok(text.to_string())
    }

    /// Every image part across candidates, inline data as data URLs.
    pub fn into_images(self) -> Result<Vec<String>, ProviderError> {
        self.check_blocked()?;
        let mut blocked: Option<String> = None;
        let mut images = Vec::new();
        for candidate in self.candidates {
            if let Some(reason) = candidate.finish_reason.as_deref() {
                if BLOCKED_FINISH_REASONS.contains(&reason) {
                    blocked = Some(reason.to_string());
                } else if reason != "STOP" {
                    tracing::warn!(finish_reason = reason, "image candidate finished early");
                }
            }
            let parts = candidate.content.map(|content| content.parts).unwrap_or_default();
            for part in parts.into_iter().filter(|part| !part.thought) {
                if let Some(inline) = part.inline_data {
                    if let Some(data) = inline.data.filter(|data| !data.is_empty()) {
                        let mime = inline.mime_type.unwrap_or_else(|| "image/png".to_string());
                        images.push(format!("data:{mime};base64,{data}"));
                    }
                } else if let Some(uri) = part.file_data.and_then(|file| file.file_uri) {
                    images.push(uri);
                }
            }
        }
        match (images.is_empty(), blocked) {
            (true, Some(reason)) => Err(ProviderError::Rejected(format!(
                "image blocked by safety filter ({reason})"
            ))),
            (true, None) => Err(ProviderError::Parse {
                provider: PROVIDER,
                message: "no images in response".to_string(),
            }),
            (false, _) => Ok(images),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ImageOptions {
    pub aspect_ratio: String,
    pub image_size: String,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: "16:9".to_string(),
            image_size: "2K".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    vertex_api_key: Option<String>,
    vertex_base_url: String,
    image_model: String,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, config: &ProviderConfig) -> Self {
        Self {
            http,
            api_key: config.gemini_api_key.clone(),
            base_url: config.gemini_base_url.clone(),
            vertex_api_key: config.vertex_api_key.clone(),
            vertex_base_url: config.vertex_base_url.clone(),
            image_model: config.gemini_image_model.clone(),
        }
    }

    /// Text-to-image through the Vertex AI publisher endpoint.
    pub async fn generate_images(
        &self,
        prompt: &str,
        options: &ImageOptions,
    ) -> Result<Vec<String>, ProviderError> {
        let api_key = self
            .vertex_api_key
            .as_deref()
            .ok_or(ProviderError::NotConfigured("Vertex AI API key"))?;
        let url = format!(
            "{}/v1/publishers/google/models/{}:generateContent",
            self.vertex_base_url, self.image_model
        );
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseModalities": ["IMAGE", "TEXT"],
                "imageConfig": options,
            },
        });
        let started = std::time::Instant::now();
        let response = self.post(&url, api_key, &body).await?;
        tracing::info!(
            model = %self.image_model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "gemini image generated"
        );
        response.into_images()
    }

    /// Five-second shot description for an image, used as a video prompt.
    pub async fn photo_to_live_prompt(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, ProviderError> {
        let config = json!({ "temperature": 0.7, "topP": 0.8, "topK": 40, "maxOutputTokens": 1024 });
        self.describe_image(PHOTO_TO_LIVE_MODEL, PHOTO_TO_LIVE_INSTRUCTION, image, mime_type, config, false)
            .await?
            .into_text()
    }

    /// Pose and camera-angle caption for a reference image.
    pub async fn reverse_pose(&self, image: &[u8], mime_type: &str) -> Result<String, ProviderError> {
        let config = json!({ "temperature": 0.4, "topP": 0.95, "topK": 40, "maxOutputTokens": 8192 });
        self.describe_image(REVERSE_POSE_MODEL, REVERSE_POSE_INSTRUCTION, image, mime_type, config, true)
            .await?
            .into_text()
    }

    async fn describe_image(
        &self,
        model: &str,
        instruction: &str,
        image: &[u8],
        mime_type: &str,
        generation_config: Value,
        relaxed_safety: bool,
    ) -> Result<GenerateResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::NotConfigured("Gemini API key"))?;
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        let mut body = json!({
            "contents": [{
                "parts": [
                    { "inlineData": { "mimeType": mime_type, "data": STANDARD.encode(image) } },
                    { "text": instruction },
                ],
            }],
            "generationConfig": generation_config,
        });
        if relaxed_safety {
            body["safetySettings"] = json!([
                { "category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE" },
                { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_NONE" },
                { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_NONE" },
                { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_NONE" },
            ]);
        }
        tracing::info!(model, "calling gemini");
        self.post(&url, api_key, &body).await
    }

    async fn post(
        &self,
        url: &str,
        api_key: &str,
        body: &Value,
    ) -> Result<GenerateResponse, ProviderError> {
        let response = self
            .http
            .post(url)
            .query(&[("key", api_key)])
            .json(body)
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        check_status(PROVIDER, response)
            .await?
            .json()
            .await
            .map_err(ProviderError::parse(PROVIDER))
    }
}
