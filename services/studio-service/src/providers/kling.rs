use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use super::{check_status, ProviderError};
use crate::config::ProviderConfig;

const PROVIDER: &str = "kling";
const TOKEN_TTL_SECS: i64 = 1800;
const NOT_BEFORE_SKEW_SECS: i64 = 5;

pub const START_END_MODEL: &str = "kling-v2-1";
pub const PHOTO_TO_LIVE_MODEL: &str = "kling-v2-5-turbo";

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Claims {
    pub iss: String,
    pub exp: i64,
    pub nbf: i64,
}

/// HS256 JWT for the Kling API, valid from `now - 5s` until `now + 1800s`.
pub fn sign_jwt(access_key: &str, secret_key: &str, now: i64) -> Result<String, ProviderError> {
    let header = serde_json::json!({ "alg": "HS256", "typ": "JWT" });
    let claims = Claims {
        iss: access_key.to_string(),
        exp: now + TOKEN_TTL_SECS,
        nbf: now - NOT_BEFORE_SKEW_SECS,
    };
    let header = serde_json::to_vec(&header).map_err(encode_failure)?;
    let claims = serde_json::to_vec(&claims).map_err(encode_failure)?;
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(claims)
    );

    let mut mac = Hmac::<Sha256>::new_from_slice(secret_key.as_bytes()).map_err(|err| {
        ProviderError::Parse {
            provider: PROVIDER,
            message: format!("invalid signing key: {err}"),
        }
    })?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{signing_input}.{signature}"))
}

fn encode_failure(err: serde_json::Error) -> ProviderError {
    ProviderError::Parse {
        provider: PROVIDER,
        message: format!("token encoding failed: {err}"),
    }
}

#[derive(Serialize, Debug)]
pub struct ImageToVideo<'a> {
    pub model_name: &'static str,
    pub mode: &'static str,
    pub duration: &'static str,
    pub image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_tail: Option<&'a str>,
    pub prompt: &'a str,
    pub cfg_scale: f32,
}

impl<'a> ImageToVideo<'a> {
    pub fn new(model_name: &'static str, image: &'a str, prompt: &'a str) -> Self {
        Self {
            model_name,
            mode: "pro",
            duration: "5",
            image,
            image_tail: None,
            prompt,
            cfg_scale: 0.5,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
struct Envelope {
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize, Debug, Default)]
struct TaskData {
    task_id: Option<String>,
    task_status: Option<String>,
    #[serde(default)]
    task_result: Option<TaskResult>,
}

#[derive(Deserialize, Debug, Default)]
struct TaskResult {
    #[serde(default)]
    videos: Vec<Video>,
}

#[derive(Deserialize, Debug)]
struct Video {
    url: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Submitted {
    pub task_id: Option<String>,
    pub status: Option<String>,
    pub message: &'static str,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub status: Option<String>,
    pub video_url: Option<String>,
    pub task_id: String,
    pub data: Option<Value>,
}

#[derive(Clone)]
pub struct KlingClient {
    http: reqwest::Client,
    access_key: Option<String>,
    secret_key: Option<String>,
    base_url: String,
}

impl KlingClient {
    pub fn new(http: reqwest::Client, config: &ProviderConfig) -> Self {
        Self {
            http,
            access_key: config.kling_access_key.clone(),
            secret_key: config.kling_secret_key.clone(),
            base_url: config.kling_base_url.clone(),
        }
    }

    fn token(&self) -> Result<String, ProviderError> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => sign_jwt(access, secret, Utc::now().timestamp()),
            _ => Err(ProviderError::NotConfigured("Kling API credentials")),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/videos/image2video", self.base_url)
    }

    pub async fn submit(&self, request: &ImageToVideo<'_>) -> Result<Submitted, ProviderError> {
        let token = self.token()?;
        tracing::info!(model = request.model_name, "submitting kling image2video");
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let envelope: Envelope = check_status(PROVIDER, response)
            .await?
            .json()
            .await
            .map_err(ProviderError::parse(PROVIDER))?;
        let data: TaskData = envelope
            .data
            .and_then(|data| serde_json::from_value(data).ok())
            .unwrap_or_default();
        Ok(Submitted {
            task_id: data.task_id,
            status: data.task_status,
            message: "video generation task submitted",
        })
    }

    pub async fn query(&self, task_id: &str) -> Result<TaskView, ProviderError> {
        let token = self.token()?;
        let response = self
            .http
            .get(format!("{}/{}", self.endpoint(), task_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let envelope: Envelope = check_status(PROVIDER, response)
            .await?
            .json()
            .await
            .map_err(ProviderError::parse(PROVIDER))?;
        Ok(task_view(task_id, envelope.data))
    }
}

fn task_view(task_id: &str, raw: Option<Value>) -> TaskView {
    let data: TaskData = raw
        .clone()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default();
    let video_url = data
        .task_result
        .and_then(|result| result.videos.into_iter().next())
        .and_then(|video| video.url);
    TaskView {
        status: data.task_status,
        video_url,
        task_id: task_id.to_string(),
        data: raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_fake;
    use axum::{extract::Path, routing::get, Json, Router};

    const NOW: i64 = 1_700_000_000;

    fn decode_claims(token: &str) -> Claims {
        let payload = token.split('.').nth(1).unwrap();
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap()
    }

    #[test]
    fn token_window_spans_1805_seconds() {
        let token = sign_jwt("ak-1", "secret", NOW).unwrap();
        let claims = decode_claims(&token);
        assert_eq!(claims.iss, "ak-1");
        assert_eq!(claims.nbf, NOW - 5);
        assert_eq!(claims.exp, NOW + 1800);
        assert_eq!(claims.exp - claims.nbf, 1805);
    }

    #[test]
    fn signature_verifies_with_shared_secret() {
        let token = sign_jwt("ak-1", "secret", NOW).unwrap();
        let (signing_input, signature) = token.rsplit_once('.').unwrap();
        assert!(!token.contains('='));

        let mut mac = Hmac::<Sha256>::new_from_slice(b"secret").unwrap();
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&URL_SAFE_NO_PAD.decode(signature).unwrap())
            .expect("signature must verify");

        let mut wrong = Hmac::<Sha256>::new_from_slice(b"other").unwrap();
        wrong.update(signing_input.as_bytes());
        assert!(wrong
            .verify_slice(&URL_SAFE_NO_PAD.decode(signature).unwrap())
            .is_err());
    }

    #[test]
    fn header_is_standard_hs256() {
        let token = sign_jwt("ak", "sk", NOW).unwrap();
        let header: Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(token.split('.').next().unwrap()).unwrap())
                .unwrap();
        assert_eq!(header, serde_json::json!({ "alg": "HS256", "typ": "JWT" }));
    }

    #[test]
    fn start_end_request_carries_tail_frame() {
        let mut request = ImageToVideo::new(START_END_MODEL, "https://a/1.png", "wave");
        request.image_tail = Some("https://a/2.png");
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["model_name"], "kling-v2-1");
        assert_eq!(body["image_tail"], "https://a/2.png");
        assert_eq!(body["duration"], "5");

        let single = serde_json::to_value(ImageToVideo::new(PHOTO_TO_LIVE_MODEL, "i", "p")).unwrap();
        assert!(single.get("image_tail").is_none());
    }

    #[tokio::test]
    async fn query_extracts_first_video_url() {
        let base = spawn_fake(Router::new().route(
            "/v1/videos/image2video/:id",
            get(|Path(id): Path<String>| async move {
                Json(serde_json::json!({
                    "code": 0,
                    "data": {
                        "task_id": id,
                        "task_status": "succeed",
                        "task_result": { "videos": [{ "url": "https://cdn/v.mp4" }] }
                    }
                }))
            }),
        ))
        .await;
        let client = KlingClient::new(reqwest::Client::new(), &ProviderConfig::for_base_url(&base));
        let view = client.query("t-9").await.unwrap();
        assert_eq!(view.status.as_deref(), Some("succeed"));
        assert_eq!(view.video_url.as_deref(), Some("https://cdn/v.mp4"));
        assert_eq!(view.task_id, "t-9");
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_request() {
        let mut config = ProviderConfig::for_base_url("http://127.0.0.1:9");
        config.kling_secret_key = None;
        let client = KlingClient::new(reqwest::Client::new(), &config);
        let err = client.query("t").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
