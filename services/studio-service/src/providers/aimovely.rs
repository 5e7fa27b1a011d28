use reqwest::multipart::{Form, Part};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use super::{check_status, ProviderError};
use crate::config::ProviderConfig;

const PROVIDER: &str = "aimovely";

/// `biz` tags the upload endpoint accepts.
pub const BIZ_EXTERNAL_TOOL: &str = "external_tool";
pub const BIZ_IMAGE_TRANSITION: &str = "image_transition";
pub const BIZ_IMG2VIDEO: &str = "img2video";

/// `{code, msg, data}` wrapper around every Aimovely response.
#[derive(Deserialize, Debug)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self, context: &str) -> Result<T, ProviderError> {
        if self.code != 0 {
            return Err(ProviderError::Upstream {
                provider: PROVIDER,
                status: 500,
                message: format!(
                    "{context}: {} (code: {})",
                    self.msg.unwrap_or_default(),
                    self.code
                ),
            });
        }
        self.data.ok_or_else(|| ProviderError::Parse {
            provider: PROVIDER,
            message: format!("{context}: response has no data"),
        })
    }
}

#[derive(Deserialize)]
struct TokenData {
    access_token: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct UploadedResource {
    pub url: String,
    #[serde(default)]
    pub resource_id: Option<Value>,
    #[serde(default)]
    pub biz: Option<String>,
}

/// A file to forward to the upload endpoint.
pub struct UploadFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
}

#[derive(Clone)]
pub struct AimovelyClient {
    http: reqwest::Client,
    email: Option<String>,
    vcode: Option<String>,
    base_url: String,
}

impl AimovelyClient {
    pub fn new(http: reqwest::Client, config: &ProviderConfig) -> Self {
        Self {
            http,
            email: config.aimovely_email.clone(),
            vcode: config.aimovely_vcode.clone(),
            base_url: config.aimovely_base_url.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.email.is_some() && self.vcode.is_some()
    }

    /// Exchanges the service account's email and verification code for a token.
    pub async fn access_token(&self) -> Result<String, ProviderError> {
        let (Some(email), Some(vcode)) = (&self.email, &self.vcode) else {
            return Err(ProviderError::NotConfigured("Aimovely credentials"));
        };
        let data: TokenData = self
            .post_json("/v1/user/verifyvcode", None, &json!({ "email": email, "vcode": vcode }))
            .await?
            .into_data("token exchange")?;
        Ok(data.access_token)
    }

    pub async fn upload(
        &self,
        token: &str,
        file: UploadFile,
        biz: &str,
    ) -> Result<UploadedResource, ProviderError> {
        let part = Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.content_type)
            .map_err(|err| ProviderError::Parse {
                provider: PROVIDER,
                message: format!("invalid content type: {err}"),
            })?;
        let mut form = Form::new().part("file", part).text("biz", biz.to_string());
        if biz == BIZ_EXTERNAL_TOOL {
            form = form.text("template_id", "1");
        }
        let response = self
            .http
            .post(format!("{}/v1/resource/upload", self.base_url))
            .header("Authorization", token)
            .multipart(form)
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let envelope: Envelope<UploadedResource> = check_status(PROVIDER, response)
            .await?
            .json()
            .await
            .map_err(ProviderError::parse(PROVIDER))?;
        envelope.into_data("upload")
    }

    /// Starts an image-to-video task; the caller polls with [`Self::query_video_task`].
    pub async fn create_video_task(
        &self,
        token: &str,
        generate_type: &Value,
        origin_resource_id: &Value,
    ) -> Result<Value, ProviderError> {
        let body = json!({ "generate_type": generate_type, "origin_resource_id": origin_resource_id });
        self.post_json::<Value>("/v1/task/video/create", Some(token), &body)
            .await
            .and_then(passthrough)
    }

    pub async fn query_video_task(&self, token: &str, task_id: &Value) -> Result<Value, ProviderError> {
        self.post_json::<Value>("/v1/task/video/query", Some(token), &json!({ "task_id": task_id }))
            .await
            .and_then(passthrough)
    }

    /// Copies a provider-hosted image onto Aimovely. Any failure yields `None`.
    pub async fn rehost(&self, image_url: &str, file_stem: &str) -> Option<String> {
        if !self.is_configured() {
            tracing::warn!("aimovely credentials missing, keeping provider url");
            return None;
        }
        match self.try_rehost(image_url, file_stem).await {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::warn!(error = %err, image_url, "aimovely rehost failed, keeping provider url");
                None
            }
        }
    }

    async fn try_rehost(&self, image_url: &str, file_stem: &str) -> Result<String, ProviderError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(image_url)
            .send()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let response = check_status(PROVIDER, response).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .filter(|value| value.starts_with("image/"))
            .unwrap_or("image/png")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(ProviderError::transport(PROVIDER))?;
        let file = UploadFile {
            bytes: bytes.to_vec(),
            file_name: format!("{file_stem}-{}.png", chrono::Utc::now().timestamp_millis()),
            content_type,
        };
        Ok(self.upload(&token, file, BIZ_EXTERNAL_TOOL).await?.url)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&str>,
        body: &Value,
    ) -> Result<Envelope<T>, ProviderError> {
        let mut request = self.http.post(format!("{}{}", self.base_url, path)).json(body);
        if let Some(token) = token {
            request = request.header("Authorization", token);
        }
        let response = request
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

/// Video task responses are handed back whole once the code checks out.
fn passthrough(envelope: Envelope<Value>) -> Result<Value, ProviderError> {
    if envelope.code != 0 {
        return Err(ProviderError::Upstream {
            provider: PROVIDER,
            status: 500,
            message: format!(
                "{} (code: {})",
                envelope.msg.unwrap_or_default(),
                envelope.code
            ),
        });
    }
    Ok(json!({ "code": envelope.code, "msg": envelope.msg, "data": envelope.data }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_fake;
    use axum::{http::HeaderMap, routing::post, Json, Router};

    #[test]
    fn nonzero_code_is_an_upstream_failure() {
        let envelope: Envelope<TokenData> =
            serde_json::from_value(json!({ "code": 401, "msg": "bad vcode" })).unwrap();
        match envelope.into_data("token exchange") {
            Err(ProviderError::Upstream { status, message, .. }) => {
                assert_eq!(status, 500);
                assert!(message.contains("bad vcode"));
            }
            other => panic!("unexpected {other:?}", other = other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn token_exchange_then_video_task_uses_raw_authorization() {
        let base = spawn_fake(
            Router::new()
                .route(
                    "/v1/user/verifyvcode",
                    post(|Json(body): Json<Value>| async move {
                        assert_eq!(body["vcode"], "123456");
                        Json(json!({ "code": 0, "data": { "access_token": "tok-a" } }))
                    }),
                )
                .route(
                    "/v1/task/video/create",
                    post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                        assert_eq!(headers.get("authorization").unwrap(), "tok-a");
                        assert_eq!(body["origin_resource_id"], 42);
                        Json(json!({ "code": 0, "msg": "ok", "data": { "task_id": "v-1" } }))
                    }),
                ),
        )
        .await;
        let client = AimovelyClient::new(reqwest::Client::new(), &ProviderConfig::for_base_url(&base));
        let token = client.access_token().await.unwrap();
        let created = client
            .create_video_task(&token, &json!("img2video"), &json!(42))
            .await
            .unwrap();
        assert_eq!(created["data"]["task_id"], "v-1");
    }

    #[tokio::test]
    async fn rehost_without_credentials_keeps_original() {
        let mut config = ProviderConfig::for_base_url("http://127.0.0.1:9");
        config.aimovely_vcode = None;
        let client = AimovelyClient::new(reqwest::Client::new(), &config);
        assert_eq!(client.rehost("https://bfl/out.png", "flux-image").await, None);
    }
}
