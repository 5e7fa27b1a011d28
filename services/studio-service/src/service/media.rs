//! Provider-backed generation routes, uploads and download proxies.

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use super::required;
use crate::auth::Identity;
use crate::error::ServiceError;
use crate::models::{
    AimovelyUploadResponse, DownloadParams, FluxResponse, FormData, FormFile, ImagesResponse,
    KlingGenerateRequest, KlingQueryParams, PhotoToLiveRequest, PoseCaptionResponse,
    PromptResponse, UploadImageResponse, VideoDownloadParams, VideoGenerateRequest,
    VideoQueryRequest,
};
use crate::providers::aimovely::{UploadFile, BIZ_IMAGE_TRANSITION, BIZ_IMG2VIDEO};
use crate::providers::gemini::ImageOptions;
use crate::providers::kling::{ImageToVideo, Submitted, TaskView, PHOTO_TO_LIVE_MODEL, START_END_MODEL};
use crate::providers::qwen::DEFAULT_SEED;
use crate::state::AppState;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const FALLBACK_IMAGE_TYPE: &str = "image/jpeg";

/// Start/end-frame video through Kling.
pub async fn kling_generate(
    state: &AppState,
    request: KlingGenerateRequest,
) -> Result<Submitted, ServiceError> {
    let message = "startImageUrl, endImageUrl and prompt are required";
    let start = required(request.start_image_url.as_deref(), message)?;
    let end = required(request.end_image_url.as_deref(), message)?;
    let prompt = required(request.prompt.as_deref(), message)?;

    let mut body = ImageToVideo::new(START_END_MODEL, start, prompt);
    body.image_tail = Some(end);
    Ok(state.providers.kling.submit(&body).await?)
}

/// Single-image "live photo" video through Kling.
pub async fn kling_photo_to_live(
    state: &AppState,
    request: PhotoToLiveRequest,
) -> Result<Submitted, ServiceError> {
    let message = "imageUrl and prompt are required";
    let image = required(request.image_url.as_deref(), message)?;
    let prompt = required(request.prompt.as_deref(), message)?;
    let body = ImageToVideo::new(PHOTO_TO_LIVE_MODEL, image, prompt);
    Ok(state.providers.kling.submit(&body).await?)
}

pub async fn kling_query(state: &AppState, params: KlingQueryParams) -> Result<TaskView, ServiceError> {
    let task_id = required(params.task_id.as_deref(), "taskId is required")?;
    Ok(state.providers.kling.query(task_id).await?)
}

/// Flux Kontext Pro; blocks for up to the poll ceiling. The finished image is
/// re-hosted on Aimovely when possible, else the provider URL is returned.
pub async fn flux(state: &AppState, mut form: FormData) -> Result<FluxResponse, ServiceError> {
    let prompt = required(form.text("prompt"), "prompt is required")?.to_string();
    let image = form.take_file("image");
    let result = state
        .providers
        .flux
        .generate(&prompt, image.as_ref().map(|file| file.bytes.as_slice()))
        .await?;
    let url = state
        .providers
        .aimovely
        .rehost(&result.sample_url, "flux-image")
        .await
        .unwrap_or(result.sample_url);
    Ok(FluxResponse {
        images: vec![url],
        request_id: result.request_id,
    })
}

pub async fn gemini_image(state: &AppState, form: FormData) -> Result<ImagesResponse, ServiceError> {
    let prompt = required(form.text("prompt"), "prompt is required")?;
    let defaults = ImageOptions::default();
    let options = ImageOptions {
        aspect_ratio: form
            .text("aspectRatio")
            .map(str::to_string)
            .unwrap_or(defaults.aspect_ratio),
        image_size: form
            .text("imageSize")
            .map(str::to_string)
            .unwrap_or(defaults.image_size),
    };
    let images = state.providers.gemini.generate_images(prompt, &options).await?;
    Ok(ImagesResponse {
        message: Some(format!("generated {} image(s)", images.len())),
        images,
    })
}

pub async fn qwen(state: &AppState, mut form: FormData) -> Result<ImagesResponse, ServiceError> {
    let prompt = required(form.text("prompt"), "prompt is required")?.to_string();
    let seed = form
        .text("seed")
        .and_then(|seed| seed.parse::<i64>().ok())
        .unwrap_or(DEFAULT_SEED);
    let image = form
        .take_file("image")
        .ok_or_else(|| ServiceError::validation("image is required"))?;
    let data_url = state
        .providers
        .qwen
        .edit_image(&prompt, &image.bytes, seed)
        .await?;
    Ok(ImagesResponse {
        images: vec![data_url],
        message: Some("image edited".to_string()),
    })
}

fn image_mime(file: &FormFile) -> &str {
    if file.content_type.starts_with("image/") {
        &file.content_type
    } else {
        FALLBACK_IMAGE_TYPE
    }
}

pub async fn photo_to_live_prompt(
    state: &AppState,
    mut form: FormData,
) -> Result<PromptResponse, ServiceError> {
    let image = form
        .take_file("image")
        .ok_or_else(|| ServiceError::validation("image is required"))?;
    let prompt = state
        .providers
        .gemini
        .photo_to_live_prompt(&image.bytes, image_mime(&image))
        .await?;
    Ok(PromptResponse { prompt })
}

pub async fn reverse_pose(
    state: &AppState,
    mut form: FormData,
) -> Result<PoseCaptionResponse, ServiceError> {
    let image = form
        .take_file("poseImage")
        .ok_or_else(|| ServiceError::validation("poseImage is required"))?;
    let pose_caption = state
        .providers
        .gemini
        .reverse_pose(&image.bytes, image_mime(&image))
        .await?;
    Ok(PoseCaptionResponse { pose_caption })
}

fn present(value: Option<Value>) -> Option<Value> {
    value.filter(|value| match value {
        Value::Null => false,
        Value::String(text) => !text.is_empty(),
        _ => true,
    })
}

/// Starts an Aimovely video task and returns its envelope unchanged.
pub async fn video_generate(
    state: &AppState,
    request: VideoGenerateRequest,
) -> Result<Value, ServiceError> {
    let (Some(generate_type), Some(origin_resource_id)) =
        (present(request.generate_type), present(request.origin_resource_id))
    else {
        return Err(ServiceError::validation(
            "generate_type and origin_resource_id are required",
        ));
    };
    let aimovely = &state.providers.aimovely;
    let token = aimovely.access_token().await?;
    let created = aimovely
        .create_video_task(&token, &generate_type, &origin_resource_id)
        .await?;
    tracing::info!(generate_type = %generate_type, "aimovely video task created");
    Ok(created)
}

pub async fn video_query(state: &AppState, request: VideoQueryRequest) -> Result<Value, ServiceError> {
    let task_id = present(request.task_id)
        .ok_or_else(|| ServiceError::validation("task_id is required"))?;
    let aimovely = &state.providers.aimovely;
    let token = aimovely.access_token().await?;
    Ok(aimovely.query_video_task(&token, &task_id).await?)
}

/// Accepts only images up to [`MAX_UPLOAD_BYTES`].
fn check_image_upload(file: Option<FormFile>) -> Result<FormFile, ServiceError> {
    let file = file.ok_or_else(|| ServiceError::validation("no file provided"))?;
    if !file.content_type.starts_with("image/") {
        return Err(ServiceError::validation("file must be an image"));
    }
    if file.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ServiceError::payload_too_large(
            "file too large, maximum size is 10MB",
        ));
    }
    Ok(file)
}

pub async fn upload_image(
    state: &AppState,
    user: &Identity,
    mut form: FormData,
) -> Result<UploadImageResponse, ServiceError> {
    let file = check_image_upload(form.take_file("file"))?;
    let blobs = state
        .storage
        .as_ref()
        .ok_or_else(|| ServiceError::internal("object storage is not configured"))?;
    let key = format!(
        "uploads/{}/{}-{}",
        user.id,
        Utc::now().timestamp_millis(),
        file.file_name
    );
    let size = file.bytes.len();
    let url = blobs
        .put_object(&key, file.bytes, &file.content_type)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, key = %key, "image upload failed");
            ServiceError::internal("image upload failed")
        })?;
    Ok(UploadImageResponse {
        url,
        filename: file.file_name,
        size,
        content_type: file.content_type,
    })
}

async fn forward_to_aimovely(
    state: &AppState,
    form: &mut FormData,
    biz: &str,
) -> Result<AimovelyUploadResponse, ServiceError> {
    let file = check_image_upload(form.take_file("file"))?;
    let aimovely = &state.providers.aimovely;
    let token = aimovely.access_token().await?;
    let uploaded = aimovely
        .upload(
            &token,
            UploadFile {
                bytes: file.bytes,
                file_name: file.file_name,
                content_type: file.content_type,
            },
            biz,
        )
        .await?;
    Ok(AimovelyUploadResponse {
        url: uploaded.url,
        resource_id: uploaded.resource_id,
        biz: uploaded.biz,
    })
}

/// Transition-source upload; answers `{url, resource_id}`.
pub async fn upload_to_aimovely(
    state: &AppState,
    mut form: FormData,
) -> Result<AimovelyUploadResponse, ServiceError> {
    let mut uploaded = forward_to_aimovely(state, &mut form, BIZ_IMAGE_TRANSITION).await?;
    uploaded.biz = None;
    Ok(uploaded)
}

/// Image-to-video source upload; answers `{url, resource_id, biz}`.
pub async fn resource_upload(
    state: &AppState,
    mut form: FormData,
) -> Result<AimovelyUploadResponse, ServiceError> {
    forward_to_aimovely(state, &mut form, BIZ_IMG2VIDEO).await
}

/// A proxied remote file, ready to be written back as an attachment.
#[derive(Debug)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub disposition: String,
    pub cache_control: &'static str,
}

async fn fetch_remote(
    state: &AppState,
    url: &str,
) -> Result<(reqwest::StatusCode, String, Vec<u8>), ServiceError> {
    let response = state
        .http
        .get(url)
        .header(reqwest::header::USER_AGENT, "Mozilla/5.0 (compatible; DownloadProxy/1.0)")
        .send()
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, url, "download fetch failed");
            ServiceError::internal(format!("failed to fetch resource: {err}"))
        })?;
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| ServiceError::internal(format!("failed to read resource: {err}")))?;
    Ok((status, content_type, bytes.to_vec()))
}

/// Same-origin proxy for provider-hosted files; the remote status passes through.
pub async fn download(state: &AppState, params: DownloadParams) -> Result<Download, ServiceError> {
    let url = required(params.url.as_deref(), "url parameter is required")?;
    let (status, content_type, bytes) = fetch_remote(state, url).await?;
    if !status.is_success() {
        return Err(ServiceError::upstream(
            status.as_u16(),
            format!("failed to fetch resource: {status}"),
        ));
    }
    tracing::debug!(url, size = bytes.len(), "resource proxied");
    Ok(Download {
        bytes,
        content_type,
        disposition: "attachment".to_string(),
        cache_control: "public, max-age=31536000",
    })
}

/// Video proxy with a filename taken from the URL; remote failures become 502.
pub async fn video_download(
    state: &AppState,
    params: VideoDownloadParams,
) -> Result<Download, ServiceError> {
    let target = required(params.target.as_deref(), "target parameter is required")?;
    let (status, content_type, bytes) = fetch_remote(state, target).await?;
    if !status.is_success() {
        let body = String::from_utf8_lossy(&bytes).into_owned();
        return Err(ServiceError::upstream(
            reqwest::StatusCode::BAD_GATEWAY.as_u16(),
            format!("failed to fetch video: {status} {body}"),
        ));
    }
    Ok(Download {
        bytes,
        content_type,
        disposition: format!("attachment; filename=\"{}\"", video_file_name(target)),
        cache_control: "no-store",
    })
}

fn video_file_name(url: &str) -> String {
    let last = reqwest::Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
            .map(str::to_string)
    });
    match last {
        Some(name) if name.contains('.') => name,
        Some(name) => format!("{name}.mp4"),
        None => format!("video-{}.mp4", Utc::now().timestamp_millis()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{harness, harness_with, spawn_fake, user, RecordingBlobStore};
    use axum::{
        http::{header, HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;

    fn image_form(field: &str, content_type: &str, size: usize) -> FormData {
        let mut form = FormData::default();
        form.files.insert(
            field.to_string(),
            FormFile {
                file_name: "pic.png".to_string(),
                content_type: content_type.to_string(),
                bytes: vec![0; size],
            },
        );
        form
    }

    #[tokio::test]
    async fn kling_generate_requires_both_frames_and_prompt() {
        let h = harness();
        let request = KlingGenerateRequest {
            start_image_url: Some("https://img/a.png".to_string()),
            end_image_url: None,
            prompt: Some("walk".to_string()),
        };
        let err = kling_generate(&h.state, request).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = kling_query(&h.state, KlingQueryParams::default()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn kling_photo_to_live_forwards_upstream_status() {
        let base = spawn_fake(Router::new().route(
            "/v1/videos/image2video",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model_name"], PHOTO_TO_LIVE_MODEL);
                assert!(body.get("image_tail").is_none());
                (StatusCode::TOO_MANY_REQUESTS, "quota exceeded")
            }),
        ))
        .await;
        let h = harness_with(RecordingBlobStore::default(), &base);
        let request = PhotoToLiveRequest {
            image_url: Some("https://img/a.png".to_string()),
            prompt: Some("smile".to_string()),
        };
        let err = kling_photo_to_live(&h.state, request).await.unwrap_err();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn upload_image_validates_type_and_size() {
        let h = harness();
        let err = upload_image(&h.state, &user(), FormData::default()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let form = image_form("file", "application/pdf", 10);
        let err = upload_image(&h.state, &user(), form).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let form = image_form("file", "image/png", MAX_UPLOAD_BYTES + 1);
        let err = upload_image(&h.state, &user(), form).await.unwrap_err();
        assert_eq!(err.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(h.blobs.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_image_stores_under_user_prefix() {
        let h = harness();
        let form = image_form("file", "image/png", MAX_UPLOAD_BYTES);
        let response = upload_image(&h.state, &user(), form).await.unwrap();
        assert_eq!(response.size, MAX_UPLOAD_BYTES);
        assert_eq!(response.filename, "pic.png");
        assert_eq!(response.content_type, "image/png");
        let puts = h.blobs.puts.lock().unwrap().clone();
        assert!(puts[0].starts_with(&format!("uploads/{}/", user().id)));
        assert!(response.url.ends_with(&puts[0]));
    }

    fn flux_fake(upload_code: i64) -> Router {
        fn host(headers: &HeaderMap) -> String {
            headers
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string()
        }
        Router::new()
            .route(
                "/v1/flux-kontext-pro",
                post(|headers: HeaderMap| async move {
                    let polling_url = format!("http://{}/poll", host(&headers));
                    Json(json!({ "id": "req-1", "polling_url": polling_url }))
                }),
            )
            .route(
                "/poll",
                get(|headers: HeaderMap| async move {
                    let sample = format!("http://{}/sample.png", host(&headers));
                    Json(json!({ "status": "Ready", "result": { "sample": sample } }))
                }),
            )
            .route(
                "/sample.png",
                get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![137u8, 80, 78, 71]) }),
            )
            .route(
                "/v1/user/verifyvcode",
                post(|| async { Json(json!({ "code": 0, "data": { "access_token": "tok" } })) }),
            )
            .route(
                "/v1/resource/upload",
                post(move || async move {
                    Json(json!({
                        "code": upload_code,
                        "msg": "denied",
                        "data": { "url": "https://cdn.aimovely.test/flux.png", "resource_id": 7 }
                    }))
                }),
            )
    }

    fn prompt_form(prompt: &str) -> FormData {
        let mut form = FormData::default();
        form.fields.insert("prompt".to_string(), prompt.to_string());
        form
    }

    #[tokio::test]
    async fn flux_result_is_rehosted() {
        let base = spawn_fake(flux_fake(0)).await;
        let h = harness_with(RecordingBlobStore::default(), &base);
        let response = flux(&h.state, prompt_form("a red fox")).await.unwrap();
        assert_eq!(response.images, vec!["https://cdn.aimovely.test/flux.png".to_string()]);
        assert_eq!(response.request_id, "req-1");
    }

    #[tokio::test]
    async fn flux_keeps_provider_url_when_rehost_fails() {
        let base = spawn_fake(flux_fake(500)).await;
        let h = harness_with(RecordingBlobStore::default(), &base);
        let response = flux(&h.state, prompt_form("a red fox")).await.unwrap();
        assert_eq!(response.images, vec![format!("{base}/sample.png")]);
    }

    #[tokio::test]
    async fn flux_requires_prompt() {
        let h = harness();
        let err = flux(&h.state, FormData::default()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn resource_upload_reports_biz() {
        let base = spawn_fake(flux_fake(0)).await;
        let h = harness_with(RecordingBlobStore::default(), &base);
        let response = resource_upload(&h.state, image_form("file", "image/png", 4))
            .await
            .unwrap();
        assert_eq!(response.resource_id, Some(json!(7)));
        let transition = upload_to_aimovely(&h.state, image_form("file", "image/png", 4))
            .await
            .unwrap();
        assert_eq!(transition.biz, None);
    }

    #[tokio::test]
    async fn video_generate_requires_both_fields() {
        let h = harness();
        let request = VideoGenerateRequest {
            generate_type: Some(json!("img2video")),
            origin_resource_id: Some(json!("")),
        };
        let err = video_generate(&h.state, request).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let err = video_query(&h.state, VideoQueryRequest::default()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn downloads_pass_status_through_or_map_to_bad_gateway() {
        let base = spawn_fake(
            Router::new()
                .route(
                    "/clip/abc",
                    get(|| async { ([(header::CONTENT_TYPE, "video/mp4")], vec![1u8, 2, 3]) }),
                )
                .route("/gone", get(|| async { (StatusCode::NOT_FOUND, "gone") })),
        )
        .await;
        let h = harness();

        let ok = video_download(
            &h.state,
            VideoDownloadParams {
                target: Some(format!("{base}/clip/abc")),
            },
        )
        .await
        .unwrap();
        assert_eq!(ok.bytes, vec![1, 2, 3]);
        assert_eq!(ok.content_type, "video/mp4");
        assert_eq!(ok.disposition, "attachment; filename=\"abc.mp4\"");

        let params = |path: &str| DownloadParams {
            url: Some(format!("{base}{path}")),
        };
        let err = download(&h.state, params("/gone")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err = video_download(
            &h.state,
            VideoDownloadParams {
                target: Some(format!("{base}/gone")),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn video_file_names_come_from_the_last_segment() {
        assert_eq!(video_file_name("https://cdn/v/clip.mov?sig=1"), "clip.mov");
        assert_eq!(video_file_name("https://cdn/v/clip/"), "clip.mp4");
        assert!(video_file_name("not a url").starts_with("video-"));
    }
}
