use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        Multipart, Query, State,
    },
    http::{
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use super::{json_body, read_form};
use crate::auth::authenticate;
use crate::error::ServiceError;
use crate::models::{
    AimovelyUploadResponse, DownloadParams, FluxResponse, ImagesResponse, KlingGenerateRequest,
    KlingQueryParams, PhotoToLiveRequest, PoseCaptionResponse, PromptResponse,
    UploadImageResponse, VideoDownloadParams, VideoGenerateRequest, VideoQueryRequest,
};
use crate::providers::kling::{Submitted, TaskView};
use crate::service::media::{self, Download};
use crate::state::AppState;

pub async fn kling_generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<KlingGenerateRequest>, JsonRejection>,
) -> Result<Json<Submitted>, ServiceError> {
    authenticate(&state, &headers).await?;
    let payload = json_body(payload)?;
    media::kling_generate(&state, payload).await.map(Json)
}

pub async fn kling_photo_to_live(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PhotoToLiveRequest>, JsonRejection>,
) -> Result<Json<Submitted>, ServiceError> {
    authenticate(&state, &headers).await?;
    let payload = json_body(payload)?;
    media::kling_photo_to_live(&state, payload).await.map(Json)
}

pub async fn kling_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<KlingQueryParams>,
) -> Result<Json<TaskView>, ServiceError> {
    authenticate(&state, &headers).await?;
    media::kling_query(&state, params).await.map(Json)
}

pub async fn flux(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<FluxResponse>, ServiceError> {
    authenticate(&state, &headers).await?;
    let form = read_form(multipart).await?;
    media::flux(&state, form).await.map(Json)
}

pub async fn gemini_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ImagesResponse>, ServiceError> {
    authenticate(&state, &headers).await?;
    let form = read_form(multipart).await?;
    media::gemini_image(&state, form).await.map(Json)
}

pub async fn qwen(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ImagesResponse>, ServiceError> {
    authenticate(&state, &headers).await?;
    let form = read_form(multipart).await?;
    media::qwen(&state, form).await.map(Json)
}

pub async fn photo_to_live_prompt(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PromptResponse>, ServiceError> {
    authenticate(&state, &headers).await?;
    let form = read_form(multipart).await?;
    media::photo_to_live_prompt(&state, form).await.map(Json)
}

pub async fn reverse_pose(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PoseCaptionResponse>, ServiceError> {
    authenticate(&state, &headers).await?;
    let form = read_form(multipart).await?;
    media::reverse_pose(&state, form).await.map(Json)
}

pub async fn video_generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<VideoGenerateRequest>, JsonRejection>,
) -> Result<Json<Value>, ServiceError> {
    authenticate(&state, &headers).await?;
    let payload = json_body(payload)?;
    media::video_generate(&state, payload).await.map(Json)
}

pub async fn video_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<VideoQueryRequest>, JsonRejection>,
) -> Result<Json<Value>, ServiceError> {
    authenticate(&state, &headers).await?;
    let payload = json_body(payload)?;
    media::video_query(&state, payload).await.map(Json)
}

pub async fn upload_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadImageResponse>, ServiceError> {
    let user = authenticate(&state, &headers).await?;
    let form = read_form(multipart).await?;
    media::upload_image(&state, &user, form).await.map(Json)
}

pub async fn upload_to_aimovely(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AimovelyUploadResponse>, ServiceError> {
    authenticate(&state, &headers).await?;
    let form = read_form(multipart).await?;
    media::upload_to_aimovely(&state, form).await.map(Json)
}

pub async fn resource_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AimovelyUploadResponse>, ServiceError> {
    authenticate(&state, &headers).await?;
    let form = read_form(multipart).await?;
    media::resource_upload(&state, form).await.map(Json)
}

fn attachment(download: Download) -> Response {
    let mut response = (StatusCode::OK, download.bytes).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&download.content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&download.disposition) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(download.cache_control));
    response
}

pub async fn download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ServiceError> {
    authenticate(&state, &headers).await?;
    media::download(&state, params).await.map(attachment)
}

pub async fn video_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<VideoDownloadParams>,
) -> Result<Response, ServiceError> {
    authenticate(&state, &headers).await?;
    media::video_download(&state, params).await.map(attachment)
}
