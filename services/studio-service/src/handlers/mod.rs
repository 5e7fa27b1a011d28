//! Thin axum handlers: authenticate, extract, call into `service`.

pub mod admin;
pub mod characters;
pub mod favorites;
pub mod media;
pub mod tasks;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        Multipart,
    },
    http::StatusCode,
    Json,
};

use crate::error::ServiceError;
use crate::models::{FormData, FormFile};

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz() -> StatusCode {
    StatusCode::OK
}

fn bad_form(err: MultipartError) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::payload_too_large(err.body_text())
    } else {
        ServiceError::validation(format!("invalid multipart body: {}", err.body_text()))
    }
}

/// Unwraps a JSON body extracted as a `Result`, so handlers can authenticate
/// before a malformed body is reported.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            Err(ServiceError::payload_too_large(err.body_text()))
        }
        Err(err) => Err(ServiceError::validation(err.body_text())),
    }
}

/// Buffers a multipart body. Parts with a file name are files, the rest text.
pub(crate) async fn read_form(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<FormData, ServiceError> {
    let mut multipart = multipart.map_err(|err| {
        ServiceError::validation(format!("invalid multipart body: {}", err.body_text()))
    })?;
    let mut form = FormData::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(bad_form)?;
                form.files.insert(
                    name,
                    FormFile {
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    },
                );
            }
            None => {
                let value = field.text().await.map_err(bad_form)?;
                form.fields.insert(name, value);
            }
        }
    }
    Ok(form)
}
