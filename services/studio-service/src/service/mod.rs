//! Route semantics. Every function takes the verified caller explicitly and
//! returns a JSON-ready value or a [`ServiceError`](crate::error::ServiceError).

pub mod admin;
pub mod characters;
pub mod favorites;
pub mod media;
pub mod outfits;
pub mod tasks;

use uuid::Uuid;

use crate::error::ServiceError;

/// Path ids that are not UUIDs cannot name an owned row, so they read as absent.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ServiceError::not_found(format!("{what} not found")))
}

/// Required, trimmed, non-empty string field.
pub(crate) fn required<'a>(value: Option<&'a str>, message: &str) -> Result<&'a str, ServiceError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ServiceError::validation(message))
}
