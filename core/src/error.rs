//! Error types for the inventory API client.
//!
//! # Design
//! `NotFound` gets a dedicated variant because callers frequently distinguish
//! "the entity does not exist" from "the server returned an unexpected
//! status." Structured upstream error bodies land in `Api`; anything else
//! non-2xx lands in `HttpError` with the raw status code and body.
//! `ExpandTooDeep` is raised before any request is built, so callers can tell
//! a bad query apart from a failed round-trip.

use thiserror::Error;

use crate::types::ApiErrorItem;

/// Errors returned by the composer, the `ApiClient` parse methods and the
/// batch drain.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The expand tree nests deeper than the API allows.
    #[error("expand depth cannot exceed {max_levels} levels")]
    ExpandTooDeep { max_levels: usize },

    /// The server returned 404: the requested entity does not exist.
    #[error("resource not found")]
    NotFound,

    /// The server returned a non-2xx status with a structured error body.
    #[error("API error (HTTP {status}): {}", summarize(.errors))]
    Api {
        status: u16,
        errors: Vec<ApiErrorItem>,
    },

    /// The server returned a non-2xx status other than 404 and the body was
    /// not a recognizable error document.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// The injected transport failed to complete the round-trip.
    #[error("transport failed: {0}")]
    Transport(String),

    /// Client configuration is missing or malformed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for client operations.
pub type ApiResult<T> = Result<T, ApiError>;

fn summarize(errors: &[ApiErrorItem]) -> String {
    errors
        .iter()
        .map(|e| match e.code {
            Some(code) => format!("[{code}] {}", e.error),
            None => e.error.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}
