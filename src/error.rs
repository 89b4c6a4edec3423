//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **AppError**: failures of the HTTP surface (config endpoints and the
//!   WebSocket upgrade), converted into JSON HTTP responses through actix's `ResponseError`.
//! - **RequestError**: failures of a single WebSocket request. These never
//!   close the connection; the session turns them into an `error` message.
//!
//! Frame-level decode failures (`ProtocolError`) are deliberately *not* part
//! of `RequestError`: a frame that cannot be decoded has no request to answer
//! and is dropped with a log.
//!
//! ## Rust Concepts:
//! - **thiserror**: derives `Display` and `From` for the domain errors
//! - **ResponseError trait**: maps `AppError` to a status code and JSON body
//! - **`#[from]`**: lets `?` lift engine and decoder errors into `RequestError`

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::audio::AudioError;
use crate::protocol::ProtocolError;
use crate::spectrogram::SpectrogramError;

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **ValidationError**: Data validation failed (400 errors)
/// - **Unavailable**: No capacity for another WebSocket session (503 errors)
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    ValidationError(String),
    Unavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// JSON error body:
/// ```json
/// { "error": { "type": "validation_error", "message": "...", "timestamp": "..." } }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::ValidationError(msg) => ("validation_error", msg),
            AppError::Unavailable(msg) => ("service_unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Malformed JSON from a client is a 400, not a 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Why a routed request could not be served.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Content does not match the handler's schema
    #[error("invalid request content: {0}")]
    InvalidContent(String),

    /// A data request arrived as a text frame
    #[error("request requires a binary payload with the audio file")]
    MissingPayload,

    #[error(transparent)]
    Spectrogram(#[from] SpectrogramError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    /// The response itself could not be framed
    #[error("failed to encode response: {0}")]
    Encode(#[from] ProtocolError),
}

impl RequestError {
    /// Machine-readable code sent in the `error` message.
    pub fn code(&self) -> &'static str {
        match self {
            RequestError::InvalidContent(_) | RequestError::MissingPayload => "invalid_content",
            RequestError::Spectrogram(SpectrogramError::InvalidParameters(_)) => "invalid_parameters",
            RequestError::Spectrogram(SpectrogramError::InsufficientSamples { .. }) => {
                "insufficient_samples"
            }
            RequestError::Spectrogram(SpectrogramError::Cancelled) => "cancelled",
            RequestError::Audio(AudioError::PathRejected(_)) => "invalid_parameters",
            RequestError::Audio(_) => "audio_decode_error",
            RequestError::Encode(_) => "internal_error",
        }
    }

    /// Cancelled requests have nobody left to report to.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, RequestError::Spectrogram(SpectrogramError::Cancelled))
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        RequestError::InvalidContent(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            AppError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        let err: AppError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::ValidationError("x".into()).error_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::Unavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_request_error_codes() {
        let err: RequestError = SpectrogramError::InsufficientSamples {
            available: 1,
            required: 2,
        }
        .into();
        assert_eq!(err.code(), "insufficient_samples");
        assert!(err.is_reportable());

        let err: RequestError = AudioError::PathRejected("..".into()).into();
        assert_eq!(err.code(), "invalid_parameters");

        let err: RequestError = SpectrogramError::Cancelled.into();
        assert!(!err.is_reportable());

        let err: RequestError = serde_json::from_str::<u32>("\"x\"").unwrap_err().into();
        assert_eq!(err.code(), "invalid_content");
    }
}
