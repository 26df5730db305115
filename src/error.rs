//! Status-carrying error value shared by every stage of the pipeline.
//!
//! Suppliers, the decoder and the codec all fail with an [`IpxError`];
//! nothing in between catches it. The HTTP facade maps it to a shaped
//! response exactly once at the outer boundary.

use axum::http::StatusCode;
use thiserror::Error;

/// Error value carried from any pipeline stage to the HTTP boundary.
///
/// Clone is required: a memoized producer stores its failure and replays
/// it to every subsequent caller of the same image request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IpxError {
    /// Missing/invalid modifier segment, missing id, unknown source,
    /// non-file path, bad URL.
    #[error("{0}")]
    BadRequest(String),

    /// Path escape, invalid filesystem characters, disallowed host,
    /// filesystem access denial.
    #[error("{0}")]
    Forbidden(String),

    /// Filesystem artifact missing.
    #[error("{0}")]
    NotFound(String),

    /// Non-2xx from the HTTP supplier; preserves upstream status and reason.
    #[error("{message}")]
    Upstream { status: u16, message: String },

    /// Anything uncaught, including codec failures.
    #[error("{0}")]
    Internal(String),
}

impl IpxError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Upstream failure; statuses that do not map to a valid HTTP status
    /// fall back to 500.
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        let status = if StatusCode::from_u16(status).is_ok() {
            status
        } else {
            500
        };
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IpxError::BadRequest(_) => StatusCode::BAD_REQUEST,
            IpxError::Forbidden(_) => StatusCode::FORBIDDEN,
            IpxError::NotFound(_) => StatusCode::NOT_FOUND,
            IpxError::Upstream { status, .. } => StatusCode::from_u16(*status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            IpxError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn status_message(&self) -> &str {
        match self {
            IpxError::BadRequest(m)
            | IpxError::Forbidden(m)
            | IpxError::NotFound(m)
            | IpxError::Internal(m)
            | IpxError::Upstream { message: m, .. } => m,
        }
    }
}

impl From<image::ImageError> for IpxError {
    fn from(value: image::ImageError) -> Self {
        IpxError::Internal(value.to_string())
    }
}
