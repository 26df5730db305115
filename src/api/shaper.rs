//! Response shaper: the safety pass every response crosses before
//! emission.
//!
//! Status messages and header values are neutralized through the
//! safe-string pass; string bodies additionally run the HTML escape so a
//! reflected error message cannot carry markup.

use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::sanitize::{escape_html, safe_string};

/// Response body shapes the shaper distinguishes: buffers pass through
/// unchanged, strings are sanitized, anything else becomes empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Buffer(Bytes),
    Text(String),
    Empty,
}

/// The response record assembled by the request lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapedResponse {
    pub status: StatusCode,
    pub status_message: String,
    pub headers: Vec<(HeaderName, String)>,
    pub body: Body,
}

impl ShapedResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            status_message: String::new(),
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.status_message = message.into();
        self
    }

    pub fn buffer(mut self, bytes: Bytes) -> Self {
        self.body = Body::Buffer(bytes);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.body = Body::Text(text.into());
        self
    }
}

/// Applies the safety pass to a response record.
pub fn shape(mut response: ShapedResponse) -> ShapedResponse {
    let message = safe_string(&response.status_message);
    response.status_message = if message.is_empty() {
        "OK".to_string()
    } else {
        message
    };

    for (_, value) in &mut response.headers {
        *value = safe_string(value);
    }

    response.body = match response.body {
        Body::Buffer(bytes) => Body::Buffer(bytes),
        Body::Text(text) => Body::Text(escape_html(&safe_string(&text))),
        Body::Empty => Body::Empty,
    };

    response
}

impl IntoResponse for ShapedResponse {
    fn into_response(self) -> Response {
        let shaped = shape(self);

        let mut response = match shaped.body {
            Body::Buffer(bytes) => bytes.into_response(),
            Body::Text(text) => text.into_response(),
            Body::Empty => ().into_response(),
        };
        *response.status_mut() = shaped.status;

        let headers = response.headers_mut();
        if matches!(shaped.status, StatusCode::NOT_MODIFIED) {
            headers.remove(header::CONTENT_TYPE);
        }
        for (name, value) in shaped.headers {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_defaults_message_to_ok() {
        let shaped = shape(ShapedResponse::new(StatusCode::OK));
        assert_eq!(shaped.status_message, "OK");
    }

    #[test]
    fn test_shape_neutralizes_status_message() {
        let shaped = shape(
            ShapedResponse::new(StatusCode::BAD_REQUEST).message("bad\r\nrequest"),
        );
        assert_eq!(shaped.status_message, "bad\\r\\nrequest");
    }

    #[test]
    fn test_shape_sanitizes_header_values() {
        let shaped = shape(
            ShapedResponse::new(StatusCode::OK)
                .header(HeaderName::from_static("x-probe"), "a\"b\nc"),
        );
        let value = &shaped.headers[0].1;
        // Raw control bytes are gone; the quote survives only escaped.
        assert!(!value.contains('\n'));
        assert!(!value.contains('\r'));
        assert_eq!(value, "a\\\"b\\nc");
    }

    #[test]
    fn test_shape_escapes_script_in_text_body() {
        let shaped = shape(
            ShapedResponse::new(StatusCode::INTERNAL_SERVER_ERROR)
                .text("IPX Error: <script>alert(1)</script>"),
        );
        match shaped.body {
            Body::Text(text) => {
                assert!(!text.contains("<script>"));
                assert!(!text.contains('\n'));
            }
            _ => panic!("expected text body"),
        }
    }

    #[test]
    fn test_shape_passes_buffers_untouched() {
        let payload = Bytes::from_static(b"<script>not html, raw image bytes");
        let shaped = shape(ShapedResponse::new(StatusCode::OK).buffer(payload.clone()));
        assert_eq!(shaped.body, Body::Buffer(payload));
    }
}
