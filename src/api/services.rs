//! Request lifecycle for the image route, plus the health endpoint.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Json};
use chrono::DateTime;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::error;

use super::shaper::ShapedResponse;
use super::state::AppState;
use crate::error::IpxError;
use crate::resolve::decode_path;
use crate::sources::RequestOptions;

const CSP_VALUE: &str = "default-src 'none'";

/// Image endpoint (GET /<modifiers>/<id…>)
///
/// ## Flow:
/// 1. Decode the path into a modifier map and a source id
/// 2. Build the per-request image descriptor via the engine
/// 3. Resolve the source; answer 304 on a fresh `If-Modified-Since`
/// 4. Derive `Last-Modified` and `Cache-Control` from the descriptor
/// 5. Produce the encoded image; answer 304 on a matching `If-None-Match`
/// 6. Emit the body with validators, content type and CSP
///
/// Every failure funnels through [`failure_response`]; the shaped
/// response is the only exit path.
pub async fn serve_image(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> impl IntoResponse {
    match handle_image(&state, uri.path(), &headers).await {
        Ok(response) => {
            if response.status == StatusCode::NOT_MODIFIED {
                state.metrics.not_modified();
            } else {
                state.metrics.image_served();
            }
            response
        }
        Err(err) => {
            state.metrics.error();
            failure_response(err)
        }
    }
}

async fn handle_image(
    state: &AppState,
    path: &str,
    headers: &HeaderMap,
) -> Result<ShapedResponse, IpxError> {
    let decoded = decode_path(path)?;
    let img = state
        .engine
        .image(&decoded.id, decoded.modifiers, RequestOptions::default())?;

    let src = img.src().await?;

    let mut response = ShapedResponse::new(StatusCode::OK);

    if let Some(mtime) = src.mtime {
        let fresh = headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .is_some_and(|since| since.timestamp() >= mtime.timestamp());
        if fresh {
            return Ok(ShapedResponse::new(StatusCode::NOT_MODIFIED));
        }
        response = response.header(
            header::LAST_MODIFIED,
            mtime.timestamp_millis().to_string(),
        );
    }

    if let Some(max_age) = src.max_age {
        response = response.header(
            header::CACHE_CONTROL,
            format!("max-age={max_age}, public, s-maxage={max_age}"),
        );
    }

    let data = img.data().await?;

    let etag = entity_tag(&data.bytes);
    response = response.header(header::ETAG, etag.clone());

    let revalidated = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|candidate| candidate == etag);
    if revalidated {
        let mut not_modified = ShapedResponse::new(StatusCode::NOT_MODIFIED);
        not_modified.headers = response.headers;
        return Ok(not_modified);
    }

    Ok(response
        .header(
            header::CONTENT_TYPE,
            format!("image/{}", data.format),
        )
        .header(header::CONTENT_SECURITY_POLICY, CSP_VALUE)
        .buffer(data.bytes))
}

/// Stable validator over the encoded body. A bare hex token, so the
/// value crosses the header shaping pass byte-for-byte and `If-None-Match`
/// comparisons stay exact.
fn entity_tag(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut tag = String::with_capacity(32);
    for byte in &digest[..16] {
        tag.push_str(&format!("{byte:02x}"));
    }
    tag
}

/// Maps a pipeline error to its shaped response. Status-carrying errors
/// keep their status; everything else is the 500 catch-all.
fn failure_response(err: IpxError) -> ShapedResponse {
    let status = err.status_code();
    let message = match &err {
        IpxError::Internal(_) => {
            error!(error = %err, "Unhandled pipeline error");
            "IPX Error (500)".to_string()
        }
        _ => format!("IPX: {}", err.status_message()),
    };

    ShapedResponse::new(status)
        .message(message)
        .text(format!("IPX Error: {err}"))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    images_served: u64,
    not_modified: u64,
    errors: u64,
}

/// Health check endpoint (GET /health)
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    let response = HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION").to_string(),
        images_served: snapshot.images_served,
        not_modified: snapshot.not_modified,
        errors: snapshot.errors,
    };
    (StatusCode::OK, Json(response))
}
