//! Recording download endpoints.

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::app::ExamHandle;

pub fn router(handle: ExamHandle) -> Router {
    Router::new()
        .route("/recordings", get(list_recordings))
        .route("/recordings/:session", get(download_recording))
        .with_state(handle)
}

async fn list_recordings(State(handle): State<ExamHandle>) -> ApiResult<Json<Value>> {
    let recordings = handle.recordings().await?;
    Ok(Json(json!({
        "count": recordings.len(),
        "recordings": recordings,
    })))
}

async fn download_recording(
    State(handle): State<ExamHandle>,
    Path(session): Path<u8>,
) -> ApiResult<Response> {
    let recording = handle
        .recording(session)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No recording for session {}", session)))?;

    info!(
        "Serving {} ({} bytes)",
        recording.suggested_filename(),
        recording.data().len()
    );

    let headers = [
        (header::CONTENT_TYPE, recording.mime_type().to_string()),
        (
            header::CONTENT_DISPOSITION,
            content_disposition(recording.suggested_filename()),
        ),
    ];

    Ok((headers, Body::from(recording.data().to_vec())).into_response())
}

/// Attachment header for `filename`. Names outside printable ASCII get a
/// plain fallback plus an RFC 5987 `filename*` carrying the exact name.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();

    if fallback == filename {
        format!("attachment; filename=\"{}\"", filename)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(filename)
        )
    }
}
