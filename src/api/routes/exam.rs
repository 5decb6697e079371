//! Exam flow endpoints.
//!
//! Provides HTTP endpoints for:
//! - Flow snapshot (GET /status)
//! - Login (POST /login)
//! - Device check retry (POST /devices/retry)
//! - Session control (POST /exam/start, /session/finish, /session/rescue,
//!   /session/reload, /break/continue)

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::app::{ExamHandle, ExamSnapshot};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "fullName")]
    pub full_name: String,
    pub password: String,
}

pub fn router(handle: ExamHandle) -> Router {
    Router::new()
        .route("/status", get(exam_status))
        .route("/login", post(login))
        .route("/devices/retry", post(retry_devices))
        .route("/exam/start", post(start_exam))
        .route("/session/finish", post(finish_session))
        .route("/session/rescue", post(rescue_session))
        .route("/session/reload", post(reload_session))
        .route("/break/continue", post(continue_from_break))
        .with_state(handle)
}

async fn exam_status(State(handle): State<ExamHandle>) -> ApiResult<Json<ExamSnapshot>> {
    Ok(Json(handle.snapshot().await?))
}

async fn login(
    State(handle): State<ExamHandle>,
    body: Option<Json<LoginRequest>>,
) -> ApiResult<Json<Value>> {
    let Json(request) = body.ok_or_else(|| ApiError::bad_request("Please fill in all fields"))?;
    info!("Login attempt for '{}'", request.full_name);

    let user = handle.login(&request.full_name, &request.password).await?;
    Ok(Json(json!({
        "success": true,
        "user": user,
    })))
}

async fn retry_devices(State(handle): State<ExamHandle>) -> ApiResult<Json<Value>> {
    let readiness = handle.retry_devices().await?;
    Ok(Json(json!({
        "success": true,
        "readiness": readiness,
        "can_start": readiness.all_ready(),
    })))
}

async fn start_exam(State(handle): State<ExamHandle>) -> ApiResult<Json<Value>> {
    let step = handle.start_exam().await?;
    Ok(Json(json!({ "success": true, "step": step })))
}

async fn finish_session(State(handle): State<ExamHandle>) -> ApiResult<Json<Value>> {
    let status = handle.finish_session().await?;
    Ok(Json(json!({ "success": true, "session": status })))
}

async fn rescue_session(State(handle): State<ExamHandle>) -> ApiResult<Json<Value>> {
    let status = handle.rescue_session().await?;
    Ok(Json(json!({ "success": true, "session": status })))
}

async fn reload_session(State(handle): State<ExamHandle>) -> ApiResult<Json<Value>> {
    let session_number = handle.reload_session().await?;
    Ok(Json(json!({
        "success": true,
        "session_number": session_number,
        "message": format!("Session {} restarted", session_number),
    })))
}

async fn continue_from_break(State(handle): State<ExamHandle>) -> ApiResult<Json<Value>> {
    let step = handle.continue_from_break().await?;
    Ok(Json(json!({ "success": true, "step": step })))
}
