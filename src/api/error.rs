//! API error handling for consistent JSON error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::app::CommandError;
use crate::exam::FlowError;

/// API error type that converts to JSON responses.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": true,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        let status = match &err {
            CommandError::Flow(FlowError::MissingCredentials) => StatusCode::BAD_REQUEST,
            CommandError::Flow(FlowError::AuthenticationFailed) => StatusCode::UNAUTHORIZED,
            CommandError::Flow(_) => StatusCode::CONFLICT,
            CommandError::Acquisition(_) | CommandError::Unavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        Self::new(status, err.to_string())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::ExamStep;
    use crate::media::AcquisitionError;

    #[test]
    fn test_command_error_status_mapping() {
        let cases = [
            (
                CommandError::Flow(FlowError::MissingCredentials),
                StatusCode::BAD_REQUEST,
            ),
            (
                CommandError::Flow(FlowError::AuthenticationFailed),
                StatusCode::UNAUTHORIZED,
            ),
            (
                CommandError::Flow(FlowError::InvalidStep {
                    action: "continue",
                    step: ExamStep::Dashboard,
                }),
                StatusCode::CONFLICT,
            ),
            (
                CommandError::Acquisition(AcquisitionError::PermissionDenied),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_user_facing_messages_pass_through() {
        let err = ApiError::from(CommandError::Acquisition(AcquisitionError::DeviceUnreadable));
        assert_eq!(err.message, "Hardware error. Camera might be in use.");
    }
}
