//! HTTP error mapping.

use axum::{http::StatusCode, response::IntoResponse, Json};

use callsheet_clone::CloneError;

#[derive(Debug)]
pub enum ApiError {
    Internal(String),
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
}

impl From<callsheet_core::Error> for ApiError {
    fn from(err: callsheet_core::Error) -> Self {
        match &err {
            callsheet_core::Error::NotFound(msg) => ApiError::NotFound(msg.clone()),
            callsheet_core::Error::DocumentNotFound { .. } => ApiError::NotFound(err.to_string()),
            callsheet_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg.clone()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<CloneError> for ApiError {
    fn from(err: CloneError) -> Self {
        match &err {
            CloneError::JobNotFound(_) | CloneError::RootNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            CloneError::DuplicateExists { .. }
            | CloneError::InvalidTransition { .. }
            | CloneError::JobClaimed(_)
            | CloneError::JobInProgress(_) => ApiError::Conflict(err.to_string()),
            CloneError::Config(_) => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn status(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_clone_errors_map_to_status() {
        assert_eq!(status(CloneError::JobNotFound(Uuid::nil())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(CloneError::DuplicateExists {
                owner_namespace: Uuid::nil(),
                existing_root_id: Uuid::nil(),
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status(CloneError::JobClaimed(Uuid::nil())), StatusCode::CONFLICT);
        assert_eq!(status(CloneError::JobInProgress(Uuid::nil())), StatusCode::CONFLICT);
        assert_eq!(status(CloneError::Config("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(CloneError::RootCreationFailure(callsheet_core::Error::Store(
                "down".into()
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_core_errors_map_to_status() {
        assert_eq!(
            status(callsheet_core::Error::InvalidInput("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(callsheet_core::Error::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
