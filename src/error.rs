use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// AppError
///
/// The single tagged error type shared by the gate, the store and the handlers.
/// Every failure a caller can observe is one of these variants; handlers do no
/// recovery beyond mapping a variant to its status code.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed payload or non-numeric pagination/id input. Never reaches the store.
    #[error("{0}")]
    Validation(String),

    /// Missing, invalid or expired session credential.
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated identity does not match the claimed owner.
    #[error("Forbidden: access to this resource is denied")]
    Forbidden,

    /// Plain lookup miss on a read path.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Owner-scoped mutation matched zero rows. Deliberately does not say which
    /// of "missing" and "someone else's" applies.
    #[error("{0} not found or not owned by user")]
    NotFoundOrNotOwned(&'static str),

    #[error("user already liked this post")]
    AlreadyLiked,

    #[error("user hasn't liked this post")]
    NotLiked,

    #[error("a user with that email or username already exists")]
    UserExists,

    /// Unexpected storage or crypto fault. The detail is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for store and handler logic.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Stable, machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::Unauthenticated(_) => "UNAUTHENTICATED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::NotFoundOrNotOwned(_) => "NOT_FOUND_OR_NOT_OWNED",
            AppError::AlreadyLiked => "ALREADY_LIKED",
            AppError::NotLiked => "NOT_LIKED",
            AppError::UserExists => "USER_EXISTS",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) | AppError::NotFoundOrNotOwned(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyLiked | AppError::NotLiked | AppError::UserExists => {
                StatusCode::CONFLICT
            }
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// --- Extractor rejections ---
// A body, path or query string that does not parse never reaches the store.

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(format!("Invalid request payload: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(format!("Invalid path parameter: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(format!("Invalid query string: {}", rejection.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::Internal(detail) => {
                tracing::error!(detail = %detail, "request failed with an internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "code": self.error_code(),
            "message": message,
            "data": null,
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_mapping() {
        assert_eq!(AppError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthenticated("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("post").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::NotFoundOrNotOwned("post").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::AlreadyLiked.status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::NotLiked.status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::Internal("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn ownership_miss_does_not_reveal_existence() {
        assert_eq!(
            AppError::NotFoundOrNotOwned("post").to_string(),
            "post not found or not owned by user"
        );
    }

    #[tokio::test]
    async fn internal_detail_is_not_returned() {
        let resp = AppError::Internal("connection refused at 10.0.0.3".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "INTERNAL");
        assert_eq!(body["message"], "Internal server error");
    }
}
