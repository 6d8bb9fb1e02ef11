use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Coarse failure category reported to callers next to the specific code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Forbidden,
    Authentication,
    TransientDependency,
    Internal,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    // Validation
    #[error("cannot send a friend request to yourself")]
    SelfRequest,
    #[error("search query must be at least {min} characters")]
    InvalidQuery { min: usize },
    #[error("unknown user id: {0}")]
    InvalidUserId(String),
    #[error("message content cannot be empty")]
    EmptyContent,
    #[error("message content exceeds {max} characters")]
    ContentTooLong { max: usize },
    #[error("{0}")]
    BadRequest(String),

    // Not found
    #[error("recipient not found: {0}")]
    RecipientNotFound(String),
    #[error("{0} not found")]
    NotFound(&'static str),

    // Conflict
    #[error("already friends with this user")]
    AlreadyFriends,
    #[error("friend request already pending")]
    DuplicatePending,
    #[error("friend request already resolved")]
    AlreadyResolved,
    #[error("concurrent update did not settle: {0}")]
    Contended(&'static str),

    // Forbidden
    #[error("{0}")]
    Forbidden(&'static str),

    // Authentication
    #[error("authentication failed: {0}")]
    AuthenticationFailed(&'static str),

    // Side channels
    #[error("dependency unavailable: {0}")]
    TransientDependency(String),

    // Internal
    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SelfRequest
            | Error::InvalidQuery { .. }
            | Error::InvalidUserId(_)
            | Error::EmptyContent
            | Error::ContentTooLong { .. }
            | Error::BadRequest(_) => ErrorKind::Validation,
            Error::RecipientNotFound(_) | Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyFriends
            | Error::DuplicatePending
            | Error::AlreadyResolved
            | Error::Contended(_) => ErrorKind::Conflict,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::AuthenticationFailed(_) => ErrorKind::Authentication,
            Error::TransientDependency(_) => ErrorKind::TransientDependency,
            Error::Store(_) | Error::Json(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable identifier for the specific failure.
    pub fn code(&self) -> &'static str {
        match self {
            Error::SelfRequest => "self_request",
            Error::InvalidQuery { .. } => "invalid_query",
            Error::InvalidUserId(_) => "invalid_user_id",
            Error::EmptyContent => "empty_content",
            Error::ContentTooLong { .. } => "content_too_long",
            Error::BadRequest(_) => "bad_request",
            Error::RecipientNotFound(_) => "recipient_not_found",
            Error::NotFound(_) => "not_found",
            Error::AlreadyFriends => "already_friends",
            Error::DuplicatePending => "duplicate_pending",
            Error::AlreadyResolved => "already_resolved",
            Error::Contended(_) => "contended",
            Error::Forbidden(_) => "forbidden",
            Error::AuthenticationFailed(_) => "authentication_failed",
            Error::TransientDependency(_) => "transient_dependency",
            Error::Store(_) | Error::Json(_) | Error::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            // The public surface reports conflicts as plain bad requests.
            ErrorKind::Validation | ErrorKind::Conflict => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::TransientDependency => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for sqlite UNIQUE constraint failures.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Store(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

impl Error {
    /// Message safe to show the caller. Internal details stay in the logs.
    pub fn client_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => {
                tracing::error!("Internal error: {}", self);
                "internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.client_message();

        let body = Json(json!({
            "error": {
                "kind": self.kind(),
                "code": self.code(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_surface_as_bad_request() {
        assert_eq!(Error::DuplicatePending.status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::AlreadyResolved.kind(), ErrorKind::Conflict);
        assert_eq!(Error::SelfRequest.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn not_found_and_forbidden_statuses() {
        assert_eq!(
            Error::RecipientNotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(Error::Forbidden("nope").status(), StatusCode::FORBIDDEN);
        assert_eq!(
            Error::AuthenticationFailed("missing token").status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn internal_errors_are_not_unique_violations() {
        assert!(!Error::Internal("boom".into()).is_unique_violation());
        assert!(!Error::Store(sqlx::Error::RowNotFound).is_unique_violation());
    }

    #[test]
    fn client_message_hides_internals() {
        assert_eq!(
            Error::Internal("db path /secret".into()).client_message(),
            "internal server error"
        );
        assert_eq!(
            Error::EmptyContent.client_message(),
            "message content cannot be empty"
        );
    }
}
