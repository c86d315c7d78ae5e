use crate::session::{ErrorClass, SessionError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use utoipa::ToSchema;

/// Error body returned by every endpoint.
#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Session(SessionError),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl ApiError {
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest(reason.into())
    }

    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            Self::BadRequest(reason) => (StatusCode::BAD_REQUEST, "bad_request", reason.clone()),
            Self::Session(err) => match err.class() {
                ErrorClass::BadRequest => (StatusCode::BAD_REQUEST, "bad_request", err.to_string()),
                ErrorClass::NotFound => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
                // the specific cause is only logged
                ErrorClass::Unauthorized => {
                    let reason = if matches!(err, SessionError::InvalidCredentials) {
                        "invalid credentials"
                    } else {
                        "unauthorized"
                    };
                    (StatusCode::UNAUTHORIZED, "unauthorized", reason.to_string())
                }
                ErrorClass::Internal => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal server error".to_string(),
                ),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, reason) = self.parts();

        match &self {
            Self::Session(err) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!("Failed to handle request: {err}");
            }
            Self::Session(err) => debug!(code, "request rejected: {err}"),
            Self::BadRequest(_) => debug!(code, "bad request: {reason}"),
        }

        (
            status,
            Json(ErrorBody {
                error: reason,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{keys::KeyError, keys::KeyKind, store::StoreError};
    use anyhow::Result;
    use axum::body::to_bytes;

    async fn render(err: ApiError) -> Result<(StatusCode, ErrorBody)> {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, serde_json::from_slice(&body)?))
    }

    #[tokio::test]
    async fn unauthorized_reasons_are_generic() -> Result<()> {
        let (status, body) = render(SessionError::TokenMismatch.into()).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.error, "unauthorized");
        assert_eq!(body.code, "unauthorized");

        let (_, body) = render(
            SessionError::KeyVersionMissing {
                kind: KeyKind::AsymmetricPublic,
                version: 4,
            }
            .into(),
        )
        .await?;
        assert_eq!(body.error, "unauthorized");

        let (_, body) = render(SessionError::InvalidCredentials.into()).await?;
        assert_eq!(body.error, "invalid credentials");
        Ok(())
    }

    #[tokio::test]
    async fn internal_errors_hide_the_cause() -> Result<()> {
        let (status, body) =
            render(SessionError::Store(StoreError::Unavailable("pg down".to_string())).into())
                .await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "internal");
        assert!(!body.error.contains("pg down"));

        let (status, _) =
            render(SessionError::Key(KeyError::NoVersions(KeyKind::Symmetric)).into()).await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        Ok(())
    }

    #[tokio::test]
    async fn not_found_and_bad_request() -> Result<()> {
        let (status, body) = render(SessionError::NoSessionForAccount.into()).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, "not_found");

        let (status, body) = render(ApiError::bad_request("scope is required")).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "scope is required");
        assert_eq!(body.code, "bad_request");
        Ok(())
    }
}
