use crate::session::VerifiedSession;
use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

/// Profile returned to a freshly authenticated client.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoadIn {
    pub identity: String,
    pub account_id: Uuid,
    pub device_id: String,
    pub is_verified: bool,
    pub is_complete: bool,
    pub two_fa_enabled: bool,
}

impl From<&VerifiedSession> for LoadIn {
    fn from(session: &VerifiedSession) -> Self {
        Self {
            identity: session.identity.clone(),
            account_id: session.account_id,
            device_id: session.device_id.clone(),
            is_verified: session.is_verified,
            is_complete: session.is_complete,
            two_fa_enabled: session.two_fa_enabled,
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/account/verify-token",
    responses(
        (status = 200, description = "Token verified"),
        (status = 401, description = "Token rejected", body = crate::api::error::ErrorBody),
    ),
    tag = "account",
)]
pub async fn verify_token() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "message": "Token verified" })))
}

#[utoipa::path(
    get,
    path = "/v1/account/loadin",
    responses(
        (status = 200, description = "Account profile", body = LoadIn),
        (status = 401, description = "Token rejected", body = crate::api::error::ErrorBody),
    ),
    tag = "account",
)]
#[instrument(skip_all, fields(account_id = %session.account_id))]
pub async fn loadin(Extension(session): Extension<VerifiedSession>) -> impl IntoResponse {
    (StatusCode::OK, Json(LoadIn::from(&session)))
}
