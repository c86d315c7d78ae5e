use super::{client_ip, header_str, DEVICE_ID_HEADER};
use crate::{
    api::error::{ApiError, ErrorBody},
    session::{IssueRequest, SessionManager},
};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Extension},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tracing::{debug, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Default)]
pub struct TokenRequest {
    #[serde(default)]
    username: Option<String>,
    /// Account password, or the current refresh token for `refresh`.
    /// Ignored by `revoke`.
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    grant_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl std::fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRequest")
            .field("username", &self.username)
            .field("password", &"***")
            .field("grant_type", &self.grant_type)
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboarding_redirect: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RevokeResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GrantType {
    Password,
    Refresh,
    Revoke,
}

impl FromStr for GrantType {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "password" => Ok(Self::Password),
            "refresh" => Ok(Self::Refresh),
            "revoke" => Ok(Self::Revoke),
            _ => Err(ApiError::bad_request("invalid grant_type")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    Internal,
    External,
}

impl FromStr for Scope {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "internal" => Ok(Self::Internal),
            "external" => Ok(Self::External),
            _ => Err(ApiError::bad_request("invalid scope")),
        }
    }
}

/// A validated token request.
#[derive(Debug)]
struct Grant {
    username: String,
    secret: String,
    grant_type: GrantType,
    scope: Scope,
}

fn required(value: Option<String>, reason: &'static str) -> Result<String, ApiError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::bad_request(reason))
}

fn validate(request: TokenRequest) -> Result<Grant, ApiError> {
    let username = required(request.username, "username is required")?.to_lowercase();
    let scope = required(request.scope, "scope is required")?.parse()?;
    let grant_type = required(request.grant_type, "grant_type is required")?.parse()?;

    Ok(Grant {
        username,
        secret: request.password.unwrap_or_default(),
        grant_type,
        scope,
    })
}

#[utoipa::path(
    post,
    path = "/oauth2/token",
    request_body = TokenRequest,
    params(
        ("x-tether-device-id" = String, Header, description = "Device identifier"),
    ),
    responses(
        (status = 200, description = "Token pair issued, rotated or session revoked", body = TokenResponse),
        (status = 400, description = "Malformed request", body = ErrorBody),
        (status = 401, description = "Credentials or refresh token rejected", body = ErrorBody),
        (status = 404, description = "Unknown account or device session", body = ErrorBody),
    ),
    tag = "oauth2",
)]
#[instrument(skip(manager, headers, payload))]
pub async fn token(
    Extension(manager): Extension<Arc<SessionManager>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        debug!("Failed to decode token request: {rejection}");
        ApiError::bad_request("invalid request body")
    })?;

    let grant = validate(request)?;
    let device_id = header_str(&headers, DEVICE_ID_HEADER)
        .ok_or_else(|| ApiError::bad_request("device id is required"))?
        .to_string();

    debug!(grant_type = ?grant.grant_type, scope = ?grant.scope, "token request");

    match grant.grant_type {
        GrantType::Password => {
            if header_str(&headers, USER_AGENT.as_str()).is_none() {
                return Err(ApiError::bad_request("user agent is required"));
            }

            let issued = manager
                .issue(IssueRequest {
                    identity: grant.username,
                    password: SecretString::from(grant.secret),
                    device_id,
                    ip_address: client_ip(&headers, peer.as_ref()),
                })
                .await?;

            Ok((
                StatusCode::OK,
                Json(TokenResponse {
                    access_token: issued.access_token,
                    token_type: "bearer".to_string(),
                    refresh_token: issued.refresh_token,
                    onboarding_redirect: Some(issued.onboarding_required),
                    success: Some(true),
                }),
            )
                .into_response())
        }
        GrantType::Refresh => {
            let issued = manager
                .refresh(&grant.username, &device_id, &grant.secret)
                .await?;

            Ok((
                StatusCode::OK,
                Json(TokenResponse {
                    access_token: issued.access_token,
                    token_type: "bearer".to_string(),
                    refresh_token: issued.refresh_token,
                    onboarding_redirect: None,
                    success: None,
                }),
            )
                .into_response())
        }
        GrantType::Revoke => {
            manager.revoke(&grant.username, &device_id).await?;

            Ok((
                StatusCode::OK,
                Json(RevokeResponse {
                    success: true,
                    message: "session revoked".to_string(),
                }),
            )
                .into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, grant_type: &str, scope: &str) -> TokenRequest {
        TokenRequest {
            username: Some(username.to_string()),
            password: Some("secret".to_string()),
            grant_type: Some(grant_type.to_string()),
            scope: Some(scope.to_string()),
        }
    }

    fn reason(result: Result<Grant, ApiError>) -> Option<String> {
        match result {
            Err(ApiError::BadRequest(reason)) => Some(reason),
            _ => None,
        }
    }

    #[test]
    fn validate_lowercases_username() {
        let grant = validate(request(" Alice@Example.COM ", "password", "external"));
        assert!(matches!(
            grant,
            Ok(Grant {
                ref username,
                grant_type: GrantType::Password,
                scope: Scope::External,
                ..
            }) if username == "alice@example.com"
        ));
    }

    #[test]
    fn validate_reports_the_first_problem() {
        let mut missing = request("a@x.com", "password", "internal");
        missing.username = None;
        assert_eq!(
            reason(validate(missing)).as_deref(),
            Some("username is required")
        );

        let mut missing = request("a@x.com", "password", "internal");
        missing.scope = Some(String::new());
        assert_eq!(
            reason(validate(missing)).as_deref(),
            Some("scope is required")
        );

        assert_eq!(
            reason(validate(request("a@x.com", "password", "admin"))).as_deref(),
            Some("invalid scope")
        );

        let mut missing = request("a@x.com", "password", "internal");
        missing.grant_type = None;
        assert_eq!(
            reason(validate(missing)).as_deref(),
            Some("grant_type is required")
        );

        assert_eq!(
            reason(validate(request("a@x.com", "client_credentials", "internal"))).as_deref(),
            Some("invalid grant_type")
        );
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", request("a@x.com", "password", "internal"));
        assert!(!rendered.contains("secret"));
    }
}
