use super::{bearer, header_str, DEVICE_ID_HEADER, UID_HEADER};
use crate::{
    api::error::ApiError,
    session::{SessionManager, VerifyRequest},
};
use axum::{
    extract::{Extension, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::instrument;

/// `(username, device_id)` from the query string, used by clients that cannot
/// set headers (websocket upgrades).
fn query_identity(query: Option<&str>) -> (Option<String>, Option<String>) {
    let mut username = None;
    let mut device_id = None;

    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "username" if username.is_none() => username = Some(value.into_owned()),
                "device_id" if device_id.is_none() => device_id = Some(value.into_owned()),
                _ => {}
            }
        }
    }

    (username, device_id)
}

/// Guard for protected routes: the caller must present the session's current
/// access token. On success the [`crate::session::VerifiedSession`] is
/// available to handlers as a request extension.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn verify_session(
    Extension(manager): Extension<Arc<SessionManager>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let verify_request = {
        let headers = request.headers();
        let (query_username, query_device) = query_identity(request.uri().query());

        VerifyRequest {
            identity: header_str(headers, UID_HEADER)
                .map(str::to_string)
                .or(query_username)
                .unwrap_or_default(),
            device_id: header_str(headers, DEVICE_ID_HEADER)
                .map(str::to_string)
                .or(query_device)
                .unwrap_or_default(),
            bearer: bearer(headers),
            path: request.uri().path().to_string(),
        }
    };

    let verified = manager.verify(verify_request).await?;

    request.extensions_mut().insert(verified);

    Ok(next.run(request).await)
}
