pub mod account;
pub mod health;
pub mod root;
pub mod token;
pub mod verify;

use axum::{
    extract::ConnectInfo,
    http::{header::AUTHORIZATION, HeaderMap},
};
use std::net::SocketAddr;

pub const UID_HEADER: &str = "x-tether-uid";
pub const DEVICE_ID_HEADER: &str = "x-tether-device-id";
pub const BEARER_HEADER: &str = "x-tether-bearer";

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Caller address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer.
pub(crate) fn client_ip(
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
        .map(str::to_string)
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
}

/// Bearer token from `x-tether-bearer`, else `Authorization: Bearer`.
pub(crate) fn bearer(headers: &HeaderMap) -> Option<String> {
    header_str(headers, BEARER_HEADER)
        .or_else(|| {
            header_str(headers, AUTHORIZATION.as_str()).and_then(|value| {
                value
                    .strip_prefix("Bearer ")
                    .or_else(|| value.strip_prefix("bearer "))
                    .map(str::trim)
            })
        })
        .map(str::to_string)
}
