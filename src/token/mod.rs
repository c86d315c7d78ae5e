//! RS256 access tokens.
//!
//! Tokens are compact JWTs: `base64url(header).base64url(claims).base64url(sig)`.
//! Minting only ever touches the private key, verification only the public key.

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

/// Default access token lifetime in seconds.
pub const ACCESS_TOKEN_TTL: i64 = 24 * 60 * 60;

const TOKEN_ID_BYTES: usize = 8;
const REFRESH_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Header {
    alg: String,
    typ: String,
}

impl Header {
    fn rs256() -> Self {
        Self {
            alg: "RS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub aud: Vec<String>,
    pub sub: String,
    pub account_id: Uuid,
    pub device_id: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct Minted {
    pub token: String,
    pub token_id: String,
    pub claims: Claims,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to decode key material")]
    KeyDecode,
    #[error("invalid token format")]
    TokenFormat,
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("signing failed")]
    Signing(#[from] rsa::signature::Error),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::TokenFormat)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn decode_private_key(pem: &str) -> Result<RsaPrivateKey, Error> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|_| Error::KeyDecode)
}

fn decode_public_key(pem: &str) -> Result<RsaPublicKey, Error> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|_| Error::KeyDecode)
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Random 8-byte token id, hex encoded.
#[must_use]
pub fn generate_token_id() -> String {
    random_hex(TOKEN_ID_BYTES)
}

/// Random 32-byte refresh token, hex encoded.
#[must_use]
pub fn generate_refresh_token() -> String {
    random_hex(REFRESH_TOKEN_BYTES)
}

/// Sign a new access token for `device_id` valid for `ttl` seconds from `now`.
///
/// # Errors
///
/// Returns [`Error::KeyDecode`] if `private_key_pem` is not an RSA private key
/// (PKCS#8 or PKCS#1 PEM), or an encoding/signing error.
pub fn mint(
    device_id: &str,
    account_id: Uuid,
    subject: &str,
    audience: &[String],
    private_key_pem: &str,
    now: i64,
    ttl: i64,
) -> Result<Minted, Error> {
    let private_key = decode_private_key(private_key_pem)?;
    let token_id = generate_token_id();

    let claims = Claims {
        aud: audience.to_vec(),
        sub: subject.to_string(),
        account_id,
        device_id: device_id.to_string(),
        iat: now,
        exp: now + ttl,
        jti: token_id.clone(),
    };

    let header_b64 = b64e_json(&Header::rs256())?;
    let claims_b64 = b64e_json(&claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature: Signature = signing_key.try_sign_with_rng(&mut OsRng, signing_input.as_bytes())?;
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());

    Ok(Minted {
        token: format!("{signing_input}.{signature_b64}"),
        token_id,
        claims,
    })
}

/// Check the signature of `token` against `public_key_pem` and its expiry against `now`.
///
/// Audience is not checked here.
///
/// # Errors
///
/// - [`Error::KeyDecode`] if the public key cannot be parsed,
/// - [`Error::InvalidSignature`] for a bad signature,
/// - [`Error::TokenFormat`]/[`Error::Json`]/[`Error::UnsupportedAlg`] for malformed tokens,
/// - [`Error::Expired`] once `now` is past `exp`.
pub fn verify(token: &str, public_key_pem: &str, now: i64) -> Result<Claims, Error> {
    let public_key = decode_public_key(public_key_pem)?;

    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() {
        return Err(Error::TokenFormat);
    }

    let header: Header = b64d_json(header_b64)?;
    if header.alg != "RS256" {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature_bytes =
        Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::TokenFormat)?;
    let signature =
        Signature::try_from(signature_bytes.as_slice()).map_err(|_| Error::InvalidSignature)?;
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| Error::InvalidSignature)?;

    let claims: Claims = b64d_json(claims_b64)?;
    if now > claims.exp {
        return Err(Error::Expired);
    }

    Ok(claims)
}

/// `true` when `path` contains at least one allowed audience prefix.
#[must_use]
pub fn audience_allows(audience: &[String], path: &str) -> bool {
    audience.iter().any(|prefix| path.contains(prefix.as_str()))
}
